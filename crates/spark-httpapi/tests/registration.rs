//! 静态类型注册管线的集成测试。
//!
//! 覆盖配置步骤累积顺序、契约之间的隔离、固化后拒绝变更以及默认协作方的 `TryAdd` 语义。

mod support;

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::Value;
use spark_httpapi::{
    ChannelFactory, ContractDescriptor, HttpApiError, HttpApiOptions, HttpApiServiceCollectionExt,
    JsonSerializer, OptionsRegistry, ServiceCollection,
};
use support::{IOrders, IUsers, RecordingTransport, block_on, host, resolved_options, services_with};

#[test]
fn repeated_registration_accumulates_steps() {
    let transport = RecordingTransport::new();
    let mut services = services_with(&transport);
    services
        .add_http_api_with::<dyn IOrders, _>(host("https://a"))
        .unwrap();
    services
        .add_http_api_with::<dyn IOrders, _>(|options: &mut HttpApiOptions| {
            options.timeout = Some(Duration::from_secs(30));
        })
        .unwrap();

    let provider = services.build_provider();
    let options = resolved_options::<dyn IOrders>(&provider);
    assert_eq!(options.http_host.as_deref(), Some("https://a"));
    assert_eq!(options.timeout, Some(Duration::from_secs(30)));

    transport.respond(200, r#"{"id":7,"status":"open"}"#);
    let orders = provider.get_required_service::<dyn IOrders>().unwrap();
    block_on(orders.get_order(7)).unwrap();
    let request = transport.last_request();
    assert_eq!(request.uri, "https://a/orders/7");
    assert_eq!(request.timeout, Some(Duration::from_secs(30)));
}

#[test]
fn distinct_contracts_do_not_share_configuration() {
    let transport = RecordingTransport::new();
    let mut services = services_with(&transport);
    let orders = services
        .add_http_api_with::<dyn IOrders, _>(host("https://orders"))
        .unwrap();
    let users = services
        .add_http_api_with::<dyn IUsers, _>(host("https://users"))
        .unwrap();
    assert_ne!(orders.name(), users.name());
    assert!(!orders.channel().same_channel(users.channel()));

    let provider = services.build_provider();
    let orders_options = resolved_options::<dyn IOrders>(&provider);
    let users_options = resolved_options::<dyn IUsers>(&provider);
    assert_eq!(orders_options.http_host.as_deref(), Some("https://orders"));
    assert_eq!(users_options.http_host.as_deref(), Some("https://users"));
    assert!(!Arc::ptr_eq(&orders_options, &users_options));

    transport.respond(200, r#"{"id":1,"name":"ada"}"#);
    let users = provider.get_required_service::<dyn IUsers>().unwrap();
    block_on(users.get_user(1)).unwrap();
    assert_eq!(transport.last_request().uri, "https://users/users/1");
}

#[test]
fn mutation_after_resolution_is_rejected() {
    let transport = RecordingTransport::new();
    let mut services = services_with(&transport);
    let builder = services
        .add_http_api_with::<dyn IOrders, _>(host("https://a"))
        .unwrap();

    let provider = services.build_provider();
    let first = resolved_options::<dyn IOrders>(&provider);
    let second = resolved_options::<dyn IOrders>(&provider);
    assert!(Arc::ptr_eq(&first, &second));

    let err = services
        .add_http_api_with::<dyn IOrders, _>(host("https://late"))
        .unwrap_err();
    assert!(matches!(err, HttpApiError::InvalidState { .. }));
    assert!(err.is_composition_error());

    let err = builder
        .configure(|options: &mut HttpApiOptions| options.use_logging = false)
        .unwrap_err();
    assert_eq!(err.code(), "httpapi.options.finalized");
    assert_eq!(
        resolved_options::<dyn IOrders>(&provider).http_host.as_deref(),
        Some("https://a")
    );
}

#[test]
fn repeated_registration_keeps_a_single_channel() {
    let transport = RecordingTransport::new();
    let mut services = services_with(&transport);
    let first = services.add_http_api::<dyn IOrders>().unwrap();
    let second = services.add_http_api::<dyn IOrders>().unwrap();
    assert!(first.channel().same_channel(second.channel()));
    assert_eq!(first.descriptor(), ContractDescriptor::of::<dyn IOrders>());

    let factory = services.singleton::<ChannelFactory>().unwrap();
    assert_eq!(factory.len(), 1);
    let registry = services.singleton::<OptionsRegistry>().unwrap();
    assert_eq!(registry.len(), 1);
}

#[test]
fn each_resolution_yields_a_fresh_proxy() {
    let transport = RecordingTransport::new();
    let mut services = services_with(&transport);
    services
        .add_http_api_with::<dyn IOrders, _>(host("https://a"))
        .unwrap();
    let provider = services.build_provider();
    let first = provider.get_required_service::<dyn IOrders>().unwrap();
    let second = provider.get_required_service::<dyn IOrders>().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}

#[test]
fn builder_and_provider_steps_run_in_order() {
    let transport = RecordingTransport::new();
    let mut services = services_with(&transport);
    services.add_singleton(Arc::new(String::from("tenant-7")));
    services
        .add_http_api_with::<dyn IOrders, _>(host("https://a"))
        .unwrap()
        .configure_with_provider(|options, provider| {
            let tenant = provider.get_required_service::<String>()?;
            options.add_default_header("x-tenant", tenant.as_str());
            Ok(())
        })
        .unwrap()
        .configure(|options| options.http_host = Some("https://b".into()))
        .unwrap();

    let options = resolved_options::<dyn IOrders>(&services.build_provider());
    assert_eq!(options.http_host.as_deref(), Some("https://b"));
    assert_eq!(
        options.default_headers,
        vec![("x-tenant".to_owned(), "tenant-7".to_owned())]
    );
}

#[test]
fn ambient_defaults_apply_before_contract_steps() {
    let transport = RecordingTransport::new();
    let mut services = services_with(&transport);
    services
        .configure_http_api_defaults(|descriptor, options| {
            options.http_host = Some("https://gateway".into());
            options
                .properties
                .insert("contract".into(), descriptor.name().to_owned());
        })
        .unwrap();
    services
        .add_http_api_with::<dyn IOrders, _>(host("https://orders"))
        .unwrap();
    services.add_http_api::<dyn IUsers>().unwrap();

    let provider = services.build_provider();
    let orders = resolved_options::<dyn IOrders>(&provider);
    let users = resolved_options::<dyn IUsers>(&provider);
    assert_eq!(orders.http_host.as_deref(), Some("https://orders"));
    assert_eq!(users.http_host.as_deref(), Some("https://gateway"));
    assert_eq!(users.properties["contract"], ContractDescriptor::of::<dyn IUsers>().name());
}

#[test]
fn ambient_defaults_reach_an_already_built_provider() {
    let transport = RecordingTransport::new();
    let mut services = services_with(&transport);
    services
        .add_http_api_with::<dyn IOrders, _>(host("https://orders"))
        .unwrap();
    let provider = services.build_provider();

    services
        .configure_http_api_defaults(|_, options| {
            options.add_default_header("x-gateway", "edge");
        })
        .unwrap();

    let options = resolved_options::<dyn IOrders>(&provider);
    assert_eq!(options.http_host.as_deref(), Some("https://orders"));
    assert_eq!(
        options.default_headers,
        vec![("x-gateway".to_owned(), "edge".to_owned())]
    );
}

#[test]
fn ambient_defaults_after_resolution_are_rejected() {
    let transport = RecordingTransport::new();
    let mut services = services_with(&transport);
    services
        .add_http_api_with::<dyn IOrders, _>(host("https://first"))
        .unwrap();
    services.add_http_api::<dyn IUsers>().unwrap();
    let provider = services.build_provider();
    resolved_options::<dyn IOrders>(&provider);

    let err = services
        .configure_http_api_defaults(|_, options| {
            options.http_host = Some("https://late".into());
        })
        .err()
        .unwrap();
    assert_eq!(
        err,
        HttpApiError::InvalidState {
            contract: ContractDescriptor::of::<dyn IOrders>().name().to_owned()
        }
    );
    assert_eq!(
        resolved_options::<dyn IOrders>(&provider).http_host.as_deref(),
        Some("https://first")
    );
    assert!(resolved_options::<dyn IUsers>(&provider).http_host.is_none());
}

#[test]
fn provider_steps_read_scope_local_services() {
    let transport = RecordingTransport::new();
    let mut services = services_with(&transport);
    services
        .add_http_api_with_provider::<dyn IOrders, _>(|options, provider| {
            let tenant = provider.get_required_service::<String>()?;
            options.http_host = Some("https://orders".into());
            options.add_default_header("x-tenant", tenant.as_str());
            Ok(())
        })
        .unwrap();
    let root = services.build_provider();

    let err = root.get_required_service::<dyn IOrders>().err().unwrap();
    assert!(matches!(err, HttpApiError::ServiceNotFound { .. }));

    let scoped = root
        .create_scope()
        .with_scoped(Arc::new(String::from("tenant-42")))
        .into_provider();
    transport.respond(200, r#"{"id":5,"status":"open"}"#);
    let orders = scoped.get_required_service::<dyn IOrders>().unwrap();
    block_on(orders.get_order(5)).unwrap();
    assert_eq!(
        transport.last_request().header("x-tenant"),
        Some("tenant-42")
    );
}

#[test]
fn cyclic_provider_steps_fail_instead_of_hanging() {
    let transport = RecordingTransport::new();
    let mut services = services_with(&transport);
    services
        .add_http_api_with_provider::<dyn IOrders, _>(|_, provider| {
            provider.get_required_service::<dyn IUsers>()?;
            Ok(())
        })
        .unwrap();
    services
        .add_http_api_with_provider::<dyn IUsers, _>(|_, provider| {
            provider.get_required_service::<dyn IOrders>()?;
            Ok(())
        })
        .unwrap();
    let provider = services.build_provider();

    let err = provider.get_required_service::<dyn IOrders>().err().unwrap();
    assert_eq!(
        err,
        HttpApiError::CyclicResolution {
            contract: ContractDescriptor::of::<dyn IOrders>().name().to_owned()
        }
    );
    assert_eq!(err.code(), "httpapi.options.cycle");

    let registry = provider.get_required_service::<OptionsRegistry>().unwrap();
    assert!(registry.first_finalized().is_none());
}

#[test]
fn host_supplied_collaborators_are_kept() {
    struct Upper;
    impl JsonSerializer for Upper {
        fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, String> {
            Ok(value.to_string().to_uppercase().into_bytes())
        }
        fn from_bytes(&self, _: &[u8]) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    let custom: Arc<dyn JsonSerializer> = Arc::new(Upper);
    let mut services = ServiceCollection::new();
    services.add_singleton::<dyn JsonSerializer>(Arc::clone(&custom));
    services.add_http_api::<dyn IOrders>().unwrap();

    let kept = services.singleton::<dyn JsonSerializer>().unwrap();
    assert!(Arc::ptr_eq(&kept, &custom));
    assert!(services.contains::<dyn spark_httpapi::KeyValueSerializer>());
    assert!(services.contains::<dyn spark_httpapi::ResponseCacheProvider>());
}

#[test]
fn missing_connector_surfaces_on_first_call() {
    let mut services = ServiceCollection::new();
    services
        .add_http_api_with::<dyn IOrders, _>(host("https://a"))
        .unwrap();
    let provider = services.build_provider();
    let orders = provider.get_required_service::<dyn IOrders>().unwrap();
    let err = block_on(orders.cancel_order(1)).unwrap_err();
    assert!(matches!(err, HttpApiError::ServiceNotFound { .. }));
}

#[test]
fn concrete_contracts_are_rejected_at_registration() {
    struct Stateful;
    impl spark_httpapi::HttpApi for Stateful {
        fn create(_: spark_httpapi::ApiDispatcher) -> Arc<Self> {
            Arc::new(Stateful)
        }
    }

    let mut services = ServiceCollection::new();
    let err = services.add_http_api::<Stateful>().unwrap_err();
    assert!(matches!(err, HttpApiError::InvalidContract { .. }));
    assert!(services.is_empty());
}

proptest! {
    #[test]
    fn steps_replay_in_registration_order(timeouts in prop::collection::vec(1u64..10_000, 1..12)) {
        let mut services = ServiceCollection::new();
        for timeout in timeouts.clone() {
            services
                .add_http_api_with::<dyn IOrders, _>(move |options: &mut HttpApiOptions| {
                    options.timeout = Some(Duration::from_millis(timeout));
                    options.add_default_header("x-step", timeout.to_string());
                })
                .unwrap();
        }

        let options = resolved_options::<dyn IOrders>(&services.build_provider());
        let last = *timeouts.last().unwrap();
        prop_assert_eq!(options.timeout, Some(Duration::from_millis(last)));
        let replayed: Vec<String> = options
            .default_headers
            .iter()
            .map(|(_, value)| value.clone())
            .collect();
        let expected: Vec<String> = timeouts.iter().map(u64::to_string).collect();
        prop_assert_eq!(replayed, expected);
    }
}
