//! 运行期类型绑定器的集成测试：与静态路径的行为一致性、空描述符与适配器失败。

mod support;

use std::sync::Arc;
use std::time::Duration;

use spark_httpapi::{
    ContractCatalog, ContractDescriptor, HttpApiError, HttpApiOptions, HttpApiServiceCollectionExt,
    OptionsMutation, ServiceCollection,
};
use support::{IOrders, IUsers, RecordingTransport, block_on, resolved_options, services_with};

fn orders_step(options: &mut HttpApiOptions) {
    options.http_host = Some("https://orders.example.com".into());
    options.timeout = Some(Duration::from_secs(5));
    options.add_default_header("x-api-key", "k1");
}

#[test]
fn runtime_path_matches_static_path() {
    let static_transport = RecordingTransport::new();
    let mut static_services = services_with(&static_transport);
    static_services
        .add_http_api_with::<dyn IOrders, _>(orders_step)
        .unwrap();

    let runtime_transport = RecordingTransport::new();
    let mut runtime_services = services_with(&runtime_transport);
    let builder = runtime_services
        .add_http_api_by_type_with(Some(ContractDescriptor::of::<dyn IOrders>()), orders_step)
        .unwrap();
    assert_eq!(builder.descriptor(), ContractDescriptor::of::<dyn IOrders>());

    let static_provider = static_services.build_provider();
    let runtime_provider = runtime_services.build_provider();
    assert_eq!(
        *resolved_options::<dyn IOrders>(&static_provider),
        *resolved_options::<dyn IOrders>(&runtime_provider)
    );

    for (provider, transport) in [
        (&static_provider, &static_transport),
        (&runtime_provider, &runtime_transport),
    ] {
        transport.respond(200, r#"[{"id":1,"status":"open"}]"#);
        let orders = provider.get_required_service::<dyn IOrders>().unwrap();
        let listed = block_on(orders.list_orders(Some("open".into()), vec![])).unwrap();
        assert_eq!(listed.len(), 1);
    }
    assert_eq!(static_transport.requests(), runtime_transport.requests());
}

#[test]
fn absent_descriptor_fails_before_any_state_changes() {
    let mut services = ServiceCollection::new();
    let err = services.add_http_api_by_type(None).unwrap_err();
    assert_eq!(err, HttpApiError::NullDescriptor);
    assert_eq!(err.code(), "httpapi.descriptor.null");
    assert!(services.is_empty());

    let err = services
        .add_http_api_by_type_with_provider(None, |_, _| Ok(()))
        .unwrap_err();
    assert_eq!(err, HttpApiError::NullDescriptor);
    assert!(services.is_empty());
}

#[test]
fn annotated_contracts_are_collected_from_inventory() {
    let catalog = ContractCatalog::global();
    for descriptor in [
        ContractDescriptor::of::<dyn IOrders>(),
        ContractDescriptor::of::<dyn IUsers>(),
    ] {
        assert!(catalog.contains(&descriptor), "{descriptor} missing");
        assert_eq!(catalog.descriptor_by_name(descriptor.name()), Some(descriptor));
    }
}

#[test]
fn adapters_are_instantiated_once_per_contract() {
    let catalog = ContractCatalog::from_inventory();
    let descriptor = ContractDescriptor::of::<dyn IOrders>();
    let mut first = ServiceCollection::new();
    let mut second = ServiceCollection::new();
    catalog.bind(&mut first, Some(descriptor)).unwrap();
    catalog.bind(&mut second, Some(descriptor)).unwrap();
    catalog
        .bind(&mut second, Some(ContractDescriptor::of::<dyn IUsers>()))
        .unwrap();
    assert_eq!(catalog.instantiations(), 2);
    assert!(Arc::ptr_eq(
        &catalog.adapter(descriptor).unwrap(),
        &catalog.adapter(descriptor).unwrap()
    ));
}

#[test]
fn unregistered_contracts_fail_adapter_construction() {
    trait Unlisted {}

    let catalog = ContractCatalog::new();
    let mut services = ServiceCollection::new();
    let err = catalog
        .bind_with(
            &mut services,
            Some(ContractDescriptor::of::<dyn Unlisted>()),
            Some(OptionsMutation::new(|options| options.use_logging = false)),
        )
        .unwrap_err();
    assert!(matches!(err, HttpApiError::AdapterConstruction { .. }));
    assert!(services.is_empty());
}

#[test]
fn non_interface_descriptors_fail_adapter_construction() {
    let mut services = ServiceCollection::new();
    let err = services
        .add_http_api_by_type(Some(ContractDescriptor::of::<String>()))
        .unwrap_err();
    match err {
        HttpApiError::AdapterConstruction { descriptor, reason } => {
            assert_eq!(descriptor, "alloc::string::String");
            assert!(reason.contains("trait object"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(services.is_empty());
}

#[test]
fn runtime_registration_after_resolution_is_rejected() {
    let mut services = ServiceCollection::new();
    services
        .add_http_api_by_type_with(Some(ContractDescriptor::of::<dyn IUsers>()), |options| {
            options.http_host = Some("https://users".into());
        })
        .unwrap();
    let provider = services.build_provider();
    assert_eq!(
        resolved_options::<dyn IUsers>(&provider).http_host.as_deref(),
        Some("https://users")
    );

    let err = services
        .add_http_api_by_type_with(Some(ContractDescriptor::of::<dyn IUsers>()), |options| {
            options.use_logging = false;
        })
        .unwrap_err();
    assert!(matches!(err, HttpApiError::InvalidState { .. }));
}
