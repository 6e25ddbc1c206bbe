//! 订单客户端示例：声明契约、注册、解析代理并发起调用。
//!
//! 传输层以内存实现代替真实 HTTP 客户端，运行：
//! `RUST_LOG=spark_httpapi=debug cargo run -p spark-httpapi --example orders_client`

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use spark_httpapi::{
    HttpApiError, HttpApiServiceCollectionExt, HttpRequest, HttpResponse, HttpTransport,
    ServiceCollection, TransportConnector, TransportError, async_trait, http_api,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Order {
    id: u64,
    status: String,
}

#[http_api]
trait Orders {
    #[get("/orders/{id}")]
    #[cache(30)]
    async fn get_order(&self, id: u64) -> Result<Order, HttpApiError>;
}

/// 回显请求路径的内存传输。
struct EchoTransport;

#[async_trait]
impl HttpTransport for EchoTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let id = request
            .uri
            .rsplit('/')
            .next()
            .and_then(|segment| segment.parse::<u64>().ok())
            .unwrap_or_default();
        Ok(HttpResponse::new(
            200,
            format!(r#"{{"id":{id},"status":"shipped"}}"#),
        ))
    }
}

struct EchoConnector;

impl TransportConnector for EchoConnector {
    fn connect(&self, _channel: &str) -> Result<Arc<dyn HttpTransport>, TransportError> {
        Ok(Arc::new(EchoTransport))
    }
}

fn main() -> Result<(), HttpApiError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut services = ServiceCollection::new();
    services.add_singleton::<dyn TransportConnector>(Arc::new(EchoConnector));
    services.configure_http_api_defaults(|_, options| {
        options.add_default_header("x-client", "orders-example");
    })?;
    services
        .add_http_api_with::<dyn Orders, _>(|options| {
            options.http_host = Some("https://orders.example.com".into());
        })?
        .configure(|options| options.timeout = Some(Duration::from_secs(2)))?;

    let provider = services.build_provider();
    let orders = provider.get_required_service::<dyn Orders>()?;
    for id in [42, 42, 7] {
        let order = futures::executor::block_on(orders.get_order(id))?;
        println!("order {} is {}", order.id, order.status);
    }
    Ok(())
}
