//! 集成测试共享夹具：录制型传输、示例契约与常用断言工具。
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use spark_httpapi::{
    ContractDescriptor, HttpApiError, HttpApiOptions, HttpRequest, HttpResponse, HttpTransport,
    OptionsRegistry, ServiceCollection, ServiceProvider, TransportConnector, TransportError,
    TransportErrorKind, async_trait, http_api,
};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Order {
    pub id: u64,
    pub status: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct NewOrder {
    pub sku: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

#[http_api]
pub trait IOrders {
    #[get("/orders/{id}")]
    #[cache(60)]
    async fn get_order(&self, id: u64) -> Result<Order, HttpApiError>;

    #[get("/orders")]
    async fn list_orders(
        &self,
        status: Option<String>,
        tags: Vec<String>,
    ) -> Result<Vec<Order>, HttpApiError>;

    #[post("/orders")]
    async fn create_order(&self, #[body] order: NewOrder) -> Result<Order, HttpApiError>;

    #[delete("/orders/{id}")]
    async fn cancel_order(&self, id: u64) -> Result<(), HttpApiError>;
}

#[http_api]
pub trait IUsers {
    #[get("/users/{id}")]
    async fn get_user(&self, id: u64) -> Result<User, HttpApiError>;
}

/// 按脚本返回响应并记录全部请求的传输实现。
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<HttpRequest>>,
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .push_back(Ok(HttpResponse::new(status, body.to_owned())));
    }

    pub fn fail(&self, kind: TransportErrorKind, detail: &str) {
        self.responses
            .lock()
            .push_back(Err(TransportError::new(kind, detail)));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests
            .lock()
            .last()
            .cloned()
            .expect("at least one request was sent")
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request);
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Err(TransportError::new(
                TransportErrorKind::Protocol,
                "no scripted response",
            ))
        })
    }
}

/// 为所有通道返回同一个录制型传输，并记录被连接的通道名。
pub struct RecordingConnector {
    transport: Arc<RecordingTransport>,
    channels: Mutex<Vec<String>>,
}

impl RecordingConnector {
    pub fn new(transport: Arc<RecordingTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            channels: Mutex::new(Vec::new()),
        })
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.lock().clone()
    }
}

impl TransportConnector for RecordingConnector {
    fn connect(&self, channel: &str) -> Result<Arc<dyn HttpTransport>, TransportError> {
        self.channels.lock().push(channel.to_owned());
        Ok(Arc::clone(&self.transport) as Arc<dyn HttpTransport>)
    }
}

/// 预先登记录制型连接器的服务集合。
pub fn services_with(transport: &Arc<RecordingTransport>) -> ServiceCollection {
    let mut services = ServiceCollection::new();
    services
        .add_singleton::<dyn TransportConnector>(RecordingConnector::new(Arc::clone(transport)));
    services
}

/// 解析契约 `C` 的固化配置。
pub fn resolved_options<C: ?Sized + 'static>(provider: &ServiceProvider) -> Arc<HttpApiOptions> {
    let registry = provider
        .get_required_service::<OptionsRegistry>()
        .expect("registry is registered with the first contract");
    let scope = registry
        .scope(&ContractDescriptor::of::<C>())
        .expect("contract has an options scope");
    registry
        .resolve(&scope, provider)
        .expect("options resolve")
}

pub fn host(url: &'static str) -> impl Fn(&mut HttpApiOptions) + Send + Sync + 'static {
    move |options: &mut HttpApiOptions| options.http_host = Some(url.to_owned())
}

pub fn block_on<F: core::future::Future>(future: F) -> F::Output {
    futures::executor::block_on(future)
}
