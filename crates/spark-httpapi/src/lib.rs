//! # spark-httpapi
//!
//! ## 定位与职责（Why）
//! - 为以 trait 声明的 HTTP 契约提供“注册 → 配置 → 构造代理”的完整装配管线；
//! - 每个契约独占一个命名传输通道与一个配置作用域，互不串扰；
//! - 编译期泛型入口与运行期描述符入口共享同一条管线，行为完全一致。
//!
//! ## 架构嵌入（Where）
//! - `configuration`：按契约隔离的配置作用域，首次解析后固化；
//! - `transport`：命名通道工厂与外部传输协作方接缝；
//! - `proxy` / `dispatch`：代理构造与请求调度；
//! - `binder`：运行期类型绑定器，经 `inventory` 收集的构造函数重新进入静态管线；
//! - `extensions`：`ServiceCollection` 上的 `add_http_api*` 注册入口；
//! - `manifest`：以 TOML 清单批量注册契约。
//!
//! ## 使用方式（How）
//! ```ignore
//! use spark_httpapi::{http_api, HttpApiError, HttpApiServiceCollectionExt, ServiceCollection};
//!
//! #[http_api]
//! pub trait Orders {
//!     #[get("/orders/{id}")]
//!     async fn get_order(&self, id: u64) -> Result<Order, HttpApiError>;
//! }
//!
//! let mut services = ServiceCollection::new();
//! services.add_http_api_with::<dyn Orders, _>(|options| {
//!     options.http_host = Some("https://orders.example.com".into());
//! })?;
//! let orders = services.build_provider().get_required_service::<dyn Orders>()?;
//! ```
//!
//! ## 风险提示（Trade-offs）
//! - 传输、序列化与缓存均为可替换协作方，本 crate 不包含连接池与重试策略；
//! - 配置作用域一经解析即不可再修改，热更新需要重建服务提供者。

/// 运行期类型绑定器。
pub mod binder;

/// 响应缓存协作方。
pub mod cache;

/// 按契约隔离的配置作用域。
pub mod configuration;

/// 契约描述符与形态分类。
pub mod contract;

/// 请求调度管线。
pub mod dispatch;

/// 统一错误域。
pub mod error;

/// `ServiceCollection` 注册入口与静态类型管线。
pub mod extensions;

/// 声明式 TOML 清单。
pub mod manifest;

/// 契约配置对象。
pub mod options;

/// 最小依赖容器。
pub mod provider;

/// 代理构造入口。
pub mod proxy;

/// 序列化协作方。
pub mod serialization;

/// 命名通道与传输协作方。
pub mod transport;

pub use binder::{ContractCatalog, ContractRegistration, HttpApiRegistrar, TypedRegistrar};
pub use cache::{CachedResponse, MemoryResponseCache, ResponseCacheProvider};
pub use configuration::{AmbientConfiguration, OptionsMutation, OptionsRegistry, ScopeHandle};
pub use contract::{ContractDescriptor, ContractShape};
pub use dispatch::{ApiAction, ApiDispatcher, ApiRequest};
pub use error::{HttpApiError, Result};
pub use extensions::{HttpApiServiceCollectionExt, HttpClientBuilder, register_http_api};
pub use manifest::{ContractManifest, HttpApiManifest};
pub use options::HttpApiOptions;
pub use provider::{ServiceCollection, ServiceProvider, ServiceScope};
pub use proxy::{HttpApi, ProxyConstructor};
pub use serialization::{
    FlatKeyValueSerializer, JsonSerializer, KeyValueSerializer, SerdeJsonSerializer,
};
pub use transport::{
    BuildFn, ChannelFactory, ChannelHandle, ErasedProxy, HttpMethod, HttpRequest, HttpResponse,
    HttpTransport, TransportChannel, TransportConnector, TransportError, TransportErrorKind,
};

/// `#[http_api]` 生成代码所依赖的再导出。
pub use async_trait::async_trait;
#[doc(hidden)]
pub use inventory;
pub use spark_httpapi_macros::http_api;
