//! 传输层：命名通道工厂与外部传输协作方契约。
//!
//! # 设计目标（Why）
//! - 每个契约独占一个以契约名命名的通道，通道上挂载“如何构造类型化代理”的步骤；
//! - 真正的 HTTP 实现（连接池、重试、TLS）属于外部协作方，这里只定义
//!   [`HttpTransport`] 与 [`TransportConnector`] 两个接缝。
//!
//! # 使用方式（How）
//! - 装配期：[`ChannelFactory::ensure_named_channel`] 创建/复用通道，
//!   [`ChannelFactory::attach_construction`] 挂载构造步骤；
//! - 解析期：[`ChannelFactory::create_client`] 每次调用都执行一次构造步骤，产出新的代理；
//! - 调度期：[`TransportChannel::transport`] 首次使用时向容器索取连接器并缓存传输实例。
//!
//! # 契约与约束（What）
//! - 同一通道只能挂载一个构造步骤，重复挂载返回 [`HttpApiError::DuplicateRegistration`]，
//!   除非先调用 [`ChannelFactory::detach_construction`] 复位；
//! - 通道与传输实例在所有解析请求间共享，代理实例则每次新建。

use core::any::{Any, type_name};
use core::fmt;
use core::time::Duration;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::contract::ContractDescriptor;
use crate::error::{HttpApiError, Result};
use crate::provider::ServiceProvider;

/// HTTP 方法。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// 大写的方法名。
    pub const fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 交给传输协作方的请求。
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// 来自契约配置的超时，由传输实现负责执行。
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// 按名称（大小写不敏感）读取首个请求头。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// 传输协作方返回的响应。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    /// 以状态码与响应体构造响应。
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// 状态码是否位于 2xx。
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 传输失败的分类。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Io,
    Protocol,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Io => "io",
            TransportErrorKind::Protocol => "protocol",
        };
        f.write_str(label)
    }
}

/// 传输协作方报告的错误，由调度器包装进 [`HttpApiError::Transport`]。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{kind} error: {detail}")]
pub struct TransportError {
    kind: TransportErrorKind,
    detail: String,
}

impl TransportError {
    /// 构造传输错误。
    pub fn new(kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// 错误分类。
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// 人类可读的细节。
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// 外部 HTTP 传输实现的契约。
///
/// # 教案级注释
/// - **意图 (Why)**：把连接管理、重试与超时执行全部留给协作方，管线只负责把请求交过去；
/// - **契约 (What)**：实现需 `Send + Sync + 'static`，`send` 返回的 Future 为 `Send`，
///   可在多线程运行时上驱动；
/// - **风险 (Trade-offs)**：取消与截止语义由实现自行处理，管线不会包裹超时。
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// 发送一次请求。
    async fn send(
        &self,
        request: HttpRequest,
    ) -> core::result::Result<HttpResponse, TransportError>;
}

/// 按通道名称产出传输实例的连接器，需由宿主登记到容器中。
pub trait TransportConnector: Send + Sync + 'static {
    /// 为指定通道建立传输实例。
    fn connect(
        &self,
        channel: &str,
    ) -> core::result::Result<Arc<dyn HttpTransport>, TransportError>;
}

/// 类型擦除后的代理实例，内部保存 `Arc<C>`。
pub type ErasedProxy = Box<dyn Any + Send + Sync>;

/// 通道上的构造步骤：`(通道, 提供者) -> 代理`。
pub type BuildFn =
    Arc<dyn Fn(&ChannelHandle, &ServiceProvider) -> Result<ErasedProxy> + Send + Sync>;

#[derive(Clone)]
struct Construction {
    owner: ContractDescriptor,
    build: BuildFn,
}

/// `TransportChannel` 是以契约名命名的共享通道。
pub struct TransportChannel {
    name: Arc<str>,
    construction: RwLock<Option<Construction>>,
    transport: OnceLock<Arc<dyn HttpTransport>>,
}

impl TransportChannel {
    fn new(name: Arc<str>) -> Self {
        Self {
            name,
            construction: RwLock::new(None),
            transport: OnceLock::new(),
        }
    }

    /// 通道名称。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 是否已挂载构造步骤。
    pub fn has_construction(&self) -> bool {
        self.construction.read().is_some()
    }

    /// 已挂载构造步骤所属的契约。
    pub fn construction_owner(&self) -> Option<ContractDescriptor> {
        self.construction.read().as_ref().map(|c| c.owner)
    }

    /// 取得通道的传输实例，首次调用时向容器中的 [`TransportConnector`] 索取并缓存。
    ///
    /// - **错误**：连接器未登记时返回 [`HttpApiError::ServiceNotFound`]；
    ///   连接失败时返回 [`HttpApiError::Transport`]。
    /// - **并发**：并发的首次调用可能各自连接一次，但只有一个实例被缓存并返回给所有调用者。
    /// - **作用域**：缓存随通道在所有提供者间共享，连接之后子作用域覆盖的连接器不再被使用。
    pub fn transport(&self, provider: &ServiceProvider) -> Result<Arc<dyn HttpTransport>> {
        if let Some(transport) = self.transport.get() {
            return Ok(Arc::clone(transport));
        }
        let connector = provider.get_required_service::<dyn TransportConnector>()?;
        let transport = connector
            .connect(&self.name)
            .map_err(|source| HttpApiError::Transport {
                channel: self.name.to_string(),
                source,
            })?;
        let cached = self.transport.get_or_init(|| transport);
        Ok(Arc::clone(cached))
    }
}

impl fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportChannel")
            .field("name", &self.name)
            .field("construction_owner", &self.construction_owner())
            .field("connected", &self.transport.get().is_some())
            .finish()
    }
}

/// 通道句柄，克隆成本为一次原子计数。
#[derive(Clone, Debug)]
pub struct ChannelHandle(Arc<TransportChannel>);

impl ChannelHandle {
    /// 两个句柄是否指向同一通道。
    pub fn same_channel(&self, other: &ChannelHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl core::ops::Deref for ChannelHandle {
    type Target = TransportChannel;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// `ChannelFactory` 维护“通道名 → 通道”的目录。
///
/// # 教案级注释
/// - **意图 (Why)**：通道名由契约描述符确定性派生，工厂据此保证一个契约只对应一个通道；
/// - **设计要点 (How)**：内部使用 `DashMap`，解析期的并发查找无需全局锁；
///   构造步骤存放在通道内部的 `RwLock` 中，读多写少；
/// - **契约 (What)**：`ensure_named_channel` 幂等；`attach_construction` 不幂等，
///   重复挂载即报错，由上层决定同一契约的重复注册是否跳过挂载。
#[derive(Debug, Default)]
pub struct ChannelFactory {
    channels: DashMap<Arc<str>, ChannelHandle>,
}

impl ChannelFactory {
    /// 创建空工厂。
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建或复用命名通道。
    pub fn ensure_named_channel(&self, name: &str) -> ChannelHandle {
        if let Some(existing) = self.channels.get(name) {
            return existing.clone();
        }
        let name: Arc<str> = Arc::from(name);
        self.channels
            .entry(Arc::clone(&name))
            .or_insert_with(|| {
                tracing::debug!(channel = %name, "created named transport channel");
                ChannelHandle(Arc::new(TransportChannel::new(Arc::clone(&name))))
            })
            .clone()
    }

    /// 按名称查找通道。
    pub fn channel(&self, name: &str) -> Option<ChannelHandle> {
        self.channels.get(name).map(|entry| entry.clone())
    }

    /// 在通道上挂载构造步骤。
    ///
    /// - **前置条件**：通道尚未挂载步骤，或已通过 [`detach_construction`](Self::detach_construction) 复位；
    /// - **错误**：已挂载时返回 [`HttpApiError::DuplicateRegistration`]，既有步骤保持不变。
    pub fn attach_construction(
        &self,
        handle: &ChannelHandle,
        owner: ContractDescriptor,
        build: BuildFn,
    ) -> Result<()> {
        let mut slot = handle.construction.write();
        if slot.is_some() {
            return Err(HttpApiError::DuplicateRegistration {
                channel: handle.name().to_owned(),
            });
        }
        *slot = Some(Construction { owner, build });
        tracing::debug!(channel = %handle.name(), contract = %owner, "attached proxy construction");
        Ok(())
    }

    /// 移除通道上的构造步骤，返回此前是否存在。
    pub fn detach_construction(&self, handle: &ChannelHandle) -> bool {
        handle.construction.write().take().is_some()
    }

    /// 执行通道上的构造步骤，产出类型化代理。
    ///
    /// # 教案级注释
    /// - **执行逻辑 (How)**：
    ///   1. 查找通道，未注册时返回 [`HttpApiError::ServiceNotFound`]；
    ///   2. 克隆构造步骤后立即释放读锁，避免步骤内部再次访问通道时死锁；
    ///   3. 执行步骤并把擦除后的结果还原为 `Arc<C>`；
    /// - **契约 (What)**：每次调用都会执行一次步骤并返回新的代理；
    ///   若步骤产出的类型与 `C` 不符，返回 [`HttpApiError::InvalidContract`]。
    pub fn create_client<C>(&self, name: &str, provider: &ServiceProvider) -> Result<Arc<C>>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        let handle = self
            .channel(name)
            .ok_or_else(|| HttpApiError::ServiceNotFound {
                service: format!("transport channel `{name}`"),
            })?;
        let construction = handle
            .construction
            .read()
            .clone()
            .ok_or_else(|| HttpApiError::ServiceNotFound {
                service: format!("proxy construction for channel `{name}`"),
            })?;
        let erased = (construction.build)(&handle, provider)?;
        erased
            .downcast::<Arc<C>>()
            .map(|proxy| *proxy)
            .map_err(|_| HttpApiError::InvalidContract {
                contract: type_name::<C>().to_owned(),
                reason: format!(
                    "channel `{name}` constructs proxies for `{}`",
                    construction.owner
                ),
            })
    }

    /// 已创建的通道数量。
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// 工厂是否为空。
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
