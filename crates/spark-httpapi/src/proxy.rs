//! 代理构造：把通道、固化配置与服务提供者组装为契约实现。

use std::sync::Arc;

use crate::contract::ContractDescriptor;
use crate::dispatch::ApiDispatcher;
use crate::error::Result;
use crate::options::HttpApiOptions;
use crate::provider::ServiceProvider;
use crate::transport::ChannelHandle;

/// 可由调度器实例化的 HTTP 契约。
///
/// 实现通常由 `#[http_api]` 生成在 `dyn Trait` 上，手写实现同样可行：
/// 只需返回一个把方法调用转交给 [`ApiDispatcher`] 的对象。
pub trait HttpApi: Send + Sync + 'static {
    /// 以调度器构造代理实例。
    fn create(dispatcher: ApiDispatcher) -> Arc<Self>;
}

/// 代理构造入口。
#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyConstructor;

impl ProxyConstructor {
    /// 为契约 `C` 构造代理。
    ///
    /// - **前置条件**：`C` 必须是 trait object，否则返回
    ///   [`HttpApiError::InvalidContract`](crate::HttpApiError::InvalidContract)；
    /// - **后置条件**：返回的代理持有传入的通道、配置与提供者，每次调用都产出新实例。
    pub fn build<C>(
        channel: &ChannelHandle,
        options: Arc<HttpApiOptions>,
        provider: &ServiceProvider,
    ) -> Result<Arc<C>>
    where
        C: ?Sized + HttpApi,
    {
        let descriptor = ContractDescriptor::of::<C>();
        descriptor.ensure_interface()?;
        let dispatcher = ApiDispatcher::new(descriptor, channel.clone(), options, provider.clone());
        Ok(C::create(dispatcher))
    }
}
