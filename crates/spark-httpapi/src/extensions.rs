//! `ServiceCollection` 上的注册入口与静态类型管线。
//!
//! # 设计背景（Why）
//! - 编译期已知契约时，调用方直接以泛型参数 `C` 调用 `add_http_api::<C>()` 系列方法；
//! - 运行期只知道描述符时，`add_http_api_by_type` 系列方法经由
//!   [`ContractCatalog`] 找到 `C`，最终执行的仍是同一条 [`register_http_api`] 管线。
//!
//! # 管线步骤（How）
//! 1. 校验契约形态；
//! 2. 以 `TryAdd` 语义登记默认协作方、共享注册表与共享环境配置；
//! 3. 创建或复用通道，同名通道被其他契约占用时立即失败；
//! 4. 创建或复用配置作用域并追加本次的配置步骤；
//! 5. 首次注册时挂载构造步骤，并把契约登记为瞬态服务。

use std::sync::Arc;

use crate::binder::ContractCatalog;
use crate::cache::{MemoryResponseCache, ResponseCacheProvider};
use crate::configuration::{AmbientConfiguration, OptionsMutation, OptionsRegistry, ScopeHandle};
use crate::contract::ContractDescriptor;
use crate::error::{HttpApiError, Result};
use crate::options::HttpApiOptions;
use crate::provider::{ServiceCollection, ServiceProvider};
use crate::proxy::{HttpApi, ProxyConstructor};
use crate::serialization::{
    FlatKeyValueSerializer, JsonSerializer, KeyValueSerializer, SerdeJsonSerializer,
};
use crate::transport::{BuildFn, ChannelFactory, ChannelHandle, ErasedProxy};

/// 注册入口返回的构建器，可继续为同一契约追加配置步骤。
#[derive(Clone)]
pub struct HttpClientBuilder {
    descriptor: ContractDescriptor,
    channel: ChannelHandle,
    registry: Arc<OptionsRegistry>,
    scope: ScopeHandle,
}

impl core::fmt::Debug for HttpClientBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HttpClientBuilder")
            .field("contract", &self.descriptor.name())
            .field("channel", &self.channel.name())
            .finish()
    }
}

impl HttpClientBuilder {
    /// 所属契约。
    pub fn descriptor(&self) -> ContractDescriptor {
        self.descriptor
    }

    /// 通道名称。
    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// 通道句柄。
    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    /// 追加纯配置步骤；作用域已固化时返回 [`HttpApiError::InvalidState`]。
    pub fn configure<F>(self, configure: F) -> Result<Self>
    where
        F: Fn(&mut HttpApiOptions) + Send + Sync + 'static,
    {
        self.registry
            .add_mutation(&self.scope, OptionsMutation::new(configure))?;
        Ok(self)
    }

    /// 追加可访问服务提供者的配置步骤。
    pub fn configure_with_provider<F>(self, configure: F) -> Result<Self>
    where
        F: Fn(&mut HttpApiOptions, &ServiceProvider) -> Result<()> + Send + Sync + 'static,
    {
        self.registry
            .add_mutation(&self.scope, OptionsMutation::with_provider(configure))?;
        Ok(self)
    }
}

fn try_add_default_collaborators(services: &mut ServiceCollection) {
    services.try_add_singleton::<dyn JsonSerializer>(Arc::new(SerdeJsonSerializer));
    services.try_add_singleton::<dyn KeyValueSerializer>(Arc::new(FlatKeyValueSerializer));
    services.try_add_singleton::<dyn ResponseCacheProvider>(Arc::new(MemoryResponseCache::new()));
}

fn construction_for<C>(scope: ScopeHandle) -> BuildFn
where
    C: ?Sized + HttpApi,
{
    Arc::new(
        move |channel: &ChannelHandle, provider: &ServiceProvider| -> Result<ErasedProxy> {
            let registry = provider.get_required_service::<OptionsRegistry>()?;
            let options = registry.resolve(&scope, provider)?;
            let proxy = ProxyConstructor::build::<C>(channel, options, provider)?;
            Ok(Box::new(proxy))
        },
    )
}

/// 静态类型注册管线，所有入口最终都汇聚到这里。
///
/// # 教案级注释
/// - **契约 (What)**：
///   - 同一契约重复注册是幂等的，只追加配置步骤，不会重复挂载构造步骤；
///   - 不同契约派生出相同通道名时返回 [`HttpApiError::DuplicateRegistration`]，且不追加步骤；
///   - 作用域已固化时返回 [`HttpApiError::InvalidState`]；
/// - **后置条件**：`provider.get_required_service::<C>()` 每次返回新的代理实例。
pub fn register_http_api<C>(
    services: &mut ServiceCollection,
    step: Option<OptionsMutation>,
) -> Result<HttpClientBuilder>
where
    C: ?Sized + HttpApi,
{
    let descriptor = ContractDescriptor::of::<C>();
    descriptor.ensure_interface()?;

    try_add_default_collaborators(services);
    let registry = services.singleton_or_insert_with(|| Arc::new(OptionsRegistry::new()));
    services.singleton_or_insert_with(|| Arc::new(AmbientConfiguration::new()));
    let factory = services.singleton_or_insert_with(|| Arc::new(ChannelFactory::new()));

    let channel = factory.ensure_named_channel(descriptor.channel_name());
    let owner = channel.construction_owner();
    if let Some(owner) = owner {
        if owner != descriptor {
            return Err(HttpApiError::DuplicateRegistration {
                channel: channel.name().to_owned(),
            });
        }
    }

    let scope = registry.register_scope(descriptor);
    if let Some(step) = step {
        registry.add_mutation(&scope, step)?;
    }

    if owner.is_none() {
        factory.attach_construction(&channel, descriptor, construction_for::<C>(scope.clone()))?;
        let name = channel.name().to_owned();
        services.add_transient::<C, _>(move |provider: &ServiceProvider| {
            provider
                .get_required_service::<ChannelFactory>()?
                .create_client::<C>(&name, provider)
        });
    } else {
        tracing::trace!(
            contract = %descriptor,
            "contract already registered; appended options only"
        );
    }

    Ok(HttpClientBuilder {
        descriptor,
        channel,
        registry,
        scope,
    })
}

/// `ServiceCollection` 的 HTTP 契约注册扩展。
///
/// # 教案级注释
/// - **意图 (Why)**：与宿主框架的 `add_*` 习惯保持一致，让契约注册读起来像普通的服务登记；
/// - **契约 (What)**：三个静态入口与三个运行期入口一一对应，运行期入口使用
///   [`ContractCatalog::global`]；需要自定义目录时直接调用 [`ContractCatalog::bind_with`]；
/// - **顺序**：所有配置步骤按注册顺序执行，后注册的步骤不会“覆盖”先注册的步骤，
///   只会在其结果之上继续修改。
pub trait HttpApiServiceCollectionExt {
    /// 注册契约 `C`。
    fn add_http_api<C>(&mut self) -> Result<HttpClientBuilder>
    where
        C: ?Sized + HttpApi;

    /// 注册契约 `C` 并追加纯配置步骤。
    fn add_http_api_with<C, F>(&mut self, configure: F) -> Result<HttpClientBuilder>
    where
        C: ?Sized + HttpApi,
        F: Fn(&mut HttpApiOptions) + Send + Sync + 'static;

    /// 注册契约 `C` 并追加可访问服务提供者的配置步骤。
    fn add_http_api_with_provider<C, F>(&mut self, configure: F) -> Result<HttpClientBuilder>
    where
        C: ?Sized + HttpApi,
        F: Fn(&mut HttpApiOptions, &ServiceProvider) -> Result<()> + Send + Sync + 'static;

    /// 以运行期描述符注册契约。
    fn add_http_api_by_type(
        &mut self,
        descriptor: Option<ContractDescriptor>,
    ) -> Result<HttpClientBuilder>;

    /// 以运行期描述符注册契约并追加纯配置步骤。
    fn add_http_api_by_type_with<F>(
        &mut self,
        descriptor: Option<ContractDescriptor>,
        configure: F,
    ) -> Result<HttpClientBuilder>
    where
        F: Fn(&mut HttpApiOptions) + Send + Sync + 'static;

    /// 以运行期描述符注册契约并追加可访问服务提供者的配置步骤。
    fn add_http_api_by_type_with_provider<F>(
        &mut self,
        descriptor: Option<ContractDescriptor>,
        configure: F,
    ) -> Result<HttpClientBuilder>
    where
        F: Fn(&mut HttpApiOptions, &ServiceProvider) -> Result<()> + Send + Sync + 'static;

    /// 追加作用于所有契约的环境配置步骤，先于契约步骤执行。
    ///
    /// - **可见性**：环境配置与注册表一同登记，已构建的提供者同样能看到之后追加的步骤；
    /// - **错误**：任一契约的作用域已固化时返回 [`HttpApiError::InvalidState`]，步骤被丢弃。
    fn configure_http_api_defaults<F>(&mut self, configure: F) -> Result<&mut Self>
    where
        F: Fn(&ContractDescriptor, &mut HttpApiOptions) + Send + Sync + 'static;
}

impl HttpApiServiceCollectionExt for ServiceCollection {
    fn add_http_api<C>(&mut self) -> Result<HttpClientBuilder>
    where
        C: ?Sized + HttpApi,
    {
        register_http_api::<C>(self, None)
    }

    fn add_http_api_with<C, F>(&mut self, configure: F) -> Result<HttpClientBuilder>
    where
        C: ?Sized + HttpApi,
        F: Fn(&mut HttpApiOptions) + Send + Sync + 'static,
    {
        register_http_api::<C>(self, Some(OptionsMutation::new(configure)))
    }

    fn add_http_api_with_provider<C, F>(&mut self, configure: F) -> Result<HttpClientBuilder>
    where
        C: ?Sized + HttpApi,
        F: Fn(&mut HttpApiOptions, &ServiceProvider) -> Result<()> + Send + Sync + 'static,
    {
        register_http_api::<C>(self, Some(OptionsMutation::with_provider(configure)))
    }

    fn add_http_api_by_type(
        &mut self,
        descriptor: Option<ContractDescriptor>,
    ) -> Result<HttpClientBuilder> {
        ContractCatalog::global().bind_with(self, descriptor, None)
    }

    fn add_http_api_by_type_with<F>(
        &mut self,
        descriptor: Option<ContractDescriptor>,
        configure: F,
    ) -> Result<HttpClientBuilder>
    where
        F: Fn(&mut HttpApiOptions) + Send + Sync + 'static,
    {
        ContractCatalog::global().bind_with(self, descriptor, Some(OptionsMutation::new(configure)))
    }

    fn add_http_api_by_type_with_provider<F>(
        &mut self,
        descriptor: Option<ContractDescriptor>,
        configure: F,
    ) -> Result<HttpClientBuilder>
    where
        F: Fn(&mut HttpApiOptions, &ServiceProvider) -> Result<()> + Send + Sync + 'static,
    {
        ContractCatalog::global().bind_with(
            self,
            descriptor,
            Some(OptionsMutation::with_provider(configure)),
        )
    }

    fn configure_http_api_defaults<F>(&mut self, configure: F) -> Result<&mut Self>
    where
        F: Fn(&ContractDescriptor, &mut HttpApiOptions) + Send + Sync + 'static,
    {
        if let Some(finalized) = self
            .singleton::<OptionsRegistry>()
            .and_then(|registry| registry.first_finalized())
        {
            return Err(HttpApiError::InvalidState {
                contract: finalized.descriptor().name().to_owned(),
            });
        }
        self.singleton_or_insert_with(|| Arc::new(AmbientConfiguration::new()))
            .push(configure);
        Ok(self)
    }
}
