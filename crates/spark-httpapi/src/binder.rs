//! 运行期类型绑定器：把“只在运行期已知的描述符”重新接回静态类型管线。
//!
//! # 设计背景（Why）
//! - 插件清单、配置文件等场景只能拿到契约名称或 [`ContractDescriptor`]，
//!   却仍需要与 `add_http_api::<C>()` 完全一致的注册效果；
//! - Rust 没有运行期泛型实例化，因此在编译期为每个契约生成一个构造函数指针
//!   （`#[http_api]` 通过 `inventory::submit!` 登记 [`ContractRegistration`]），
//!   运行期按 `TypeId` 查表即可得到绑定了 `C` 的适配器。
//!
//! # 契约说明（What）
//! - 适配器按 `TypeId` 记忆化，每个契约至多实例化一次；
//! - 缺少构造函数或描述符不是接口形态时返回 [`HttpApiError::AdapterConstruction`]；
//! - 绑定失败时注册表状态保持不变：校验全部发生在追加配置步骤之前。

use core::any::TypeId;
use core::fmt;
use core::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;

use crate::configuration::OptionsMutation;
use crate::contract::ContractDescriptor;
use crate::error::{HttpApiError, Result};
use crate::extensions::{HttpClientBuilder, register_http_api};
use crate::provider::ServiceCollection;
use crate::proxy::HttpApi;

/// 类型擦除后的注册适配器。
///
/// 对象安全的统一入口，内部持有编译期绑定的契约类型。
pub trait HttpApiRegistrar: Send + Sync + 'static {
    /// 适配器绑定的契约。
    fn descriptor(&self) -> ContractDescriptor;

    /// 以绑定的契约类型执行静态注册管线。
    fn add_http_api(
        &self,
        services: &mut ServiceCollection,
        step: Option<OptionsMutation>,
    ) -> Result<HttpClientBuilder>;
}

/// 把契约类型 `C` 固化进适配器的泛型实现。
pub struct TypedRegistrar<C: ?Sized> {
    _contract: PhantomData<fn() -> Arc<C>>,
}

impl<C: ?Sized> TypedRegistrar<C> {
    /// 创建适配器。
    pub const fn new() -> Self {
        Self {
            _contract: PhantomData,
        }
    }
}

impl<C: ?Sized> Default for TypedRegistrar<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> HttpApiRegistrar for TypedRegistrar<C>
where
    C: ?Sized + HttpApi,
{
    fn descriptor(&self) -> ContractDescriptor {
        ContractDescriptor::of::<C>()
    }

    fn add_http_api(
        &self,
        services: &mut ServiceCollection,
        step: Option<OptionsMutation>,
    ) -> Result<HttpClientBuilder> {
        register_http_api::<C>(services, step)
    }
}

fn instantiate<C: ?Sized + HttpApi>() -> Arc<dyn HttpApiRegistrar> {
    Arc::new(TypedRegistrar::<C>::new())
}

/// 编译期登记的契约构造函数。
///
/// 由 `#[http_api]` 生成：
/// `inventory::submit! { ContractRegistration::of::<dyn Orders>() }`。
#[derive(Clone, Copy)]
pub struct ContractRegistration {
    descriptor: fn() -> ContractDescriptor,
    registrar: fn() -> Arc<dyn HttpApiRegistrar>,
}

impl ContractRegistration {
    /// 为契约 `C` 构造登记项，可在常量上下文中调用。
    pub const fn of<C>() -> Self
    where
        C: ?Sized + HttpApi,
    {
        Self {
            descriptor: ContractDescriptor::of::<C>,
            registrar: instantiate::<C>,
        }
    }

    /// 登记项对应的契约描述符。
    pub fn descriptor(&self) -> ContractDescriptor {
        (self.descriptor)()
    }
}

impl fmt::Debug for ContractRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractRegistration")
            .field("contract", &self.descriptor().name())
            .finish()
    }
}

inventory::collect!(ContractRegistration);

static GLOBAL: LazyLock<ContractCatalog> = LazyLock::new(ContractCatalog::from_inventory);

/// `ContractCatalog` 维护“`TypeId` → 构造函数 / 适配器”两张表。
///
/// # 教案级注释
/// - **目标 (Why)**：把运行期注册降级为一次查表加一次虚调用；
/// - **设计要点 (How)**：
///   - 构造函数表在启动时由 `inventory` 填充，也可通过 [`register`](Self::register) 手工补充；
///   - 适配器表按需填充，`DashMap::entry` 保证并发首次访问只实例化一次；
/// - **契约 (What)**：`bind` 与 `add_http_api::<C>()` 产生完全相同的注册效果。
pub struct ContractCatalog {
    constructors: DashMap<TypeId, ContractRegistration>,
    adapters: DashMap<TypeId, Arc<dyn HttpApiRegistrar>>,
    instantiations: AtomicUsize,
}

impl Default for ContractCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContractCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractCatalog")
            .field("constructors", &self.constructors.len())
            .field("adapters", &self.adapters.len())
            .finish()
    }
}

impl ContractCatalog {
    /// 创建空目录。
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
            adapters: DashMap::new(),
            instantiations: AtomicUsize::new(0),
        }
    }

    /// 以编译期登记的全部契约构建目录。
    pub fn from_inventory() -> Self {
        let catalog = Self::new();
        for registration in inventory::iter::<ContractRegistration> {
            catalog.insert(*registration);
        }
        tracing::debug!(contracts = catalog.constructors.len(), "collected http api contracts");
        catalog
    }

    /// 进程级目录，首次访问时从 `inventory` 构建。
    pub fn global() -> &'static ContractCatalog {
        &GLOBAL
    }

    /// 手工登记契约 `C` 的构造函数。
    pub fn register<C>(&self) -> &Self
    where
        C: ?Sized + HttpApi,
    {
        self.insert(ContractRegistration::of::<C>());
        self
    }

    fn insert(&self, registration: ContractRegistration) {
        self.constructors
            .insert(registration.descriptor().type_id(), registration);
    }

    /// 是否登记了描述符对应的构造函数。
    pub fn contains(&self, descriptor: &ContractDescriptor) -> bool {
        self.constructors.contains_key(&descriptor.type_id())
    }

    /// 按契约全限定名称查找描述符。
    pub fn descriptor_by_name(&self, name: &str) -> Option<ContractDescriptor> {
        self.constructors
            .iter()
            .map(|entry| entry.value().descriptor())
            .find(|descriptor| descriptor.name() == name)
    }

    /// 全部已登记的描述符，按名称排序。
    pub fn descriptors(&self) -> Vec<ContractDescriptor> {
        let mut descriptors: Vec<_> = self
            .constructors
            .iter()
            .map(|entry| entry.value().descriptor())
            .collect();
        descriptors.sort_unstable_by_key(|descriptor| descriptor.name());
        descriptors
    }

    /// 取得描述符对应的适配器，首次访问时实例化并缓存。
    pub fn adapter(&self, descriptor: ContractDescriptor) -> Result<Arc<dyn HttpApiRegistrar>> {
        if let Some(adapter) = self.adapters.get(&descriptor.type_id()) {
            tracing::trace!(contract = %descriptor, "reused cached registration adapter");
            return Ok(Arc::clone(adapter.value()));
        }

        descriptor
            .ensure_interface()
            .map_err(|err| HttpApiError::AdapterConstruction {
                descriptor: descriptor.name().to_owned(),
                reason: err.to_string(),
            })?;
        let registration = self
            .constructors
            .get(&descriptor.type_id())
            .map(|entry| *entry.value())
            .ok_or_else(|| HttpApiError::AdapterConstruction {
                descriptor: descriptor.name().to_owned(),
                reason: "no constructor registered for this contract".to_owned(),
            })?;

        let adapter = self
            .adapters
            .entry(descriptor.type_id())
            .or_insert_with(|| {
                self.instantiations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(contract = %descriptor, "instantiated registration adapter");
                (registration.registrar)()
            })
            .clone();
        Ok(adapter)
    }

    /// 已实例化的适配器次数。
    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::Relaxed)
    }

    /// 以运行期描述符注册契约。
    pub fn bind(
        &self,
        services: &mut ServiceCollection,
        descriptor: Option<ContractDescriptor>,
    ) -> Result<HttpClientBuilder> {
        self.bind_with(services, descriptor, None)
    }

    /// 以运行期描述符注册契约，并追加一个配置步骤。
    ///
    /// - **错误**：描述符为空时返回 [`HttpApiError::NullDescriptor`]，且不触碰任何状态；
    ///   适配器失败时返回 [`HttpApiError::AdapterConstruction`]；管线内部错误原样透传。
    pub fn bind_with(
        &self,
        services: &mut ServiceCollection,
        descriptor: Option<ContractDescriptor>,
        step: Option<OptionsMutation>,
    ) -> Result<HttpClientBuilder> {
        let descriptor = descriptor.ok_or(HttpApiError::NullDescriptor)?;
        let adapter = self.adapter(descriptor)?;
        adapter.add_http_api(services, step)
    }
}
