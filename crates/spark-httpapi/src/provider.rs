//! 依赖容器：管线所消费的最小服务注册表与服务提供者。
//!
//! # 设计背景（Why）
//! - 注册管线需要“按类型登记协作方、按类型取回协作方”两项能力，容器本身并不是管线的核心；
//! - 这里只提供管线真正用到的语义：单例、`TryAdd` 单例、瞬态工厂与作用域覆盖。
//!
//! # 契约说明（What）
//! - 服务以 `TypeId` 为键，支持 `dyn Trait` 形式的服务类型；
//! - [`ServiceProvider::get_required_service`] 未命中时返回
//!   [`HttpApiError::ServiceNotFound`]，管线原样透传该错误；
//! - 瞬态工厂接收发起解析的那个提供者（可能是子作用域），从而看到作用域内的覆盖项。

use core::any::{Any, TypeId, type_name};
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HttpApiError, Result};

type SharedInstance = Arc<dyn Any + Send + Sync>;
type TransientFactory = Arc<dyn Fn(&ServiceProvider) -> Result<SharedInstance> + Send + Sync>;

#[derive(Clone)]
enum ServiceEntry {
    /// 内部保存的是 `Arc<T>` 本身，以便支持 `T: ?Sized`。
    Singleton(SharedInstance),
    Transient(TransientFactory),
}

#[derive(Clone)]
struct ServiceDescriptor {
    name: &'static str,
    entry: ServiceEntry,
}

impl ServiceDescriptor {
    fn singleton<T: ?Sized + Send + Sync + 'static>(instance: Arc<T>) -> Self {
        Self {
            name: type_name::<T>(),
            entry: ServiceEntry::Singleton(Arc::new(instance)),
        }
    }
}

fn downcast<T: ?Sized + Send + Sync + 'static>(instance: &SharedInstance) -> Option<Arc<T>> {
    instance.downcast_ref::<Arc<T>>().cloned()
}

/// `ServiceCollection` 是装配阶段的服务目录。
///
/// # 教案级注释
/// - **目标 (Why)**：在启动阶段集中登记协作方与类型化客户端，之后一次性产出
///   [`ServiceProvider`]；
/// - **设计要点 (How)**：
///   - `add_singleton` 覆盖同类型的旧登记，`try_add_singleton` 则保留已有登记，
///     对应“默认协作方可被宿主替换”的语义；
///   - `build_provider` 只借用 `self`，因此产出提供者后仍可继续登记，
///     这正是配置作用域需要拒绝“固化后变更”的场景；
/// - **契约 (What)**：集合本身不加锁，装配阶段应在单线程中完成。
#[derive(Clone, Default)]
pub struct ServiceCollection {
    services: HashMap<TypeId, ServiceDescriptor>,
}

impl fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.services.values().map(|d| d.name).collect();
        names.sort_unstable();
        f.debug_struct("ServiceCollection")
            .field("services", &names)
            .finish()
    }
}

impl ServiceCollection {
    /// 创建空集合。
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记单例，覆盖同类型的既有登记。
    pub fn add_singleton<T>(&mut self, instance: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services
            .insert(TypeId::of::<T>(), ServiceDescriptor::singleton(instance));
        self
    }

    /// 仅当尚无同类型登记时登记单例，返回是否写入。
    pub fn try_add_singleton<T>(&mut self, instance: Arc<T>) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.contains::<T>() {
            return false;
        }
        self.add_singleton(instance);
        true
    }

    /// 登记瞬态工厂：每次解析都调用一次工厂。
    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let erased: TransientFactory = Arc::new(move |provider: &ServiceProvider| {
            factory(provider).map(|instance| Arc::new(instance) as SharedInstance)
        });
        self.services.insert(
            TypeId::of::<T>(),
            ServiceDescriptor {
                name: type_name::<T>(),
                entry: ServiceEntry::Transient(erased),
            },
        );
        self
    }

    /// 是否存在 `T` 的登记。
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    /// 读取已登记的单例。瞬态登记返回 `None`。
    pub fn singleton<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match &self.services.get(&TypeId::of::<T>())?.entry {
            ServiceEntry::Singleton(instance) => downcast::<T>(instance),
            ServiceEntry::Transient(_) => None,
        }
    }

    /// 读取单例，不存在时以 `init` 创建并登记。
    pub fn singleton_or_insert_with<T, F>(&mut self, init: F) -> Arc<T>
    where
        T: ?Sized + Send + Sync + 'static,
        F: FnOnce() -> Arc<T>,
    {
        if let Some(existing) = self.singleton::<T>() {
            return existing;
        }
        let instance = init();
        self.add_singleton(Arc::clone(&instance));
        instance
    }

    /// 登记条目数量。
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// 集合是否为空。
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// 以当前登记快照构建服务提供者。
    ///
    /// 单例实例在集合与提供者之间共享，后续对集合的登记不会影响已构建的提供者。
    pub fn build_provider(&self) -> ServiceProvider {
        ServiceProvider {
            root: Arc::new(self.services.clone()),
            scoped: None,
        }
    }
}

/// `ServiceProvider` 按类型解析服务。
///
/// - **线程安全**：克隆成本为两次原子计数，可在多线程间共享；
/// - **作用域**：[`create_scope`](Self::create_scope) 产出的子提供者优先查找作用域内实例。
#[derive(Clone)]
pub struct ServiceProvider {
    root: Arc<HashMap<TypeId, ServiceDescriptor>>,
    scoped: Option<Arc<HashMap<TypeId, SharedInstance>>>,
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("services", &self.root.len())
            .field(
                "scoped",
                &self.scoped.as_ref().map_or(0, |scoped| scoped.len()),
            )
            .finish()
    }
}

impl ServiceProvider {
    /// 解析服务；未登记时返回 `Ok(None)`，瞬态工厂失败时返回其错误。
    pub fn get_service<T>(&self) -> Result<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = TypeId::of::<T>();
        if let Some(instance) = self.scoped.as_ref().and_then(|scoped| scoped.get(&key)) {
            return Ok(downcast::<T>(instance));
        }
        match self.root.get(&key).map(|descriptor| &descriptor.entry) {
            None => Ok(None),
            Some(ServiceEntry::Singleton(instance)) => Ok(downcast::<T>(instance)),
            Some(ServiceEntry::Transient(factory)) => {
                let instance = factory(self)?;
                Ok(downcast::<T>(&instance))
            }
        }
    }

    /// 解析必需的服务，未登记时返回 [`HttpApiError::ServiceNotFound`]。
    pub fn get_required_service<T>(&self) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_service::<T>()?
            .ok_or_else(HttpApiError::service_not_found::<T>)
    }

    /// 是否能解析 `T`。
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        let key = TypeId::of::<T>();
        self.root.contains_key(&key)
            || self
                .scoped
                .as_ref()
                .is_some_and(|scoped| scoped.contains_key(&key))
    }

    /// 创建子作用域。
    pub fn create_scope(&self) -> ServiceScope {
        ServiceScope {
            root: Arc::clone(&self.root),
            scoped: self
                .scoped
                .as_ref()
                .map(|scoped| scoped.as_ref().clone())
                .unwrap_or_default(),
        }
    }

    /// 当前提供者是否为子作用域。
    pub fn is_scoped(&self) -> bool {
        self.scoped.is_some()
    }
}

/// 子作用域构建器：在根登记之上叠加作用域内实例。
pub struct ServiceScope {
    root: Arc<HashMap<TypeId, ServiceDescriptor>>,
    scoped: HashMap<TypeId, SharedInstance>,
}

impl ServiceScope {
    /// 添加作用域内实例，遮蔽根提供者中的同类型登记。
    pub fn with_scoped<T>(mut self, instance: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.scoped
            .insert(TypeId::of::<T>(), Arc::new(instance) as SharedInstance);
        self
    }

    /// 完成构建，得到作用域提供者。
    pub fn into_provider(self) -> ServiceProvider {
        ServiceProvider {
            root: self.root,
            scoped: Some(Arc::new(self.scoped)),
        }
    }
}
