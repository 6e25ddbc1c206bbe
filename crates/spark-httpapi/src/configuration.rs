//! 配置注册表：每个契约一个配置作用域，首次解析后固化。
//!
//! # 设计背景（Why）
//! - 同一契约可能在多个位置被注册，每次注册都可能追加配置步骤，最终效果必须等价于
//!   “按注册顺序依次执行全部步骤”，而不是“最后一次注册生效”；
//! - 配置步骤可以访问服务提供者，从而依赖其他已注册的服务；步骤在解析时执行，
//!   使用的正是解析代理时的那个提供者。
//!
//! # 行为概览（How）
//! 1. [`OptionsRegistry::register_scope`] 惰性创建作用域，重复调用返回同一句柄；
//! 2. [`OptionsRegistry::add_mutation`] 追加步骤，作用域固化后返回
//!    [`HttpApiError::InvalidState`]；
//! 3. [`OptionsRegistry::resolve`] 以默认配置为起点，先执行 [`AmbientConfiguration`]
//!    中的环境步骤，再按注册顺序执行作用域步骤，然后固化并缓存结果。
//!
//! # 并发约束（What）
//! - 固化写入由作用域内的 `RwLock` 串行化，固化结果经 `OnceLock` 发布，
//!   已固化后的读取路径不获取写锁；
//! - 配置步骤在持有作用域写锁时执行；步骤在同一线程内再次解析同一作用域（直接或经由
//!   环形依赖）时，在获取写锁之前返回 [`HttpApiError::CyclicResolution`]，作用域保持开放。

use core::any::TypeId;
use core::cell::RefCell;
use core::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::contract::ContractDescriptor;
use crate::error::{HttpApiError, Result};
use crate::options::HttpApiOptions;
use crate::provider::ServiceProvider;

type PlainStep = Arc<dyn Fn(&mut HttpApiOptions) + Send + Sync>;
type ProviderStep =
    Arc<dyn Fn(&mut HttpApiOptions, &ServiceProvider) -> Result<()> + Send + Sync>;
type AmbientStep = Arc<dyn Fn(&ContractDescriptor, &mut HttpApiOptions) + Send + Sync>;

#[derive(Clone)]
enum MutationKind {
    Plain(PlainStep),
    WithProvider(ProviderStep),
}

/// 单个配置变更步骤。
#[derive(Clone)]
pub struct OptionsMutation {
    kind: MutationKind,
}

impl OptionsMutation {
    /// 纯配置步骤。
    pub fn new<F>(step: F) -> Self
    where
        F: Fn(&mut HttpApiOptions) + Send + Sync + 'static,
    {
        Self {
            kind: MutationKind::Plain(Arc::new(step)),
        }
    }

    /// 可访问服务提供者的配置步骤，失败时中止解析。
    pub fn with_provider<F>(step: F) -> Self
    where
        F: Fn(&mut HttpApiOptions, &ServiceProvider) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            kind: MutationKind::WithProvider(Arc::new(step)),
        }
    }

    /// 步骤是否需要服务提供者。
    pub fn uses_provider(&self) -> bool {
        matches!(self.kind, MutationKind::WithProvider(_))
    }

    pub(crate) fn apply(
        &self,
        options: &mut HttpApiOptions,
        provider: &ServiceProvider,
    ) -> Result<()> {
        match &self.kind {
            MutationKind::Plain(step) => {
                step(options);
                Ok(())
            }
            MutationKind::WithProvider(step) => step(options, provider),
        }
    }
}

impl fmt::Debug for OptionsMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsMutation")
            .field("uses_provider", &self.uses_provider())
            .finish()
    }
}

/// 由容器提供、作用于所有契约的环境配置步骤。
///
/// - **意图 (Why)**：统一设置所有契约共享的默认值（例如公共请求头），无需逐个契约登记；
/// - **顺序 (What)**：环境步骤先于契约步骤执行，因此契约步骤总能覆盖环境默认值。
#[derive(Default)]
pub struct AmbientConfiguration {
    steps: RwLock<Vec<AmbientStep>>,
}

impl AmbientConfiguration {
    /// 创建空的环境配置。
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加环境步骤。
    pub fn push<F>(&self, step: F)
    where
        F: Fn(&ContractDescriptor, &mut HttpApiOptions) + Send + Sync + 'static,
    {
        self.steps.write().push(Arc::new(step));
    }

    /// 环境步骤数量。
    pub fn len(&self) -> usize {
        self.steps.read().len()
    }

    /// 是否没有任何环境步骤。
    pub fn is_empty(&self) -> bool {
        self.steps.read().is_empty()
    }

    fn apply(&self, descriptor: &ContractDescriptor, options: &mut HttpApiOptions) {
        let steps = self.steps.read().clone();
        for step in steps {
            step(descriptor, options);
        }
    }
}

impl fmt::Debug for AmbientConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientConfiguration")
            .field("steps", &self.len())
            .finish()
    }
}

enum ScopeState {
    Open(Vec<OptionsMutation>),
    Finalized,
}

struct OptionsScope {
    descriptor: ContractDescriptor,
    state: RwLock<ScopeState>,
    finalized: OnceLock<Arc<HttpApiOptions>>,
}

impl OptionsScope {
    fn new(descriptor: ContractDescriptor) -> Self {
        Self {
            descriptor,
            state: RwLock::new(ScopeState::Open(Vec::new())),
            finalized: OnceLock::new(),
        }
    }
}

thread_local! {
    /// 当前线程上正在执行步骤的作用域地址。
    static RESOLVING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// 在当前线程上标记“作用域正在解析”，离开作用域时撤销标记。
struct ResolvingGuard(usize);

impl ResolvingGuard {
    fn enter(scope: &Arc<OptionsScope>) -> Option<Self> {
        let key = Arc::as_ptr(scope) as usize;
        RESOLVING.with(|resolving| {
            let mut resolving = resolving.borrow_mut();
            if resolving.contains(&key) {
                return None;
            }
            resolving.push(key);
            Some(Self(key))
        })
    }
}

impl Drop for ResolvingGuard {
    fn drop(&mut self) {
        RESOLVING.with(|resolving| {
            let mut resolving = resolving.borrow_mut();
            if let Some(index) = resolving.iter().rposition(|key| *key == self.0) {
                resolving.remove(index);
            }
        });
    }
}

/// 配置作用域句柄。
#[derive(Clone)]
pub struct ScopeHandle(Arc<OptionsScope>);

impl ScopeHandle {
    /// 作用域所属的契约。
    pub fn descriptor(&self) -> ContractDescriptor {
        self.0.descriptor
    }

    /// 作用域是否已固化。
    pub fn is_finalized(&self) -> bool {
        self.0.finalized.get().is_some()
    }

    /// 尚未执行的步骤数量；固化后为 0。
    pub fn pending_steps(&self) -> usize {
        match &*self.0.state.read() {
            ScopeState::Open(steps) => steps.len(),
            ScopeState::Finalized => 0,
        }
    }

    /// 两个句柄是否指向同一作用域。
    pub fn same_scope(&self, other: &ScopeHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("contract", &self.descriptor().name())
            .field("finalized", &self.is_finalized())
            .field("pending_steps", &self.pending_steps())
            .finish()
    }
}

/// `OptionsRegistry` 维护“契约 → 配置作用域”的目录。
///
/// # 教案级注释
/// - **目标 (Why)**：把配置按契约隔离，杜绝不同契约之间的配置串扰；
/// - **设计要点 (How)**：以 `TypeId` 为键的 `DashMap`，装配期写入、解析期并发读取；
/// - **契约 (What)**：
///   - `register_scope` 幂等；
///   - `add_mutation` 在固化后失败且不改变状态；
///   - `resolve` 对同一句柄幂等，返回同一个 `Arc`；
/// - **风险 (Trade-offs)**：固化不可逆，若宿主需要热更新配置，应在更高层替换整个提供者。
#[derive(Default)]
pub struct OptionsRegistry {
    scopes: DashMap<TypeId, ScopeHandle>,
}

impl fmt::Debug for OptionsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsRegistry")
            .field("scopes", &self.scopes.len())
            .finish()
    }
}

impl OptionsRegistry {
    /// 创建空注册表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建或复用契约的配置作用域。
    pub fn register_scope(&self, descriptor: ContractDescriptor) -> ScopeHandle {
        if let Some(existing) = self.scopes.get(&descriptor.type_id()) {
            return existing.clone();
        }
        self.scopes
            .entry(descriptor.type_id())
            .or_insert_with(|| {
                tracing::debug!(contract = %descriptor, "created options scope");
                ScopeHandle(Arc::new(OptionsScope::new(descriptor)))
            })
            .clone()
    }

    /// 查找已存在的作用域。
    pub fn scope(&self, descriptor: &ContractDescriptor) -> Option<ScopeHandle> {
        self.scopes
            .get(&descriptor.type_id())
            .map(|entry| entry.clone())
    }

    /// 任意一个已固化的作用域。
    pub fn first_finalized(&self) -> Option<ScopeHandle> {
        self.scopes
            .iter()
            .find(|entry| entry.is_finalized())
            .map(|entry| entry.clone())
    }

    /// 追加配置步骤。
    ///
    /// - **错误**：作用域已固化时返回 [`HttpApiError::InvalidState`]，步骤被丢弃。
    pub fn add_mutation(&self, handle: &ScopeHandle, step: OptionsMutation) -> Result<()> {
        let mut state = handle.0.state.write();
        match &mut *state {
            ScopeState::Open(steps) => {
                steps.push(step);
                Ok(())
            }
            ScopeState::Finalized => Err(HttpApiError::InvalidState {
                contract: handle.descriptor().name().to_owned(),
            }),
        }
    }

    /// 解析并固化作用域的配置。
    ///
    /// # 教案级注释
    /// - **执行逻辑 (How)**：
    ///   1. 已固化时直接返回缓存结果，不获取写锁；
    ///   2. 在当前线程上登记作用域，已登记说明步骤重入了同一作用域；
    ///   3. 获取写锁后再次检查，防止并发解析重复执行步骤；
    ///   4. 以默认配置为起点执行环境步骤与作用域步骤；
    ///   5. 全部成功后把状态切换为固化并发布结果；
    /// - **错误 (What)**：
    ///   - 任何步骤失败都会原样返回，作用域保持开放，下一次解析会从默认配置重新执行全部步骤；
    ///   - 重入时返回 [`HttpApiError::CyclicResolution`]，外层步骤通常以 `?` 原样透传。
    pub fn resolve(
        &self,
        handle: &ScopeHandle,
        provider: &ServiceProvider,
    ) -> Result<Arc<HttpApiOptions>> {
        let scope = &handle.0;
        if let Some(options) = scope.finalized.get() {
            return Ok(Arc::clone(options));
        }

        let Some(_guard) = ResolvingGuard::enter(scope) else {
            tracing::warn!(
                contract = %scope.descriptor,
                "options scope re-entered during resolution"
            );
            return Err(HttpApiError::CyclicResolution {
                contract: scope.descriptor.name().to_owned(),
            });
        };
        let mut state = scope.state.write();
        if let Some(options) = scope.finalized.get() {
            return Ok(Arc::clone(options));
        }

        let mut options = HttpApiOptions::default();
        if let Some(ambient) = provider.get_service::<AmbientConfiguration>()? {
            ambient.apply(&scope.descriptor, &mut options);
        }

        let applied = match &*state {
            ScopeState::Open(steps) => {
                for step in steps {
                    if let Err(error) = step.apply(&mut options, provider) {
                        tracing::warn!(
                            contract = %scope.descriptor,
                            code = error.code(),
                            %error,
                            "options step failed; scope stays open"
                        );
                        return Err(error);
                    }
                }
                steps.len()
            }
            ScopeState::Finalized => 0,
        };

        let options = Arc::new(options);
        *state = ScopeState::Finalized;
        let published = Arc::clone(scope.finalized.get_or_init(|| options));
        tracing::debug!(
            contract = %scope.descriptor,
            steps = applied,
            "finalized options scope"
        );
        Ok(published)
    }

    /// 作用域数量。
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// 是否没有任何作用域。
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}
