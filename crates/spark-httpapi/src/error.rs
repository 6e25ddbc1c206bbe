//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总注册/解析管线在装配期与调用期可能出现的全部错误，保证调用方只需面对一个枚举；
//! - 区分“装配错误”（组合阶段的编程错误，不可重试）与“协作方透传错误”（传输、序列化）。
//!
//! ## 设计要求（What）
//! - 所有变体派生 [`thiserror::Error`]，可直接交由 `anyhow`/`eyre` 处理；
//! - 每个变体都有稳定的点分错误码（见 [`HttpApiError::code`]），便于日志与告警聚合；
//! - 管线内部不做任何重试，错误原样向上传播。

use thiserror::Error;

use crate::transport::TransportError;

/// 统一的结果别名，默认错误类型为 [`HttpApiError`]。
pub type Result<T, E = HttpApiError> = core::result::Result<T, E>;

/// 注册、解析与调度过程中的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：前七个变体对应装配期的编程错误，必须由宿主应用修正；其余变体仅用于
///   代理调度阶段，承载传输与序列化协作方的失败信息。
/// - **契约 (What)**：变体均为 `Clone + Eq`，测试可直接使用 `assert_eq!` 比较；
///   `Transport` 变体保留底层 [`TransportError`] 作为 `source`。
/// - **风险 (Trade-offs)**：上下文以 `String` 保存，牺牲少量分配换取可读性。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HttpApiError {
    /// 运行期注册入口收到空的类型描述符。
    #[error("contract descriptor is absent")]
    NullDescriptor,

    /// 配置作用域已被首次解析固化，之后的变更被拒绝。
    #[error("options scope for `{contract}` is already finalized and can no longer be configured")]
    InvalidState { contract: String },

    /// 配置步骤在解析过程中再次解析了同一契约（直接或经由环形依赖）。
    #[error("options scope for `{contract}` was re-entered while its steps were running")]
    CyclicResolution { contract: String },

    /// 同一通道重复挂载构造步骤。
    #[error("channel `{channel}` already has a construction step attached")]
    DuplicateRegistration { channel: String },

    /// 描述符并非接口形态的契约（例如携带状态的具体类型）。
    #[error("`{contract}` is not an interface-shaped contract: {reason}")]
    InvalidContract { contract: String, reason: String },

    /// 容器中缺少必需的协作方服务。
    #[error("required service `{service}` is not registered")]
    ServiceNotFound { service: String },

    /// 运行期绑定器无法为描述符构造适配器。
    #[error("cannot construct registration adapter for `{descriptor}`: {reason}")]
    AdapterConstruction { descriptor: String, reason: String },

    /// 传输协作方返回失败。
    #[error("transport failure on channel `{channel}`: {source}")]
    Transport {
        channel: String,
        #[source]
        source: TransportError,
    },

    /// 请求体或响应体的编解码失败。
    #[error("serialization failed for `{action}`: {detail}")]
    Serialization { action: String, detail: String },

    /// 无法依据配置与参数拼装请求（例如缺少基础地址）。
    #[error("cannot build request for `{action}`: {detail}")]
    RequestBuild { action: String, detail: String },

    /// 远端返回非 2xx 状态码。
    #[error("`{action}` responded with unexpected status {status}")]
    Status { action: String, status: u16 },

    /// 声明式清单解析失败。
    #[error("http api manifest is invalid: {detail}")]
    Manifest { detail: String },
}

impl HttpApiError {
    /// 返回稳定的点分错误码。
    ///
    /// - **意图 (Why)**：日志与指标按错误码聚合，避免依赖易变的自然语言描述；
    /// - **契约 (What)**：错误码一经发布不再改变，新增变体只追加新码。
    pub fn code(&self) -> &'static str {
        match self {
            HttpApiError::NullDescriptor => "httpapi.descriptor.null",
            HttpApiError::InvalidState { .. } => "httpapi.options.finalized",
            HttpApiError::CyclicResolution { .. } => "httpapi.options.cycle",
            HttpApiError::DuplicateRegistration { .. } => "httpapi.channel.duplicate",
            HttpApiError::InvalidContract { .. } => "httpapi.contract.invalid",
            HttpApiError::ServiceNotFound { .. } => "httpapi.service.missing",
            HttpApiError::AdapterConstruction { .. } => "httpapi.binder.adapter",
            HttpApiError::Transport { .. } => "httpapi.transport.failure",
            HttpApiError::Serialization { .. } => "httpapi.serialization.failure",
            HttpApiError::RequestBuild { .. } => "httpapi.request.build",
            HttpApiError::Status { .. } => "httpapi.response.status",
            HttpApiError::Manifest { .. } => "httpapi.manifest.invalid",
        }
    }

    /// 是否属于装配期错误。
    ///
    /// 装配期错误意味着宿主应用的组合逻辑存在缺陷，重试不会改变结果。
    pub fn is_composition_error(&self) -> bool {
        matches!(
            self,
            HttpApiError::NullDescriptor
                | HttpApiError::InvalidState { .. }
                | HttpApiError::CyclicResolution { .. }
                | HttpApiError::DuplicateRegistration { .. }
                | HttpApiError::InvalidContract { .. }
                | HttpApiError::ServiceNotFound { .. }
                | HttpApiError::AdapterConstruction { .. }
                | HttpApiError::Manifest { .. }
        )
    }

    pub(crate) fn service_not_found<T: ?Sized>() -> Self {
        HttpApiError::ServiceNotFound {
            service: core::any::type_name::<T>().to_owned(),
        }
    }
}
