//! 契约级配置对象。

use core::time::Duration;
use std::collections::BTreeMap;

/// `HttpApiOptions` 是每个契约独享的配置对象。
///
/// # 教案级注释
/// - **意图 (Why)**：同一进程内不同契约往往指向不同的服务端，基础地址、超时与默认请求头必须
///   按契约隔离；
/// - **生命周期 (How)**：解析时先以 [`Default`] 构造全新实例，再按顺序执行环境步骤与契约步骤，
///   随后冻结为 `Arc<HttpApiOptions>` 共享给所有代理；
/// - **契约 (What)**：字段均为公开数据，变更只能发生在配置步骤内部；冻结后只读。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpApiOptions {
    /// 基础地址，例如 `https://orders.example.com/api`。
    pub http_host: Option<String>,
    /// 单次请求超时，交由传输实现执行。
    pub timeout: Option<Duration>,
    /// 是否由调度器输出调用日志。
    pub use_logging: bool,
    /// 是否附加默认 `User-Agent`。
    pub use_default_user_agent: bool,
    /// 每个请求都会携带的请求头，按登记顺序发送。
    pub default_headers: Vec<(String, String)>,
    /// 供协作方读取的扩展属性。
    pub properties: BTreeMap<String, String>,
}

impl Default for HttpApiOptions {
    fn default() -> Self {
        Self {
            http_host: None,
            timeout: None,
            use_logging: true,
            use_default_user_agent: true,
            default_headers: Vec::new(),
            properties: BTreeMap::new(),
        }
    }
}

impl HttpApiOptions {
    /// 默认 `User-Agent` 值。
    pub const DEFAULT_USER_AGENT: &'static str =
        concat!("spark-httpapi/", env!("CARGO_PKG_VERSION"));

    /// 追加一个默认请求头。
    pub fn add_default_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.default_headers.push((name.into(), value.into()));
    }
}
