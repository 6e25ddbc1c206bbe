//! 调度器：把代理方法调用翻译为一次 HTTP 往返。
//!
//! # 设计背景（Why）
//! - `#[http_api]` 生成的代理只负责“收集参数”，真正的请求拼装、缓存、发送与解码都集中在
//!   [`ApiDispatcher::invoke`]，从而所有契约共享同一条管线；
//! - 每个协作方（序列化、缓存、传输）都从服务提供者中取得，宿主可逐一替换。
//!
//! # 管线（How）
//! 1. 以 `http_host` 为基础拼接路径与查询串，路径占位符与查询值均做百分号编码；
//! 2. 追加默认请求头、`User-Agent`、`Content-Type` 以及调用方附加的请求头；
//! 3. 对声明了缓存时长的 GET 动作先查询 [`ResponseCacheProvider`]；
//! 4. 通过通道上的 [`HttpTransport`](crate::transport::HttpTransport) 发送；
//! 5. 非 2xx 状态返回 [`HttpApiError::Status`]；
//! 6. 成功且可缓存的响应写入缓存；
//! 7. 经 [`JsonSerializer`] 解码为返回类型，空响应体按 `null` 解码。

use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::{Url, form_urlencoded};

use crate::cache::{CachedResponse, ResponseCacheProvider};
use crate::contract::ContractDescriptor;
use crate::error::{HttpApiError, Result};
use crate::options::HttpApiOptions;
use crate::provider::ServiceProvider;
use crate::serialization::{JsonSerializer, KeyValueSerializer};
use crate::transport::{ChannelHandle, HttpMethod, HttpRequest};

const JSON_CONTENT_TYPE: &str = "application/json";

/// 契约方法的静态描述，由 `#[http_api]` 为每个方法生成一个 `static`。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ApiAction {
    /// `Trait::method` 形式的动作名，用于日志与错误上下文。
    pub name: &'static str,
    pub method: HttpMethod,
    /// 路径模板，`{name}` 为占位符；以 `http://` 或 `https://` 开头时忽略基础地址。
    /// `?` 之后的部分是固定查询串，排在参数生成的查询项之前。
    pub path: &'static str,
    /// 响应缓存时长，仅对 GET 生效。
    pub cache_ttl: Option<Duration>,
}

impl ApiAction {
    /// 构造无缓存的动作。
    pub const fn new(name: &'static str, method: HttpMethod, path: &'static str) -> Self {
        Self {
            name,
            method,
            path,
            cache_ttl: None,
        }
    }

    /// 为动作声明缓存时长。
    pub const fn with_cache_secs(mut self, secs: u64) -> Self {
        self.cache_ttl = Some(Duration::from_secs(secs));
        self
    }

    fn is_cacheable(&self) -> bool {
        matches!(self.method, HttpMethod::Get) && self.cache_ttl.is_some()
    }
}

/// 单次调用的参数集合。
#[derive(Clone, Debug)]
pub struct ApiRequest {
    action: &'static ApiAction,
    path_params: Vec<(&'static str, String)>,
    query: Vec<(String, Value)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

impl ApiRequest {
    fn new(action: &'static ApiAction) -> Self {
        Self {
            action,
            path_params: Vec::new(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// 本次调用对应的动作。
    pub fn action(&self) -> &'static ApiAction {
        self.action
    }

    /// 绑定路径占位符。
    pub fn path_param(mut self, name: &'static str, value: &impl fmt::Display) -> Self {
        self.path_params.push((name, value.to_string()));
        self
    }

    /// 追加查询参数，最终由 [`KeyValueSerializer`] 展开。
    pub fn query(mut self, name: &str, value: &impl Serialize) -> Result<Self> {
        let value = self.to_value(value)?;
        self.query.push((name.to_owned(), value));
        Ok(self)
    }

    /// 设置 JSON 请求体。
    pub fn json_body(mut self, value: &impl Serialize) -> Result<Self> {
        self.body = Some(self.to_value(value)?);
        Ok(self)
    }

    /// 追加请求头。
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn to_value(&self, value: &impl Serialize) -> Result<Value> {
        serde_json::to_value(value).map_err(|err| HttpApiError::Serialization {
            action: self.action.name.to_owned(),
            detail: err.to_string(),
        })
    }

    fn path_param_value(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rev()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn request_build(action: &ApiAction, detail: impl Into<String>) -> HttpApiError {
    HttpApiError::RequestBuild {
        action: action.name.to_owned(),
        detail: detail.into(),
    }
}

/// 把单个路径段中的 `{name}` 替换为参数值。
fn expand_segment(segment: &str, request: &ApiRequest) -> Result<String> {
    let mut expanded = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(open) = rest.find('{') {
        expanded.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            request_build(
                request.action,
                format!("unclosed placeholder in `{segment}`"),
            )
        })?;
        let name = &after[..close];
        let value = request.path_param_value(name).ok_or_else(|| {
            request_build(request.action, format!("missing path parameter `{name}`"))
        })?;
        expanded.push_str(value);
        rest = &after[close + 1..];
    }
    expanded.push_str(rest);
    Ok(expanded)
}

fn build_uri(
    options: &HttpApiOptions,
    request: &ApiRequest,
    key_values: &dyn KeyValueSerializer,
) -> Result<Url> {
    let action = request.action;
    let absolute = action.path.starts_with("http://") || action.path.starts_with("https://");
    let (mut url, template) = if absolute {
        let (base, path) = split_absolute(action.path);
        let url = Url::parse(base).map_err(|err| request_build(action, err.to_string()))?;
        (url, path)
    } else {
        let host = options.http_host.as_deref().ok_or_else(|| {
            request_build(action, "relative path requires `http_host` to be configured")
        })?;
        let url = Url::parse(host)
            .map_err(|err| request_build(action, format!("invalid http_host `{host}`: {err}")))?;
        (url, action.path)
    };
    let (template, literal_query) = template.split_once('?').unwrap_or((template, ""));

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| request_build(action, "base address cannot carry a path"))?;
        segments.pop_if_empty();
        for segment in template.split('/').filter(|segment| !segment.is_empty()) {
            segments.push(&expand_segment(segment, request)?);
        }
    }

    let mut pairs = Vec::new();
    for (name, value) in form_urlencoded::parse(literal_query.as_bytes()) {
        pairs.push((name.into_owned(), expand_segment(&value, request)?));
    }
    pairs.extend(
        request
            .query
            .iter()
            .flat_map(|(name, value)| key_values.serialize(name, value)),
    );
    if !pairs.is_empty() {
        let mut query = url.query_pairs_mut();
        for (name, value) in &pairs {
            query.append_pair(name, value);
        }
    }
    Ok(url)
}

/// 把 `https://host/a/b` 拆成 `https://host` 与 `/a/b`。
fn split_absolute(path: &str) -> (&str, &str) {
    let scheme_end = path.find("://").map_or(0, |index| index + 3);
    match path[scheme_end..].find('/') {
        Some(index) => path.split_at(scheme_end + index),
        None => (path, ""),
    }
}

/// `ApiDispatcher` 承载代理所需的全部上下文。
///
/// # 教案级注释
/// - **意图 (Why)**：代理实例本身不持有任何业务状态，只持有一个调度器；
///   调度器聚合通道、已固化的配置与解析时的服务提供者；
/// - **契约 (What)**：克隆成本为若干次原子计数；`invoke` 返回的 Future 为 `Send`；
/// - **风险 (Trade-offs)**：
///   - 服务提供者在构造时被捕获，代理不会感知之后构建的新提供者；
///   - 传输实例缓存在共享通道上，子作用域覆盖的 [`TransportConnector`] 只在通道首次连接前生效。
///
/// [`TransportConnector`]: crate::transport::TransportConnector
#[derive(Clone)]
pub struct ApiDispatcher {
    descriptor: ContractDescriptor,
    channel: ChannelHandle,
    options: Arc<HttpApiOptions>,
    provider: ServiceProvider,
}

impl fmt::Debug for ApiDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiDispatcher")
            .field("contract", &self.descriptor.name())
            .field("channel", &self.channel.name())
            .field("http_host", &self.options.http_host)
            .finish()
    }
}

impl ApiDispatcher {
    pub(crate) fn new(
        descriptor: ContractDescriptor,
        channel: ChannelHandle,
        options: Arc<HttpApiOptions>,
        provider: ServiceProvider,
    ) -> Self {
        Self {
            descriptor,
            channel,
            options,
            provider,
        }
    }

    /// 所属契约。
    pub fn descriptor(&self) -> ContractDescriptor {
        self.descriptor
    }

    /// 所属通道。
    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    /// 已固化的契约配置。
    pub fn options(&self) -> &Arc<HttpApiOptions> {
        &self.options
    }

    /// 解析代理时使用的服务提供者。
    pub fn provider(&self) -> &ServiceProvider {
        &self.provider
    }

    /// 为动作开始一次调用。
    pub fn request(&self, action: &'static ApiAction) -> ApiRequest {
        ApiRequest::new(action)
    }

    /// 执行一次调用并把响应解码为 `T`。
    pub async fn invoke<T>(&self, request: ApiRequest) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let action = request.action;
        let key_values = self
            .provider
            .get_required_service::<dyn KeyValueSerializer>()?;
        let json = self.provider.get_required_service::<dyn JsonSerializer>()?;
        let uri = build_uri(&self.options, &request, key_values.as_ref())?.to_string();

        let mut headers = self.options.default_headers.clone();
        let has_user_agent = headers
            .iter()
            .chain(request.headers.iter())
            .any(|(name, _)| name.eq_ignore_ascii_case("user-agent"));
        if self.options.use_default_user_agent && !has_user_agent {
            headers.push((
                "User-Agent".to_owned(),
                HttpApiOptions::DEFAULT_USER_AGENT.to_owned(),
            ));
        }
        headers.push(("Accept".to_owned(), JSON_CONTENT_TYPE.to_owned()));
        let body = match &request.body {
            Some(value) => {
                headers.push(("Content-Type".to_owned(), JSON_CONTENT_TYPE.to_owned()));
                json.to_bytes(value)
                    .map_err(|detail| HttpApiError::Serialization {
                        action: action.name.to_owned(),
                        detail,
                    })?
                    .into()
            }
            None => bytes::Bytes::new(),
        };
        headers.extend(request.headers);

        let cache = if action.is_cacheable() {
            self.provider.get_service::<dyn ResponseCacheProvider>()?
        } else {
            None
        };
        let cache_key = format!("{} {uri}", action.method);
        if let Some(hit) = cache.as_ref().and_then(|cache| cache.get(&cache_key)) {
            if self.options.use_logging {
                tracing::debug!(
                    channel = %self.channel.name(),
                    action = action.name,
                    status = hit.status,
                    "served http api call from cache"
                );
            }
            return decode(json.as_ref(), action, &hit.body);
        }

        let transport = self.channel.transport(&self.provider)?;
        let started = Instant::now();
        let response = transport
            .send(HttpRequest {
                method: action.method,
                uri,
                headers,
                body,
                timeout: self.options.timeout,
            })
            .await
            .map_err(|source| HttpApiError::Transport {
                channel: self.channel.name().to_owned(),
                source,
            })?;
        if self.options.use_logging {
            tracing::debug!(
                channel = %self.channel.name(),
                action = action.name,
                status = response.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "http api call completed"
            );
        }

        if !response.is_success() {
            return Err(HttpApiError::Status {
                action: action.name.to_owned(),
                status: response.status,
            });
        }

        if let (Some(cache), Some(ttl)) = (cache.as_ref(), action.cache_ttl) {
            cache.set(
                &cache_key,
                CachedResponse {
                    status: response.status,
                    body: response.body.clone(),
                },
                ttl,
            );
        }
        decode(json.as_ref(), action, &response.body)
    }
}

fn decode<T: DeserializeOwned>(
    json: &dyn JsonSerializer,
    action: &ApiAction,
    body: &[u8],
) -> Result<T> {
    let serialization = |detail: String| HttpApiError::Serialization {
        action: action.name.to_owned(),
        detail,
    };
    let value = json.from_bytes(body).map_err(serialization)?;
    serde_json::from_value(value).map_err(|err| serialization(err.to_string()))
}
