//! 序列化协作方：JSON 编解码与查询参数展开。
//!
//! 两个 trait 均保持对象安全，以 `serde_json::Value` 作为中间表示，
//! 宿主可以用 `add_singleton::<dyn JsonSerializer>` 替换默认实现。

use serde_json::Value;

/// JSON 编解码器。
pub trait JsonSerializer: Send + Sync + 'static {
    /// 把值编码为请求体。
    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, String>;

    /// 把响应体解码为值；空响应体应解码为 `Value::Null`。
    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, String>;
}

/// 基于 `serde_json` 的默认实现。
#[derive(Clone, Copy, Debug, Default)]
pub struct SerdeJsonSerializer;

impl JsonSerializer for SerdeJsonSerializer {
    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, String> {
        serde_json::to_vec(value).map_err(|err| err.to_string())
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, String> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(bytes).map_err(|err| err.to_string())
    }
}

/// 把单个参数展开为若干查询键值对。
pub trait KeyValueSerializer: Send + Sync + 'static {
    /// 展开参数，返回的键值对按出现顺序追加到查询串。
    fn serialize(&self, key: &str, value: &Value) -> Vec<(String, String)>;
}

/// 默认的扁平展开策略。
///
/// - `null` 被跳过；
/// - 数组按元素重复同一个键；
/// - 对象展开为 `key.field`，递归处理嵌套结构；
/// - 字符串原样输出，其余标量使用 JSON 文本形式。
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatKeyValueSerializer;

impl FlatKeyValueSerializer {
    fn flatten(key: &str, value: &Value, out: &mut Vec<(String, String)>) {
        match value {
            Value::Null => {}
            Value::String(text) => out.push((key.to_owned(), text.clone())),
            Value::Bool(_) | Value::Number(_) => out.push((key.to_owned(), value.to_string())),
            Value::Array(items) => {
                for item in items {
                    Self::flatten(key, item, out);
                }
            }
            Value::Object(fields) => {
                for (field, nested) in fields {
                    Self::flatten(&format!("{key}.{field}"), nested, out);
                }
            }
        }
    }
}

impl KeyValueSerializer for FlatKeyValueSerializer {
    fn serialize(&self, key: &str, value: &Value) -> Vec<(String, String)> {
        let mut out = Vec::new();
        Self::flatten(key, value, &mut out);
        out
    }
}
