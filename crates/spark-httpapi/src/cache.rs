//! 响应缓存协作方。
//!
//! 调度器只对声明了 `#[cache(secs)]` 的 GET 动作查询与写入缓存，
//! 淘汰策略完全由实现决定；默认的 [`MemoryResponseCache`] 仅在读取时清理过期条目。

use core::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;

/// 缓存中保存的响应快照。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Bytes,
}

/// 响应缓存契约。
pub trait ResponseCacheProvider: Send + Sync + 'static {
    /// 读取未过期的缓存条目。
    fn get(&self, key: &str) -> Option<CachedResponse>;

    /// 写入缓存条目，`ttl` 之后视为过期。
    fn set(&self, key: &str, response: CachedResponse, ttl: Duration);
}

struct Entry {
    response: CachedResponse,
    expires_at: Instant,
}

/// 进程内缓存，键通常为 `METHOD URI`。
#[derive(Default)]
pub struct MemoryResponseCache {
    entries: DashMap<String, Entry>,
}

impl core::fmt::Debug for MemoryResponseCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryResponseCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl MemoryResponseCache {
    /// 创建空缓存。
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前条目数量（包含尚未被清理的过期条目）。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 缓存是否为空。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResponseCacheProvider for MemoryResponseCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.response.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    fn set(&self, key: &str, response: CachedResponse, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .insert(key.to_owned(), Entry { response, expires_at });
    }
}
