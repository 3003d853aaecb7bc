//! Best-effort, retry-free access to an optional durable cache.

use crate::{CacheError, DurableCache};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Availability-checked wrapper around a `DurableCache`.
///
/// Availability is decided by one `ping` at construction and never
/// re-checked: a handle built while the cache was down stays detached for
/// its lifetime. On an attached handle, each failed call is logged and
/// mapped to a neutral value (`false`, `None`).
#[derive(Clone)]
pub struct CacheHandle {
    backend: Option<Arc<dyn DurableCache>>,
}

impl fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("available", &self.is_available())
            .finish()
    }
}

impl CacheHandle {
    /// Ping `backend` once and keep it only if it answers.
    pub fn connect(backend: Arc<dyn DurableCache>) -> Self {
        match backend.ping() {
            Ok(()) => {
                info!("durable cache reachable");
                Self {
                    backend: Some(backend),
                }
            }
            Err(err) => {
                warn!(error = %err, "durable cache unreachable; running in-memory only");
                Self { backend: None }
            }
        }
    }

    /// A handle with no backend: every call is a no-op.
    pub fn detached() -> Self {
        Self { backend: None }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    fn call<T>(
        &self,
        f: impl FnOnce(&dyn DurableCache) -> Result<T, CacheError>,
    ) -> Option<T> {
        let backend = self.backend.as_deref()?;
        match f(backend) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(op = err.op(), error = %err, "durable cache call failed");
                None
            }
        }
    }

    pub fn hset(&self, hash: &str, field: &str, value: &str) -> bool {
        self.call(|c| c.hset(hash, field, value)).is_some()
    }

    pub fn hget(&self, hash: &str, field: &str) -> Option<String> {
        self.call(|c| c.hget(hash, field)).flatten()
    }

    /// `None` when the cache is detached or the call failed; an empty map
    /// means the hash is genuinely empty.
    pub fn hgetall(&self, hash: &str) -> Option<BTreeMap<String, String>> {
        self.call(|c| c.hgetall(hash))
    }

    pub fn hdel(&self, hash: &str, field: &str) -> bool {
        self.call(|c| c.hdel(hash, field)).unwrap_or(false)
    }

    pub fn set(&self, key: &str, value: &str) -> bool {
        self.call(|c| c.set(key, value)).is_some()
    }

    /// Store `value` and give it a TTL. Both steps must succeed.
    pub fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> bool {
        self.set(key, value) && self.expire(key, ttl)
    }

    /// `Some(None)` distinguishes "key absent" from "cache unusable".
    pub fn get(&self, key: &str) -> Option<Option<String>> {
        self.call(|c| c.get(key))
    }

    pub fn delete(&self, key: &str) -> bool {
        self.call(|c| c.delete(key)).unwrap_or(false)
    }

    pub fn rpush(&self, key: &str, value: &str) -> bool {
        self.call(|c| c.rpush(key, value)).is_some()
    }

    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Option<Vec<String>> {
        self.call(|c| c.lrange(key, start, stop))
    }

    pub fn lrem(&self, key: &str, count: i64, value: &str) -> usize {
        self.call(|c| c.lrem(key, count, value)).unwrap_or(0)
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        self.call(|c| c.expire(key, ttl)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCache;

    #[test]
    fn connect_detaches_when_ping_fails() {
        let cache = MemoryCache::new();
        cache.set_online(false);
        let handle = CacheHandle::connect(Arc::new(cache.clone()));
        assert!(!handle.is_available());

        cache.set_online(true);
        assert!(!handle.set("k", "v"), "availability is decided once");
        assert_eq!(cache.get("k").expect("get"), None);
    }

    #[test]
    fn failures_after_connect_degrade_to_neutral_values() {
        let cache = MemoryCache::new();
        let handle = CacheHandle::connect(Arc::new(cache.clone()));
        assert!(handle.is_available());
        assert!(handle.hset("h", "a", "1"));

        cache.set_online(false);
        assert!(!handle.hset("h", "b", "2"));
        assert_eq!(handle.hgetall("h"), None);
        assert_eq!(handle.get("k"), None);
        assert_eq!(handle.lrem("l", 0, "x"), 0);
    }

    #[test]
    fn get_distinguishes_absent_from_unusable() {
        let handle = CacheHandle::connect(Arc::new(MemoryCache::new()));
        assert_eq!(handle.get("missing"), Some(None));
        assert_eq!(CacheHandle::detached().get("missing"), None);
    }
}
