//! In-process cache backend.

use crate::keyspace::Keyspace;
use crate::{CacheError, DurableCache};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Shared in-process keyspace.
///
/// Clones share the same keyspace, so a store rebuilt over a clone sees
/// everything the previous store persisted. `set_online(false)` makes every
/// call fail, including `ping`.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    inner: Arc<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    keyspace: Mutex<Keyspace>,
    online: AtomicBool,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                keyspace: Mutex::new(Keyspace::default()),
                online: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate the cache going away (or coming back).
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    fn with_keyspace<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Keyspace) -> T,
    ) -> Result<T, CacheError> {
        if !self.is_online() {
            return Err(CacheError::unavailable(op, "memory cache offline"));
        }
        let mut keyspace = self.inner.keyspace.lock();
        keyspace.purge_expired(Utc::now());
        Ok(f(&mut keyspace))
    }
}

impl DurableCache for MemoryCache {
    fn ping(&self) -> Result<(), CacheError> {
        self.with_keyspace("ping", |_| ())
    }

    fn hset(&self, hash: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.with_keyspace("hset", |ks| ks.hset(hash, field, value))
    }

    fn hget(&self, hash: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.with_keyspace("hget", |ks| ks.hget(hash, field))
    }

    fn hgetall(&self, hash: &str) -> Result<BTreeMap<String, String>, CacheError> {
        self.with_keyspace("hgetall", |ks| ks.hgetall(hash))
    }

    fn hdel(&self, hash: &str, field: &str) -> Result<bool, CacheError> {
        self.with_keyspace("hdel", |ks| ks.hdel(hash, field))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.with_keyspace("set", |ks| ks.set(key, value))
    }

    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_keyspace("get", |ks| ks.get(key))
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.with_keyspace("delete", |ks| ks.delete(key))
    }

    fn rpush(&self, key: &str, value: &str) -> Result<usize, CacheError> {
        self.with_keyspace("rpush", |ks| ks.rpush(key, value))
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError> {
        self.with_keyspace("lrange", |ks| ks.lrange(key, start, stop))
    }

    fn lrem(&self, key: &str, count: i64, value: &str) -> Result<usize, CacheError> {
        self.with_keyspace("lrem", |ks| ks.lrem(key, count, value))
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.with_keyspace("expire", |ks| ks.expire(key, ttl, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_keyspace() {
        let cache = MemoryCache::new();
        let other = cache.clone();
        cache.hset("h", "a", "1").expect("hset should succeed");
        assert_eq!(
            other.hget("h", "a").expect("hget should succeed").as_deref(),
            Some("1")
        );
    }

    #[test]
    fn offline_cache_fails_every_call() {
        let cache = MemoryCache::new();
        cache.set_online(false);
        let err = cache.ping().expect_err("offline ping must fail");
        assert_eq!(err.op(), "ping");
        assert!(cache.set("k", "v").is_err());

        cache.set_online(true);
        cache.set("k", "v").expect("online set should succeed");
        assert_eq!(cache.get("k").expect("get").as_deref(), Some("v"));
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let cache = MemoryCache::new();
        cache.set("k", "v").expect("set");
        assert!(cache.expire("k", Duration::ZERO).expect("expire"));
        assert_eq!(cache.get("k").expect("get"), None);
    }
}
