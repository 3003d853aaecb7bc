//! Backend-independent keyspace shared by the in-process and file caches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Strings, hashes, and lists keyed by name, with optional absolute expiry.
///
/// The three value kinds live in separate maps. A `set` on a key drops any
/// hash or list stored under the same name (string overwrite semantics).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Keyspace {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    strings: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    lists: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    expiries: BTreeMap<String, DateTime<Utc>>,
}

impl Keyspace {
    /// Drop every key whose expiry is at or before `now`.
    ///
    /// Returns the number of keys removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .expiries
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove_key(key);
        }
        expired.len()
    }

    fn exists(&self, key: &str) -> bool {
        self.strings.contains_key(key) || self.hashes.contains_key(key) || self.lists.contains_key(key)
    }

    fn remove_key(&mut self, key: &str) -> bool {
        let existed = self.strings.remove(key).is_some()
            | self.hashes.remove(key).is_some()
            | self.lists.remove(key).is_some();
        self.expiries.remove(key);
        existed
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.remove_key(key);
        self.strings.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.strings.get(key).cloned()
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.remove_key(key)
    }

    pub fn hset(&mut self, hash: &str, field: &str, value: &str) {
        self.hashes
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    pub fn hget(&self, hash: &str, field: &str) -> Option<String> {
        self.hashes.get(hash).and_then(|fields| fields.get(field)).cloned()
    }

    pub fn hgetall(&self, hash: &str) -> BTreeMap<String, String> {
        self.hashes.get(hash).cloned().unwrap_or_default()
    }

    pub fn hdel(&mut self, hash: &str, field: &str) -> bool {
        let Some(fields) = self.hashes.get_mut(hash) else {
            return false;
        };
        let existed = fields.remove(field).is_some();
        if fields.is_empty() {
            self.remove_key(hash);
        }
        existed
    }

    pub fn rpush(&mut self, key: &str, value: &str) -> usize {
        let list = self.lists.entry(key.to_string()).or_default();
        list.push(value.to_string());
        list.len()
    }

    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        let Some(list) = self.lists.get(key) else {
            return Vec::new();
        };
        let len = list.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start >= len || start > stop {
            return Vec::new();
        }
        list[start as usize..=stop as usize].to_vec()
    }

    pub fn lrem(&mut self, key: &str, count: i64, value: &str) -> usize {
        let Some(list) = self.lists.get_mut(key) else {
            return 0;
        };
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };

        let mut removed = 0usize;
        let mut kept = Vec::with_capacity(list.len());
        if count >= 0 {
            for item in list.drain(..) {
                if removed < limit && item == value {
                    removed += 1;
                } else {
                    kept.push(item);
                }
            }
        } else {
            for item in list.drain(..).rev() {
                if removed < limit && item == value {
                    removed += 1;
                } else {
                    kept.push(item);
                }
            }
            kept.reverse();
        }

        let now_empty = kept.is_empty();
        *list = kept;
        if now_empty {
            self.remove_key(key);
        }
        removed
    }

    pub fn expire(&mut self, key: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
        if !self.exists(key) {
            return false;
        }
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.expiries.insert(key.to_string(), at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Keyspace {
        let mut ks = Keyspace::default();
        for item in items {
            ks.rpush("l", item);
        }
        ks
    }

    #[test]
    fn lrange_supports_negative_indices() {
        let ks = list(&["a", "b", "c", "d"]);
        assert_eq!(ks.lrange("l", 0, -1), vec!["a", "b", "c", "d"]);
        assert_eq!(ks.lrange("l", -2, -1), vec!["c", "d"]);
        assert_eq!(ks.lrange("l", 1, 100), vec!["b", "c", "d"]);
        assert!(ks.lrange("l", 3, 1).is_empty());
        assert!(ks.lrange("missing", 0, -1).is_empty());
    }

    #[test]
    fn lrem_respects_count_direction() {
        let mut ks = list(&["x", "a", "x", "b", "x"]);
        assert_eq!(ks.lrem("l", 1, "x"), 1);
        assert_eq!(ks.lrange("l", 0, -1), vec!["a", "x", "b", "x"]);

        assert_eq!(ks.lrem("l", -1, "x"), 1);
        assert_eq!(ks.lrange("l", 0, -1), vec!["a", "x", "b"]);

        assert_eq!(ks.lrem("l", 0, "x"), 1);
        assert_eq!(ks.lrange("l", 0, -1), vec!["a", "b"]);
    }

    #[test]
    fn lrem_drops_emptied_list() {
        let mut ks = list(&["only"]);
        assert_eq!(ks.lrem("l", 0, "only"), 1);
        assert!(!ks.exists("l"));
    }

    #[test]
    fn set_replaces_other_kinds_and_clears_ttl() {
        let mut ks = Keyspace::default();
        let now = Utc::now();
        ks.hset("k", "f", "v");
        assert!(ks.expire("k", Duration::from_secs(5), now));
        ks.set("k", "plain");

        assert!(ks.hgetall("k").is_empty());
        assert_eq!(ks.get("k").as_deref(), Some("plain"));
        assert_eq!(ks.purge_expired(now + chrono::Duration::seconds(10)), 0);
    }

    #[test]
    fn expired_keys_are_purged() {
        let mut ks = Keyspace::default();
        let now = Utc::now();
        ks.set("short", "1");
        ks.set("long", "2");
        assert!(ks.expire("short", Duration::from_secs(1), now));
        assert!(ks.expire("long", Duration::from_secs(60), now));
        assert!(!ks.expire("missing", Duration::from_secs(1), now));

        assert_eq!(ks.purge_expired(now + chrono::Duration::seconds(2)), 1);
        assert_eq!(ks.get("short"), None);
        assert_eq!(ks.get("long").as_deref(), Some("2"));
    }

    #[test]
    fn hdel_removes_empty_hash() {
        let mut ks = Keyspace::default();
        ks.hset("h", "a", "1");
        assert!(ks.hdel("h", "a"));
        assert!(!ks.hdel("h", "a"));
        assert!(!ks.exists("h"));
    }
}
