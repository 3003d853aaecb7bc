//! File-backed cache: the whole keyspace as one JSON document.
//!
//! Every mutation rewrites the file via temp-file + fsync + rename, so a
//! crash leaves either the previous or the next snapshot on disk, never a
//! torn one. Reads never touch the disk after `open`.

use crate::keyspace::Keyspace;
use crate::{CacheError, DurableCache};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const FILE_CACHE_SCHEMA: &str = "sluice.cache.v1";

#[derive(Debug, Serialize, Deserialize)]
struct FileSnapshot {
    schema: String,
    #[serde(default)]
    keyspace: Keyspace,
}

/// Single-file durable cache for one process at a time.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    keyspace: Mutex<Keyspace>,
}

impl FileCache {
    /// Load the keyspace at `path`. A missing file is an empty keyspace.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        let keyspace = if path.exists() {
            read_snapshot(&path)?
        } else {
            Keyspace::default()
        };
        Ok(Self {
            path,
            keyspace: Mutex::new(keyspace),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&mut Keyspace) -> T) -> Result<T, CacheError> {
        let mut keyspace = self.keyspace.lock();
        keyspace.purge_expired(Utc::now());
        Ok(f(&mut keyspace))
    }

    fn write<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Keyspace) -> T,
    ) -> Result<T, CacheError> {
        let mut keyspace = self.keyspace.lock();
        keyspace.purge_expired(Utc::now());
        let before = keyspace.clone();
        let value = f(&mut keyspace);
        if let Err(err) = write_snapshot(&self.path, &keyspace, op) {
            *keyspace = before;
            return Err(err);
        }
        Ok(value)
    }
}

impl DurableCache for FileCache {
    fn ping(&self) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| CacheError::unavailable("ping", format!("{}: {e}", parent.display())))?;
        }
        Ok(())
    }

    fn hset(&self, hash: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.write("hset", |ks| ks.hset(hash, field, value))
    }

    fn hget(&self, hash: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.read(|ks| ks.hget(hash, field))
    }

    fn hgetall(&self, hash: &str) -> Result<BTreeMap<String, String>, CacheError> {
        self.read(|ks| ks.hgetall(hash))
    }

    fn hdel(&self, hash: &str, field: &str) -> Result<bool, CacheError> {
        self.write("hdel", |ks| ks.hdel(hash, field))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.write("set", |ks| ks.set(key, value))
    }

    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.read(|ks| ks.get(key))
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.write("delete", |ks| ks.delete(key))
    }

    fn rpush(&self, key: &str, value: &str) -> Result<usize, CacheError> {
        self.write("rpush", |ks| ks.rpush(key, value))
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError> {
        self.read(|ks| ks.lrange(key, start, stop))
    }

    fn lrem(&self, key: &str, count: i64, value: &str) -> Result<usize, CacheError> {
        self.write("lrem", |ks| ks.lrem(key, count, value))
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.write("expire", |ks| ks.expire(key, ttl, Utc::now()))
    }
}

fn read_snapshot(path: &Path) -> Result<Keyspace, CacheError> {
    let bytes = fs::read(path)
        .map_err(|e| CacheError::unavailable("open", format!("{}: {e}", path.display())))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Keyspace::default());
    }
    if std::str::from_utf8(&bytes).is_err() {
        return Err(CacheError::Corrupt(format!(
            "{}: contains non-UTF-8 byte sequence(s)",
            path.display()
        )));
    }
    let snapshot: FileSnapshot = serde_json::from_slice(&bytes)
        .map_err(|e| CacheError::Corrupt(format!("{}: {e}", path.display())))?;
    if snapshot.schema != FILE_CACHE_SCHEMA {
        return Err(CacheError::Corrupt(format!(
            "{}: unsupported cache schema `{}`",
            path.display(),
            snapshot.schema
        )));
    }
    Ok(snapshot.keyspace)
}

fn write_snapshot(path: &Path, keyspace: &Keyspace, op: &'static str) -> Result<(), CacheError> {
    let io_err = |target: &Path, e: std::io::Error| {
        CacheError::unavailable(op, format!("{}: {e}", target.display()))
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let snapshot = FileSnapshot {
        schema: FILE_CACHE_SCHEMA.to_string(),
        keyspace: keyspace.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&snapshot)
        .map_err(|e| CacheError::unavailable(op, format!("serialize: {e}")))?;

    let tmp_path = tmp_write_path(path);
    let write_result = (|| -> Result<(), CacheError> {
        let file = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&bytes).map_err(|e| io_err(&tmp_path, e))?;
        writer.flush().map_err(|e| io_err(&tmp_path, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| io_err(&tmp_path, e.into_error()))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
        Ok(())
    })();

    if let Err(error) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        io_err(path, e)
    })
}

fn tmp_write_path(path: &Path) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut tmp: OsString = path.as_os_str().to_os_string();
    tmp.push(format!(".tmp.{}.{}", std::process::id(), unique));
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "sluice-cache-{prefix}-{}-{unique}.json",
            std::process::id()
        ))
    }

    #[test]
    fn reopen_sees_persisted_keyspace() {
        let path = temp_path("reopen");
        {
            let cache = FileCache::open(&path).expect("open should succeed");
            cache.ping().expect("ping should succeed");
            cache.hset("h", "a", "1").expect("hset");
            cache.rpush("l", "x").expect("rpush");
            cache.rpush("l", "y").expect("rpush");
            cache.set("s", "v").expect("set");
        }

        let reopened = FileCache::open(&path).expect("reopen should succeed");
        assert_eq!(reopened.hget("h", "a").expect("hget").as_deref(), Some("1"));
        assert_eq!(reopened.lrange("l", 0, -1).expect("lrange"), vec!["x", "y"]);
        assert_eq!(reopened.get("s").expect("get").as_deref(), Some("v"));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn open_rejects_garbage() {
        let path = temp_path("garbage");
        fs::write(&path, b"{not json").expect("fixture should write");

        match FileCache::open(&path) {
            Err(CacheError::Corrupt(message)) => assert!(message.contains("garbage")),
            other => panic!("expected corrupt cache error, got {other:?}"),
        }

        let _ = fs::remove_file(path);
    }

    #[test]
    fn open_rejects_foreign_schema() {
        let path = temp_path("schema");
        fs::write(&path, br#"{"schema":"other.v9","keyspace":{}}"#).expect("fixture should write");

        let err = FileCache::open(&path).expect_err("foreign schema must be rejected");
        assert!(err.to_string().contains("other.v9"));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_empty_keyspace() {
        let path = temp_path("missing");
        let cache = FileCache::open(&path).expect("open should succeed");
        assert!(cache.hgetall("h").expect("hgetall").is_empty());
        assert!(!path.exists());
    }
}
