//! Pipe definition store: latest structure declaration per pipe id.
//!
//! One mutex guards the in-memory maps. Durable-cache writes happen after the
//! lock is released, from a snapshot taken under it. The in-memory state is
//! authoritative; a failed write is logged and otherwise ignored.
//!
//! Besides the sorted id list, the store remembers first-declaration order
//! (persisted as a list). Re-declaring a pipe replaces its definition but
//! keeps its position.

use crate::codec::{self, Persisted};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::ids::validate_id;
use crate::records::{ExportReceipt, PipeDefinition};
use chrono::Utc;
use parking_lot::Mutex;
use sluice_cache::CacheHandle;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct PipeKeys {
    definitions: String,
    order: String,
    exports: String,
}

impl PipeKeys {
    fn new(prefix: &str) -> Self {
        Self {
            definitions: format!("{prefix}:pipes:definitions"),
            order: format!("{prefix}:pipes:order"),
            exports: format!("{prefix}:pipes:exports"),
        }
    }
}

#[derive(Debug, Default)]
struct PipeState {
    definitions: BTreeMap<String, PipeDefinition>,
    order: Vec<String>,
    exports: Vec<ExportReceipt>,
}

impl PipeState {
    /// Upsert; true when the pipe id is new.
    fn upsert(&mut self, definition: PipeDefinition) -> bool {
        let pipe_id = definition.pipe_id.clone();
        let is_new = self.definitions.insert(pipe_id.clone(), definition).is_none();
        if is_new {
            self.order.push(pipe_id);
        }
        is_new
    }

    fn ordered(&self) -> impl Iterator<Item = &PipeDefinition> {
        self.order.iter().filter_map(|id| self.definitions.get(id))
    }
}

#[derive(Debug)]
pub struct PipeDefinitionStore {
    state: Mutex<PipeState>,
    cache: CacheHandle,
    keys: PipeKeys,
}

impl PipeDefinitionStore {
    /// Build the store and replay any persisted definitions.
    pub fn open(config: &GatewayConfig, cache: CacheHandle) -> Self {
        let store = Self {
            state: Mutex::new(PipeState::default()),
            cache,
            keys: PipeKeys::new(&config.key_prefix),
        };
        store.rehydrate();
        store
    }

    /// Upsert one definition. Re-declaring a pipe replaces it wholesale.
    pub fn register(&self, definition: PipeDefinition) -> Result<(), GatewayError> {
        validate_definition(&definition)?;
        let snapshot = definition.clone();
        let is_new = self.state.lock().upsert(definition);

        self.persist_definition(&snapshot, is_new);
        info!(pipe_id = %snapshot.pipe_id, fields = snapshot.fields.len(), "pipe definition registered");
        Ok(())
    }

    /// Upsert a batch and append an export receipt for it.
    pub fn register_batch(
        &self,
        definitions: Vec<PipeDefinition>,
        correlation_id: &str,
    ) -> Result<ExportReceipt, GatewayError> {
        validate_id("correlation id", correlation_id)?;
        if definitions.is_empty() {
            return Err(GatewayError::invalid("structure batch must declare at least one pipe"));
        }
        let mut seen = BTreeSet::new();
        for definition in &definitions {
            validate_definition(definition)?;
            if !seen.insert(definition.pipe_id.as_str()) {
                return Err(GatewayError::invalid(format!(
                    "pipe id declared twice in one batch: {}",
                    definition.pipe_id
                )));
            }
        }

        let receipt = ExportReceipt {
            correlation_id: correlation_id.to_string(),
            pipe_count: definitions.len(),
            pipe_ids: definitions.iter().map(|d| d.pipe_id.clone()).collect(),
            exported_at: Utc::now(),
        };

        let (fresh, exports_snapshot) = {
            let mut state = self.state.lock();
            let fresh: Vec<bool> = definitions
                .iter()
                .map(|definition| state.upsert(definition.clone()))
                .collect();
            state.exports.push(receipt.clone());
            (fresh, state.exports.clone())
        };

        for (definition, is_new) in definitions.iter().zip(fresh) {
            self.persist_definition(definition, is_new);
        }
        self.persist_blob(&self.keys.exports, &exports_snapshot);

        info!(
            correlation_id,
            pipes = receipt.pipe_count,
            "structure batch registered"
        );
        Ok(receipt)
    }

    pub fn lookup(&self, pipe_id: &str) -> Option<PipeDefinition> {
        self.state.lock().definitions.get(pipe_id).cloned()
    }

    pub fn count(&self) -> usize {
        self.state.lock().definitions.len()
    }

    /// Registered pipe ids, sorted.
    pub fn list_ids(&self) -> Vec<String> {
        self.state.lock().definitions.keys().cloned().collect()
    }

    /// Registered pipe ids, in first-declaration order.
    pub fn declared_ids(&self) -> Vec<String> {
        self.state.lock().order.clone()
    }

    /// All definitions, in first-declaration order.
    pub fn definitions(&self) -> Vec<PipeDefinition> {
        self.state.lock().ordered().cloned().collect()
    }

    /// Export history, oldest first.
    pub fn export_receipts(&self) -> Vec<ExportReceipt> {
        self.state.lock().exports.clone()
    }

    /// Wipe memory and persisted state. Administrative use only.
    pub fn clear(&self) {
        *self.state.lock() = PipeState::default();
        self.cache.delete(&self.keys.definitions);
        self.cache.delete(&self.keys.order);
        self.cache.delete(&self.keys.exports);
        warn!("pipe definition store cleared");
    }

    fn persist_definition(&self, definition: &PipeDefinition, is_new: bool) {
        if !self.cache.is_available() {
            return;
        }
        match codec::encode(definition) {
            Ok(raw) => {
                self.cache
                    .hset(&self.keys.definitions, &definition.pipe_id, &raw);
                if is_new {
                    self.cache.rpush(&self.keys.order, &definition.pipe_id);
                }
            }
            Err(err) => warn!(pipe_id = %definition.pipe_id, error = %err, "pipe definition not persisted"),
        }
    }

    fn persist_blob<T: Persisted>(&self, key: &str, value: &T) {
        if !self.cache.is_available() {
            return;
        }
        match codec::encode(value) {
            Ok(raw) => {
                self.cache.set(key, &raw);
            }
            Err(err) => warn!(key, error = %err, "blob not persisted"),
        }
    }

    fn rehydrate(&self) {
        if !self.cache.is_available() {
            return;
        }

        let mut restored = PipeState::default();
        match self.cache.hgetall(&self.keys.definitions) {
            Some(raw_definitions) => {
                for (pipe_id, raw) in raw_definitions {
                    match codec::decode::<PipeDefinition>(&raw) {
                        Ok(definition) if definition.pipe_id == pipe_id => {
                            restored.definitions.insert(pipe_id, definition);
                        }
                        Ok(definition) => warn!(
                            field = %pipe_id,
                            pipe_id = %definition.pipe_id,
                            "skipping persisted definition stored under a foreign key"
                        ),
                        Err(err) => warn!(pipe_id = %pipe_id, error = %err, "skipping unreadable pipe definition"),
                    }
                }
            }
            None => {
                warn!("pipe definitions not rehydrated; starting empty");
                return;
            }
        }

        restored.order = replay_order(
            self.cache.lrange(&self.keys.order, 0, -1).unwrap_or_default(),
            &restored.definitions,
        );

        if let Some(Some(raw)) = self.cache.get(&self.keys.exports) {
            match codec::decode::<Vec<ExportReceipt>>(&raw) {
                Ok(exports) => restored.exports = exports,
                Err(err) => warn!(error = %err, "export history unreadable; starting empty"),
            }
        }

        info!(
            definitions = restored.definitions.len(),
            exports = restored.exports.len(),
            "pipe definitions rehydrated"
        );
        *self.state.lock() = restored;
    }
}

/// Persisted order filtered to known, unique ids; unlisted ids go last, sorted.
fn replay_order(persisted: Vec<String>, definitions: &BTreeMap<String, PipeDefinition>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut order: Vec<String> = persisted
        .into_iter()
        .filter(|id| definitions.contains_key(id) && seen.insert(id.clone()))
        .collect();
    order.extend(definitions.keys().filter(|id| !seen.contains(*id)).cloned());
    order
}

fn validate_definition(definition: &PipeDefinition) -> Result<(), GatewayError> {
    validate_id("pipe id", &definition.pipe_id)?;
    if definition.fields.iter().any(|f| f.trim().is_empty()) {
        return Err(GatewayError::invalid(format!(
            "pipe {} declares an empty field name",
            definition.pipe_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_cache::MemoryCache;
    use std::sync::Arc;

    fn def(id: &str, fields: &[&str]) -> PipeDefinition {
        PipeDefinition::new(id, fields.iter().map(|s| s.to_string()).collect())
    }

    fn store_over(cache: &MemoryCache) -> PipeDefinitionStore {
        PipeDefinitionStore::open(
            &GatewayConfig::default(),
            CacheHandle::connect(Arc::new(cache.clone())),
        )
    }

    #[test]
    fn reregistration_replaces_definition() {
        let store = PipeDefinitionStore::open(&GatewayConfig::default(), CacheHandle::detached());
        store.register(def("p1", &["a", "b"])).expect("register");
        store.register(def("p1", &["c"])).expect("re-register");

        assert_eq!(store.count(), 1);
        assert_eq!(store.lookup("p1").expect("p1").fields, vec!["c"]);
    }

    #[test]
    fn batch_appends_export_receipt() {
        let store = PipeDefinitionStore::open(&GatewayConfig::default(), CacheHandle::detached());
        let receipt = store
            .register_batch(vec![def("b", &["x"]), def("a", &["y"])], "corr-1")
            .expect("batch");

        assert_eq!(receipt.pipe_count, 2);
        assert_eq!(receipt.pipe_ids, vec!["b", "a"]);
        assert_eq!(store.list_ids(), vec!["a", "b"]);
        assert_eq!(store.declared_ids(), vec!["b", "a"]);
        assert_eq!(store.export_receipts(), vec![receipt]);
    }

    #[test]
    fn batch_rejects_duplicates_and_empty() {
        let store = PipeDefinitionStore::open(&GatewayConfig::default(), CacheHandle::detached());
        let err = store
            .register_batch(vec![def("a", &[]), def("a", &[])], "corr-1")
            .expect_err("duplicate must fail");
        assert!(matches!(err, GatewayError::InvalidInput(msg) if msg.contains("twice")));
        assert!(store.register_batch(vec![], "corr-1").is_err());
        assert_eq!(store.count(), 0, "rejected batch must not be applied");
    }

    #[test]
    fn rehydrates_definitions_and_exports() {
        let cache = MemoryCache::new();
        let first = store_over(&cache);
        first.register(def("solo", &["a"])).expect("register");
        let receipt = first
            .register_batch(vec![def("p1", &["x"])], "corr-9")
            .expect("batch");

        let restarted = store_over(&cache);
        assert_eq!(restarted.list_ids(), vec!["p1", "solo"]);
        assert_eq!(restarted.declared_ids(), vec!["solo", "p1"]);
        assert_eq!(restarted.lookup("solo"), first.lookup("solo"));
        assert_eq!(restarted.export_receipts(), vec![receipt]);
    }

    #[test]
    fn redeclaring_keeps_first_position() {
        let store = PipeDefinitionStore::open(&GatewayConfig::default(), CacheHandle::detached());
        store.register(def("first", &["a"])).expect("register");
        store.register(def("second", &["b"])).expect("register");
        store.register(def("first", &["c"])).expect("re-register");

        store.register(def("a-last", &["d"])).expect("register");
        assert_eq!(store.declared_ids(), vec!["first", "second", "a-last"]);
        assert_eq!(store.list_ids(), vec!["a-last", "first", "second"]);
        assert_eq!(store.definitions()[0].fields, vec!["c"]);
    }

    #[test]
    fn order_list_missing_falls_back_to_sorted_ids() {
        let mut definitions = BTreeMap::new();
        definitions.insert("b".to_string(), def("b", &[]));
        definitions.insert("a".to_string(), def("a", &[]));
        definitions.insert("c".to_string(), def("c", &[]));

        let order = replay_order(vec!["c".into(), "ghost".into(), "c".into()], &definitions);
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn cache_outage_never_fails_registration() {
        let cache = MemoryCache::new();
        let store = store_over(&cache);
        cache.set_online(false);

        store.register(def("p1", &["a"])).expect("register must succeed without cache");
        assert!(store.lookup("p1").is_some());
    }

    #[test]
    fn clear_wipes_persisted_state() {
        let cache = MemoryCache::new();
        let store = store_over(&cache);
        store.register_batch(vec![def("p1", &["a"])], "c1").expect("batch");
        store.clear();

        assert_eq!(store.count(), 0);
        assert_eq!(store_over(&cache).count(), 0);
    }
}
