//! Ingest store: bounded buffer of accepted rows and their run receipts.
//!
//! ```text
//! ingest()
//!   ├─ tag rows, fingerprint fields             (no lock)
//!   ├─ lock: schema observe → receipt(seq) → rows → evict to bounds
//!   └─ persist lock: re-read live state, write it, delete evicted keys
//! ```
//!
//! Two independent bounds, both oldest-first by insertion:
//! receipts ≤ `max_runs` (evicting a receipt drops its rows too) and
//! buffered rows ≤ `max_rows` (evicting a row buffer keeps its receipt).
//!
//! Every receipt carries the sequence number it was accepted under. Cache
//! writes are serialized and only ever write what is live in memory at that
//! moment, so a slow writer cannot bring back a key another thread already
//! evicted. Replay sorts by sequence, never by list position.
//!
//! Durable-cache layout under `{prefix}:ingest:`
//! - `receipts`: hash of `{run_id}:{pipe_id}` → receipt
//! - `receipt_order`: list of composite keys to replay
//! - `rows:{run_id}:{pipe_id}`: row buffer blob with TTL
//! - `schemas`: hash of pipe id → schema record
//! - `drift`: drift log blob

use crate::codec::{self, Persisted};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::fifo::InsertionIndex;
use crate::fingerprint::{field_names, schema_fingerprint};
use crate::records::{
    IngestRequest, IngestStats, RunReceipt, SchemaDriftEvent, SchemaRecord, TaggedRow, receipt_key,
};
use crate::schema::{SchemaRegistry, symmetric_difference};
use chrono::Utc;
use parking_lot::Mutex;
use sluice_cache::CacheHandle;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct IngestKeys {
    receipts: String,
    order: String,
    rows_prefix: String,
    schemas: String,
    drift: String,
}

impl IngestKeys {
    fn new(prefix: &str) -> Self {
        Self {
            receipts: format!("{prefix}:ingest:receipts"),
            order: format!("{prefix}:ingest:receipt_order"),
            rows_prefix: format!("{prefix}:ingest:rows:"),
            schemas: format!("{prefix}:ingest:schemas"),
            drift: format!("{prefix}:ingest:drift"),
        }
    }

    fn rows(&self, key: &str) -> String {
        format!("{}{key}", self.rows_prefix)
    }
}

#[derive(Debug, Clone, Copy)]
struct IngestLimits {
    max_runs: usize,
    max_rows: usize,
    row_ttl: Duration,
}

#[derive(Debug)]
struct IngestState {
    receipts: InsertionIndex<RunReceipt>,
    rows: InsertionIndex<Vec<TaggedRow>>,
    total_rows: usize,
    schemas: SchemaRegistry,
    next_seq: u64,
}

impl IngestState {
    fn new(max_drift_events: usize) -> Self {
        Self {
            receipts: InsertionIndex::new(),
            rows: InsertionIndex::new(),
            total_rows: 0,
            schemas: SchemaRegistry::new(max_drift_events),
            next_seq: 1,
        }
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn insert_rows(&mut self, key: String, rows: Vec<TaggedRow>) {
        let added = rows.len();
        if let Some(previous) = self.rows.insert(key, rows) {
            self.total_rows = self.total_rows.saturating_sub(previous.len());
        }
        self.total_rows += added;
    }

    fn remove_rows(&mut self, key: &str) -> bool {
        match self.rows.remove(key) {
            Some(previous) => {
                self.total_rows = self.total_rows.saturating_sub(previous.len());
                true
            }
            None => false,
        }
    }

    /// Enforce both bounds. Called with the lock held, right after an insert.
    fn evict(&mut self, limits: IngestLimits) -> Eviction {
        let mut eviction = Eviction::default();

        while self.receipts.len() > limits.max_runs {
            let Some((key, receipt)) = self.receipts.pop_oldest() else {
                break;
            };
            self.remove_rows(&key);
            debug!(run_id = %receipt.run_id, pipe_id = %receipt.pipe_id, "receipt evicted");
            eviction.receipts.push(key);
        }

        while self.total_rows > limits.max_rows {
            let Some((key, rows)) = self.rows.pop_oldest() else {
                break;
            };
            self.total_rows = self.total_rows.saturating_sub(rows.len());
            debug!(key = %key, rows = rows.len(), "row buffer evicted");
            eviction.row_buffers.push(key);
        }

        eviction
    }
}

/// Keys dropped from memory by one eviction pass; cleaned from the cache
/// after the lock is released.
#[derive(Debug, Default)]
struct Eviction {
    receipts: Vec<String>,
    row_buffers: Vec<String>,
}

impl Eviction {
    fn is_empty(&self) -> bool {
        self.receipts.is_empty() && self.row_buffers.is_empty()
    }
}

/// Result of one accepted push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub receipt: RunReceipt,
    /// Receipt previously held under the same (run id, pipe id), if any.
    pub replaced: Option<RunReceipt>,
}

/// What one ingest must reconcile with the cache once the lock is released.
struct PendingWrites {
    key: String,
    seq: u64,
    pipe_id: String,
    drifted: bool,
    eviction: Eviction,
}

/// Live state for one pending write, read under the store lock.
struct LiveWrites {
    receipt: Option<RunReceipt>,
    rows: Option<Vec<TaggedRow>>,
    schema: Option<SchemaRecord>,
    drift_log: Option<Vec<SchemaDriftEvent>>,
}

#[derive(Debug)]
pub struct IngestStore {
    state: Mutex<IngestState>,
    /// Held across every batch of cache writes; taken before `state`.
    persist_lock: Mutex<()>,
    cache: CacheHandle,
    keys: IngestKeys,
    limits: IngestLimits,
    max_drift_events: usize,
}

impl IngestStore {
    /// Build the store and replay persisted state when the cache is reachable.
    ///
    /// Replay problems are logged and leave the store empty or partial; they
    /// never fail construction.
    pub fn open(config: &GatewayConfig, cache: CacheHandle) -> Self {
        let store = Self {
            state: Mutex::new(IngestState::new(config.max_drift_events)),
            persist_lock: Mutex::new(()),
            cache,
            keys: IngestKeys::new(&config.key_prefix),
            limits: IngestLimits {
                max_runs: config.max_runs.max(1),
                max_rows: config.max_rows.max(1),
                row_ttl: config.row_ttl(),
            },
            max_drift_events: config.max_drift_events,
        };
        store.rehydrate();
        store
    }

    pub fn durable(&self) -> bool {
        self.cache.is_available()
    }

    /// Accept one content push for `(run_id, pipe_id)`.
    ///
    /// `schema_hash` falls back to the fingerprint of the pushed field set.
    /// A declared row count that disagrees with the rows is logged; the
    /// actual count is recorded.
    pub fn ingest(
        &self,
        run_id: &str,
        pipe_id: &str,
        schema_hash: Option<&str>,
        request: IngestRequest,
        dispatch_id: &str,
    ) -> Result<Accepted, GatewayError> {
        self.ingest_observed(run_id, pipe_id, schema_hash, request, dispatch_id, |_| {})
    }

    /// [`ingest`](Self::ingest) with `observe` called while the store lock is
    /// still held, so successive replacements of one key reach it in the
    /// order they took effect. `observe` must not call back into the store.
    pub fn ingest_observed(
        &self,
        run_id: &str,
        pipe_id: &str,
        schema_hash: Option<&str>,
        request: IngestRequest,
        dispatch_id: &str,
        observe: impl FnOnce(&Accepted),
    ) -> Result<Accepted, GatewayError> {
        if run_id.is_empty() || pipe_id.is_empty() {
            return Err(GatewayError::invalid("run id and pipe id are required"));
        }

        let now = Utc::now();
        let row_count = request.rows.len();
        if let Some(declared) = request.declared_row_count
            && declared != row_count
        {
            warn!(
                run_id,
                pipe_id,
                declared,
                actual = row_count,
                "declared row count mismatch; using actual count"
            );
        }

        let fields = field_names(&request.rows);
        let incoming_hash = match schema_hash {
            Some(hash) if !hash.trim().is_empty() => hash.trim().to_string(),
            _ => schema_fingerprint(&fields),
        };
        let source_id = request.effective_source_id().to_string();
        let key = receipt_key(run_id, pipe_id);

        let tagged: Vec<TaggedRow> = request
            .rows
            .into_iter()
            .map(|data| TaggedRow {
                run_id: run_id.to_string(),
                dispatch_id: dispatch_id.to_string(),
                pipe_id: pipe_id.to_string(),
                canonical_source_id: source_id.clone(),
                ingested_at: now,
                data,
            })
            .collect();

        let (accepted, drift, pending) = {
            let mut state = self.state.lock();
            let observation = state
                .schemas
                .observe(pipe_id, run_id, &fields, &incoming_hash, now);

            let receipt = RunReceipt {
                run_id: run_id.to_string(),
                dispatch_id: dispatch_id.to_string(),
                pipe_id: pipe_id.to_string(),
                source_system: request.source_system,
                canonical_source_id: source_id,
                tenant_id: request.tenant_id,
                snapshot_name: request.snapshot_name,
                produced_at: request.produced_at,
                accepted_at: now,
                schema_version: request.schema_version,
                schema_hash: incoming_hash,
                row_count,
                drift: observation.drift.is_some(),
                drift_fields: observation
                    .drift
                    .as_ref()
                    .map(symmetric_difference)
                    .unwrap_or_default(),
                seq: state.take_seq(),
            };

            let replaced = state.receipts.insert(key.clone(), receipt.clone());
            state.insert_rows(key.clone(), tagged);
            let eviction = state.evict(self.limits);

            let accepted = Accepted { receipt, replaced };
            observe(&accepted);

            let pending = PendingWrites {
                seq: accepted.receipt.seq,
                key,
                pipe_id: pipe_id.to_string(),
                drifted: observation.drift.is_some(),
                eviction,
            };
            (accepted, observation.drift, pending)
        };

        if let Some(event) = &drift {
            info!(
                pipe_id,
                run_id,
                added = ?event.added,
                removed = ?event.removed,
                "schema drift detected"
            );
        }
        if !pending.eviction.is_empty() {
            debug!(
                receipts = pending.eviction.receipts.len(),
                row_buffers = pending.eviction.row_buffers.len(),
                "eviction pass complete"
            );
        }

        self.persist(pending);
        Ok(accepted)
    }

    fn persist(&self, pending: PendingWrites) {
        if !self.cache.is_available() {
            return;
        }
        let _persist = self.persist_lock.lock();

        let live = {
            let state = self.state.lock();
            let receipt = state
                .receipts
                .get(&pending.key)
                .filter(|r| r.seq == pending.seq)
                .cloned();
            LiveWrites {
                rows: receipt
                    .as_ref()
                    .and_then(|_| state.rows.get(&pending.key).cloned()),
                receipt,
                schema: state.schemas.record(&pending.pipe_id).cloned(),
                drift_log: pending.drifted.then(|| state.schemas.drift_events()),
            }
        };

        match &live.receipt {
            Some(receipt) => {
                if let Some(raw) = encode_or_warn(receipt, &pending.key) {
                    self.cache.hset(&self.keys.receipts, &pending.key, &raw);
                    self.cache.lrem(&self.keys.order, 0, &pending.key);
                    self.cache.rpush(&self.keys.order, &pending.key);
                }
                if let Some(rows) = &live.rows
                    && let Some(raw) = encode_or_warn(rows, &pending.key)
                {
                    self.cache
                        .set_with_ttl(&self.keys.rows(&pending.key), &raw, self.limits.row_ttl);
                }
            }
            None => debug!(
                key = %pending.key,
                seq = pending.seq,
                "receipt superseded before persist; write skipped"
            ),
        }
        if let Some(record) = &live.schema
            && let Some(raw) = encode_or_warn(record, &record.pipe_id)
        {
            self.cache.hset(&self.keys.schemas, &record.pipe_id, &raw);
        }
        if let Some(log) = &live.drift_log
            && let Some(raw) = encode_or_warn(log, &self.keys.drift)
        {
            self.cache.set(&self.keys.drift, &raw);
        }

        self.forget_evicted(&pending.eviction);
    }

    /// Delete evicted keys from the cache unless they were re-ingested since.
    /// Callers hold `persist_lock`.
    fn forget_evicted(&self, eviction: &Eviction) {
        if eviction.is_empty() || !self.cache.is_available() {
            return;
        }
        let (receipts, row_buffers): (Vec<&String>, Vec<&String>) = {
            let state = self.state.lock();
            (
                eviction
                    .receipts
                    .iter()
                    .filter(|key| !state.receipts.contains_key(key))
                    .collect(),
                eviction
                    .receipts
                    .iter()
                    .chain(&eviction.row_buffers)
                    .filter(|key| !state.rows.contains_key(key))
                    .collect(),
            )
        };
        for key in receipts {
            self.cache.hdel(&self.keys.receipts, key);
            self.cache.lrem(&self.keys.order, 0, key);
        }
        for key in row_buffers {
            self.cache.delete(&self.keys.rows(key));
        }
    }

    pub fn get_receipt(&self, run_id: &str, pipe_id: &str) -> Option<RunReceipt> {
        self.state
            .lock()
            .receipts
            .get(&receipt_key(run_id, pipe_id))
            .cloned()
    }

    /// Receipts of one run, insertion order.
    pub fn get_receipts_by_run(&self, run_id: &str) -> Vec<RunReceipt> {
        self.collect_receipts(|r| r.run_id == run_id)
    }

    /// Receipts of one snapshot, insertion order.
    pub fn get_receipts_by_snapshot(&self, snapshot_name: &str) -> Vec<RunReceipt> {
        self.collect_receipts(|r| r.snapshot_name == snapshot_name)
    }

    /// All receipts, oldest first.
    pub fn get_all_receipts(&self) -> Vec<RunReceipt> {
        self.collect_receipts(|_| true)
    }

    fn collect_receipts(&self, keep: impl Fn(&RunReceipt) -> bool) -> Vec<RunReceipt> {
        self.state
            .lock()
            .receipts
            .values()
            .filter(|r| keep(r))
            .cloned()
            .collect()
    }

    /// Buffered rows for one receipt; `None` once evicted (or never ingested).
    pub fn get_rows(&self, run_id: &str, pipe_id: &str) -> Option<Vec<TaggedRow>> {
        self.state
            .lock()
            .rows
            .get(&receipt_key(run_id, pipe_id))
            .cloned()
    }

    /// Buffered rows from one canonical source, oldest buffer first.
    pub fn get_rows_by_source(&self, canonical_source_id: &str) -> Vec<TaggedRow> {
        self.state
            .lock()
            .rows
            .values()
            .flatten()
            .filter(|row| row.canonical_source_id == canonical_source_id)
            .cloned()
            .collect()
    }

    pub fn get_drift_events(&self) -> Vec<SchemaDriftEvent> {
        self.state.lock().schemas.drift_events()
    }

    pub fn get_schema_registry(&self) -> BTreeMap<String, SchemaRecord> {
        self.state.lock().schemas.records().clone()
    }

    pub fn get_schema_record(&self, pipe_id: &str) -> Option<SchemaRecord> {
        self.state.lock().schemas.record(pipe_id).cloned()
    }

    pub fn get_stats(&self) -> IngestStats {
        let state = self.state.lock();
        let mut runs = BTreeSet::new();
        let mut sources = BTreeSet::new();
        let mut tenants = BTreeSet::new();
        for receipt in state.receipts.values() {
            runs.insert(receipt.run_id.as_str());
            sources.insert(receipt.canonical_source_id.as_str());
            if !receipt.tenant_id.is_empty() {
                tenants.insert(receipt.tenant_id.as_str());
            }
        }
        let oldest = state.receipts.values().map(|r| r.accepted_at).min();
        let newest = state.receipts.values().map(|r| r.accepted_at).max();

        IngestStats {
            total_receipts: state.receipts.len(),
            unique_runs: runs.len(),
            total_rows: state.total_rows,
            unique_sources: sources.len(),
            unique_tenants: tenants.len(),
            tracked_pipes: state.schemas.len(),
            drift_events: state.schemas.drift_len(),
            oldest_accepted_at: oldest,
            newest_accepted_at: newest,
            durable_cache: self.cache.is_available(),
            max_runs: self.limits.max_runs,
            max_rows: self.limits.max_rows,
        }
    }

    /// Wipe memory and persisted state. Administrative use only.
    pub fn clear(&self) {
        let _persist = self.persist_lock.lock();
        let row_keys: Vec<String> = {
            let mut state = self.state.lock();
            let keys = state.rows.iter().map(|(k, _)| k.to_string()).collect();
            *state = IngestState::new(self.max_drift_events);
            keys
        };

        if self.cache.is_available() {
            for key in &row_keys {
                self.cache.delete(&self.keys.rows(key));
            }
            self.cache.delete(&self.keys.receipts);
            self.cache.delete(&self.keys.order);
            self.cache.delete(&self.keys.schemas);
            self.cache.delete(&self.keys.drift);
        }
        warn!("ingest store cleared");
    }

    fn rehydrate(&self) {
        if !self.cache.is_available() {
            return;
        }
        let Some(order) = self.cache.lrange(&self.keys.order, 0, -1) else {
            warn!("receipt order not readable; ingest store starts empty");
            return;
        };
        let Some(raw_receipts) = self.cache.hgetall(&self.keys.receipts) else {
            warn!("receipts not readable; ingest store starts empty");
            return;
        };

        let mut seen = BTreeSet::new();
        let mut skipped = 0usize;
        let mut replay: Vec<RunReceipt> = Vec::with_capacity(order.len());
        for key in order {
            if !seen.insert(key.clone()) {
                continue;
            }
            let Some(raw) = raw_receipts.get(&key) else {
                skipped += 1;
                continue;
            };
            match codec::decode::<RunReceipt>(raw) {
                Ok(receipt) if receipt.key() == key => replay.push(receipt),
                Ok(_) => {
                    warn!(key = %key, "receipt stored under a foreign key; skipped");
                    skipped += 1;
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "unreadable receipt skipped");
                    skipped += 1;
                }
            }
        }
        // Stable: receipts written before sequencing keep their list position.
        replay.sort_by_key(|receipt| receipt.seq);

        let mut state = IngestState::new(self.max_drift_events);
        state.next_seq = replay.last().map_or(1, |receipt| receipt.seq + 1);
        for receipt in replay {
            let key = receipt.key();
            state.receipts.insert(key.clone(), receipt);

            if let Some(Some(raw_rows)) = self.cache.get(&self.keys.rows(&key)) {
                match codec::decode::<Vec<TaggedRow>>(&raw_rows) {
                    Ok(rows) => state.insert_rows(key, rows),
                    Err(err) => warn!(key = %key, error = %err, "unreadable row buffer skipped"),
                }
            }
        }

        let schema_records: Vec<SchemaRecord> = self
            .cache
            .hgetall(&self.keys.schemas)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(pipe_id, raw)| match codec::decode::<SchemaRecord>(&raw) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(pipe_id = %pipe_id, error = %err, "unreadable schema record skipped");
                    None
                }
            })
            .collect();

        let drift_events = match self.cache.get(&self.keys.drift) {
            Some(Some(raw)) => codec::decode::<Vec<SchemaDriftEvent>>(&raw).unwrap_or_else(|err| {
                warn!(error = %err, "unreadable drift log skipped");
                Vec::new()
            }),
            _ => Vec::new(),
        };
        state.schemas.restore(schema_records, drift_events);

        let eviction = state.evict(self.limits);
        info!(
            receipts = state.receipts.len(),
            rows = state.total_rows,
            schemas = state.schemas.len(),
            drift_events = state.schemas.drift_len(),
            skipped,
            "ingest store rehydrated"
        );
        let _persist = self.persist_lock.lock();
        *self.state.lock() = state;
        self.forget_evicted(&eviction);
    }
}

fn encode_or_warn<T: Persisted>(value: &T, key: &str) -> Option<String> {
    match codec::encode(value) {
        Ok(raw) => Some(raw),
        Err(err) => {
            warn!(key, error = %err, "record not persisted");
            None
        }
    }
}
