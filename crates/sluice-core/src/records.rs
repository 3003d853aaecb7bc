//! Records owned by the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One pushed row: a JSON object keyed by field name.
pub type Row = Map<String, Value>;

/// Structure declaration for one pipe: the admissible field set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeDefinition {
    pub pipe_id: String,
    /// Originating vendor (e.g. `salesforce`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,
    /// Category/fabric classification (e.g. `crm`, `erp`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fabric: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default = "default_health")]
    pub health: String,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

fn default_health() -> String {
    "healthy".to_string()
}

impl PipeDefinition {
    pub fn new(pipe_id: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            pipe_id: pipe_id.into(),
            vendor: String::new(),
            fabric: String::new(),
            fields,
            health: default_health(),
            received_at: Utc::now(),
        }
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn with_fabric(mut self, fabric: impl Into<String>) -> Self {
        self.fabric = fabric.into();
        self
    }
}

/// Appended to the export history for every structure batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReceipt {
    pub correlation_id: String,
    pub pipe_count: usize,
    pub pipe_ids: Vec<String>,
    pub exported_at: DateTime<Utc>,
}

/// Producer-supplied content for one pipe push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source_system: String,
    /// Falls back to `source_system` when empty.
    #[serde(default)]
    pub canonical_source_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub snapshot_name: String,
    /// Producer clock.
    pub produced_at: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Row count the producer claims; the actual count wins on mismatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_row_count: Option<usize>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

fn default_schema_version() -> String {
    "1".to_string()
}

impl IngestRequest {
    pub fn new(source_system: impl Into<String>, produced_at: DateTime<Utc>, rows: Vec<Row>) -> Self {
        Self {
            source_system: source_system.into(),
            canonical_source_id: String::new(),
            tenant_id: String::new(),
            snapshot_name: String::new(),
            produced_at,
            schema_version: default_schema_version(),
            declared_row_count: None,
            rows,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn with_snapshot(mut self, snapshot_name: impl Into<String>) -> Self {
        self.snapshot_name = snapshot_name.into();
        self
    }

    pub fn with_canonical_source(mut self, canonical_source_id: impl Into<String>) -> Self {
        self.canonical_source_id = canonical_source_id.into();
        self
    }

    pub fn with_declared_rows(mut self, count: usize) -> Self {
        self.declared_row_count = Some(count);
        self
    }

    pub fn effective_source_id(&self) -> &str {
        if self.canonical_source_id.is_empty() {
            &self.source_system
        } else {
            &self.canonical_source_id
        }
    }
}

/// Durable record of one accepted content push, unique per (run id, pipe id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReceipt {
    pub run_id: String,
    pub dispatch_id: String,
    pub pipe_id: String,
    pub source_system: String,
    pub canonical_source_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub snapshot_name: String,
    pub produced_at: DateTime<Utc>,
    pub accepted_at: DateTime<Utc>,
    pub schema_version: String,
    pub schema_hash: String,
    pub row_count: usize,
    #[serde(default)]
    pub drift: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drift_fields: Vec<String>,
    /// Acceptance sequence within the ingest store; orders replay after restart.
    #[serde(default)]
    pub seq: u64,
}

impl RunReceipt {
    pub fn key(&self) -> String {
        receipt_key(&self.run_id, &self.pipe_id)
    }
}

/// Composite store key for one (run id, pipe id) pair.
pub fn receipt_key(run_id: &str, pipe_id: &str) -> String {
    format!("{run_id}:{pipe_id}")
}

/// Last-seen schema fingerprint for one pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub pipe_id: String,
    pub fields: Vec<String>,
    pub content_hash: String,
    pub last_seen_at: DateTime<Utc>,
    pub run_id: String,
}

/// Field-set change between two successive pushes of one pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDriftEvent {
    pub pipe_id: String,
    pub run_id: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub previous_hash: String,
    pub incoming_hash: String,
    pub detected_at: DateTime<Utc>,
}

/// A buffered row with its provenance tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedRow {
    pub run_id: String,
    pub dispatch_id: String,
    pub pipe_id: String,
    pub canonical_source_id: String,
    pub ingested_at: DateTime<Utc>,
    pub data: Row,
}

/// Point-in-time counters for the ingest store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub total_receipts: usize,
    pub unique_runs: usize,
    pub total_rows: usize,
    pub unique_sources: usize,
    pub unique_tenants: usize,
    pub tracked_pipes: usize,
    pub drift_events: usize,
    pub oldest_accepted_at: Option<DateTime<Utc>>,
    pub newest_accepted_at: Option<DateTime<Utc>>,
    pub durable_cache: bool,
    pub max_runs: usize,
    pub max_rows: usize,
}
