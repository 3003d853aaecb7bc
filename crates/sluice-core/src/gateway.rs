//! The produced interface: structure, dispatch signal, content, and queries.
//!
//! `IngestGateway` owns one of each store and composes them; it holds no
//! state of its own. Construct it once and share it by reference.

use crate::admission::{self, Admission};
use crate::config::{ConfigError, GatewayConfig};
use crate::dispatch::{DispatchCorrelator, DispatchRecord, ReceiptBatch, SignalOutcome, batches_by_time_gap};
use crate::error::GatewayError;
use crate::fingerprint::field_names;
use crate::ids::validate_id;
use crate::ingest::IngestStore;
use crate::pipes::PipeDefinitionStore;
use crate::records::{
    ExportReceipt, IngestRequest, IngestStats, PipeDefinition, RunReceipt, SchemaDriftEvent,
    SchemaRecord, TaggedRow,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sluice_cache::{CacheHandle, DurableCache};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One content push as a producer submits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPush {
    pub run_id: String,
    pub pipe_id: String,
    /// Producer-computed schema fingerprint; derived from the rows when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_hash: Option<String>,
    /// Explicit dispatch id; derived from tenant, snapshot, and producer time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_id: Option<String>,
    #[serde(flatten)]
    pub request: IngestRequest,
}

impl ContentPush {
    pub fn new(run_id: impl Into<String>, pipe_id: impl Into<String>, request: IngestRequest) -> Self {
        Self {
            run_id: run_id.into(),
            pipe_id: pipe_id.into(),
            schema_hash: None,
            dispatch_id: None,
            request,
        }
    }

    pub fn with_schema_hash(mut self, hash: impl Into<String>) -> Self {
        self.schema_hash = Some(hash.into());
        self
    }

    pub fn with_dispatch(mut self, dispatch_id: impl Into<String>) -> Self {
        self.dispatch_id = Some(dispatch_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub receipt: RunReceipt,
    /// False when admitted under bootstrap.
    pub matched_schema: bool,
    pub schema_fields: Vec<String>,
}

#[derive(Debug)]
pub struct IngestGateway {
    config: GatewayConfig,
    pipes: PipeDefinitionStore,
    ingest: IngestStore,
    dispatches: DispatchCorrelator,
}

impl IngestGateway {
    /// Validate `config`, ping the cache (once per store), and rehydrate.
    pub fn open(
        config: GatewayConfig,
        cache: Option<Arc<dyn DurableCache>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let handle = || match &cache {
            Some(backend) => CacheHandle::connect(Arc::clone(backend)),
            None => CacheHandle::detached(),
        };

        let pipes = PipeDefinitionStore::open(&config, handle());
        let ingest = IngestStore::open(&config, handle());
        let dispatches = DispatchCorrelator::new(config.max_dispatches);
        dispatches.rebuild(&ingest.get_all_receipts());

        info!(
            durable = ingest.durable(),
            pipes = pipes.count(),
            receipts = ingest.get_stats().total_receipts,
            "ingest gateway ready"
        );
        Ok(Self {
            config,
            pipes,
            ingest,
            dispatches,
        })
    }

    /// Memory-only gateway.
    pub fn in_memory(config: GatewayConfig) -> Result<Self, ConfigError> {
        Self::open(config, None)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Declare structure for a batch of pipes.
    ///
    /// A missing correlation id is generated as `corr_<uuid>`. The correlation
    /// id doubles as the dispatch id for lifecycle tracking.
    pub fn register_structure(
        &self,
        definitions: Vec<PipeDefinition>,
        correlation_id: Option<&str>,
    ) -> Result<ExportReceipt, GatewayError> {
        let correlation_id = match correlation_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("corr_{}", uuid::Uuid::new_v4().simple()),
        };
        let receipt = self.pipes.register_batch(definitions, &correlation_id)?;
        self.dispatches
            .record_structure(&correlation_id, &receipt.pipe_ids, receipt.exported_at);
        Ok(receipt)
    }

    /// Mark a dispatch as launched. Repeating the signal is harmless.
    pub fn signal_dispatch(&self, correlation_id: &str) -> Result<SignalOutcome, GatewayError> {
        validate_id("correlation id", correlation_id)?;
        Ok(self.dispatches.signal(correlation_id, Utc::now()))
    }

    /// Admit, buffer, and account for one content push.
    pub fn ingest_content(&self, push: ContentPush) -> Result<IngestOutcome, GatewayError> {
        validate_id("run id", &push.run_id)?;
        validate_id("pipe id", &push.pipe_id)?;
        let explicit_dispatch = push
            .dispatch_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        if let Some(dispatch_id) = explicit_dispatch {
            validate_id("dispatch id", dispatch_id)?;
        }

        let admission = admission::admit(&self.pipes, &push.pipe_id)?;
        if let Admission::Matched(definition) = &admission {
            warn_on_undeclared_fields(&push, definition);
        }

        let dispatch_id = DispatchCorrelator::resolve(
            explicit_dispatch,
            &push.request.tenant_id,
            &push.request.snapshot_name,
            push.request.produced_at,
        );
        let accepted = self.ingest.ingest_observed(
            &push.run_id,
            &push.pipe_id,
            push.schema_hash.as_deref(),
            push.request,
            &dispatch_id,
            |accepted| {
                self.dispatches
                    .record_content(&accepted.receipt, accepted.replaced.as_ref());
            },
        )?;

        Ok(IngestOutcome {
            matched_schema: admission.matched_schema(),
            schema_fields: admission.schema_fields(),
            receipt: accepted.receipt,
        })
    }

    pub fn pipe_definition(&self, pipe_id: &str) -> Option<PipeDefinition> {
        self.pipes.lookup(pipe_id)
    }

    pub fn pipe_definitions(&self) -> Vec<PipeDefinition> {
        self.pipes.definitions()
    }

    /// Registered pipe ids, sorted.
    pub fn pipe_ids(&self) -> Vec<String> {
        self.pipes.list_ids()
    }

    pub fn export_receipts(&self) -> Vec<ExportReceipt> {
        self.pipes.export_receipts()
    }

    pub fn receipt(&self, run_id: &str, pipe_id: &str) -> Option<RunReceipt> {
        self.ingest.get_receipt(run_id, pipe_id)
    }

    pub fn receipts_by_run(&self, run_id: &str) -> Vec<RunReceipt> {
        self.ingest.get_receipts_by_run(run_id)
    }

    pub fn receipts_by_snapshot(&self, snapshot_name: &str) -> Vec<RunReceipt> {
        self.ingest.get_receipts_by_snapshot(snapshot_name)
    }

    /// All receipts, oldest first.
    pub fn receipts(&self) -> Vec<RunReceipt> {
        self.ingest.get_all_receipts()
    }

    pub fn rows(&self, run_id: &str, pipe_id: &str) -> Option<Vec<TaggedRow>> {
        self.ingest.get_rows(run_id, pipe_id)
    }

    pub fn rows_by_source(&self, canonical_source_id: &str) -> Vec<TaggedRow> {
        self.ingest.get_rows_by_source(canonical_source_id)
    }

    pub fn drift_events(&self) -> Vec<SchemaDriftEvent> {
        self.ingest.get_drift_events()
    }

    pub fn schema_registry(&self) -> BTreeMap<String, SchemaRecord> {
        self.ingest.get_schema_registry()
    }

    pub fn schema_record(&self, pipe_id: &str) -> Option<SchemaRecord> {
        self.ingest.get_schema_record(pipe_id)
    }

    pub fn stats(&self) -> IngestStats {
        self.ingest.get_stats()
    }

    pub fn dispatch(&self, dispatch_id: &str) -> Option<DispatchRecord> {
        self.dispatches.get(dispatch_id)
    }

    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.dispatches.list()
    }

    /// Advisory time-gap batches over one snapshot's receipts.
    pub fn snapshot_batches(&self, snapshot_name: &str, gap: Option<Duration>) -> Vec<ReceiptBatch> {
        let receipts = self.ingest.get_receipts_by_snapshot(snapshot_name);
        batches_by_time_gap(&receipts, gap.unwrap_or_else(|| self.config.batch_gap()))
    }

    /// Drop everything, in memory and in the durable cache.
    pub fn reset(&self) {
        self.ingest.clear();
        self.pipes.clear();
        self.dispatches.clear();
        warn!("ingest gateway reset");
    }
}

fn warn_on_undeclared_fields(push: &ContentPush, definition: &PipeDefinition) {
    if definition.fields.is_empty() {
        return;
    }
    let undeclared: Vec<String> = field_names(&push.request.rows)
        .into_iter()
        .filter(|name| !definition.fields.contains(name))
        .collect();
    if !undeclared.is_empty() {
        warn!(
            run_id = %push.run_id,
            pipe_id = %push.pipe_id,
            undeclared = ?undeclared,
            "content carries fields outside the declared structure"
        );
    }
}
