//! # sluice-core
//!
//! Ingestion gateway core: structure first, then content.
//!
//! This crate provides:
//! - `PipeDefinitionStore`: latest structure declaration per pipe, plus export history
//! - `IngestStore`: bounded FIFO buffer of run receipts and tagged rows
//! - `SchemaRegistry`: last-seen fingerprint per pipe and a bounded drift log
//! - `DispatchCorrelator`: per-dispatch lifecycle and rollups
//! - `admit`: the "content requires prior structure" predicate
//! - `IngestGateway`: the composition producers talk to
//!
//! Transport, payload normalization, and the durable cache server are out of
//! scope. The cache is reached through `sluice-cache`.
//!
//! ## Data flow
//!
//! ```text
//! register_structure ──▶ PipeDefinitionStore ──▶ export receipt
//! signal_dispatch    ──▶ DispatchCorrelator (Dispatched)
//! ingest_content     ──▶ admit ──▶ IngestStore ──▶ SchemaRegistry (drift?)
//!                                        └──▶ DispatchCorrelator (Content)
//!                                  (refusal: pipe id + known ids)
//! ```

pub mod admission;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fifo;
pub mod fingerprint;
pub mod gateway;
pub mod ids;
pub mod ingest;
pub mod pipes;
pub mod records;
pub mod schema;

pub use admission::{Admission, AdmissionRefusal, admit};
pub use codec::{
    CodecError, DRIFT_LOG_SCHEMA, EXPORT_LOG_SCHEMA, PIPE_DEFINITION_SCHEMA, Persisted,
    ROW_BUFFER_SCHEMA, RUN_RECEIPT_SCHEMA, SCHEMA_RECORD_SCHEMA,
};
pub use config::{ConfigError, GatewayConfig};
pub use dispatch::{
    DispatchCorrelator, DispatchPhase, DispatchRecord, ReceiptBatch, SignalOutcome,
    batches_by_time_gap,
};
pub use error::GatewayError;
pub use fifo::InsertionIndex;
pub use fingerprint::{FingerprintBuilder, derive_dispatch_id, field_names, schema_fingerprint};
pub use gateway::{ContentPush, IngestGateway, IngestOutcome};
pub use ids::{MAX_ID_LEN, validate_id};
pub use ingest::{Accepted, IngestStore};
pub use pipes::PipeDefinitionStore;
pub use records::{
    ExportReceipt, IngestRequest, IngestStats, PipeDefinition, Row, RunReceipt, SchemaDriftEvent,
    SchemaRecord, TaggedRow, receipt_key,
};
pub use schema::{SchemaObservation, SchemaRegistry, diff_fields, symmetric_difference};
