//! Versioned envelopes for everything written to the durable cache.
//!
//! Each blob is `{"schema": "<kind>.v1", "record": ...}`. Decoding checks the
//! tag before touching the record, so a foreign or future blob fails with
//! `UnsupportedSchema` instead of half-parsing.

use crate::records::{
    ExportReceipt, PipeDefinition, RunReceipt, SchemaDriftEvent, SchemaRecord, TaggedRow,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PIPE_DEFINITION_SCHEMA: &str = "sluice.pipe_definition.v1";
pub const EXPORT_LOG_SCHEMA: &str = "sluice.export_log.v1";
pub const RUN_RECEIPT_SCHEMA: &str = "sluice.run_receipt.v1";
pub const ROW_BUFFER_SCHEMA: &str = "sluice.row_buffer.v1";
pub const SCHEMA_RECORD_SCHEMA: &str = "sluice.schema_record.v1";
pub const DRIFT_LOG_SCHEMA: &str = "sluice.drift_log.v1";

/// A type with a fixed persisted shape.
pub trait Persisted: Serialize + DeserializeOwned {
    const SCHEMA: &'static str;
}

impl Persisted for PipeDefinition {
    const SCHEMA: &'static str = PIPE_DEFINITION_SCHEMA;
}

impl Persisted for Vec<ExportReceipt> {
    const SCHEMA: &'static str = EXPORT_LOG_SCHEMA;
}

impl Persisted for RunReceipt {
    const SCHEMA: &'static str = RUN_RECEIPT_SCHEMA;
}

impl Persisted for Vec<TaggedRow> {
    const SCHEMA: &'static str = ROW_BUFFER_SCHEMA;
}

impl Persisted for SchemaRecord {
    const SCHEMA: &'static str = SCHEMA_RECORD_SCHEMA;
}

impl Persisted for Vec<SchemaDriftEvent> {
    const SCHEMA: &'static str = DRIFT_LOG_SCHEMA;
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported schema: expected {expected}, found {found}")]
    UnsupportedSchema {
        expected: &'static str,
        found: String,
    },
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    schema: &'static str,
    record: &'a T,
}

#[derive(Deserialize)]
struct RawEnvelope {
    schema: String,
    record: Value,
}

pub fn encode<T: Persisted>(record: &T) -> Result<String, CodecError> {
    serde_json::to_string(&EnvelopeRef {
        schema: T::SCHEMA,
        record,
    })
    .map_err(|e| CodecError::Serialize(e.to_string()))
}

pub fn decode<T: Persisted>(raw: &str) -> Result<T, CodecError> {
    let envelope: RawEnvelope =
        serde_json::from_str(raw).map_err(|e| CodecError::Parse(e.to_string()))?;
    if envelope.schema != T::SCHEMA {
        return Err(CodecError::UnsupportedSchema {
            expected: T::SCHEMA,
            found: envelope.schema,
        });
    }
    serde_json::from_value(envelope.record).map_err(|e| CodecError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_schema_tag() {
        let def = PipeDefinition::new("sf-crm-001", vec!["id".into()]);
        let raw = encode(&def).expect("definition should encode");
        let value: Value = serde_json::from_str(&raw).expect("envelope is json");
        assert_eq!(value["schema"], PIPE_DEFINITION_SCHEMA);
        assert_eq!(value["record"]["pipe_id"], "sf-crm-001");

        let back: PipeDefinition = decode(&raw).expect("definition should decode");
        assert_eq!(back, def);
    }

    #[test]
    fn decode_rejects_mismatched_kind() {
        let def = PipeDefinition::new("p", vec![]);
        let raw = encode(&def).expect("definition should encode");
        let err = decode::<RunReceipt>(&raw).expect_err("kind mismatch must fail");
        assert!(matches!(
            err,
            CodecError::UnsupportedSchema { expected: RUN_RECEIPT_SCHEMA, .. }
        ));
    }

    #[test]
    fn decode_rejects_bare_record() {
        let err = decode::<SchemaRecord>(r#"{"pipe_id":"p"}"#).expect_err("bare record must fail");
        assert!(matches!(err, CodecError::Parse(_)));
    }
}
