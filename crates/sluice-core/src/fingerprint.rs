//! Deterministic hashes: schema fingerprints and derived dispatch ids.

use crate::records::Row;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Incremental SHA-256 over named fields, fed in a fixed order.
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.hasher.update(name.as_bytes());
        self.hasher.update(b":");
        self.hasher.update(value.as_bytes());
        self.hasher.update(b"\n");
        self
    }

    pub fn field_int(self, name: &str, value: i64) -> Self {
        self.field(name, &value.to_string())
    }

    /// Lowercase hex digest.
    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

/// Union of keys over all rows, sorted.
pub fn field_names(rows: &[Row]) -> Vec<String> {
    let names: BTreeSet<&String> = rows.iter().flat_map(|row| row.keys()).collect();
    names.into_iter().cloned().collect()
}

/// Content hash of a field set: order- and duplicate-insensitive.
pub fn schema_fingerprint(fields: &[String]) -> String {
    let canonical: BTreeSet<&str> = fields.iter().map(String::as_str).collect();
    canonical
        .into_iter()
        .fold(FingerprintBuilder::new(), |builder, name| builder.field("field", name))
        .finish()
}

/// Dispatch id shared by every push of one producer invocation.
///
/// Pushes for the same tenant and snapshot whose producer timestamps fall in
/// the same wall-clock second collapse to one id, even if they come from
/// different producers.
pub fn derive_dispatch_id(tenant_id: &str, snapshot_name: &str, produced_at: DateTime<Utc>) -> String {
    let digest = FingerprintBuilder::new()
        .field("tenant_id", tenant_id)
        .field("snapshot_name", snapshot_name)
        .field_int("produced_at", produced_at.timestamp())
        .finish();
    format!("dsp_{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().expect("fixture must be an object")
    }

    #[test]
    fn field_names_are_sorted_union() {
        let rows = vec![row(json!({"b": 1, "a": 2})), row(json!({"c": 3, "a": 4}))];
        assert_eq!(field_names(&rows), vec!["a", "b", "c"]);
        assert!(field_names(&[]).is_empty());
    }

    #[test]
    fn schema_fingerprint_ignores_order_and_duplicates() {
        let a = schema_fingerprint(&["id".into(), "email".into()]);
        let b = schema_fingerprint(&["email".into(), "id".into(), "id".into()]);
        let c = schema_fingerprint(&["id".into(), "email".into(), "revenue".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn dispatch_id_truncates_to_whole_seconds() {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid date");
        let same_second = base + chrono::Duration::milliseconds(999);
        let next_second = base + chrono::Duration::seconds(1);

        let id = derive_dispatch_id("acme", "q2", base);
        assert!(id.starts_with("dsp_"));
        assert_eq!(id.len(), 4 + 16);
        assert_eq!(id, derive_dispatch_id("acme", "q2", same_second));
        assert_ne!(id, derive_dispatch_id("acme", "q2", next_second));
        assert_ne!(id, derive_dispatch_id("globex", "q2", base));
    }
}
