//! Schema registry: last-seen fingerprint per pipe plus a bounded drift log.
//!
//! Not synchronized on its own; the ingest store owns one inside its locked
//! state so a fingerprint comparison and the receipt it flags are atomic.

use crate::records::{SchemaDriftEvent, SchemaRecord};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Result of recording one push against the registry.
#[derive(Debug, Clone)]
pub struct SchemaObservation {
    pub record: SchemaRecord,
    pub drift: Option<SchemaDriftEvent>,
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    records: BTreeMap<String, SchemaRecord>,
    drift_log: VecDeque<SchemaDriftEvent>,
    max_drift_events: usize,
}

impl SchemaRegistry {
    pub fn new(max_drift_events: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            drift_log: VecDeque::new(),
            max_drift_events: max_drift_events.max(1),
        }
    }

    /// Overwrite the record for `pipe_id`, emitting drift on a hash change.
    ///
    /// The first push for a pipe never drifts.
    pub fn observe(
        &mut self,
        pipe_id: &str,
        run_id: &str,
        fields: &[String],
        content_hash: &str,
        at: DateTime<Utc>,
    ) -> SchemaObservation {
        let record = SchemaRecord {
            pipe_id: pipe_id.to_string(),
            fields: fields.to_vec(),
            content_hash: content_hash.to_string(),
            last_seen_at: at,
            run_id: run_id.to_string(),
        };

        let drift = match self.records.get(pipe_id) {
            Some(previous) if previous.content_hash != content_hash => {
                let (added, removed) = diff_fields(&previous.fields, fields);
                Some(SchemaDriftEvent {
                    pipe_id: pipe_id.to_string(),
                    run_id: run_id.to_string(),
                    added,
                    removed,
                    previous_hash: previous.content_hash.clone(),
                    incoming_hash: content_hash.to_string(),
                    detected_at: at,
                })
            }
            _ => None,
        };

        if let Some(event) = &drift {
            self.push_drift(event.clone());
        }
        self.records.insert(pipe_id.to_string(), record.clone());

        SchemaObservation { record, drift }
    }

    fn push_drift(&mut self, event: SchemaDriftEvent) {
        self.drift_log.push_back(event);
        while self.drift_log.len() > self.max_drift_events {
            self.drift_log.pop_front();
        }
    }

    pub fn record(&self, pipe_id: &str) -> Option<&SchemaRecord> {
        self.records.get(pipe_id)
    }

    pub fn records(&self) -> &BTreeMap<String, SchemaRecord> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drift events, oldest first.
    pub fn drift_events(&self) -> Vec<SchemaDriftEvent> {
        self.drift_log.iter().cloned().collect()
    }

    pub fn drift_len(&self) -> usize {
        self.drift_log.len()
    }

    /// Replace registry contents with persisted state, re-applying the bound.
    pub fn restore(&mut self, records: Vec<SchemaRecord>, events: Vec<SchemaDriftEvent>) {
        self.records = records
            .into_iter()
            .map(|record| (record.pipe_id.clone(), record))
            .collect();
        self.drift_log.clear();
        for event in events {
            self.push_drift(event);
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.drift_log.clear();
    }
}

/// `(added, removed)` going from `previous` to `incoming`, each sorted.
pub fn diff_fields(previous: &[String], incoming: &[String]) -> (Vec<String>, Vec<String>) {
    let previous: BTreeSet<&String> = previous.iter().collect();
    let incoming: BTreeSet<&String> = incoming.iter().collect();
    let added = incoming.difference(&previous).map(|s| (*s).clone()).collect();
    let removed = previous.difference(&incoming).map(|s| (*s).clone()).collect();
    (added, removed)
}

/// Fields present in exactly one side, sorted.
pub fn symmetric_difference(event: &SchemaDriftEvent) -> Vec<String> {
    let mut fields: Vec<String> = event.added.iter().chain(&event.removed).cloned().collect();
    fields.sort();
    fields.dedup();
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::schema_fingerprint;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn observe(registry: &mut SchemaRegistry, run: &str, names: &[&str]) -> SchemaObservation {
        let f = fields(names);
        registry.observe("pipe-x", run, &f, &schema_fingerprint(&f), Utc::now())
    }

    #[test]
    fn first_push_records_without_drift() {
        let mut registry = SchemaRegistry::new(10);
        let obs = observe(&mut registry, "r1", &["a", "b"]);
        assert!(obs.drift.is_none());
        assert_eq!(registry.record("pipe-x").expect("record").run_id, "r1");
    }

    #[test]
    fn added_field_produces_one_drift_event() {
        let mut registry = SchemaRegistry::new(10);
        observe(&mut registry, "r1", &["a", "b"]);
        let obs = observe(&mut registry, "r2", &["a", "b", "c"]);

        let event = obs.drift.expect("hash change must drift");
        assert_eq!(event.added, vec!["c"]);
        assert!(event.removed.is_empty());
        assert_eq!(registry.drift_events().len(), 1);
        assert_eq!(registry.record("pipe-x").expect("record").fields, fields(&["a", "b", "c"]));
    }

    #[test]
    fn identical_schema_does_not_drift() {
        let mut registry = SchemaRegistry::new(10);
        observe(&mut registry, "r1", &["a", "b"]);
        let obs = observe(&mut registry, "r2", &["b", "a"]);
        assert!(obs.drift.is_none());
        assert!(registry.drift_events().is_empty());
    }

    #[test]
    fn drift_log_is_bounded_oldest_first() {
        let mut registry = SchemaRegistry::new(2);
        observe(&mut registry, "r1", &["a"]);
        observe(&mut registry, "r2", &["b"]);
        observe(&mut registry, "r3", &["c"]);
        observe(&mut registry, "r4", &["d"]);

        let runs: Vec<String> = registry.drift_events().into_iter().map(|e| e.run_id).collect();
        assert_eq!(runs, vec!["r3", "r4"]);
    }

    #[test]
    fn symmetric_difference_merges_both_sides() {
        let (added, removed) = diff_fields(&fields(&["a", "b"]), &fields(&["b", "c"]));
        assert_eq!(added, vec!["c"]);
        assert_eq!(removed, vec!["a"]);

        let event = SchemaDriftEvent {
            pipe_id: "p".into(),
            run_id: "r".into(),
            added,
            removed,
            previous_hash: String::new(),
            incoming_hash: String::new(),
            detected_at: Utc::now(),
        };
        assert_eq!(symmetric_difference(&event), vec!["a", "c"]);
    }
}
