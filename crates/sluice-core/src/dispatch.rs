//! Dispatch correlation: one id per logical batch, and per-batch rollups.
//!
//! Lifecycle of one dispatch id:
//!
//! ```text
//! (absent)  ──structure──▶ Structure ──signal──▶ Dispatched ──content──▶ Content ⟲ content
//! (absent)  ──signal─────▶ Dispatched
//! (absent) | Structure ──content──▶ Content
//! ```
//!
//! Every transition is idempotent. Re-declaring structure updates metadata
//! and never resets counters or moves the phase backwards; a repeated signal
//! is a no-op. There is no terminal phase.

use crate::fifo::InsertionIndex;
use crate::fingerprint::derive_dispatch_id;
use crate::records::RunReceipt;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPhase {
    Structure,
    Dispatched,
    Content,
}

impl DispatchPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structure => "structure",
            Self::Dispatched => "dispatched",
            Self::Content => "content",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    /// First signal for this dispatch.
    Dispatched,
    /// Already dispatched or receiving content; nothing changed.
    AlreadyDispatched,
}

/// Rollup for one dispatch id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub dispatch_id: String,
    pub phase: DispatchPhase,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub declared_pipes: BTreeSet<String>,
    pub structure_declared_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub first_content_at: Option<DateTime<Utc>>,
    pub last_content_at: Option<DateTime<Utc>>,
    pub content_pushes: usize,
    pub total_rows: usize,
    pub drift_count: usize,
    pub run_ids: BTreeSet<String>,
    pub pipe_ids: BTreeSet<String>,
    pub source_ids: BTreeSet<String>,
}

impl DispatchRecord {
    fn new(dispatch_id: &str, phase: DispatchPhase) -> Self {
        Self {
            dispatch_id: dispatch_id.to_string(),
            phase,
            declared_pipes: BTreeSet::new(),
            structure_declared_at: None,
            dispatched_at: None,
            first_content_at: None,
            last_content_at: None,
            content_pushes: 0,
            total_rows: 0,
            drift_count: 0,
            run_ids: BTreeSet::new(),
            pipe_ids: BTreeSet::new(),
            source_ids: BTreeSet::new(),
        }
    }

    fn absorb(&mut self, receipt: &RunReceipt) {
        self.phase = DispatchPhase::Content;
        self.first_content_at.get_or_insert(receipt.accepted_at);
        self.last_content_at = Some(
            self.last_content_at
                .map_or(receipt.accepted_at, |t| t.max(receipt.accepted_at)),
        );
        self.content_pushes += 1;
        self.total_rows += receipt.row_count;
        if receipt.drift {
            self.drift_count += 1;
        }
        self.run_ids.insert(receipt.run_id.clone());
        self.pipe_ids.insert(receipt.pipe_id.clone());
        self.source_ids.insert(receipt.canonical_source_id.clone());
    }

    /// Undo the counters of a receipt that was replaced. Id sets and
    /// timestamps are cumulative and stay as they are.
    fn retract(&mut self, receipt: &RunReceipt) {
        self.content_pushes = self.content_pushes.saturating_sub(1);
        self.total_rows = self.total_rows.saturating_sub(receipt.row_count);
        if receipt.drift {
            self.drift_count = self.drift_count.saturating_sub(1);
        }
    }
}

/// Bounded, lock-protected map of dispatch rollups (oldest dropped first).
#[derive(Debug)]
pub struct DispatchCorrelator {
    dispatches: Mutex<InsertionIndex<DispatchRecord>>,
    max_dispatches: usize,
}

impl DispatchCorrelator {
    pub fn new(max_dispatches: usize) -> Self {
        Self {
            dispatches: Mutex::new(InsertionIndex::new()),
            max_dispatches: max_dispatches.max(1),
        }
    }

    /// Explicit id verbatim when present, otherwise the derived one.
    pub fn resolve(
        explicit: Option<&str>,
        tenant_id: &str,
        snapshot_name: &str,
        produced_at: DateTime<Utc>,
    ) -> String {
        match explicit.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => derive_dispatch_id(tenant_id, snapshot_name, produced_at),
        }
    }

    /// Structure phase: create or refresh the dispatch's declared pipes.
    pub fn record_structure(&self, dispatch_id: &str, pipe_ids: &[String], at: DateTime<Utc>) {
        self.upsert(dispatch_id, DispatchPhase::Structure, |record| {
            record.declared_pipes.extend(pipe_ids.iter().cloned());
            record.structure_declared_at = Some(at);
        });
    }

    /// Launch signal. Only the first signal changes anything.
    pub fn signal(&self, dispatch_id: &str, at: DateTime<Utc>) -> SignalOutcome {
        let mut outcome = SignalOutcome::AlreadyDispatched;
        self.upsert(dispatch_id, DispatchPhase::Dispatched, |record| {
            if record.phase == DispatchPhase::Structure {
                record.phase = DispatchPhase::Dispatched;
            }
            if record.dispatched_at.is_none() && record.phase == DispatchPhase::Dispatched {
                record.dispatched_at = Some(at);
                outcome = SignalOutcome::Dispatched;
            }
        });
        debug!(dispatch_id, outcome = ?outcome, "dispatch signal");
        outcome
    }

    /// Content phase: fold one accepted receipt into its dispatch.
    ///
    /// `replaced` is the receipt the push superseded for the same
    /// (run id, pipe id); its counters come back out of its own dispatch
    /// first, so a re-ingested key counts once. Calls for one key must
    /// arrive in replacement order.
    pub fn record_content(&self, receipt: &RunReceipt, replaced: Option<&RunReceipt>) {
        if let Some(previous) = replaced
            && let Some(record) = self.dispatches.lock().get_mut(&previous.dispatch_id)
        {
            record.retract(previous);
            debug!(
                dispatch_id = %previous.dispatch_id,
                run_id = %previous.run_id,
                pipe_id = %previous.pipe_id,
                "replaced receipt retracted from rollup"
            );
        }
        self.upsert(&receipt.dispatch_id, DispatchPhase::Content, |record| {
            record.absorb(receipt);
        });
    }

    /// Seed content rollups from rehydrated receipts (one per key).
    pub fn rebuild(&self, receipts: &[RunReceipt]) {
        for receipt in receipts {
            self.record_content(receipt, None);
        }
    }

    pub fn get(&self, dispatch_id: &str) -> Option<DispatchRecord> {
        self.dispatches.lock().get(dispatch_id).cloned()
    }

    /// All tracked dispatches, oldest first.
    pub fn list(&self) -> Vec<DispatchRecord> {
        self.dispatches.lock().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.dispatches.lock().clear();
    }

    fn upsert(&self, dispatch_id: &str, initial: DispatchPhase, apply: impl FnOnce(&mut DispatchRecord)) {
        let mut dispatches = self.dispatches.lock();
        if let Some(record) = dispatches.get_mut(dispatch_id) {
            apply(record);
            return;
        }

        let mut record = DispatchRecord::new(dispatch_id, initial);
        apply(&mut record);
        dispatches.insert(dispatch_id.to_string(), record);
        while dispatches.len() > self.max_dispatches {
            if let Some((evicted, _)) = dispatches.pop_oldest() {
                debug!(dispatch_id = %evicted, "dispatch rollup evicted");
            }
        }
    }
}

/// One advisory batch of receipts separated from its neighbours by a gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptBatch {
    pub batch_index: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub receipt_count: usize,
    pub total_rows: usize,
    pub unique_sources: usize,
    pub drift_count: usize,
    pub run_ids: Vec<String>,
}

/// Group receipts by accepted time, splitting wherever consecutive receipts
/// are more than `gap` apart. Approximate; for reporting only.
pub fn batches_by_time_gap(receipts: &[RunReceipt], gap: Duration) -> Vec<ReceiptBatch> {
    let mut sorted: Vec<&RunReceipt> = receipts.iter().collect();
    sorted.sort_by_key(|r| r.accepted_at);

    let mut groups: Vec<Vec<&RunReceipt>> = Vec::new();
    for receipt in sorted {
        let open = groups
            .last_mut()
            .filter(|group| group.last().is_some_and(|prev| within_gap(prev, receipt, gap)));
        match open {
            Some(group) => group.push(receipt),
            None => groups.push(vec![receipt]),
        }
    }

    groups
        .into_iter()
        .enumerate()
        .filter_map(|(batch_index, group)| {
            let first = group.first()?;
            let last = group.last()?;
            let sources: BTreeSet<&str> = group
                .iter()
                .map(|r| r.canonical_source_id.as_str())
                .collect();
            let runs: BTreeSet<&str> = group.iter().map(|r| r.run_id.as_str()).collect();
            Some(ReceiptBatch {
                batch_index,
                started_at: first.accepted_at,
                ended_at: last.accepted_at,
                receipt_count: group.len(),
                total_rows: group.iter().map(|r| r.row_count).sum(),
                unique_sources: sources.len(),
                drift_count: group.iter().filter(|r| r.drift).count(),
                run_ids: runs.into_iter().map(str::to_string).collect(),
            })
        })
        .collect()
}

fn within_gap(prev: &RunReceipt, next: &RunReceipt, gap: Duration) -> bool {
    (next.accepted_at - prev.accepted_at)
        .to_std()
        .map_or(true, |elapsed| elapsed <= gap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn receipt(run: &str, pipe: &str, dispatch: &str, accepted: i64, rows: usize) -> RunReceipt {
        RunReceipt {
            run_id: run.to_string(),
            dispatch_id: dispatch.to_string(),
            pipe_id: pipe.to_string(),
            source_system: "salesforce".to_string(),
            canonical_source_id: format!("src-{pipe}"),
            tenant_id: "acme".to_string(),
            snapshot_name: "q2".to_string(),
            produced_at: at(accepted),
            accepted_at: at(accepted),
            schema_version: "1".to_string(),
            schema_hash: "h".to_string(),
            row_count: rows,
            drift: false,
            drift_fields: Vec::new(),
            seq: accepted as u64,
        }
    }

    #[test]
    fn explicit_id_wins_over_derivation() {
        assert_eq!(DispatchCorrelator::resolve(Some("corr-1"), "acme", "q2", at(0)), "corr-1");
        let derived = DispatchCorrelator::resolve(None, "acme", "q2", at(0));
        assert_eq!(derived, DispatchCorrelator::resolve(Some("  "), "acme", "q2", at(0)));
        assert!(derived.starts_with("dsp_"));
    }

    #[test]
    fn lifecycle_walks_structure_dispatched_content() {
        let correlator = DispatchCorrelator::new(10);
        correlator.record_structure("d1", &["p1".into()], at(0));
        assert_eq!(correlator.get("d1").expect("d1").phase, DispatchPhase::Structure);

        assert_eq!(correlator.signal("d1", at(1)), SignalOutcome::Dispatched);
        assert_eq!(correlator.get("d1").expect("d1").phase, DispatchPhase::Dispatched);

        correlator.record_content(&receipt("r1", "p1", "d1", 2, 3), None);
        correlator.record_content(&receipt("r1", "p2", "d1", 3, 4), None);
        let record = correlator.get("d1").expect("d1");
        assert_eq!(record.phase, DispatchPhase::Content);
        assert_eq!(record.content_pushes, 2);
        assert_eq!(record.total_rows, 7);
        assert_eq!(record.first_content_at, Some(at(2)));
        assert_eq!(record.last_content_at, Some(at(3)));
    }

    #[test]
    fn repeated_signal_is_a_no_op() {
        let correlator = DispatchCorrelator::new(10);
        assert_eq!(correlator.signal("d1", at(0)), SignalOutcome::Dispatched);
        let before = correlator.get("d1").expect("d1");
        assert_eq!(correlator.signal("d1", at(5)), SignalOutcome::AlreadyDispatched);

        assert_eq!(correlator.get("d1").expect("d1"), before);
        assert_eq!(correlator.list().len(), 1);
    }

    #[test]
    fn signal_after_content_does_not_regress_phase() {
        let correlator = DispatchCorrelator::new(10);
        correlator.record_content(&receipt("r1", "p1", "d1", 0, 1), None);
        assert_eq!(correlator.signal("d1", at(1)), SignalOutcome::AlreadyDispatched);
        assert_eq!(correlator.get("d1").expect("d1").phase, DispatchPhase::Content);
    }

    #[test]
    fn redeclaring_structure_keeps_counters() {
        let correlator = DispatchCorrelator::new(10);
        correlator.record_structure("d1", &["p1".into()], at(0));
        correlator.record_content(&receipt("r1", "p1", "d1", 1, 5), None);
        correlator.record_structure("d1", &["p2".into()], at(2));

        let record = correlator.get("d1").expect("d1");
        assert_eq!(record.phase, DispatchPhase::Content);
        assert_eq!(record.total_rows, 5);
        assert_eq!(record.declared_pipes.len(), 2);
        assert_eq!(record.structure_declared_at, Some(at(2)));
    }

    #[test]
    fn replacement_counts_once() {
        let correlator = DispatchCorrelator::new(10);
        let first = receipt("r1", "p1", "d1", 0, 2);
        let mut second = receipt("r1", "p1", "d1", 5, 5);
        second.drift = true;
        correlator.record_content(&first, None);
        correlator.record_content(&second, Some(&first));

        let live = correlator.get("d1").expect("d1");
        assert_eq!(live.content_pushes, 1);
        assert_eq!(live.total_rows, 5);
        assert_eq!(live.drift_count, 1);

        let rebuilt = DispatchCorrelator::new(10);
        rebuilt.rebuild(&[second]);
        let restored = rebuilt.get("d1").expect("d1");
        assert_eq!(restored.content_pushes, live.content_pushes);
        assert_eq!(restored.total_rows, live.total_rows);
        assert_eq!(restored.drift_count, live.drift_count);
    }

    #[test]
    fn replacement_under_another_dispatch_moves_counters() {
        let correlator = DispatchCorrelator::new(10);
        let first = receipt("r1", "p1", "d1", 0, 3);
        let second = receipt("r1", "p1", "d2", 1, 4);
        correlator.record_content(&first, None);
        correlator.record_content(&second, Some(&first));

        let old = correlator.get("d1").expect("d1");
        assert_eq!((old.content_pushes, old.total_rows), (0, 0));
        let new = correlator.get("d2").expect("d2");
        assert_eq!((new.content_pushes, new.total_rows), (1, 4));
    }

    #[test]
    fn tracked_dispatches_are_bounded() {
        let correlator = DispatchCorrelator::new(2);
        for id in ["d1", "d2", "d3"] {
            correlator.signal(id, at(0));
        }
        let ids: Vec<String> = correlator.list().into_iter().map(|d| d.dispatch_id).collect();
        assert_eq!(ids, vec!["d2", "d3"]);
    }

    #[test]
    fn time_gap_splits_batches() {
        let receipts = vec![
            receipt("r3", "p1", "x", 200, 1),
            receipt("r1", "p1", "x", 0, 2),
            receipt("r2", "p2", "x", 30, 3),
            receipt("r2", "p3", "x", 90, 4),
        ];
        let batches = batches_by_time_gap(&receipts, Duration::from_secs(60));

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].receipt_count, 3);
        assert_eq!(batches[0].total_rows, 9);
        assert_eq!(batches[0].unique_sources, 3);
        assert_eq!(batches[0].run_ids, vec!["r1", "r2"]);
        assert_eq!(batches[1].batch_index, 1);
        assert_eq!(batches[1].started_at, at(200));
        assert!(batches_by_time_gap(&[], Duration::from_secs(60)).is_empty());
    }
}
