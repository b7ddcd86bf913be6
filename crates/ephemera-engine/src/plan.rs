//! Reevaluation: deciding what a record needs and when.
//!
//! [`evaluate_record`] looks at one record against the window
//! `(now, next)` between two main events. [`PendingTable`] holds the
//! resulting between-event buckets.

use std::collections::{BTreeMap, HashMap};

use ephemera_core::{ExpirableRecord, RecordId};

/// What to push for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Push live material (start or refresh access).
    Start,
    /// Push deletion markers (revoke access).
    Stop,
}

/// A batch of records due together. Each record appears at most once.
pub type Batch = HashMap<RecordId, Action>;

/// The schedule computed for one record in one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordPlan {
    /// Action due immediately.
    pub now: Option<Action>,
    /// Earliest start strictly inside the window.
    pub start_at: Option<i64>,
    /// Latest strict end strictly inside the window.
    pub stop_at: Option<i64>,
}

impl RecordPlan {
    pub fn is_empty(&self) -> bool {
        self.now.is_none() && self.start_at.is_none() && self.stop_at.is_none()
    }

    /// Between-event entries in chronological order.
    pub fn between(&self) -> Vec<(i64, Action)> {
        let mut entries: Vec<(i64, Action)> = self
            .start_at
            .map(|t| (t, Action::Start))
            .into_iter()
            .chain(self.stop_at.map(|t| (t, Action::Stop)))
            .collect();
        entries.sort_by_key(|(t, _)| *t);
        entries
    }
}

/// Compute the plan for `record` between `now` and `next`.
///
/// - Pending deletion: stop now, nothing else.
/// - Any span containing `now`: start now (once, however many spans match).
/// - A span starting inside `(now, next)`: start candidate, earliest wins.
/// - A strict span ending inside `(now, next)`: stop candidate, latest wins.
///   An end covered by another span is not a revocation point.
pub fn evaluate_record(record: &ExpirableRecord, now: i64, next: i64) -> RecordPlan {
    if record.delete {
        return RecordPlan {
            now: Some(Action::Stop),
            ..RecordPlan::default()
        };
    }

    let mut plan = RecordPlan::default();
    let inside = |t: i64| t > now && t < next;

    for span in &record.timespans {
        if span.contains(now) {
            plan.now = Some(Action::Start);
        }

        if inside(span.start) {
            plan.start_at = Some(plan.start_at.map_or(span.start, |s| s.min(span.start)));
        }

        if let Some(end) = span.end.filter(|e| span.strict && inside(*e)) {
            let covered = record
                .timespans
                .iter()
                .any(|other| other != span && other.contains(end));
            if !covered {
                plan.stop_at = Some(plan.stop_at.map_or(end, |s| s.max(end)));
            }
        }
    }

    plan
}

/// Time-indexed between-event buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingTable {
    buckets: BTreeMap<i64, Batch>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `record` to the bucket nearest `at` if one lies strictly within
    /// `granularity`, otherwise open a bucket at `at`.
    ///
    /// Returns the bucket time and whether the bucket is new. A record
    /// already in the chosen bucket takes the new action.
    pub fn insert_near(
        &mut self,
        at: i64,
        record: RecordId,
        action: Action,
        granularity: i64,
    ) -> (i64, bool) {
        let nearest = self
            .buckets
            .range((at - granularity + 1)..(at + granularity))
            .map(|(t, _)| *t)
            .min_by_key(|t| ((t - at).abs(), *t));

        match nearest {
            Some(t) => {
                self.buckets.entry(t).or_default().insert(record, action);
                (t, false)
            }
            None => {
                self.buckets.entry(at).or_default().insert(record, action);
                (at, true)
            }
        }
    }

    /// Add a record's between-event entries. Returns newly opened bucket times.
    pub fn merge_plan(&mut self, record: RecordId, plan: &RecordPlan, granularity: i64) -> Vec<i64> {
        plan.between()
            .into_iter()
            .filter_map(|(at, action)| {
                let (t, created) = self.insert_near(at, record, action, granularity);
                created.then_some(t)
            })
            .collect()
    }

    /// Drop every entry for `record`, and any bucket left empty.
    pub fn remove_record(&mut self, record: RecordId) -> bool {
        let mut removed = false;
        self.buckets.retain(|_, batch| {
            removed |= batch.remove(&record).is_some();
            !batch.is_empty()
        });
        removed
    }

    /// Remove and return the bucket at exactly `at`.
    pub fn take_bucket(&mut self, at: i64) -> Option<Batch> {
        self.buckets.remove(&at)
    }

    /// Remove and return every bucket due at or before `now`, merged.
    /// Later buckets override earlier ones for the same record.
    pub fn take_due(&mut self, now: i64) -> Batch {
        let future = self.buckets.split_off(&(now + 1));
        let due = std::mem::replace(&mut self.buckets, future);
        let mut merged = Batch::new();
        for (_, batch) in due {
            merged.extend(batch);
        }
        merged
    }

    pub fn bucket_times(&self) -> Vec<i64> {
        self.buckets.keys().copied().collect()
    }

    pub fn bucket(&self, at: i64) -> Option<&Batch> {
        self.buckets.get(&at)
    }

    pub fn contains_record(&self, record: RecordId) -> bool {
        self.buckets.values().any(|b| b.contains_key(&record))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
