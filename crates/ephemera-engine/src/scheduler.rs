//! The Scheduler: main events, between events and the debounced
//! reevaluation inbox.
//!
//! Two locks guard the state:
//!
//! 1. `pending` (async mutex): the between-event table and the current/next
//!    main event times. Held across a whole batch execution, so pushes in a
//!    cycle are serialized and no scan ever sees a half-updated table.
//! 2. `inbox` (sync mutex): queued record ids and the debounce flag. Held
//!    only briefly, so request handlers can enqueue while a batch runs.
//!
//! Lock order is always inbox-then-release before pending; the inbox lock is
//! never held across an await.
//!
//! A Stop whose push fails is owed until a later push succeeds. By the time
//! the record is drained its span has usually ended, so the plan alone would
//! no longer produce the Stop.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use ephemera_core::{Keypair, RecordId, RecordKind};
use ephemera_dht::ExternalStore;
use ephemera_store::DocumentStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::executor::{PushOutcome, UpdateExecutor};
use crate::plan::{evaluate_record, Action, Batch, PendingTable, RecordPlan};
use crate::timer::{Job, JobTimer};

/// What one batch execution did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Records whose push was accepted.
    pub pushed: Vec<RecordId>,
    /// Records whose push failed and were re-enqueued.
    pub failed: Vec<RecordId>,
    /// Records with nothing to push, or gone from the store.
    pub skipped: Vec<RecordId>,
    /// Records purged from the document store after a deletion push.
    pub purged: Vec<RecordId>,
}

impl UpdateReport {
    pub fn is_empty(&self) -> bool {
        self.pushed.is_empty() && self.failed.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug, Default)]
struct PendingState {
    table: PendingTable,
    current_main_event: Option<i64>,
    next_main_event: Option<i64>,
    /// Records with a Stop that has not reached the external store yet.
    owed_stops: HashSet<RecordId>,
}

impl PendingState {
    /// The action due now for `id`, given what its plan asks for.
    ///
    /// An owed Stop is kept unless the record has become active again.
    fn due_now(&mut self, id: RecordId, planned: Option<Action>) -> Option<Action> {
        if !self.owed_stops.contains(&id) {
            return planned;
        }
        match planned {
            Some(Action::Start) => {
                self.owed_stops.remove(&id);
                planned
            }
            _ => Some(Action::Stop),
        }
    }
}

#[derive(Debug, Default)]
struct Inbox {
    queued: Vec<RecordId>,
    armed: bool,
}

/// Drives the expiration engine.
///
/// Constructed explicitly and shared through an `Arc`; nothing is global.
pub struct Scheduler<S: DocumentStore, D: ExternalStore> {
    store: Arc<S>,
    executor: UpdateExecutor<D>,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn JobTimer>,
    config: EngineConfig,
    pending: tokio::sync::Mutex<PendingState>,
    inbox: Mutex<Inbox>,
}

impl<S, D> Scheduler<S, D>
where
    S: DocumentStore + 'static,
    D: ExternalStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        dht: Arc<D>,
        keypair: Arc<Keypair>,
        clock: Arc<dyn Clock>,
        timer: Arc<dyn JobTimer>,
        config: EngineConfig,
    ) -> Result<Self> {
        let executor = UpdateExecutor::new(dht, keypair, config.clone())?;
        Ok(Self {
            store,
            executor,
            clock,
            timer,
            config,
            pending: tokio::sync::Mutex::new(PendingState::default()),
            inbox: Mutex::new(Inbox::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Arm the first main event.
    pub fn start(&self) {
        let at = self.clock.now_millis() + self.config.initial_main_event_delay_ms as i64;
        tracing::info!(at, "scheduling first main event");
        self.timer.schedule(Job::MainEvent, at);
    }

    /// Consume jobs from a [`TokioTimer`](crate::TokioTimer) channel until it closes.
    pub async fn run(self: Arc<Self>, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            if let Err(e) = self.handle(job).await {
                tracing::error!(?job, error = %e, "job failed");
            }
        }
        tracing::debug!("job channel closed; scheduler stopping");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self: &Arc<Self>, jobs: mpsc::UnboundedReceiver<Job>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(jobs))
    }

    /// Dispatch one job.
    pub async fn handle(&self, job: Job) -> Result<UpdateReport> {
        match job {
            Job::MainEvent => self.on_main_event().await,
            Job::BetweenEvent(at) => self.on_between_event(at).await,
            Job::ReevaluationDrain => self.drain_reevaluation_inbox().await,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Main Event
    // ─────────────────────────────────────────────────────────────────────────

    /// Rescan every record, rebuild the between-event table and execute
    /// whatever is due now.
    ///
    /// Unexecuted buckets already due are carried into the now batch; future
    /// buckets are dropped and re-derived by the scan. If the scan fails the
    /// table and the window are left as they were and the main event is
    /// retried after the reevaluation delay.
    pub async fn on_main_event(&self) -> Result<UpdateReport> {
        let mut pending = self.pending.lock().await;

        let now = pending
            .next_main_event
            .unwrap_or_else(|| self.clock.now_millis());
        let next = now + self.config.main_event_interval_ms();

        let planned = match self.scan(now, next).await {
            Ok(planned) => planned,
            Err(e) => {
                let retry = self.clock.now_millis() + self.config.reevaluation_delay_ms as i64;
                tracing::warn!(now, retry, error = %e, "main event scan failed; retrying");
                self.timer.schedule(Job::MainEvent, retry);
                return Err(e);
            }
        };

        pending.current_main_event = Some(now);
        pending.next_main_event = Some(next);
        self.timer.schedule(Job::MainEvent, next);

        let mut batch = pending.table.take_due(now);
        let carried = batch.len();

        let granularity = self.config.granularity_ms();
        let mut table = PendingTable::new();
        for (id, plan) in &planned {
            if let Some(action) = pending.due_now(*id, plan.now) {
                batch.insert(*id, action);
            }
            table.merge_plan(*id, plan, granularity);
        }

        for at in table.bucket_times() {
            self.timer.schedule(Job::BetweenEvent(at), at);
        }
        pending.table = table;

        tracing::info!(
            now,
            next,
            scanned = planned.len(),
            carried,
            due_now = batch.len(),
            buckets = pending.table.len(),
            "main event"
        );

        Ok(self.run_update(&mut pending, batch).await)
    }

    /// Plan every expiring record for the window `(now, next)`.
    async fn scan(&self, now: i64, next: i64) -> Result<Vec<(RecordId, RecordPlan)>> {
        let mut planned = Vec::new();
        for kind in [RecordKind::FileBag, RecordKind::Attribute] {
            for record in self.store.list_records(kind).await? {
                if record.has_expiration() {
                    planned.push((record.id, evaluate_record(&record, now, next)));
                }
            }
        }
        Ok(planned)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Between Event
    // ─────────────────────────────────────────────────────────────────────────

    /// Execute the bucket at `at`. A bucket replaced by a later scan is a no-op.
    pub async fn on_between_event(&self, at: i64) -> Result<UpdateReport> {
        let mut pending = self.pending.lock().await;
        match pending.table.take_bucket(at) {
            Some(batch) => {
                tracing::debug!(bucket = at, records = batch.len(), "between event");
                Ok(self.run_update(&mut pending, batch).await)
            }
            None => {
                tracing::debug!(bucket = at, "between event has no bucket");
                Ok(UpdateReport::default())
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reevaluation Inbox
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue a record for reevaluation after the debounce window.
    ///
    /// Safe to call from any thread; never blocks on a running batch.
    pub fn enqueue_for_reevaluation(&self, id: RecordId) {
        let mut inbox = self.inbox.lock().expect("inbox lock poisoned");
        inbox.queued.push(id);
        if !inbox.armed {
            inbox.armed = true;
            let at = self.clock.now_millis() + self.config.reevaluation_delay_ms as i64;
            self.timer.schedule(Job::ReevaluationDrain, at);
            tracing::debug!(record = %id, at, "armed reevaluation drain");
        }
    }

    /// Reevaluate every queued record and merge the results into the
    /// pending table.
    pub async fn drain_reevaluation_inbox(&self) -> Result<UpdateReport> {
        let queued = {
            let mut inbox = self.inbox.lock().expect("inbox lock poisoned");
            std::mem::take(&mut inbox.queued)
        };

        let mut seen = HashSet::new();
        let ids: Vec<RecordId> = queued.into_iter().filter(|id| seen.insert(*id)).collect();

        let report = self.reevaluate(&ids).await;

        {
            let mut inbox = self.inbox.lock().expect("inbox lock poisoned");
            if inbox.queued.is_empty() {
                inbox.armed = false;
            } else {
                let at = self.clock.now_millis() + self.config.reevaluation_delay_ms as i64;
                self.timer.schedule(Job::ReevaluationDrain, at);
                tracing::debug!(queued = inbox.queued.len(), at, "re-armed reevaluation drain");
            }
        }

        report
    }

    async fn reevaluate(&self, ids: &[RecordId]) -> Result<UpdateReport> {
        let mut pending = self.pending.lock().await;

        let now = self.clock.now_millis();
        let next = pending
            .next_main_event
            .unwrap_or(now + self.config.main_event_interval_ms());
        let granularity = self.config.granularity_ms();

        let mut batch = Batch::new();
        for &id in ids {
            pending.table.remove_record(id);

            let record = match self.store.load_record(id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::debug!(record = %id, "queued record no longer exists");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(record = %id, error = %e, "reload failed; requeueing");
                    self.enqueue_for_reevaluation(id);
                    continue;
                }
            };
            if !record.has_expiration() {
                continue;
            }

            let plan = evaluate_record(&record, now, next);
            if let Some(action) = pending.due_now(id, plan.now) {
                batch.insert(id, action);
            }
            for at in pending.table.merge_plan(id, &plan, granularity) {
                self.timer.schedule(Job::BetweenEvent(at), at);
            }
        }

        tracing::debug!(records = ids.len(), due_now = batch.len(), "reevaluated");
        Ok(self.run_update(&mut pending, batch).await)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Batch Execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Push every record in `batch`. Runs with the pending lock held.
    ///
    /// Records are reloaded first. A failed push re-enqueues its record; it
    /// never stops the rest of the batch. A failed Stop is also remembered as
    /// owed so the retry pushes it even after the span has ended.
    async fn run_update(&self, pending: &mut PendingState, batch: Batch) -> UpdateReport {
        let mut report = UpdateReport::default();
        let mut ordered: Vec<(RecordId, Action)> = batch.into_iter().collect();
        ordered.sort_by_key(|(id, _)| *id);

        for (id, action) in ordered {
            let record = match self.store.load_record(id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    pending.owed_stops.remove(&id);
                    report.skipped.push(id);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(record = %id, error = %e, "reload failed; requeueing");
                    if action == Action::Stop {
                        pending.owed_stops.insert(id);
                    }
                    report.failed.push(id);
                    self.enqueue_for_reevaluation(id);
                    continue;
                }
            };

            match self.executor.execute(&record, action).await {
                Ok(PushOutcome::Pushed) => {
                    pending.owed_stops.remove(&id);
                    report.pushed.push(id);
                    if record.delete {
                        pending.table.remove_record(id);
                        match self.store.delete_record(id).await {
                            Ok(_) => {
                                tracing::info!(record = %id, "purged after deletion push");
                                report.purged.push(id);
                            }
                            Err(e) => {
                                tracing::warn!(record = %id, error = %e, "purge failed; requeueing");
                                self.enqueue_for_reevaluation(id);
                            }
                        }
                    }
                }
                Ok(PushOutcome::Failed) => {
                    if action == Action::Stop {
                        tracing::warn!(record = %id, "stop push failed; owed until retried");
                        pending.owed_stops.insert(id);
                    }
                    report.failed.push(id);
                    self.enqueue_for_reevaluation(id);
                }
                Ok(PushOutcome::Skipped) => report.skipped.push(id),
                Err(e) => {
                    // Malformed records wait for the next main event rather
                    // than spinning through the inbox.
                    tracing::error!(record = %id, error = %e, "update failed");
                    report.skipped.push(id);
                }
            }
        }

        report
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    /// The current main event window, once the first main event has run.
    pub async fn main_event_window(&self) -> Option<(i64, i64)> {
        let pending = self.pending.lock().await;
        pending.current_main_event.zip(pending.next_main_event)
    }

    /// Snapshot of the between-event table: bucket time and its entries.
    pub async fn pending_buckets(&self) -> Vec<(i64, Vec<(RecordId, Action)>)> {
        let pending = self.pending.lock().await;
        pending
            .table
            .bucket_times()
            .into_iter()
            .map(|at| {
                let mut entries: Vec<(RecordId, Action)> = pending
                    .table
                    .bucket(at)
                    .map(|b| b.iter().map(|(id, a)| (*id, *a)).collect())
                    .unwrap_or_default();
                entries.sort_by_key(|(id, _)| *id);
                (at, entries)
            })
            .collect()
    }

    /// Number of queued, not yet drained, entries.
    pub fn inbox_len(&self) -> usize {
        self.inbox.lock().expect("inbox lock poisoned").queued.len()
    }

    /// Whether a drain is armed.
    pub fn drain_armed(&self) -> bool {
        self.inbox.lock().expect("inbox lock poisoned").armed
    }
}
