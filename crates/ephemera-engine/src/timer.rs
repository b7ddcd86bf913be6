//! One scheduling abstraction for every trigger kind.
//!
//! The scheduler asks a [`JobTimer`] to deliver a [`Job`] at a given time.
//! [`TokioTimer`] delivers through an mpsc channel consumed by
//! [`Scheduler::run`](crate::Scheduler::run); [`ManualTimer`] just records
//! the request so tests can fire jobs when they choose.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::clock::Clock;

/// What a timer firing asks the scheduler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// Full rescan and start of the next cycle.
    MainEvent,
    /// Execute the pending bucket keyed by this trigger time.
    BetweenEvent(i64),
    /// Drain the debounced reevaluation inbox.
    ReevaluationDrain,
}

/// Deferred delivery of jobs.
pub trait JobTimer: Send + Sync {
    /// Deliver `job` at Unix-millisecond time `at` (immediately if past).
    fn schedule(&self, job: Job, at: i64);
}

/// Timer backed by tokio sleeps.
pub struct TokioTimer {
    clock: Arc<dyn Clock>,
    tx: mpsc::UnboundedSender<Job>,
}

impl TokioTimer {
    /// Create a timer and the receiver its jobs arrive on.
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { clock, tx }, rx)
    }
}

impl JobTimer for TokioTimer {
    fn schedule(&self, job: Job, at: i64) {
        let delay = (at - self.clock.now_millis()).max(0) as u64;
        let tx = self.tx.clone();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(?job, "no tokio runtime; job dropped");
            return;
        };
        handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if tx.send(job).is_err() {
                tracing::debug!(?job, "scheduler gone; job dropped");
            }
        });
    }
}

/// Timer that records requests without ever firing.
#[derive(Debug, Default)]
pub struct ManualTimer {
    jobs: Mutex<Vec<(i64, Job)>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every job due at or before `now`, earliest first.
    pub fn take_due(&self, now: i64) -> Vec<Job> {
        let mut jobs = self.jobs.lock().expect("timer lock poisoned");
        jobs.sort_by_key(|(at, _)| *at);
        let split = jobs.partition_point(|(at, _)| *at <= now);
        jobs.drain(..split).map(|(_, job)| job).collect()
    }

    /// All outstanding requests, earliest first.
    pub fn scheduled(&self) -> Vec<(i64, Job)> {
        let mut jobs = self.jobs.lock().expect("timer lock poisoned").clone();
        jobs.sort_by_key(|(at, _)| *at);
        jobs
    }

    /// Time of the earliest outstanding request.
    pub fn next_due(&self) -> Option<i64> {
        self.jobs
            .lock()
            .expect("timer lock poisoned")
            .iter()
            .map(|(at, _)| *at)
            .min()
    }

    /// Number of outstanding requests for `job`.
    pub fn count(&self, job: Job) -> usize {
        self.jobs
            .lock()
            .expect("timer lock poisoned")
            .iter()
            .filter(|(_, j)| *j == job)
            .count()
    }
}

impl JobTimer for ManualTimer {
    fn schedule(&self, job: Job, at: i64) {
        self.jobs.lock().expect("timer lock poisoned").push((at, job));
    }
}
