//! Update Scheduler
//!
//! The scheduler is the batching queue between a change and its delivery.
//! Writes do not notify anyone directly: they enqueue a job keyed by the
//! node that changed, and the job runs when the queue is flushed.
//!
//! # Algorithm
//!
//! 1. `enqueue` inserts a job under its node key. A key that is already
//!    pending is coalesced: N writes to one signal in a batch produce one job.
//! 2. The first enqueue of a batch marks the queue as scheduled and calls the
//!    host hook, if one is installed, so an event loop can arrange a flush.
//! 3. `flush` drains the queue in passes. Each pass runs its jobs in
//!    insertion order. Jobs enqueued while a pass is running go to a later
//!    pass ([`FlushMode::Deferred`]) or join the current one unless their key
//!    already ran in it ([`FlushMode::Coalesce`]).
//! 4. Passes repeat until the queue is empty or the round limit is hit.
//!
//! A job that panics is isolated; the rest of the pass still runs.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, error, trace};

use super::node::NodeId;
use crate::error::{panic_message, ReactiveError, Result};

/// A unit of deferred work.
pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// Host callback invoked when a batch becomes pending.
pub(crate) type ScheduleHook = Arc<dyn Fn() + Send + Sync>;

/// Where work enqueued during a flush pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Work enqueued during a pass starts a new pass.
    #[default]
    Deferred,

    /// Work enqueued during a pass joins it, unless its key already ran in
    /// this pass.
    Coalesce,
}

/// What a flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Number of passes over the queue.
    pub rounds: usize,

    /// Number of jobs run.
    pub jobs: usize,

    /// Number of jobs that panicked.
    pub panicked: usize,
}

#[derive(Default)]
struct Queue {
    pending: IndexMap<NodeId, Job>,
    scheduled: bool,
    flushing: bool,
}

/// The batching queue.
pub(crate) struct Scheduler {
    mode: FlushMode,
    max_rounds: usize,
    queue: Mutex<Queue>,
    hook: Mutex<Option<ScheduleHook>>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub(crate) fn new(mode: FlushMode, max_rounds: usize) -> Self {
        Self {
            mode,
            max_rounds: max_rounds.max(1),
            queue: Mutex::new(Queue::default()),
            hook: Mutex::new(None),
        }
    }

    /// Install the callback run when a new batch becomes pending.
    pub(crate) fn set_hook(&self, hook: Option<ScheduleHook>) {
        *self.hook.lock() = hook;
    }

    /// Queue a job under `key`. Returns `false` if a job for `key` was
    /// already pending and this one was coalesced into it.
    pub(crate) fn enqueue(&self, key: NodeId, job: Job) -> bool {
        let newly_scheduled = {
            let mut queue = self.queue.lock();
            if queue.pending.contains_key(&key) {
                trace!(node = %key, "coalesced into pending batch");
                return false;
            }
            queue.pending.insert(key, job);
            if queue.scheduled || queue.flushing {
                false
            } else {
                queue.scheduled = true;
                true
            }
        };

        if newly_scheduled {
            let hook = self.hook.lock().clone();
            if let Some(hook) = hook {
                hook();
            }
        }
        true
    }

    /// Whether any job is waiting.
    pub(crate) fn has_pending(&self) -> bool {
        !self.queue.lock().pending.is_empty()
    }

    /// Whether a flush is currently running.
    pub(crate) fn is_flushing(&self) -> bool {
        self.queue.lock().flushing
    }

    /// Number of pending jobs.
    pub(crate) fn pending_len(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// Drain the queue. A nested call from inside a running flush returns an
    /// empty report; the outer flush picks up the work.
    pub(crate) fn flush(&self) -> Result<FlushReport> {
        {
            let mut queue = self.queue.lock();
            if queue.flushing {
                return Ok(FlushReport::default());
            }
            queue.flushing = true;
            queue.scheduled = false;
        }
        let _guard = FlushGuard { scheduler: self };
        let _span = debug_span!("flush", mode = ?self.mode).entered();

        let mut report = FlushReport::default();
        loop {
            if !self.has_pending() {
                break;
            }
            if report.rounds == self.max_rounds {
                let dropped = std::mem::take(&mut self.queue.lock().pending);
                error!(
                    rounds = report.rounds,
                    dropped = dropped.len(),
                    "flush did not settle, dropping pending work"
                );
                drop(dropped);
                return Err(ReactiveError::FlushLimitExceeded(report.rounds));
            }
            report.rounds += 1;
            match self.mode {
                FlushMode::Deferred => self.run_snapshot(&mut report),
                FlushMode::Coalesce => self.run_coalesced(&mut report),
            }
        }

        debug!(
            rounds = report.rounds,
            jobs = report.jobs,
            panicked = report.panicked,
            "flush settled"
        );
        Ok(report)
    }

    fn run_snapshot(&self, report: &mut FlushReport) {
        let batch = std::mem::take(&mut self.queue.lock().pending);
        for (key, job) in batch {
            run_job(key, job, report);
        }
    }

    fn run_coalesced(&self, report: &mut FlushReport) {
        let mut ran = HashSet::new();
        let mut later: IndexMap<NodeId, Job> = IndexMap::new();
        loop {
            let next = self.queue.lock().pending.shift_remove_index(0);
            let Some((key, job)) = next else {
                break;
            };
            if ran.insert(key) {
                run_job(key, job, report);
            } else {
                later.entry(key).or_insert(job);
            }
        }

        let mut queue = self.queue.lock();
        for (key, job) in later {
            queue.pending.entry(key).or_insert(job);
        }
    }
}

fn run_job(key: NodeId, job: Job, report: &mut FlushReport) {
    report.jobs += 1;
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        report.panicked += 1;
        let message = panic_message(payload.as_ref());
        error!(node = %key, %message, "scheduled job panicked");
    }
}

/// Clears the flushing flag however the flush exits.
struct FlushGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        let mut queue = self.scheduler.queue.lock();
        queue.flushing = false;
        queue.scheduled = !queue.pending.is_empty();
    }
}
