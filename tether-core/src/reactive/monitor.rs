//! Monitor Implementation
//!
//! A monitor is a read-tracking context. Running a computation through
//! [`Monitor::run`] makes the monitor active; every signal read through it
//! while active becomes a dependency edge.
//!
//! # State machine
//!
//! ```text
//!   Idle --run--> Tracking --done--> Idle
//!   Idle --upstream changed--> Stale --run--> Tracking
//!   any --dispose--> Disposed
//! ```
//!
//! # Delivery
//!
//! When a dependency changes, the monitor becomes stale and notifies its own
//! emitter. Monitors owned by derived signals deliver immediately so the
//! invalidation cascades through the graph within the same flush job.
//! Monitors handed to consumers deliver through the scheduler, which makes
//! the notification happen at most once per flush.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::emitter::Emitter;
use super::runtime::Runtime;
use super::subscriber::{Listener, Subscription};
use crate::error::{ReactiveError, Result};
use crate::graph::{Edge, EdgeSet, Fingerprint, NodeId, Upstream};

/// Lifecycle state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Not running, and no dependency changed since the last run.
    Idle,

    /// The tracked computation is running.
    Tracking,

    /// A dependency changed since the last run.
    Stale,

    /// Torn down. Terminal.
    Disposed,
}

/// How invalidation leaves the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Emit synchronously, inside the notification that invalidated us.
    Immediate,

    /// Enqueue the emit on the scheduler.
    Scheduled,
}

struct Status {
    state: MonitorState,
    /// A dependency changed while the computation was still running.
    invalidated_while_tracking: bool,
    /// The last run did not complete, so the recorded edges are partial.
    needs_rerun: bool,
    /// Completed runs.
    generation: u64,
    /// Stale, but the scheduled notification was discarded unrun.
    delivery_lost: bool,
}

pub(crate) struct MonitorInner {
    id: NodeId,
    runtime: Runtime,
    delivery: Delivery,
    status: Mutex<Status>,
    edges: Mutex<EdgeSet>,
    emitter: Emitter<()>,
    this: Weak<MonitorInner>,
}

impl MonitorInner {
    fn invalidate(&self) {
        let deliver = {
            let mut status = self.status.lock();
            match status.state {
                MonitorState::Idle => {
                    status.state = MonitorState::Stale;
                    true
                }
                MonitorState::Tracking => {
                    status.invalidated_while_tracking = true;
                    false
                }
                MonitorState::Stale if status.delivery_lost => {
                    status.delivery_lost = false;
                    true
                }
                MonitorState::Stale | MonitorState::Disposed => false,
            }
        };

        if deliver {
            trace!(monitor = %self.id, "monitor invalidated");
            self.deliver();
        }
    }

    fn deliver(&self) {
        match self.delivery {
            Delivery::Immediate => {
                self.emitter.emit(&());
            }
            Delivery::Scheduled => {
                let pending = PendingDelivery {
                    monitor: Some(self.this.clone()),
                };
                self.runtime.enqueue(self.id, Box::new(move || pending.run()));
            }
        }
    }
}

/// A queued notification for a scheduled monitor. Dropping it unrun (a
/// coalesced enqueue, or a flush that hit its round limit) lets the next
/// invalidation deliver again.
struct PendingDelivery {
    monitor: Option<Weak<MonitorInner>>,
}

impl PendingDelivery {
    fn run(mut self) {
        let Some(monitor) = self.monitor.take().and_then(|this| this.upgrade()) else {
            return;
        };
        let stale = {
            let mut status = monitor.status.lock();
            status.delivery_lost = false;
            status.state == MonitorState::Stale
        };
        // Re-run before the flush reached us: nothing to report.
        if stale {
            monitor.emitter.emit(&());
        }
    }
}

impl Drop for PendingDelivery {
    fn drop(&mut self) {
        let Some(monitor) = self.monitor.take().and_then(|this| this.upgrade()) else {
            return;
        };
        let mut status = monitor.status.lock();
        if status.state == MonitorState::Stale {
            status.delivery_lost = true;
            trace!(monitor = %monitor.id, "scheduled notification discarded");
        }
    }
}

impl Listener<()> for MonitorInner {
    fn notify(&self, _payload: &()) {
        self.invalidate();
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        self.edges.get_mut().detach_all();
    }
}

/// A read-tracking execution context.
///
/// Cloning a monitor yields another handle to the same context. Once the
/// last handle is dropped the monitor detaches from every signal it read.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Monitor {
    pub(crate) fn new(runtime: &Runtime, delivery: Delivery) -> Self {
        Self::with_runtime(runtime.clone(), delivery)
    }

    pub(crate) fn with_runtime(runtime: Runtime, delivery: Delivery) -> Self {
        let inner = Arc::new_cyclic(|this| MonitorInner {
            id: NodeId::new(),
            runtime,
            delivery,
            status: Mutex::new(Status {
                state: MonitorState::Idle,
                invalidated_while_tracking: false,
                needs_rerun: false,
                generation: 0,
                delivery_lost: false,
            }),
            edges: Mutex::new(EdgeSet::default()),
            emitter: Emitter::new(),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Get the monitor's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// The runtime this monitor belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn state(&self) -> MonitorState {
        self.inner.status.lock().state
    }

    pub fn is_stale(&self) -> bool {
        self.state() == MonitorState::Stale
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == MonitorState::Disposed
    }

    /// Whether reads through this monitor are currently recorded.
    pub fn is_active(&self) -> bool {
        self.inner.runtime.tracking().is_active(self.inner.id)
    }

    /// Number of completed runs.
    pub fn generation(&self) -> u64 {
        self.inner.status.lock().generation
    }

    /// Number of signals read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.edges.lock().len()
    }

    /// IDs of the signals read during the last run, in read order.
    pub fn dependencies(&self) -> Vec<NodeId> {
        self.inner.edges.lock().sources()
    }

    /// Run a tracked computation.
    ///
    /// Dependencies from the previous run are dropped first; the new set is
    /// exactly what `f` reads.
    ///
    /// # Panics
    ///
    /// Panics if the monitor is disposed or already running (a cycle).
    pub fn run<R>(&self, f: impl FnOnce(&Monitor) -> R) -> R {
        self.try_run(f).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Like [`run`](Self::run), reporting misuse as an error.
    pub fn try_run<R>(&self, f: impl FnOnce(&Monitor) -> R) -> Result<R> {
        {
            let mut status = self.inner.status.lock();
            match status.state {
                MonitorState::Disposed => return Err(ReactiveError::MonitorDisposed(self.id())),
                MonitorState::Tracking => return Err(ReactiveError::Cycle(self.id())),
                MonitorState::Idle | MonitorState::Stale => {
                    status.state = MonitorState::Tracking;
                    status.invalidated_while_tracking = false;
                    status.delivery_lost = false;
                }
            }
        }

        let mut previous = self.inner.edges.lock().take();
        previous.detach_all();

        let mut guard = RunGuard {
            monitor: self,
            completed: false,
        };
        let output = {
            let _scope = self.inner.runtime.tracking().enter(self.inner.id);
            f(self)
        };
        guard.completed = true;
        drop(guard);

        // Derived recomputes happen mid-read; only consumer runs may flush.
        if self.inner.delivery == Delivery::Scheduled {
            self.inner.runtime.settle();
        }
        Ok(output)
    }

    /// Run `f` with tracking suspended.
    pub fn untracked<R>(&self, f: impl FnOnce(&Monitor) -> R) -> R {
        self.inner.runtime.untracked(f)
    }

    /// Listen for invalidation of this monitor.
    pub fn subscribe<F>(&self, on_invalidate: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.emitter.subscribe(move |_| on_invalidate())
    }

    /// Mark the monitor stale as if a dependency had changed.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    /// Tear the monitor down: detach from every signal and drop its
    /// listeners. Further runs are misuse.
    pub fn dispose(&self) {
        {
            let mut status = self.inner.status.lock();
            if status.state == MonitorState::Disposed {
                return;
            }
            status.state = MonitorState::Disposed;
        }
        let mut edges = self.inner.edges.lock().take();
        edges.detach_all();
        self.inner.emitter.clear();
        debug!(monitor = %self.id(), "monitor disposed");
    }

    /// Record a dependency on `source`. Repeated reads of one source within a
    /// run keep the first edge.
    pub(crate) fn track(
        &self,
        source: NodeId,
        upstream: Weak<dyn Upstream>,
        emitter: &Emitter<()>,
        version: u64,
    ) {
        if self.is_disposed() {
            return;
        }
        let mut edges = self.inner.edges.lock();
        if edges.contains(source) {
            return;
        }
        let listener: Weak<dyn Listener<()>> = self.inner.this.clone();
        let id = emitter.subscribe_weak(listener);
        edges.insert(source, Edge::new(upstream, emitter.downgrade(), id, version));
        trace!(monitor = %self.id(), source = %source, version, "tracked dependency");
    }

    pub(crate) fn fingerprint(&self) -> Fingerprint {
        self.inner.edges.lock().fingerprint()
    }

    pub(crate) fn needs_rerun(&self) -> bool {
        self.inner.status.lock().needs_rerun
    }

    /// Re-arm a stale monitor whose dependencies turned out unchanged.
    pub(crate) fn mark_fresh(&self) {
        let mut status = self.inner.status.lock();
        if status.state == MonitorState::Stale {
            status.state = MonitorState::Idle;
        }
    }
}

impl PartialEq for Monitor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Monitor {}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

/// Leaves the tracking state however the computation exits.
struct RunGuard<'a> {
    monitor: &'a Monitor,
    completed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let inner = &self.monitor.inner;
        let deliver = {
            let mut status = inner.status.lock();
            // Disposed from inside its own computation.
            if status.state != MonitorState::Tracking {
                return;
            }
            if self.completed {
                status.generation += 1;
                status.needs_rerun = false;
            } else {
                status.needs_rerun = true;
            }
            let invalidated = std::mem::take(&mut status.invalidated_while_tracking);
            if invalidated || !self.completed {
                status.state = MonitorState::Stale;
            } else {
                status.state = MonitorState::Idle;
            }
            invalidated && self.completed
        };

        if deliver {
            inner.deliver();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
