//! Reactive Runtime
//!
//! The runtime is the context object every signal, monitor and effect
//! belongs to. It owns the batching scheduler and the tracking stack, so two
//! runtimes never observe each other's writes.
//!
//! # How It Works
//!
//! 1. A write stores the new value and enqueues a notification job on the
//!    runtime's scheduler, keyed by the signal.
//!
//! 2. [`Runtime::flush`] drains the queue. Signal emitters notify the
//!    monitors that read them; derived signals cascade the invalidation
//!    immediately, consumer monitors enqueue their own notification.
//!
//! 3. Consumers re-run their computations and pull fresh values. Derived
//!    values recompute lazily on that pull.
//!
//! # When Flushes Happen
//!
//! The host decides. It can call [`Runtime::flush`] itself, install a
//! schedule hook to be told when a batch becomes pending, wrap writes in
//! [`Runtime::batch`], or enable `auto_flush` in the config.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use super::compare::{Compare, Identity};
use super::context::TrackingStack;
use super::effect::Effect;
use super::factory::MonitorFactory;
use super::monitor::{Delivery, Monitor};
use super::signal::{ReadonlySignal, Signal, SignalOptions};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::graph::{FlushReport, Job, NodeId, ScheduleHook, Scheduler};

struct RuntimeInner {
    config: RuntimeConfig,
    scheduler: Scheduler,
    tracking: TrackingStack,
    batch_depth: AtomicUsize,
    /// Bumped by every applied write.
    epoch: AtomicU64,
    /// Live counted `Runtime` handles.
    handles: AtomicUsize,
    /// Handed to `untracked` callers. Its own runtime handle is uncounted.
    inert: Mutex<Option<Monitor>>,
}

/// Handle to a reactive runtime.
///
/// Cloning is cheap and yields another handle to the same runtime.
///
/// # Threads
///
/// Handles, signals and monitors are `Send + Sync`. Tracking frames are kept
/// per thread, so monitors run concurrently on different threads record
/// only their own reads. The batch depth, the pending queue and the epoch are
/// shared: a batch opened on one thread also holds back flushes requested
/// from another.
///
/// # Example
///
/// ```rust
/// use tether_core::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.signal(1);
/// let c = count.clone();
/// let doubled = runtime.derived(move |m| c.read(m) * 2);
///
/// let monitor = runtime.monitor();
/// assert_eq!(monitor.run(|m| doubled.read(m)), 2);
///
/// count.write(4).unwrap();
/// runtime.flush().unwrap();
/// assert!(monitor.is_stale());
/// assert_eq!(monitor.run(|m| doubled.read(m)), 8);
/// ```
pub struct Runtime {
    inner: Arc<RuntimeInner>,
    counted: bool,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        debug!(?config, "creating runtime");
        let scheduler = Scheduler::new(config.flush_mode, config.max_flush_rounds);
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                scheduler,
                tracking: TrackingStack::default(),
                batch_depth: AtomicUsize::new(0),
                epoch: AtomicU64::new(0),
                handles: AtomicUsize::new(1),
                inert: Mutex::new(None),
            }),
            counted: true,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // ---- Constructors ----

    /// Create a source signal compared by identity.
    pub fn signal<T>(&self, value: T) -> Signal<T>
    where
        T: Identity + Clone + Send + Sync + 'static,
    {
        Signal::new(self, value)
    }

    /// Create a source signal with a custom comparator.
    pub fn signal_with<T>(&self, value: T, compare: Compare<T>) -> Signal<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Signal::with_compare(self, value, compare)
    }

    pub fn signal_with_options<T>(&self, value: T, options: SignalOptions<T>) -> Signal<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Signal::with_options(self, value, options)
    }

    /// Create a derived signal from a tracked computation.
    pub fn derived<T, F>(&self, compute: F) -> ReadonlySignal<T>
    where
        T: Identity + Clone + Send + Sync + 'static,
        F: Fn(&Monitor) -> T + Send + Sync + 'static,
    {
        ReadonlySignal::derived(self, compute)
    }

    pub fn derived_with_options<T, F>(&self, compute: F, options: SignalOptions<T>) -> ReadonlySignal<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&Monitor) -> T + Send + Sync + 'static,
    {
        ReadonlySignal::derived_with_options(self, compute, options)
    }

    /// Create a monitor whose invalidation is delivered once per flush.
    pub fn monitor(&self) -> Monitor {
        Monitor::new(self, Delivery::Scheduled)
    }

    /// Create a factory for external subscribe/snapshot bridges.
    pub fn monitor_factory(&self) -> MonitorFactory {
        MonitorFactory::new(self)
    }

    /// Run `run` now and again after every flush in which one of the
    /// signals it read changed.
    pub fn effect<F>(&self, run: F) -> Effect
    where
        F: Fn(&Monitor) + Send + Sync + 'static,
    {
        Effect::new(self, run)
    }

    // ---- Tracking ----

    /// Run `f` with tracking suspended.
    ///
    /// `f` receives the runtime's shared inert monitor, which is never run
    /// and so never records anything. Reads through an outer monitor are not
    /// recorded either until `f` returns.
    pub fn untracked<R>(&self, f: impl FnOnce(&Monitor) -> R) -> R {
        let _scope = self.inner.tracking.suspend();
        let monitor = self.inert_monitor();
        f(&monitor)
    }

    fn inert_monitor(&self) -> Monitor {
        let mut slot = self.inner.inert.lock();
        match slot.as_ref() {
            Some(monitor) if !monitor.is_disposed() => monitor.clone(),
            _ => {
                // Uncounted, so the cached monitor does not keep the runtime alive.
                let handle = Runtime {
                    inner: self.inner.clone(),
                    counted: false,
                };
                let monitor = Monitor::with_runtime(handle, Delivery::Scheduled);
                *slot = Some(monitor.clone());
                monitor
            }
        }
    }

    // ---- Batching ----

    /// Run `f` as one batch. Writes inside it are flushed together when the
    /// outermost batch ends.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.batch_depth.fetch_add(1, Ordering::AcqRel);
        let _guard = BatchGuard { runtime: self };
        f()
    }

    /// Deliver every pending notification.
    pub fn flush(&self) -> Result<FlushReport> {
        self.inner.scheduler.flush()
    }

    pub fn has_pending(&self) -> bool {
        self.inner.scheduler.has_pending()
    }

    /// Number of notifications waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.inner.scheduler.pending_len()
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.scheduler.is_flushing()
    }

    pub fn is_batching(&self) -> bool {
        self.inner.batch_depth.load(Ordering::Acquire) > 0
    }

    /// Call `hook` whenever a new batch becomes pending.
    ///
    /// The hook runs inside the write that scheduled the batch. It should
    /// arrange a flush, not perform one. A hook that captures this runtime
    /// keeps it alive until [`clear_schedule_hook`](Self::clear_schedule_hook).
    pub fn set_schedule_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let hook: ScheduleHook = Arc::new(hook);
        self.inner.scheduler.set_hook(Some(hook));
    }

    pub fn clear_schedule_hook(&self) {
        self.inner.scheduler.set_hook(None);
    }

    // ---- Crate-internal plumbing ----

    pub(crate) fn tracking(&self) -> &TrackingStack {
        &self.inner.tracking
    }

    pub(crate) fn enqueue(&self, key: NodeId, job: Job) -> bool {
        self.inner.scheduler.enqueue(key, job)
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn bump_epoch(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Flush if `auto_flush` is on and nothing is in progress.
    pub(crate) fn settle(&self) {
        if self.inner.config.auto_flush {
            self.flush_when_idle("automatic flush failed");
        }
    }

    /// No batch, flush or tracked computation is running.
    fn is_idle(&self) -> bool {
        !self.is_batching() && !self.is_flushing() && !self.inner.tracking.in_computation()
    }

    fn flush_when_idle(&self, context: &str) {
        if !self.is_idle() || !self.has_pending() {
            return;
        }
        if let Err(err) = self.flush() {
            error!(error = %err, "{context}");
        }
    }
}

impl Clone for Runtime {
    fn clone(&self) -> Self {
        self.inner.handles.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: self.inner.clone(),
            counted: true,
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.counted || self.inner.handles.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        // Last counted handle: release the inert monitor, which holds the
        // only other reference.
        let inert = self.inner.inert.lock().take();
        drop(inert);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("pending", &self.pending_count())
            .field("flushing", &self.is_flushing())
            .field("batch_depth", &self.inner.batch_depth.load(Ordering::Acquire))
            .field("epoch", &self.epoch())
            .finish()
    }
}

/// Ends a batch and flushes when the outermost one closes.
struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let depth = self.runtime.inner.batch_depth.fetch_sub(1, Ordering::AcqRel) - 1;
        if depth == 0 && !std::thread::panicking() {
            self.runtime.flush_when_idle("batch flush failed");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
