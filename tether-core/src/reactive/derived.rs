//! Derived Signals
//!
//! A derived signal caches the result of a computation over other signals
//! and only recomputes when one of its dependencies actually changed.
//!
//! # Memoization Strategy
//!
//! 1. The computation runs inside the derived signal's own monitor, so its
//!    dependencies are tracked independently of whoever is reading it.
//!
//! 2. When a dependency changes, the monitor goes stale and the staleness
//!    cascades synchronously to everything downstream. Nothing is recomputed
//!    at that point.
//!
//! 3. On the next read, a stale signal first settles each recorded upstream
//!    and compares versions. If every upstream is back where it was, the
//!    cache is kept. Otherwise the computation runs again.
//!
//! 4. A recompute whose result compares equal to the cached value keeps the
//!    old value and version, so downstream caches stay valid.
//!
//! Writes bump a runtime-wide epoch before their notification is flushed. A
//! derived signal that was verified in the current epoch is served from cache
//! without looking at its upstreams.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::{debug_span, trace, warn};

use super::monitor::{Delivery, Monitor, MonitorState};
use super::runtime::Runtime;
use super::signal::SignalNode;
use super::subscriber::Subscription;
use crate::error::{panic_message, ReactiveError, Result};
use crate::graph::fingerprint_matches;

pub(super) type ComputeFn<T> = Box<dyn Fn(&Monitor) -> T + Send + Sync>;

/// Memo state of a derived signal.
pub(super) struct Derived<T> {
    compute: ComputeFn<T>,
    cache: Mutex<Option<T>>,
    /// Epoch in which the cache was last known to be current.
    verified_at: AtomicU64,
    monitor: Monitor,
    /// Forwards monitor invalidation to the signal's own dependents.
    _link: Subscription,
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(super) fn new(runtime: &Runtime, node: Weak<SignalNode<T>>, compute: ComputeFn<T>) -> Self {
        let monitor = Monitor::new(runtime, Delivery::Immediate);
        let link = monitor.subscribe(move || {
            if let Some(node) = node.upgrade() {
                node.emitter.emit(&());
            }
        });
        Self {
            compute,
            cache: Mutex::new(None),
            verified_at: AtomicU64::new(0),
            monitor,
            _link: link,
        }
    }

    pub(super) fn cached(&self) -> Option<T> {
        self.cache.lock().clone()
    }

    pub(super) fn dispose(&self) {
        self.monitor.dispose();
        self.cache.lock().take();
    }
}

impl<T> SignalNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Bring a derived value up to date.
    pub(super) fn refresh(&self, derived: &Derived<T>) -> Result<()> {
        let state = derived.monitor.state();
        match state {
            MonitorState::Disposed => return Err(ReactiveError::SignalDisposed(self.id)),
            MonitorState::Tracking => return Err(ReactiveError::Cycle(self.id)),
            MonitorState::Idle | MonitorState::Stale => {}
        }

        let epoch = self.runtime.epoch();
        let has_cache = derived.cache.lock().is_some();
        if has_cache && !derived.monitor.needs_rerun() {
            if state == MonitorState::Idle && derived.verified_at.load(Ordering::Acquire) == epoch {
                return Ok(());
            }
            if fingerprint_matches(&derived.monitor.fingerprint())? {
                derived.verified_at.store(epoch, Ordering::Release);
                derived.monitor.mark_fresh();
                trace!(node = %self.id, label = ?self.label, "derived value still valid");
                return Ok(());
            }
        }

        self.recompute(derived, epoch)
    }

    fn recompute(&self, derived: &Derived<T>, epoch: u64) -> Result<()> {
        let _span = debug_span!("recompute", node = %self.id, label = ?self.label).entered();

        let value = derived.monitor.try_run(|monitor| (derived.compute)(monitor))?;
        let previous = derived.cache.lock().clone();
        let changed = match &previous {
            None => true,
            // A comparator that unwinds must not leave the cache behind the
            // edges the run just recorded.
            Some(old) => match panic::catch_unwind(AssertUnwindSafe(|| self.compare.equals(old, &value))) {
                Ok(Ok(equal)) => !equal,
                Ok(Err(err)) => {
                    warn!(node = %self.id, label = ?self.label, error = %err, "comparator failed, treating value as changed");
                    true
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(node = %self.id, label = ?self.label, panic = %message, "comparator panicked, treating value as changed");
                    true
                }
            },
        };

        if changed {
            *derived.cache.lock() = Some(value);
            let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
            trace!(node = %self.id, version, "derived value changed");
        }
        // Writes made by the computation itself leave the cache unverified.
        derived.verified_at.store(epoch, Ordering::Release);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
