//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect's monitor goes stale and
//!    enqueues its notification. The effect re-runs when the scheduler
//!    delivers it, so several writes in one batch cause one re-run.
//!
//! 3. Every run rebuilds the dependency set from scratch.
//!
//! # Differences from Derived Signals
//!
//! - Derived signals return a value; effects do not.
//! - Derived signals are lazy (compute on read); effects are eager.
//! - An effect that writes a signal it reads triggers itself again on the
//!   next flush pass. The round limit stops a runaway loop.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::monitor::{Delivery, Monitor};
use super::runtime::Runtime;
use super::subscriber::Subscription;
use crate::graph::NodeId;

struct EffectInner {
    monitor: Monitor,
    run: Box<dyn Fn(&Monitor) + Send + Sync>,
    run_count: AtomicUsize,
    /// Re-runs the effect when the monitor is invalidated.
    link: Mutex<Option<Subscription>>,
}

impl EffectInner {
    fn execute(&self) {
        if self.monitor.is_disposed() {
            return;
        }
        match self.monitor.try_run(|monitor| (self.run)(monitor)) {
            Ok(()) => {
                self.run_count.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                warn!(effect = %self.monitor.id(), error = %err, "effect run skipped");
            }
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// Dropping the last handle stops the effect.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
/// use tether_core::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.signal(0);
/// let seen = Arc::new(AtomicI32::new(-1));
///
/// let (c, s) = (count.clone(), seen.clone());
/// let _effect = runtime.effect(move |m| {
///     s.store(c.read(m), Ordering::SeqCst);
/// });
/// assert_eq!(seen.load(Ordering::SeqCst), 0);
///
/// count.write(5).unwrap();
/// runtime.flush().unwrap();
/// assert_eq!(seen.load(Ordering::SeqCst), 5);
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it once.
    pub fn new<F>(runtime: &Runtime, run: F) -> Self
    where
        F: Fn(&Monitor) + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            monitor: Monitor::new(runtime, Delivery::Scheduled),
            run: Box::new(run),
            run_count: AtomicUsize::new(0),
            link: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let link = inner.monitor.subscribe(move || {
            if let Some(inner) = weak.upgrade() {
                inner.execute();
            }
        });
        *inner.link.lock() = Some(link);

        // Run immediately to establish dependencies
        inner.execute();
        debug!(effect = %inner.monitor.id(), "effect created");

        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.monitor.id()
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Number of signals read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.monitor.dependency_count()
    }

    /// The monitor the effect runs in.
    pub fn monitor(&self) -> &Monitor {
        &self.inner.monitor
    }

    /// Run the effect now, outside the scheduler.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Stop the effect. It will not run again.
    pub fn dispose(&self) {
        self.inner.monitor.dispose();
        self.inner.link.lock().take();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.monitor.is_disposed()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_immediately() {
        let runtime = Runtime::new();
        let call_count = Arc::new(AtomicI32::new(0));
        let c = call_count.clone();

        let effect = runtime.effect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_once_per_flush() {
        let runtime = Runtime::new();
        let a = runtime.signal(0);
        let b = runtime.signal(0);
        let (a2, b2) = (a.clone(), b.clone());
        let effect = runtime.effect(move |m| {
            a2.read(m);
            b2.read(m);
        });
        assert_eq!(effect.dependency_count(), 2);

        a.write(1).unwrap();
        a.write(2).unwrap();
        b.write(1).unwrap();
        assert_eq!(effect.run_count(), 1);

        runtime.flush().unwrap();
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn effect_execute_manually() {
        let runtime = Runtime::new();
        let call_count = Arc::new(AtomicI32::new(0));
        let c = call_count.clone();

        let effect = runtime.effect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        effect.execute();
        effect.execute();

        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn disposed_effect_stops() {
        let runtime = Runtime::new();
        let a = runtime.signal(0);
        let a2 = a.clone();
        let effect = runtime.effect(move |m| {
            a2.read(m);
        });

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(a.dependent_count(), 0);

        a.write(1).unwrap();
        runtime.flush().unwrap();
        effect.execute();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn dropped_effect_releases_dependencies() {
        let runtime = Runtime::new();
        let a = runtime.signal(0);
        let a2 = a.clone();
        let effect = runtime.effect(move |m| {
            a2.read(m);
        });
        assert_eq!(a.dependent_count(), 1);

        drop(effect);
        assert_eq!(a.dependent_count(), 0);
        a.write(1).unwrap();
        assert_eq!(runtime.flush().unwrap().panicked, 0);
    }

    #[test]
    fn effect_tracks_switching_dependencies() {
        let runtime = Runtime::new();
        let use_a = runtime.signal(true);
        let a = runtime.signal(1);
        let b = runtime.signal(2);

        let (flag, a2, b2) = (use_a.clone(), a.clone(), b.clone());
        let effect = runtime.effect(move |m| {
            if flag.read(m) {
                a2.read(m);
            } else {
                b2.read(m);
            }
        });

        use_a.write(false).unwrap();
        runtime.flush().unwrap();
        assert_eq!(effect.run_count(), 2);

        // `a` is no longer read.
        a.write(10).unwrap();
        runtime.flush().unwrap();
        assert_eq!(effect.run_count(), 2);

        b.write(20).unwrap();
        runtime.flush().unwrap();
        assert_eq!(effect.run_count(), 3);
    }
}
