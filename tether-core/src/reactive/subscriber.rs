//! Listener types for the reactive system.
//!
//! A listener is anything an [`Emitter`](super::Emitter) can notify: a plain
//! closure registered by a consumer, or a monitor registered weakly when it
//! reads a signal.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Weak;

/// Unique identifier for a registered listener.
///
/// Unsubscribing is by identity: a disposer removes exactly the registration
/// that produced it, even if the same closure was registered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that can be notified by an emitter.
pub trait Listener<P, R = ()>: Send + Sync {
    /// Handle one emission.
    fn notify(&self, payload: &P) -> R;
}

/// Closure adapter so plain functions can be stored next to monitors.
pub(crate) struct Callback<F>(pub(crate) F);

impl<P, R, F> Listener<P, R> for Callback<F>
where
    F: Fn(&P) -> R + Send + Sync,
{
    fn notify(&self, payload: &P) -> R {
        (self.0)(payload)
    }
}

/// Type-erased side of an emitter that can drop a registration.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: ListenerId) -> bool;
}

/// Disposer returned by `subscribe` and `connect`.
///
/// Disposing is idempotent. Dropping the subscription disposes it, unless
/// [`keep`](Self::keep) was called.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    source: Weak<dyn Detach>,
    id: ListenerId,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(source: Weak<dyn Detach>, id: ListenerId) -> Self {
        Self {
            source,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// The listener this subscription controls.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether the listener is still registered with a live emitter.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.source.strong_count() > 0
    }

    /// Remove the listener. Calling this more than once does nothing.
    pub fn dispose(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            if let Some(source) = self.source.upgrade() {
                source.detach(self.id);
            }
        }
    }

    /// Give up the disposer and leave the listener registered for as long as
    /// the emitter lives.
    pub fn keep(self) {
        self.active.store(false, Ordering::Release);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
