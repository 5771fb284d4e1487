//! Emitter Implementation
//!
//! An emitter is a list of listeners plus a notify primitive. Every signal
//! owns one (its dependents) and every monitor owns one ("this computation
//! changed").
//!
//! # Snapshot semantics
//!
//! `emit` copies the current listeners before calling any of them, and the
//! lock is released while listeners run. Listeners added or removed by a
//! listener during an emit take effect from the next emit on.
//!
//! # Weak listeners
//!
//! Monitors subscribe weakly. A dead weak entry is skipped on emit and
//! removed by the next [`prune`](Emitter::prune); it never counts towards
//! [`len`](Emitter::len).

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{error, trace};

use super::subscriber::{Callback, Detach, Listener, ListenerId, Subscription};
use crate::error::{panic_message, ReactiveError, Result};

/// A registered listener, held strongly or weakly.
enum Entry<P, R> {
    Strong(Arc<dyn Listener<P, R>>),
    Weak(Weak<dyn Listener<P, R>>),
}

impl<P, R> Entry<P, R> {
    fn upgrade(&self) -> Option<Arc<dyn Listener<P, R>>> {
        match self {
            Entry::Strong(listener) => Some(Arc::clone(listener)),
            Entry::Weak(listener) => listener.upgrade(),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Entry::Strong(_) => true,
            Entry::Weak(listener) => listener.strong_count() > 0,
        }
    }
}

pub(crate) struct EmitterShared<P, R> {
    listeners: Mutex<IndexMap<ListenerId, Entry<P, R>>>,
}

impl<P: 'static, R: 'static> Detach for EmitterShared<P, R> {
    fn detach(&self, id: ListenerId) -> bool {
        // The entry is dropped after the lock is released: a strong listener
        // may own a monitor whose drop detaches from other emitters.
        let removed = self.listeners.lock().shift_remove(&id);
        removed.is_some()
    }
}

/// A collection of listeners notified on demand.
///
/// Cloning an emitter yields another handle to the same listener list.
pub struct Emitter<P, R = ()> {
    shared: Arc<EmitterShared<P, R>>,
}

impl<P: 'static, R: 'static> Emitter<P, R> {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(EmitterShared {
                listeners: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// Register a closure. The returned subscription removes exactly this
    /// registration.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&P) -> R + Send + Sync + 'static,
    {
        let listener: Arc<dyn Listener<P, R>> = Arc::new(Callback(listener));
        let id = ListenerId::new();
        self.shared
            .listeners
            .lock()
            .insert(id, Entry::Strong(listener));
        Subscription::new(self.detach_handle(), id)
    }

    /// Register a listener without keeping it alive.
    ///
    /// Registering the same allocation twice returns the existing ID.
    pub(crate) fn subscribe_weak(&self, listener: Weak<dyn Listener<P, R>>) -> ListenerId {
        let mut listeners = self.shared.listeners.lock();
        let existing = listeners.iter().find_map(|(id, entry)| match entry {
            Entry::Weak(current) if Weak::ptr_eq(current, &listener) => Some(*id),
            _ => None,
        });
        if let Some(id) = existing {
            return id;
        }
        let id = ListenerId::new();
        listeners.insert(id, Entry::Weak(listener));
        id
    }

    /// Remove a listener by ID. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.detach(id)
    }

    /// Notify every listener registered at the time of the call, once each,
    /// in registration order.
    ///
    /// A panicking listener does not stop the others; its slot in the result
    /// holds [`ReactiveError::ListenerPanicked`].
    pub fn emit(&self, payload: &P) -> Vec<Result<R>> {
        let snapshot: SmallVec<[Arc<dyn Listener<P, R>>; 8]> = {
            let listeners = self.shared.listeners.lock();
            listeners.values().filter_map(Entry::upgrade).collect()
        };
        trace!(listeners = snapshot.len(), "emit");

        snapshot
            .into_iter()
            .map(|listener| {
                panic::catch_unwind(AssertUnwindSafe(|| listener.notify(payload))).map_err(
                    |payload| {
                        let message = panic_message(payload.as_ref());
                        error!(%message, "listener panicked during emit");
                        ReactiveError::ListenerPanicked(message)
                    },
                )
            })
            .collect()
    }

    /// Number of live listeners.
    pub fn len(&self) -> usize {
        self.shared
            .listeners
            .lock()
            .values()
            .filter(|entry| entry.is_live())
            .count()
    }

    /// True iff no live listener is subscribed.
    pub fn is_empty(&self) -> bool {
        !self
            .shared
            .listeners
            .lock()
            .values()
            .any(|entry| entry.is_live())
    }

    /// Drop entries whose weak listener has been freed. Returns how many
    /// were removed.
    pub fn prune(&self) -> usize {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|_, entry| entry.is_live());
        before - listeners.len()
    }

    /// Remove every listener.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.shared.listeners.lock());
        drop(removed);
    }

    /// A handle that does not keep the listener list alive.
    pub(crate) fn downgrade(&self) -> WeakEmitter {
        WeakEmitter {
            shared: self.detach_handle(),
        }
    }

    fn detach_handle(&self) -> Weak<dyn Detach> {
        let weak: Weak<EmitterShared<P, R>> = Arc::downgrade(&self.shared);
        weak
    }
}

impl<P: 'static, R: 'static> Default for Emitter<P, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, R> Clone for Emitter<P, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: 'static, R: 'static> fmt::Debug for Emitter<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Non-owning handle to an emitter, used by dependency edges.
#[derive(Clone)]
pub(crate) struct WeakEmitter {
    shared: Weak<dyn Detach>,
}

impl WeakEmitter {
    /// Remove a listener if the emitter is still alive.
    pub(crate) fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared
            .upgrade()
            .map(|shared| shared.detach(id))
            .unwrap_or(false)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
