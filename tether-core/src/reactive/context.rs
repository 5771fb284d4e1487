//! Tracking Context
//!
//! The tracking context records which monitor is currently running. A signal
//! read registers a dependency only when the monitor it was read through is
//! the active one.
//!
//! # Implementation
//!
//! Each runtime keeps a stack of frames per thread. Running a monitor pushes its ID;
//! an untracked scope pushes an empty frame, which hides every monitor below
//! it. Frames are popped by a guard, so the stack stays balanced when a
//! computation panics.
//!
//! Nested computations (a derived signal recomputed while another monitor is
//! running) push their own frame and therefore track independently. Two
//! threads running monitors on one runtime never see each other's frames.

use std::collections::HashMap;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::graph::NodeId;

/// The per-runtime tracking frames, one stack per thread.
#[derive(Default)]
pub(crate) struct TrackingStack {
    frames: Mutex<HashMap<ThreadId, Vec<Option<NodeId>>>>,
}

impl TrackingStack {
    /// Make `monitor` the active tracking context until the guard drops.
    pub(crate) fn enter(&self, monitor: NodeId) -> TrackingScope<'_> {
        self.push(Some(monitor))
    }

    /// Suspend tracking until the guard drops.
    pub(crate) fn suspend(&self) -> TrackingScope<'_> {
        self.push(None)
    }

    fn push(&self, frame: Option<NodeId>) -> TrackingScope<'_> {
        let thread = thread::current().id();
        self.frames.lock().entry(thread).or_default().push(frame);
        TrackingScope {
            stack: self,
            thread,
            frame,
        }
    }

    /// The monitor currently tracking reads on this thread, if any.
    pub(crate) fn active(&self) -> Option<NodeId> {
        let thread = thread::current().id();
        self.frames
            .lock()
            .get(&thread)
            .and_then(|frames| frames.last().copied())
            .flatten()
    }

    /// Whether `monitor` is the active tracking context.
    pub(crate) fn is_active(&self, monitor: NodeId) -> bool {
        self.active() == Some(monitor)
    }

    /// Whether a tracked computation is running on this thread, even if
    /// suspended by an untracked scope.
    pub(crate) fn in_computation(&self) -> bool {
        let thread = thread::current().id();
        self.frames
            .lock()
            .get(&thread)
            .is_some_and(|frames| frames.iter().any(Option::is_some))
    }
}

/// Guard that pops its frame when dropped.
pub(crate) struct TrackingScope<'a> {
    stack: &'a TrackingStack,
    thread: ThreadId,
    frame: Option<NodeId>,
}

impl Drop for TrackingScope<'_> {
    fn drop(&mut self) {
        let popped = {
            let mut frames = self.stack.frames.lock();
            let popped = frames.get_mut(&self.thread).and_then(Vec::pop);
            if frames.get(&self.thread).is_some_and(Vec::is_empty) {
                frames.remove(&self.thread);
            }
            popped
        };

        // Scopes are strictly nested; a mismatch means a guard escaped.
        debug_assert_eq!(
            popped,
            Some(self.frame),
            "tracking scope mismatch: expected {:?}, got {:?}",
            self.frame,
            popped
        );
    }
}
