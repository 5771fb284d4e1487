//! Graph Nodes
//!
//! Every signal and monitor is a node in the dependency graph. Nodes are
//! identified by a process-unique [`NodeId`], which doubles as the key used by
//! the scheduler to coalesce repeated notifications within a batch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A writable signal. Roots of the graph: dependents only.
    Source,

    /// A read-only signal computed from other signals. It owns a monitor for
    /// its own computation and has dependents of its own.
    Derived,

    /// A read-tracking context. Leaves of the graph: dependencies only.
    Monitor,
}

impl NodeKind {
    /// Whether nodes of this kind can be read as signals.
    pub fn is_signal(&self) -> bool {
        matches!(self, NodeKind::Source | NodeKind::Derived)
    }
}
