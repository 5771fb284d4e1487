//! Dependency Edges
//!
//! An edge records that a monitor read a signal. It is weak in both
//! directions: the signal's emitter holds a weak listener for the monitor,
//! and the monitor holds a weak handle back to the signal plus the version it
//! saw. Neither side keeps the other alive.
//!
//! The recorded versions form the monitor's fingerprint. A derived signal
//! whose monitor was invalidated re-settles every upstream and compares
//! versions; if none moved, the cached value is still valid.

use std::sync::Weak;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::node::NodeId;
use crate::error::Result;
use crate::reactive::{ListenerId, WeakEmitter};

/// A node that can be read through an edge.
pub(crate) trait Upstream: Send + Sync {
    /// Bring the node up to date and return its version.
    fn settled_version(&self) -> Result<u64>;
}

/// One dependency of a monitor.
pub(crate) struct Edge {
    upstream: Weak<dyn Upstream>,
    emitter: WeakEmitter,
    listener: ListenerId,
    version: u64,
}

impl Edge {
    pub(crate) fn new(
        upstream: Weak<dyn Upstream>,
        emitter: WeakEmitter,
        listener: ListenerId,
        version: u64,
    ) -> Self {
        Self {
            upstream,
            emitter,
            listener,
            version,
        }
    }

    fn detach(self) {
        self.emitter.unsubscribe(self.listener);
    }
}

/// Version snapshot of a monitor's dependencies.
pub(crate) type Fingerprint = SmallVec<[(Weak<dyn Upstream>, u64); 8]>;

/// The dependencies recorded during one run of a monitor, keyed by source.
#[derive(Default)]
pub(crate) struct EdgeSet {
    edges: IndexMap<NodeId, Edge>,
}

impl EdgeSet {
    pub(crate) fn contains(&self, source: NodeId) -> bool {
        self.edges.contains_key(&source)
    }

    pub(crate) fn insert(&mut self, source: NodeId, edge: Edge) {
        self.edges.insert(source, edge);
    }

    pub(crate) fn len(&self) -> usize {
        self.edges.len()
    }

    pub(crate) fn sources(&self) -> Vec<NodeId> {
        self.edges.keys().copied().collect()
    }

    /// Move the edges out, leaving this set empty.
    pub(crate) fn take(&mut self) -> EdgeSet {
        std::mem::take(self)
    }

    /// Unsubscribe from every upstream emitter.
    pub(crate) fn detach_all(&mut self) {
        for (_, edge) in self.edges.drain(..) {
            edge.detach();
        }
    }

    pub(crate) fn fingerprint(&self) -> Fingerprint {
        self.edges
            .values()
            .map(|edge| (edge.upstream.clone(), edge.version))
            .collect()
    }
}

/// True iff every upstream still exists and settles at the recorded version.
pub(crate) fn fingerprint_matches(fingerprint: &Fingerprint) -> Result<bool> {
    for (upstream, version) in fingerprint {
        let Some(upstream) = upstream.upgrade() else {
            return Ok(false);
        };
        if upstream.settled_version()? != *version {
            return Ok(false);
        }
    }
    Ok(true)
}
