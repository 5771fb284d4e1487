//! Dependency Graph
//!
//! This module holds the graph-level machinery shared by signals and
//! monitors.
//!
//! # Overview
//!
//! - Nodes are signals (sources and derived values) and monitors.
//! - Edges point from a monitor to the signals it read during its last run.
//!   They are weak: a monitor that nobody holds anymore is freed, and its
//!   edges are detached when it drops.
//! - The scheduler batches notifications so that any number of writes in one
//!   synchronous block reach each affected monitor once.
//!
//! # Design Decisions
//!
//! 1. Edges are rebuilt from scratch on every run of a monitor, so a
//!    dependency that is no longer read can never notify it.
//!
//! 2. Each edge remembers the upstream version it saw. Pull-based validation
//!    compares versions instead of recomputing speculatively.
//!
//! 3. The scheduler queue is keyed by node, which makes coalescing a map
//!    insert.

mod edge;
mod node;
mod scheduler;

pub(crate) use edge::{fingerprint_matches, Edge, EdgeSet, Fingerprint, Upstream};
pub use node::{NodeId, NodeKind};
pub use scheduler::{FlushMode, FlushReport};
pub(crate) use scheduler::{Job, ScheduleHook, Scheduler};
