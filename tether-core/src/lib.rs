//! Tether Core
//!
//! This crate provides a fine-grained reactive-state engine. It implements:
//!
//! - Source and derived signals with pluggable equality
//! - Monitors that record exactly which signals a computation read
//! - Emitters with snapshot-on-emit semantics and panic isolation
//! - A batching scheduler that delivers at most one notification per
//!   monitor per flush
//!
//! Dependency edges are weak, so a computation that nobody holds anymore is
//! freed without unsubscribing from every signal it ever read.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: signals, monitors, emitters, effects and the runtime
//! - `graph`: node identity, weak dependency edges and the scheduler
//! - `config`: runtime settings
//! - `error`: the error type shared by every fallible operation
//!
//! # Example
//!
//! ```rust
//! use tether_core::Runtime;
//!
//! let runtime = Runtime::new();
//!
//! // Create signals
//! let first = runtime.signal(String::from("Ada"));
//! let last = runtime.signal(String::from("Lovelace"));
//!
//! // Create a derived value
//! let (f, l) = (first.clone(), last.clone());
//! let full = runtime.derived(move |m| format!("{} {}", f.read(m), l.read(m)));
//!
//! // Read it through a monitor to track it
//! let monitor = runtime.monitor();
//! assert_eq!(monitor.run(|m| full.read(m)), "Ada Lovelace");
//!
//! // Writes in one batch reach the monitor once
//! runtime.batch(|| {
//!     first.write(String::from("Augusta")).unwrap();
//!     last.write(String::from("King")).unwrap();
//! });
//! assert!(monitor.is_stale());
//! assert_eq!(monitor.run(|m| full.read(m)), "Augusta King");
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{CompareError, ReactiveError, Result};
pub use graph::{FlushMode, FlushReport, NodeId, NodeKind};
pub use reactive::{
    Compare, Effect, Emitter, Identity, Listener, ListenerId, Monitor, MonitorFactory,
    MonitorState, Readable, ReadonlySignal, Runtime, Signal, SignalOptions, Subscription,
};
