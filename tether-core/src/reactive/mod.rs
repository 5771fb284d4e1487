//! Reactive Primitives
//!
//! This module implements the dependency-tracking engine: signals, monitors
//! and emitters, plus the derived values, effects and factories built on
//! them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for state. Reading it through an active
//! [`Monitor`] registers that monitor as a dependent. Writing a different
//! value notifies every dependent on the next flush.
//!
//! ## Derived Signals
//!
//! A derived signal caches the result of a computation over other signals.
//! It is lazy: it recomputes on read, and only if a dependency actually
//! changed.
//!
//! ## Monitors
//!
//! A Monitor is a read-tracking context. [`Monitor::run`] records exactly the
//! signals a computation read; the monitor goes stale when one of them
//! changes and stays stale until it runs again.
//!
//! ## Emitters
//!
//! An [`Emitter`] is a listener list with snapshot-on-emit semantics and
//! per-listener panic isolation. Signals and monitors each own one.
//!
//! # Implementation Notes
//!
//! Tracking state lives in the [`Runtime`], not in thread-local storage, so
//! independent runtimes can coexist in one process. Dependency edges are
//! weak in both directions: a monitor nobody holds is freed and detaches
//! itself from every signal it read.

mod compare;
mod context;
mod derived;
mod effect;
mod emitter;
mod factory;
mod monitor;
mod runtime;
mod signal;
mod subscriber;

pub use compare::{Compare, Identity};
pub use effect::Effect;
pub use emitter::Emitter;
pub(crate) use emitter::WeakEmitter;
pub use factory::MonitorFactory;
pub use monitor::{Monitor, MonitorState};
pub use runtime::Runtime;
pub use signal::{Readable, ReadonlySignal, Signal, SignalOptions};
pub use subscriber::{Listener, ListenerId, Subscription};
