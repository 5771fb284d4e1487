//! Signal Implementation
//!
//! A Signal is the addressable unit of state. It holds a value and an
//! emitter whose listeners are the monitors that read it.
//!
//! # How Signals Work
//!
//! 1. Reading a signal through an active monitor registers a weak edge from
//!    the signal's emitter to that monitor.
//!
//! 2. Writing a source signal compares the new value with the old one. An
//!    equal value is dropped. A different value is stored immediately, the
//!    version is bumped, and a notification is enqueued on the scheduler.
//!
//! 3. When the scheduler flushes, the emitter notifies every monitor that
//!    read the signal during its last run.
//!
//! # Variants
//!
//! Source and derived signals share one node type with a tagged `kind`.
//! [`Signal`] is the writable handle to a source; [`ReadonlySignal`] can read
//! either kind and has no `write` at all.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::compare::{Compare, Identity};
use super::derived::Derived;
use super::emitter::Emitter;
use super::monitor::Monitor;
use super::runtime::Runtime;
use super::subscriber::Subscription;
use crate::error::{ReactiveError, Result};
use crate::graph::{NodeId, NodeKind, Upstream};

/// Construction options for a signal.
pub struct SignalOptions<T> {
    compare: Compare<T>,
    label: Option<Arc<str>>,
}

impl<T: Identity + 'static> SignalOptions<T> {
    /// Options with the default identity comparator.
    pub fn new() -> Self {
        Self::with_compare(Compare::identity())
    }
}

impl<T: Identity + 'static> Default for SignalOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> SignalOptions<T> {
    /// Options with a custom comparator.
    pub fn with_compare(compare: Compare<T>) -> Self {
        Self {
            compare,
            label: None,
        }
    }

    /// Replace the comparator.
    pub fn compare(mut self, compare: Compare<T>) -> Self {
        self.compare = compare;
        self
    }

    /// Name the signal in log output.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(Arc::from(label.into()));
        self
    }
}

impl<T> fmt::Debug for SignalOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalOptions")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

pub(super) enum SignalKind<T> {
    Source(Mutex<T>),
    Derived(Derived<T>),
}

pub(crate) struct SignalNode<T> {
    pub(super) id: NodeId,
    pub(super) runtime: Runtime,
    pub(super) label: Option<Arc<str>>,
    pub(super) compare: Compare<T>,
    pub(super) emitter: Emitter<()>,
    pub(super) version: AtomicU64,
    pub(super) disposed: AtomicBool,
    pub(super) kind: SignalKind<T>,
}

impl<T> SignalNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn source(runtime: &Runtime, value: T, options: SignalOptions<T>) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::new(),
            runtime: runtime.clone(),
            label: options.label,
            compare: options.compare,
            emitter: Emitter::new(),
            version: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            kind: SignalKind::Source(Mutex::new(value)),
        })
    }

    fn derived<F>(runtime: &Runtime, compute: F, options: SignalOptions<T>) -> Arc<Self>
    where
        F: Fn(&Monitor) -> T + Send + Sync + 'static,
    {
        Arc::new_cyclic(|node: &Weak<Self>| Self {
            id: NodeId::new(),
            runtime: runtime.clone(),
            label: options.label,
            compare: options.compare,
            emitter: Emitter::new(),
            version: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            kind: SignalKind::Derived(Derived::new(runtime, node.clone(), Box::new(compute))),
        })
    }

    fn kind(&self) -> NodeKind {
        match self.kind {
            SignalKind::Source(_) => NodeKind::Source,
            SignalKind::Derived(_) => NodeKind::Derived,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ReactiveError::SignalDisposed(self.id));
        }
        Ok(())
    }

    /// Current value, recomputing a derived value if it is out of date.
    fn current(&self) -> Result<T> {
        self.ensure_live()?;
        match &self.kind {
            SignalKind::Source(value) => Ok(value.lock().clone()),
            SignalKind::Derived(derived) => {
                self.refresh(derived)?;
                derived
                    .cached()
                    .ok_or(ReactiveError::SignalDisposed(self.id))
            }
        }
    }

    fn try_read(self: &Arc<Self>, monitor: &Monitor) -> Result<T> {
        if monitor.is_disposed() {
            return Err(ReactiveError::MonitorDisposed(monitor.id()));
        }
        let value = self.current()?;
        if monitor.is_active() {
            let upstream: Weak<dyn Upstream> = Arc::downgrade(self) as Weak<dyn Upstream>;
            monitor.track(
                self.id,
                upstream,
                &self.emitter,
                self.version.load(Ordering::Acquire),
            );
        }
        Ok(value)
    }

    fn write(self: &Arc<Self>, value: T) -> Result<bool> {
        self.ensure_live()?;
        let SignalKind::Source(slot) = &self.kind else {
            return Err(ReactiveError::ReadOnly(self.id));
        };

        let current = slot.lock().clone();
        if self.compare.equals(&current, &value)? {
            trace!(node = %self.id, label = ?self.label, "write skipped, value unchanged");
            return Ok(false);
        }

        *slot.lock() = value;
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        self.runtime.bump_epoch();
        trace!(node = %self.id, label = ?self.label, version, "signal written");

        let node = Arc::downgrade(self);
        self.runtime.enqueue(
            self.id,
            Box::new(move || {
                if let Some(node) = node.upgrade() {
                    node.emitter.emit(&());
                }
            }),
        );
        self.runtime.settle();
        Ok(true)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.emitter.clear();
        if let SignalKind::Derived(derived) = &self.kind {
            derived.dispose();
        }
        debug!(node = %self.id, label = ?self.label, "signal disposed");
    }
}

impl<T> Upstream for SignalNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn settled_version(&self) -> Result<u64> {
        self.ensure_live()?;
        if let SignalKind::Derived(derived) = &self.kind {
            self.refresh(derived)?;
        }
        Ok(self.version.load(Ordering::Acquire))
    }
}

/// Anything that can be read through a monitor.
pub trait Readable<T> {
    /// Read the value, recording a dependency if `monitor` is active.
    fn read(&self, monitor: &Monitor) -> T;

    /// Read the value without recording a dependency.
    fn read_untracked(&self) -> T;
}

/// A writable source signal.
///
/// Cloning yields another handle to the same signal.
///
/// # Example
///
/// ```rust
/// use tether_core::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.signal(0);
///
/// count.write(5).unwrap();
/// assert_eq!(count.read_untracked(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    node: Arc<SignalNode<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a source signal compared by identity.
    pub fn new(runtime: &Runtime, value: T) -> Self
    where
        T: Identity,
    {
        Self::with_options(runtime, value, SignalOptions::new())
    }

    /// Create a source signal with a custom comparator.
    pub fn with_compare(runtime: &Runtime, value: T, compare: Compare<T>) -> Self {
        Self::with_options(runtime, value, SignalOptions::with_compare(compare))
    }

    pub fn with_options(runtime: &Runtime, value: T, options: SignalOptions<T>) -> Self {
        Self {
            node: SignalNode::source(runtime, value, options),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }

    pub fn label(&self) -> Option<&str> {
        self.node.label.as_deref()
    }

    /// Number of applied changes.
    pub fn version(&self) -> u64 {
        self.node.version.load(Ordering::Acquire)
    }

    /// Get the current value.
    ///
    /// If `monitor` is the active tracking context, this also registers it
    /// as a dependent.
    ///
    /// # Panics
    ///
    /// Panics if the signal or the monitor has been disposed.
    pub fn read(&self, monitor: &Monitor) -> T {
        self.try_read(monitor).unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn try_read(&self, monitor: &Monitor) -> Result<T> {
        self.node.try_read(monitor)
    }

    /// Get the current value without tracking dependencies.
    ///
    /// # Panics
    ///
    /// Panics if the signal has been disposed.
    pub fn read_untracked(&self) -> T {
        self.try_read_untracked()
            .unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn try_read_untracked(&self) -> Result<T> {
        self.node.current()
    }

    /// Set a new value.
    ///
    /// Returns `Ok(false)` without notifying anyone if the comparator reports
    /// the value as unchanged; the stored value is then left as it was. A
    /// failing comparator leaves the value untouched and returns its error.
    pub fn write(&self, value: T) -> Result<bool> {
        self.node.write(value)
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.node.current()?;
        self.node.write(f(&current))
    }

    /// A read-only view of this signal.
    pub fn readonly(&self) -> ReadonlySignal<T> {
        ReadonlySignal {
            node: Arc::clone(&self.node),
        }
    }

    /// Call `f` after each flush in which this signal changed.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.node.emitter.subscribe(move |_| f())
    }

    /// Number of live monitors that read this signal in their last run.
    pub fn dependent_count(&self) -> usize {
        self.node.emitter.len()
    }

    /// Drop dependents that have been freed. Returns how many were removed.
    pub fn collect_garbage(&self) -> usize {
        self.node.emitter.prune()
    }

    pub fn dispose(&self) {
        self.node.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.node.disposed.load(Ordering::Acquire)
    }
}

impl<T> Readable<T> for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn read(&self, monitor: &Monitor) -> T {
        Signal::read(self, monitor)
    }

    fn read_untracked(&self) -> T {
        Signal::read_untracked(self)
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T> fmt::Debug for Signal<T>
where
    T: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Signal");
        debug.field("id", &self.node.id).field("label", &self.node.label);
        if let SignalKind::Source(value) = &self.node.kind {
            debug.field("value", &*value.lock());
        }
        debug
            .field("version", &self.version())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

/// A read-only signal: a derived value, or a view of a source.
pub struct ReadonlySignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    node: Arc<SignalNode<T>>,
}

impl<T> ReadonlySignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a derived signal compared by identity. Nothing is computed
    /// until the first read.
    pub fn derived<F>(runtime: &Runtime, compute: F) -> Self
    where
        T: Identity,
        F: Fn(&Monitor) -> T + Send + Sync + 'static,
    {
        Self::derived_with_options(runtime, compute, SignalOptions::new())
    }

    pub fn derived_with_options<F>(runtime: &Runtime, compute: F, options: SignalOptions<T>) -> Self
    where
        F: Fn(&Monitor) -> T + Send + Sync + 'static,
    {
        Self {
            node: SignalNode::derived(runtime, compute, options),
        }
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }

    pub fn label(&self) -> Option<&str> {
        self.node.label.as_deref()
    }

    /// Number of applied changes. For a derived signal this counts
    /// recomputes that produced a different value.
    pub fn version(&self) -> u64 {
        self.node.version.load(Ordering::Acquire)
    }

    /// Get the current value, recomputing it first if a dependency changed.
    ///
    /// # Panics
    ///
    /// Panics if the signal or the monitor has been disposed, or if the
    /// signal is read while computing itself.
    pub fn read(&self, monitor: &Monitor) -> T {
        self.try_read(monitor).unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn try_read(&self, monitor: &Monitor) -> Result<T> {
        self.node.try_read(monitor)
    }

    pub fn read_untracked(&self) -> T {
        self.try_read_untracked()
            .unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn try_read_untracked(&self) -> Result<T> {
        self.node.current()
    }

    /// Call `f` after each flush in which this signal was invalidated.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.node.emitter.subscribe(move |_| f())
    }

    pub fn dependent_count(&self) -> usize {
        self.node.emitter.len()
    }

    pub fn collect_garbage(&self) -> usize {
        self.node.emitter.prune()
    }

    pub fn dispose(&self) {
        self.node.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.node.disposed.load(Ordering::Acquire)
    }
}

impl<T> Readable<T> for ReadonlySignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn read(&self, monitor: &Monitor) -> T {
        ReadonlySignal::read(self, monitor)
    }

    fn read_untracked(&self) -> T {
        ReadonlySignal::read_untracked(self)
    }
}

impl<T> Clone for ReadonlySignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T> From<Signal<T>> for ReadonlySignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(signal: Signal<T>) -> Self {
        Self { node: signal.node }
    }
}

impl<T> fmt::Debug for ReadonlySignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadonlySignal")
            .field("id", &self.node.id)
            .field("kind", &self.node.kind())
            .field("label", &self.node.label)
            .field("version", &self.version())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompareError;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn signal_read_and_write() {
        let runtime = Runtime::new();
        let signal = runtime.signal(0);
        assert_eq!(signal.read_untracked(), 0);

        assert!(signal.write(42).unwrap());
        assert_eq!(signal.read_untracked(), 42);
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let runtime = Runtime::new();
        let signal = runtime.signal(5);

        assert!(!signal.write(5).unwrap());
        assert_eq!(signal.version(), 0);
        assert!(!runtime.has_pending());
    }

    #[test]
    fn signal_update() {
        let runtime = Runtime::new();
        let signal = runtime.signal(10);
        signal.update(|v| v + 5).unwrap();
        assert_eq!(signal.read_untracked(), 15);
    }

    #[test]
    fn failing_comparator_keeps_previous_value() {
        let runtime = Runtime::new();
        let signal = runtime.signal_with(
            1,
            Compare::fallible(|_, _| Err(CompareError::new("no opinion"))),
        );

        let err = signal.write(2).unwrap_err();
        assert!(matches!(err, ReactiveError::Compare(_)));
        assert_eq!(signal.read_untracked(), 1);
        assert_eq!(signal.version(), 0);
        assert!(!runtime.has_pending());
    }

    #[test]
    fn write_notifies_subscribers_on_flush() {
        let runtime = Runtime::new();
        let signal = runtime.signal(0);
        let call_count = Arc::new(AtomicI32::new(0));
        let c = call_count.clone();
        let _sub = signal.subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        signal.write(1).unwrap();
        signal.write(2).unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        runtime.flush().unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn signal_clone_shares_state() {
        let runtime = Runtime::new();
        let signal1 = runtime.signal(0);
        let signal2 = signal1.clone();

        signal1.write(42).unwrap();
        assert_eq!(signal2.read_untracked(), 42);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn readonly_view_follows_source() {
        let runtime = Runtime::new();
        let signal = runtime.signal(1);
        let view = signal.readonly();

        signal.write(2).unwrap();
        assert_eq!(view.read_untracked(), 2);
        assert_eq!(view.kind(), NodeKind::Source);
    }

    #[test]
    fn disposed_signal_rejects_access() {
        let runtime = Runtime::new();
        let signal = runtime.signal(1);
        let monitor = runtime.monitor();
        signal.dispose();

        assert!(signal.is_disposed());
        assert!(matches!(
            signal.write(2),
            Err(ReactiveError::SignalDisposed(_))
        ));
        assert!(matches!(
            signal.try_read(&monitor),
            Err(ReactiveError::SignalDisposed(_))
        ));
    }

    #[test]
    #[should_panic(expected = "has been disposed")]
    fn reading_disposed_signal_panics() {
        let runtime = Runtime::new();
        let signal = runtime.signal(1);
        signal.dispose();
        signal.read_untracked();
    }

    #[test]
    fn read_through_disposed_monitor_is_misuse() {
        let runtime = Runtime::new();
        let signal = runtime.signal(1);
        let monitor = runtime.monitor();
        monitor.dispose();

        assert!(matches!(
            signal.try_read(&monitor),
            Err(ReactiveError::MonitorDisposed(_))
        ));
    }

    #[test]
    fn derived_node_rejects_writes() {
        let runtime = Runtime::new();
        let node = SignalNode::derived(&runtime, |_| 1, SignalOptions::new());

        assert!(matches!(node.write(2), Err(ReactiveError::ReadOnly(id)) if id == node.id));
        assert_eq!(node.current().unwrap(), 1);
    }

    #[test]
    fn labels_are_kept() {
        let runtime = Runtime::new();
        let signal = runtime.signal_with_options(0, SignalOptions::new().label("count"));
        assert_eq!(signal.label(), Some("count"));
    }
}
