//! Monitor Factory
//!
//! The bridge shape an external store integration needs: `connect` registers
//! a callback that fires when the current snapshot may be out of date, and
//! `create` hands out a fresh monitor to read the next snapshot through.
//!
//! Only the most recently created monitor is forwarded to the connected
//! callbacks. Creating a new one disconnects the previous one, which is then
//! freed as soon as the caller drops it.

use std::fmt;

use parking_lot::Mutex;
use tracing::trace;

use super::emitter::Emitter;
use super::monitor::{Delivery, Monitor};
use super::runtime::Runtime;
use super::subscriber::Subscription;

/// Creates monitors and fans their invalidation out to connected callbacks.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
/// use tether_core::Runtime;
///
/// let runtime = Runtime::new();
/// let name = runtime.signal("ada");
/// let factory = runtime.monitor_factory();
///
/// let renders = Arc::new(AtomicI32::new(0));
/// let r = renders.clone();
/// let _connection = factory.connect(move || {
///     r.fetch_add(1, Ordering::SeqCst);
/// });
///
/// let monitor = factory.create();
/// assert_eq!(monitor.run(|m| name.read(m)), "ada");
///
/// name.write("grace").unwrap();
/// runtime.flush().unwrap();
/// assert_eq!(renders.load(Ordering::SeqCst), 1);
/// ```
pub struct MonitorFactory {
    runtime: Runtime,
    emitter: Emitter<()>,
    current: Mutex<Option<(Monitor, Subscription)>>,
}

impl MonitorFactory {
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            emitter: Emitter::new(),
            current: Mutex::new(None),
        }
    }

    /// A fresh tracking context. Its invalidation is delivered to every
    /// connected callback once per flush.
    pub fn create(&self) -> Monitor {
        let monitor = Monitor::new(&self.runtime, Delivery::Scheduled);
        let emitter = self.emitter.clone();
        let forward = monitor.subscribe(move || {
            emitter.emit(&());
        });

        let previous = self.current.lock().replace((monitor.clone(), forward));
        if let Some((previous, _)) = &previous {
            trace!(previous = %previous.id(), next = %monitor.id(), "monitor replaced");
        }
        monitor
    }

    /// Register a callback for invalidation of the current monitor.
    pub fn connect<F>(&self, on_invalidate: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.emitter.subscribe(move |_| on_invalidate())
    }

    /// The most recently created monitor.
    pub fn current(&self) -> Option<Monitor> {
        self.current.lock().as_ref().map(|(monitor, _)| monitor.clone())
    }

    /// Number of connected callbacks.
    pub fn connection_count(&self) -> usize {
        self.emitter.len()
    }
}

impl fmt::Debug for MonitorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorFactory")
            .field("current", &self.current())
            .field("connection_count", &self.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn connect_and_disconnect() {
        let runtime = Runtime::new();
        let a = runtime.signal(0);
        let factory = runtime.monitor_factory();

        let hits = Arc::new(AtomicI32::new(0));
        let h = hits.clone();
        let connection = factory.connect(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(factory.connection_count(), 1);

        let monitor = factory.create();
        monitor.run(|m| a.read(m));
        a.write(1).unwrap();
        runtime.flush().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        connection.dispose();
        assert_eq!(factory.connection_count(), 0);

        monitor.run(|m| a.read(m));
        a.write(2).unwrap();
        runtime.flush().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn only_latest_monitor_is_forwarded() {
        let runtime = Runtime::new();
        let a = runtime.signal(0);
        let factory = runtime.monitor_factory();

        let hits = Arc::new(AtomicI32::new(0));
        let h = hits.clone();
        let _connection = factory.connect(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let first = factory.create();
        first.run(|m| a.read(m));
        let second = factory.create();
        second.run(|m| a.read(m));
        assert_eq!(factory.current(), Some(second.clone()));

        a.write(1).unwrap();
        runtime.flush().unwrap();

        assert!(first.is_stale());
        assert!(second.is_stale());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn snapshot_loop() {
        let runtime = Runtime::new();
        let a = runtime.signal(1);
        let factory = runtime.monitor_factory();
        let _connection = factory.connect(|| {});

        let snapshot = factory.create().run(|m| a.read(m));
        assert_eq!(snapshot, 1);

        a.write(2).unwrap();
        runtime.flush().unwrap();
        let monitor = factory.current().unwrap();
        assert!(monitor.is_stale());

        let snapshot = factory.create().run(|m| a.read(m));
        assert_eq!(snapshot, 2);
    }
}
