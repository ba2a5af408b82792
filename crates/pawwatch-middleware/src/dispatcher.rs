//! [`EventDispatcher`] – bounded event history plus fan-out to observers.
//!
//! Every event the supervisor produces goes through
//! [`EventDispatcher::record_and_broadcast`]: it is appended to a FIFO
//! history (oldest dropped once the capacity is reached), then handed to
//! every registered [`EventObserver`] in registration order.
//!
//! Observers are isolated from each other and from the caller. An observer
//! that returns an error or panics is logged and skipped; the remaining
//! observers still run and nothing is re-raised.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use pawwatch_types::{SupervisionEvent, WatchError};
use tracing::{debug, warn};

/// Default number of events kept in memory.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// A consumer of supervision events.
pub trait EventObserver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Any error is logged by the dispatcher and otherwise ignored.
    fn on_event(&self, event: &SupervisionEvent) -> Result<(), WatchError>;
}

/// Handle returned by [`EventDispatcher::register`]; pass it back to
/// [`EventDispatcher::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Outcome of one broadcast.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Observers that handled the event without error.
    pub delivered: usize,
    /// One entry per observer that failed or panicked.
    pub failures: Vec<WatchError>,
}

/// Bounded history and observer registry.
pub struct EventDispatcher {
    history: RwLock<VecDeque<SupervisionEvent>>,
    capacity: usize,
    observers: RwLock<Vec<(ObserverId, Arc<dyn EventObserver>)>>,
    next_id: AtomicU64,
    total_recorded: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl EventDispatcher {
    /// `capacity` is clamped to at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            total_recorded: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // ── Observers ────────────────────────────────────────────────────────────

    /// Add an observer at the end of the call order.
    pub fn register(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(observer = observer.name(), "registering event observer");
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, observer));
        id
    }

    /// Remove an observer. Returns `false` if the handle was unknown.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    // ── Recording ────────────────────────────────────────────────────────────

    /// Append `event` to the history, then notify every observer.
    pub fn record_and_broadcast(&self, event: SupervisionEvent) -> DispatchReport {
        {
            let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        self.total_recorded.fetch_add(1, Ordering::Relaxed);

        // Snapshot the list so observers may (un)register from inside a callback.
        let observers: Vec<Arc<dyn EventObserver>> = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        let mut report = DispatchReport::default();
        for observer in observers {
            let result = catch_unwind(AssertUnwindSafe(|| observer.on_event(&event)));
            let failure = match result {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(
                observer = observer.name(),
                event_id = %event.id,
                error = %failure,
                "event observer failed"
            );
            report.failures.push(WatchError::Observer {
                observer: observer.name().to_string(),
                details: failure,
            });
        }
        report
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Up to `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<SupervisionEvent> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Number of events currently held.
    pub fn len(&self) -> usize {
        self.history.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events recorded since creation, including ones evicted from history.
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded.load(Ordering::Relaxed)
    }

    /// Drop the in-memory history.
    pub fn clear(&self) {
        self.history.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pawwatch_types::SupervisionState;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn event(supervisees: u32) -> SupervisionEvent {
        SupervisionEvent {
            id: Uuid::new_v4(),
            state: SupervisionState::Unsupervised,
            previous_state: SupervisionState::Idle,
            timestamp: Utc::now(),
            supervisee_count: supervisees,
            supervisor_count: 0,
            unsupervised_duration: None,
            snapshot: None,
            detections: vec![],
        }
    }

    #[derive(Default)]
    struct Collecting {
        seen: Mutex<Vec<Uuid>>,
    }

    impl EventObserver for Collecting {
        fn name(&self) -> &str {
            "collecting"
        }
        fn on_event(&self, event: &SupervisionEvent) -> Result<(), WatchError> {
            self.seen.lock().unwrap().push(event.id);
            Ok(())
        }
    }

    struct Failing;

    impl EventObserver for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn on_event(&self, _: &SupervisionEvent) -> Result<(), WatchError> {
            Err(WatchError::Storage("disk full".into()))
        }
    }

    struct Panicking;

    impl EventObserver for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn on_event(&self, _: &SupervisionEvent) -> Result<(), WatchError> {
            panic!("observer blew up");
        }
    }

    #[test]
    fn history_is_bounded_and_keeps_newest_in_order() {
        let dispatcher = EventDispatcher::new(3);
        let events: Vec<_> = (1..=5).map(event).collect();
        for e in &events {
            dispatcher.record_and_broadcast(e.clone());
        }
        let kept: Vec<_> = dispatcher.recent(10).iter().map(|e| e.id).collect();
        let expected: Vec<_> = events[2..].iter().map(|e| e.id).collect();
        assert_eq!(kept, expected);
        assert_eq!(dispatcher.len(), 3);
        assert_eq!(dispatcher.total_recorded(), 5);
    }

    #[test]
    fn recent_returns_tail_in_chronological_order() {
        let dispatcher = EventDispatcher::default();
        for n in 1..=4 {
            dispatcher.record_and_broadcast(event(n));
        }
        let counts: Vec<_> = dispatcher
            .recent(2)
            .iter()
            .map(|e| e.supervisee_count)
            .collect();
        assert_eq!(counts, vec![3, 4]);
        assert!(dispatcher.recent(0).is_empty());
    }

    #[test]
    fn failing_observer_does_not_block_later_observers() {
        let dispatcher = EventDispatcher::default();
        let good = Arc::new(Collecting::default());
        dispatcher.register(Arc::new(Failing));
        dispatcher.register(Arc::new(Panicking));
        dispatcher.register(good.clone());

        let mut ids = vec![];
        for n in 0..3 {
            let e = event(n);
            ids.push(e.id);
            let report = dispatcher.record_and_broadcast(e);
            assert_eq!(report.delivered, 1);
            assert_eq!(report.failures.len(), 2);
        }
        assert_eq!(*good.seen.lock().unwrap(), ids);
        assert_eq!(dispatcher.len(), 3);
    }

    #[test]
    fn failures_name_the_observer() {
        let dispatcher = EventDispatcher::default();
        dispatcher.register(Arc::new(Panicking));
        let report = dispatcher.record_and_broadcast(event(1));
        match &report.failures[0] {
            WatchError::Observer { observer, details } => {
                assert_eq!(observer, "panicking");
                assert!(details.contains("observer blew up"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn observers_run_in_registration_order() {
        struct Ordered(&'static str, Arc<Mutex<Vec<&'static str>>>);
        impl EventObserver for Ordered {
            fn name(&self) -> &str {
                self.0
            }
            fn on_event(&self, _: &SupervisionEvent) -> Result<(), WatchError> {
                self.1.lock().unwrap().push(self.0);
                Ok(())
            }
        }

        let log = Arc::new(Mutex::new(vec![]));
        let dispatcher = EventDispatcher::default();
        for name in ["a", "b", "c"] {
            dispatcher.register(Arc::new(Ordered(name, log.clone())));
        }
        dispatcher.record_and_broadcast(event(1));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unregister_stops_delivery() {
        let dispatcher = EventDispatcher::default();
        let observer = Arc::new(Collecting::default());
        let id = dispatcher.register(observer.clone());
        dispatcher.record_and_broadcast(event(1));
        assert!(dispatcher.unregister(id));
        assert!(!dispatcher.unregister(id));
        dispatcher.record_and_broadcast(event(2));
        assert_eq!(observer.seen.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.observer_count(), 0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let dispatcher = EventDispatcher::new(0);
        dispatcher.record_and_broadcast(event(1));
        dispatcher.record_and_broadcast(event(2));
        assert_eq!(dispatcher.capacity(), 1);
        assert_eq!(dispatcher.recent(5)[0].supervisee_count, 2);
    }
}
