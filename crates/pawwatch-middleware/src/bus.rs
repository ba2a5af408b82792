//! Topic-based publish/subscribe bus for supervision events.
//!
//! Uses [`tokio::sync::broadcast`] channels so every subscriber receives
//! every message without any single subscriber blocking the others. A
//! subscriber that falls behind observes `Lagged` instead of stalling the
//! publisher.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Events`] | Every recorded event, in record order |
//! | [`Topic::Alerts`] | Alert-class events only; the action coordinator listens here |
//!
//! [`BusObserver`] bridges the synchronous [`EventDispatcher`] fan-out onto
//! the bus.
//!
//! [`EventDispatcher`]: crate::dispatcher::EventDispatcher

use std::sync::Arc;

use pawwatch_types::{SupervisionEvent, WatchError};
use tokio::sync::broadcast;

use crate::dispatcher::EventObserver;

/// Default channel capacity (events buffered before slow subscribers lag).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every event.
    Events,
    /// Alerts only.
    Alerts,
}

/// Shared event bus. Clones share the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    events: broadcast::Sender<Arc<SupervisionEvent>>,
    alerts: broadcast::Sender<Arc<SupervisionEvent>>,
}

impl EventBus {
    /// `capacity` applies to each topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (alerts, _) = broadcast::channel(capacity.max(1));
        Self { events, alerts }
    }

    /// Publish to one topic.
    ///
    /// Returns the number of receivers handed the event, or
    /// [`WatchError::Channel`] when nobody is subscribed.
    pub fn publish_to(
        &self,
        topic: Topic,
        event: Arc<SupervisionEvent>,
    ) -> Result<usize, WatchError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| WatchError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Publish to [`Topic::Events`], and to [`Topic::Alerts`] as well when
    /// the event is an alert.
    ///
    /// Missing subscribers are not an error here; the return value is the
    /// total number of deliveries.
    pub fn publish(&self, event: Arc<SupervisionEvent>) -> usize {
        let mut delivered = self.publish_to(Topic::Events, Arc::clone(&event)).unwrap_or(0);
        if event.is_alert() {
            delivered += self.publish_to(Topic::Alerts, event).unwrap_or(0);
        }
        delivered
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Arc<SupervisionEvent>> {
        match topic {
            Topic::Events => &self.events,
            Topic::Alerts => &self.alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Arc<SupervisionEvent>>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// * `Err(RecvError::Lagged(n))` – `n` events were dropped for this
    ///   subscriber; the caller decides whether to continue.
    /// * `Err(RecvError::Closed)` – every bus handle is gone.
    pub async fn recv(&mut self) -> Result<Arc<SupervisionEvent>, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

// ---------------------------------------------------------------------------
// Dispatcher bridge
// ---------------------------------------------------------------------------

/// Forwards dispatched events onto an [`EventBus`].
#[derive(Debug, Clone)]
pub struct BusObserver {
    bus: EventBus,
}

impl BusObserver {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl EventObserver for BusObserver {
    fn name(&self) -> &str {
        "bus"
    }

    fn on_event(&self, event: &SupervisionEvent) -> Result<(), WatchError> {
        self.bus.publish(Arc::new(event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pawwatch_types::SupervisionState;
    use std::time::Duration;
    use uuid::Uuid;

    fn make_event(state: SupervisionState) -> Arc<SupervisionEvent> {
        Arc::new(SupervisionEvent {
            id: Uuid::new_v4(),
            state,
            previous_state: SupervisionState::Idle,
            timestamp: Utc::now(),
            supervisee_count: 1,
            supervisor_count: 0,
            unsupervised_duration: None,
            snapshot: None,
            detections: vec![],
        })
    }

    #[test]
    fn publish_to_without_subscribers_is_channel_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::Events, make_event(SupervisionState::Idle));
        assert!(matches!(result, Err(WatchError::Channel(_))));
        // The combined publish treats that as zero deliveries.
        assert_eq!(bus.publish(make_event(SupervisionState::Alert)), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut first = bus.subscribe_to(Topic::Events);
        let mut second = bus.subscribe_to(Topic::Events);

        let event = make_event(SupervisionState::Supervised);
        bus.publish_to(Topic::Events, event.clone())?;

        assert_eq!(first.recv().await?.id, event.id);
        assert_eq!(second.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn only_alerts_reach_alert_topic() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut all = bus.subscribe_to(Topic::Events);
        let mut alerts = bus.subscribe_to(Topic::Alerts);

        let change = make_event(SupervisionState::Unsupervised);
        let alert = make_event(SupervisionState::Alert);
        assert_eq!(bus.publish(change.clone()), 1);
        assert_eq!(bus.publish(alert.clone()), 2);

        assert_eq!(all.recv().await?.id, change.id);
        assert_eq!(all.recv().await?.id, alert.id);
        assert_eq!(alerts.recv().await?.id, alert.id);

        let nothing = tokio::time::timeout(Duration::from_millis(50), alerts.recv()).await;
        assert!(nothing.is_err(), "state changes must not reach the alert topic");
        assert_eq!(alerts.topic(), Topic::Alerts);
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let bus = EventBus::new(8);
        let mut slow = bus.subscribe_to(Topic::Events);
        for _ in 0..100 {
            let _ = bus.publish_to(Topic::Events, make_event(SupervisionState::Idle));
        }
        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }

    #[tokio::test]
    async fn bus_observer_forwards_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Alerts);
        let observer = BusObserver::new(bus.clone());

        let event = make_event(SupervisionState::Alert);
        observer.on_event(&event)?;
        assert_eq!(rx.recv().await?.id, event.id);

        // No subscribers on Events: still Ok.
        drop(rx);
        assert!(observer.on_event(&event).is_ok());
        assert_eq!(bus.subscriber_count(Topic::Alerts), 0);
        Ok(())
    }
}
