//! Event bus for hub notifications.
//!
//! Components publish [`HubEvent`]s here; UI push, logging and tests
//! subscribe. Publishing never fails the publisher: with no subscribers the
//! event is simply dropped.

use crate::event::{EventMetadata, HubEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast fan-out of hub events.
///
/// Cloning is cheap and every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(HubEvent, EventMetadata)>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event from the `system` source.
    pub fn publish(&self, event: HubEvent) -> bool {
        self.publish_with_source(event, "system")
    }

    /// Publish an event with a custom source.
    ///
    /// Returns `true` if at least one subscriber received it.
    pub fn publish_with_source(&self, event: HubEvent, source: impl Into<String>) -> bool {
        let metadata = EventMetadata::new(source);
        let type_name = event.type_name();
        match self.tx.send((event, metadata)) {
            Ok(_) => true,
            Err(_) => {
                tracing::trace!(event = type_name, "No subscribers, event dropped");
                false
            }
        }
    }

    /// Subscribe to all events.
    ///
    /// If the subscriber falls behind, older events may be dropped.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events matching a filter.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&HubEvent) -> bool + Send + 'static,
    {
        FilteredReceiver::new(self.tx.subscribe(), filter)
    }

    /// Create a filtered subscription helper for common patterns.
    pub fn filter(&self) -> FilterBuilder {
        FilterBuilder {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(HubEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the bus is closed. Lagging skips the missed events.
    pub async fn recv(&mut self) -> Option<(HubEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(HubEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<HubEvent> {
        let mut events = Vec::new();
        while let Some((event, _)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Receiver for filtered events from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&HubEvent) -> bool + Send,
{
    rx: broadcast::Receiver<(HubEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&HubEvent) -> bool + Send,
{
    fn new(rx: broadcast::Receiver<(HubEvent, EventMetadata)>, filter: F) -> Self {
        Self { rx, filter }
    }

    /// Receive the next event matching the filter.
    pub async fn recv(&mut self) -> Option<(HubEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<(HubEvent, EventMetadata)> {
        while let Ok((event, meta)) = self.rx.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }
}

/// Builder for creating filtered subscriptions.
pub struct FilterBuilder {
    tx: broadcast::Sender<(HubEvent, EventMetadata)>,
}

impl FilterBuilder {
    /// Device status and command events.
    pub fn device_events(&self) -> FilteredReceiver<fn(&HubEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), HubEvent::is_device_event)
    }

    /// Activity lifecycle events.
    pub fn activity_events(&self) -> FilteredReceiver<fn(&HubEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), HubEvent::is_activity_event)
    }

    /// USB remote connect/disconnect events.
    pub fn remote_events(&self) -> FilteredReceiver<fn(&HubEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), HubEvent::is_remote_event)
    }

    /// Subscribe with a custom filter function.
    pub fn custom<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&HubEvent) -> bool + Send + 'static,
    {
        FilteredReceiver::new(self.tx.subscribe(), filter)
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_event(device_id: i64) -> HubEvent {
        HubEvent::DeviceStatusChanged {
            device_id,
            old_status: crate::LivenessStatus::Unknown,
            new_status: crate::LivenessStatus::On,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        assert!(bus.publish(status_event(1)));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.0.type_name(), "DeviceStatusChanged");
        assert_eq!(received.1.source, "system");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new();
        assert!(!bus.publish(status_event(1)));
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let bus = EventBus::new();
        let mut rx = bus.filter().activity_events();

        bus.publish(status_event(1));
        bus.publish(HubEvent::ActivityStarted {
            activity_id: 4,
            name: "Movie Night".to_string(),
            timestamp: 0,
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.0.type_name(), "ActivityStarted");
    }

    #[tokio::test]
    async fn test_custom_filter_try_recv() {
        let bus = EventBus::new();
        let mut rx = bus
            .filter()
            .custom(|event| event.device_id() == Some(2));

        bus.publish(status_event(1));
        assert!(rx.try_recv().is_none());

        bus.publish_with_source(status_event(2), "liveness");
        let (event, meta) = rx.try_recv().unwrap();
        assert_eq!(event.device_id(), Some(2));
        assert_eq!(meta.source, "liveness");
    }

    #[tokio::test]
    async fn test_drain() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(status_event(1));
        bus.publish(status_event(2));
        assert_eq!(rx.drain().len(), 2);
        assert!(rx.drain().is_empty());
    }
}
