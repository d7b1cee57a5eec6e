//! Typed pub/sub broker.
//!
//! Subscribers get a bounded mailbox; a slow subscriber that can't keep up
//! gets its oldest-undelivered events dropped rather than stalling every
//! other publisher. This mirrors the corpus's general pattern of wrapping
//! `tokio::sync::mpsc` with a small typed envelope instead of reaching for
//! a crate-provided event bus.

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::{Incident, Service, ServiceState};

/// Everything the broadcaster and other subscribers care about.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    ServiceCreated(Service),
    ServiceUpdated(Service),
    ServiceDeleted { service_id: String },
    /// Manual out-of-band check request; consumed by the scheduler's
    /// lifecycle subscriber, not broadcast to dashboard clients.
    Check { service_id: String },
    StateUpdated(ServiceState),
    IncidentOpened(Incident),
    IncidentResolved(Incident),
}

const DEFAULT_MAILBOX_SIZE: usize = 256;

struct Subscriber {
    sender: mpsc::Sender<TriggerEvent>,
}

/// Publishes `TriggerEvent`s to any number of subscribers. Cloning shares
/// the same subscriber table.
#[derive(Clone, Default)]
pub struct Broker {
    subscribers: std::sync::Arc<DashMap<u64, Subscriber>>,
    next_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

/// Handle returned by `subscribe`; dropping it does NOT unsubscribe —
/// callers that want to stop receiving must call `Broker::unsubscribe`
/// explicitly, since the mailbox itself, not this handle, owns the
/// registration.
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<TriggerEvent>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_capacity(DEFAULT_MAILBOX_SIZE)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Subscription {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(capacity);
        self.subscribers.insert(id, Subscriber { sender });
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Publish to every subscriber. Never blocks: a full mailbox drops the
    /// event for that one subscriber and logs a warning rather than
    /// applying backpressure to the caller.
    pub fn publish(&self, event: TriggerEvent) {
        for entry in self.subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = entry.sender.try_send(event.clone()) {
                warn!(subscriber_id = *entry.key(), "broker: dropping event for slow consumer");
                counter!("sentinel_broker_events_dropped_total").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Status;

    fn sample_state() -> ServiceState {
        ServiceState::unknown("svc-1".to_string())
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let broker = Broker::new();
        let mut sub = broker.subscribe();
        broker.publish(TriggerEvent::StateUpdated(sample_state()));
        let event = sub.receiver.recv().await.unwrap();
        assert!(matches!(event, TriggerEvent::StateUpdated(s) if s.status == Status::Unknown));
    }

    #[tokio::test]
    async fn unsubscribed_consumer_gets_nothing() {
        let broker = Broker::new();
        let sub = broker.subscribe();
        broker.unsubscribe(sub.id);
        assert_eq!(broker.subscriber_count(), 0);
        broker.publish(TriggerEvent::StateUpdated(sample_state()));
    }

    #[tokio::test]
    async fn full_mailbox_drops_rather_than_blocks() {
        let broker = Broker::new();
        let mut sub = broker.subscribe_with_capacity(1);
        broker.publish(TriggerEvent::StateUpdated(sample_state()));
        broker.publish(TriggerEvent::StateUpdated(sample_state()));
        // second publish was dropped for this subscriber; only one queued.
        assert!(sub.receiver.recv().await.is_some());
        assert!(sub.receiver.try_recv().is_err());
    }
}
