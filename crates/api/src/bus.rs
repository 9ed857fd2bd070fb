//! In-process topic-addressed publish/subscribe.
//!
//! Topics are strings; each queue gets four classes:
//!
//! - `queue:Q`: every connection on the queue
//! - `queue:Q:admin`: course admins only
//! - `queue:Q:nonpriv`: everyone who is not an admin (anonymized events)
//! - `queue:Q:email:<e>`: the connections of one specific user
//!
//! A subscription covers a whole topic set and owns one bounded channel, so
//! events from all of a connection's topics arrive merged and in publish
//! order. Publishing never blocks: a subscriber whose channel is full is
//! dropped on the spot and its connection reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use ohq_domain::{Envelope, Tid};
use tokio::sync::mpsc;

/// Per-subscriber channel capacity.
const SUBSCRIBER_BUFFER: usize = 5;

pub fn generic_topic(queue: Tid) -> String {
    format!("queue:{queue}")
}

pub fn admin_topic(queue: Tid) -> String {
    format!("queue:{queue}:admin")
}

pub fn nonpriv_topic(queue: Tid) -> String {
    format!("queue:{queue}:nonpriv")
}

pub fn email_topic(queue: Tid, email: &str) -> String {
    format!("queue:{queue}:email:{email}")
}

struct Subscriber {
    topics: Vec<String>,
    tx: mpsc::Sender<Envelope>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: DashMap<u64, Subscriber>,
    topics: DashMap<String, Vec<u64>>,
}

/// The process-wide event bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a set of topics atomically. Events published to any of
    /// them land on the returned channel in publish order.
    pub fn subscribe(&self, topics: Vec<String>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        for topic in &topics {
            self.inner.topics.entry(topic.clone()).or_default().push(id);
        }
        self.inner.subscribers.insert(id, Subscriber { topics, tx });
        Subscription {
            id,
            rx,
            bus: self.clone(),
        }
    }

    /// Deliver an event to every subscriber of `topic`. Subscribers that
    /// cannot keep up are disconnected rather than slowing anyone down.
    pub fn publish(&self, topic: &str, event: &Envelope) {
        let ids: Vec<u64> = match self.inner.topics.get(topic) {
            Some(ids) => ids.clone(),
            None => return,
        };
        let mut dead = Vec::new();
        for id in ids {
            let Some(subscriber) = self.inner.subscribers.get(&id) else {
                continue;
            };
            if subscriber.tx.try_send(event.clone()).is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            tracing::debug!(subscriber = id, topic, "dropping slow subscriber");
            self.remove(id);
        }
    }

    /// Publish a batch in order. Used by the mutation service after commit.
    pub fn publish_all(&self, events: Vec<(String, Envelope)>) {
        for (topic, event) in events {
            self.publish(&topic, &event);
        }
    }

    fn remove(&self, id: u64) {
        let Some((_, subscriber)) = self.inner.subscribers.remove(&id) else {
            return;
        };
        for topic in subscriber.topics {
            if let Some(mut ids) = self.inner.topics.get_mut(&topic) {
                ids.retain(|x| *x != id);
            }
            self.inner.topics.remove_if(&topic, |_, ids| ids.is_empty());
        }
        // Dropping the subscriber closes its channel; the connection's writer
        // task observes the closure and tears the connection down.
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

/// A live subscription. Dropping it unsubscribes from every topic.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Envelope>,
    bus: EventBus,
}

impl Subscription {
    /// Next event, or `None` once the bus has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ohq_domain::EventKind;

    fn event(n: i32) -> Envelope {
        Envelope::new(EventKind::EntryUpdate, n)
    }

    #[tokio::test]
    async fn delivers_only_to_matching_topics() {
        let bus = EventBus::new();
        let queue = Tid::new();
        let mut admin = bus.subscribe(vec![generic_topic(queue), admin_topic(queue)]);
        let mut student = bus.subscribe(vec![generic_topic(queue), nonpriv_topic(queue)]);

        bus.publish(&admin_topic(queue), &event(1));
        bus.publish(&generic_topic(queue), &event(2));

        assert_eq!(admin.recv().await.unwrap().d, 1);
        assert_eq!(admin.recv().await.unwrap().d, 2);
        assert_eq!(student.recv().await.unwrap().d, 2);
    }

    #[tokio::test]
    async fn merged_channel_preserves_publish_order() {
        let bus = EventBus::new();
        let queue = Tid::new();
        let mut sub = bus.subscribe(vec![generic_topic(queue), admin_topic(queue)]);

        bus.publish(&generic_topic(queue), &event(1));
        bus.publish(&admin_topic(queue), &event(2));
        bus.publish(&generic_topic(queue), &event(3));

        for expected in 1..=3 {
            assert_eq!(sub.recv().await.unwrap().d, expected);
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_without_blocking_others() {
        let bus = EventBus::new();
        let queue = Tid::new();
        let mut slow = bus.subscribe(vec![generic_topic(queue)]);
        let mut healthy = bus.subscribe(vec![generic_topic(queue)]);

        // Fill both buffers, then drain only the healthy subscriber.
        for n in 0..SUBSCRIBER_BUFFER as i32 {
            bus.publish(&generic_topic(queue), &event(n));
        }
        assert_eq!(bus.subscriber_count(), 2);
        for n in 0..SUBSCRIBER_BUFFER as i32 {
            assert_eq!(healthy.recv().await.unwrap().d, n);
        }

        // The next publish overflows the slow subscriber only.
        bus.publish(&generic_topic(queue), &event(99));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(healthy.recv().await.unwrap().d, 99);

        // The slow one gets its buffered events, then the closed channel.
        for n in 0..SUBSCRIBER_BUFFER as i32 {
            assert_eq!(slow.recv().await.unwrap().d, n);
        }
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_a_subscription_unsubscribes() {
        let bus = EventBus::new();
        let queue = Tid::new();
        let sub = bus.subscribe(vec![generic_topic(queue), email_topic(queue, "a@x.edu")]);
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        // Publishing to a deserted topic is a no-op.
        bus.publish(&generic_topic(queue), &event(1));
    }
}
