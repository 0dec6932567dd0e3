//! Event Bus
//!
//! Topic based fan-out. Every subscriber owns a bounded backlog and publish
//! hands each one its copy with `try_send`, so a subscriber that stops
//! reading never delays publishing to the others. When a backlog is full
//! the message is dropped for that subscriber only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Topic carrying build state changes
pub const EVENTS_TOPIC: &str = "topic/events";

/// Default number of undelivered messages kept per subscriber
pub const DEFAULT_BACKLOG: usize = 256;

/// A published payload with the labels subscribers filter on
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub labels: HashMap<String, String>,
    pub data: Vec<u8>,
}

impl Message {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

type Filter = Box<dyn Fn(&Message) -> bool + Send + Sync>;

struct Subscriber {
    filter: Filter,
    sink: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

type Topic = HashMap<u64, Arc<Subscriber>>;

pub struct Publisher {
    topics: RwLock<HashMap<String, Topic>>,
    next_id: AtomicU64,
    backlog: usize,
}

impl Publisher {
    pub fn new(backlog: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            backlog: backlog.max(1),
        }
    }

    /// Deliver `message` to every live subscriber of `topic` whose filter
    /// accepts it. Returns how many subscribers took a copy.
    pub fn publish(&self, topic: &str, message: Message) -> usize {
        let subscribers: Vec<(u64, Arc<Subscriber>)> = {
            let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
            match topics.get(topic) {
                Some(subs) => subs.iter().map(|(id, s)| (*id, s.clone())).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, sub) in subscribers {
            if sub.cancel.is_cancelled() {
                gone.push(id);
                continue;
            }
            if !(sub.filter)(&message) {
                continue;
            }
            match sub.sink.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(topic, subscriber = id, "Subscriber backlog full, dropping message");
                }
                Err(TrySendError::Closed(_)) => gone.push(id),
            }
        }

        if !gone.is_empty() {
            let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(subs) = topics.get_mut(topic) {
                for id in gone {
                    subs.remove(&id);
                }
            }
        }

        delivered
    }

    /// Register a subscription on `topic` that lives until `cancel` fires or
    /// the returned handle is dropped.
    pub fn subscribe<F>(
        self: &Arc<Self>,
        topic: &str,
        filter: F,
        cancel: CancellationToken,
    ) -> Subscription
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sink, rx) = mpsc::channel(self.backlog);
        let subscriber = Arc::new(Subscriber {
            filter: Box::new(filter),
            sink,
            cancel: cancel.clone(),
        });

        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .insert(id, subscriber);

        tracing::debug!(topic, subscriber = id, "Subscribed");

        Subscription {
            id,
            topic: topic.to_string(),
            rx,
            cancel,
            publisher: Arc::clone(self),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, HashMap::len)
    }

    fn unsubscribe(&self, topic: &str, id: u64) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(subs) = topics.get_mut(topic) {
            subs.remove(&id);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG)
    }
}

/// Receiving end of a subscription
///
/// Dropping it removes the subscriber from the bus.
pub struct Subscription {
    id: u64,
    topic: String,
    rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    publisher: Arc<Publisher>,
}

impl Subscription {
    /// Next message, or `None` once the subscription is cancelled.
    ///
    /// Cancellation wins over buffered messages: nothing is returned after
    /// the token has fired.
    pub async fn recv(&mut self) -> Option<Message> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            msg = self.rx.recv() => msg,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.publisher.unsubscribe(&self.topic, self.id);
        tracing::debug!(topic = %self.topic, subscriber = self.id, "Unsubscribed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn message(repo: &str, n: u8) -> Message {
        Message {
            labels: HashMap::from([("repo".to_string(), repo.to_string())]),
            data: vec![n],
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = Publisher::default();
        assert_eq!(bus.publish(EVENTS_TOPIC, message("a/b", 1)), 0);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_does_not_block_others() {
        let bus = Arc::new(Publisher::new(2));
        let cancel = CancellationToken::new();
        let _stalled = bus.subscribe(EVENTS_TOPIC, |_| true, cancel.clone());
        let mut reader = bus.subscribe(EVENTS_TOPIC, |_| true, cancel.clone());

        let mut received = Vec::new();
        for n in 0..5 {
            bus.publish(EVENTS_TOPIC, message("a/b", n));
            received.push(reader.recv().await.unwrap().data[0]);
        }

        assert_eq!(received, [0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_messages_arrive_in_publish_order() {
        let bus = Arc::new(Publisher::default());
        let mut sub = bus.subscribe(EVENTS_TOPIC, |_| true, CancellationToken::new());

        for n in 0..10 {
            bus.publish(EVENTS_TOPIC, message("a/b", n));
        }

        for n in 0..10 {
            assert_eq!(sub.recv().await.unwrap().data, vec![n]);
        }
    }

    #[tokio::test]
    async fn test_filter_is_applied_per_subscriber() {
        let bus = Arc::new(Publisher::default());
        let cancel = CancellationToken::new();
        let mut mine = bus.subscribe(
            EVENTS_TOPIC,
            |m| m.label("repo") == Some("octocat/hello"),
            cancel.clone(),
        );

        assert_eq!(bus.publish(EVENTS_TOPIC, message("other/repo", 1)), 0);
        assert_eq!(bus.publish(EVENTS_TOPIC, message("octocat/hello", 2)), 1);

        assert_eq!(mine.recv().await.unwrap().data, vec![2]);
    }

    #[tokio::test]
    async fn test_nothing_is_received_after_cancel() {
        let bus = Arc::new(Publisher::default());
        let cancel = CancellationToken::new();
        let mut sub = bus.subscribe(EVENTS_TOPIC, |_| true, cancel.clone());

        bus.publish(EVENTS_TOPIC, message("a/b", 1));
        cancel.cancel();

        assert!(sub.recv().await.is_none());
        assert_eq!(bus.publish(EVENTS_TOPIC, message("a/b", 2)), 0);
        assert_eq!(bus.subscriber_count(EVENTS_TOPIC), 0);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = Arc::new(Publisher::default());
        let sub = bus.subscribe(EVENTS_TOPIC, |_| true, CancellationToken::new());
        assert_eq!(bus.subscriber_count(EVENTS_TOPIC), 1);

        drop(sub);

        assert_eq!(bus.subscriber_count(EVENTS_TOPIC), 0);
    }

    #[tokio::test]
    async fn test_cancel_races_publish() {
        let bus = Arc::new(Publisher::new(4));
        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                for n in 0..2_000u32 {
                    bus.publish(EVENTS_TOPIC, message("a/b", (n % 255) as u8));
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..50 {
            let cancel = CancellationToken::new();
            let mut sub = bus.subscribe(EVENTS_TOPIC, |_| true, cancel.clone());
            let _ = tokio::time::timeout(Duration::from_millis(1), sub.recv()).await;
            cancel.cancel();
            assert!(sub.recv().await.is_none());
        }

        publisher.await.unwrap();
    }
}
