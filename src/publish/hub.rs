//! In-process topic hub with a retained backlog per topic.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use super::Publisher;
use crate::error::TransportError;

/// Default broadcast channel capacity per topic.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// A published payload and its position in the topic. Sequence numbers
/// start at 1 and only grow while the topic exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub seq: u64,
    pub payload: String,
}

struct Topic {
    tx: broadcast::Sender<Envelope>,
    /// Payloads no subscriber has acknowledged yet, oldest first.
    pending: VecDeque<Envelope>,
    next_seq: u64,
}

impl Topic {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            tx,
            pending: VecDeque::new(),
            next_seq: 1,
        }
    }

    fn envelope(&mut self, payload: String) -> Envelope {
        let seq = self.next_seq;
        self.next_seq += 1;
        Envelope { seq, payload }
    }

    fn is_idle(&self) -> bool {
        self.tx.receiver_count() == 0 && self.pending.is_empty()
    }
}

/// A subscription: a snapshot of the unacknowledged backlog, then live
/// payloads. Hand it back with [`PublishHub::close`] when done.
pub struct Subscription {
    pub topic: String,
    pub backlog: Vec<Envelope>,
    pub live: broadcast::Receiver<Envelope>,
}

/// Topic-keyed fan-out to WebSocket subscribers.
///
/// Every payload stays retained (up to `backlog_capacity`, oldest dropped
/// first) until a subscriber acknowledges it with [`PublishHub::ack`] after
/// a successful send. A subscriber that dies before acknowledging leaves the
/// payload for the next one, so delivery is at-least-once.
pub struct PublishHub {
    topics: RwLock<HashMap<String, Topic>>,
    backlog_capacity: usize,
}

impl PublishHub {
    pub fn new(backlog_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            topics: RwLock::new(HashMap::new()),
            backlog_capacity,
        })
    }

    /// Subscribe to a topic. The backlog is copied, not drained.
    pub async fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.write().await;
        let entry = topics.entry(topic.to_string()).or_insert_with(Topic::new);
        let live = entry.tx.subscribe();
        let backlog: Vec<Envelope> = entry.pending.iter().cloned().collect();
        if !backlog.is_empty() {
            debug!(topic, replayed = backlog.len(), "Replaying retained payloads");
        }
        Subscription {
            topic: topic.to_string(),
            backlog,
            live,
        }
    }

    /// Mark every payload up to and including `seq` as delivered.
    pub async fn ack(&self, topic: &str, seq: u64) {
        let mut topics = self.topics.write().await;
        let Some(entry) = topics.get_mut(topic) else {
            return;
        };
        while entry.pending.front().is_some_and(|e| e.seq <= seq) {
            entry.pending.pop_front();
        }
    }

    /// Unacknowledged payloads newer than `seq`. Used to recover after a
    /// subscriber lags behind the live channel.
    pub async fn pending_after(&self, topic: &str, seq: u64) -> Vec<Envelope> {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|t| t.pending.iter().filter(|e| e.seq > seq).cloned().collect())
            .unwrap_or_default()
    }

    /// End a subscription. The topic is forgotten once it has neither
    /// subscribers nor retained payloads.
    pub async fn close(&self, subscription: Subscription) {
        let Subscription { topic, live, .. } = subscription;
        drop(live);

        let mut topics = self.topics.write().await;
        if topics.get(&topic).is_some_and(Topic::is_idle) {
            topics.remove(&topic);
            debug!(topic = %topic, "Topic removed");
        }
    }

    /// Number of payloads currently retained for a topic.
    pub async fn retained(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|t| t.pending.len())
            .unwrap_or(0)
    }

    /// Number of topics currently tracked.
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

#[async_trait]
impl Publisher for PublishHub {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError> {
        let mut topics = self.topics.write().await;
        let entry = topics.entry(topic.to_string()).or_insert_with(Topic::new);
        let envelope = entry.envelope(payload);
        let receivers = entry.tx.send(envelope.clone()).unwrap_or(0);

        if self.backlog_capacity == 0 {
            if receivers == 0 {
                topics.remove(topic);
                return Err(TransportError::Publish {
                    topic: topic.to_string(),
                    reason: "no subscribers and retention disabled".to_string(),
                });
            }
            debug!(topic, receivers, seq = envelope.seq, "Published payload");
            return Ok(());
        }

        if entry.pending.len() >= self.backlog_capacity {
            entry.pending.pop_front();
            warn!(topic, "Topic backlog full, dropped oldest payload");
        }
        let seq = envelope.seq;
        entry.pending.push_back(envelope);

        if receivers == 0 {
            info!(topic, retained = entry.pending.len(), "No subscribers, payload retained");
        } else {
            debug!(topic, receivers, seq, "Published payload");
        }
        Ok(())
    }
}
