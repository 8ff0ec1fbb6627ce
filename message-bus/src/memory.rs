//! In-process message bus
//!
//! Same delivery semantics as the JetStream backend, without a broker:
//! - one append-only log per topic, split into hash partitions
//! - one cursor per (group, partition); every group sees every message
//! - a partition holds at most one in-flight delivery per group, so retries
//!   never let a later message for the same key overtake an earlier one
//! - a delivery dropped without a decision is redelivered

use crate::bus::{Acker, Delivery, MessageBus, Subscription};
use crate::partitioning::{HashPartitioning, PartitioningStrategy};
use crate::types::Topic;
use crate::{Error, Message, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct Cursor {
    offset: usize,
    in_flight: bool,
    attempts: u32,
    ready_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct GroupState {
    cursors: Vec<Cursor>,
    next_partition: usize,
}

#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Vec<Message>>,
    groups: HashMap<String, GroupState>,
}

impl TopicLog {
    fn new(num_partitions: u32) -> Self {
        Self {
            partitions: (0..num_partitions).map(|_| Vec::new()).collect(),
            groups: HashMap::new(),
        }
    }

    fn group(&mut self, group: &str) -> &mut GroupState {
        let n = self.partitions.len();
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState {
                cursors: (0..n).map(|_| Cursor::default()).collect(),
                next_partition: 0,
            })
    }
}

enum Poll {
    Ready {
        message: Message,
        attempt: u32,
        partition: usize,
        offset: usize,
    },
    Wait(Option<Instant>),
}

enum Settle {
    Commit,
    Retry(Duration),
}

struct Shared {
    partitioning: HashPartitioning,
    topics: Mutex<HashMap<Topic, TopicLog>>,
    notify: Notify,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn with_topic<R>(&self, topic: Topic, f: impl FnOnce(&mut TopicLog) -> R) -> R {
        let mut topics = self.topics.lock();
        let log = topics
            .entry(topic)
            .or_insert_with(|| TopicLog::new(self.partitioning.num_partitions()));
        f(log)
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn poll(&self, topic: Topic, group: &str) -> Poll {
        let now = Instant::now();
        self.with_topic(topic, |log| {
            let n = log.partitions.len();
            log.group(group);
            let TopicLog { partitions, groups } = log;
            let Some(state) = groups.get_mut(group) else {
                return Poll::Wait(None);
            };

            let mut earliest: Option<Instant> = None;
            for i in 0..n {
                let p = (state.next_partition + i) % n;
                let cursor = &mut state.cursors[p];
                if cursor.in_flight || cursor.offset >= partitions[p].len() {
                    continue;
                }
                if let Some(ready_at) = cursor.ready_at {
                    if ready_at > now {
                        earliest = Some(earliest.map_or(ready_at, |e| e.min(ready_at)));
                        continue;
                    }
                }

                cursor.in_flight = true;
                cursor.attempts += 1;
                cursor.ready_at = None;
                let message = partitions[p][cursor.offset].clone();
                let (attempt, offset) = (cursor.attempts, cursor.offset);
                state.next_partition = (p + 1) % n;

                return Poll::Ready {
                    message,
                    attempt,
                    partition: p,
                    offset,
                };
            }

            Poll::Wait(earliest)
        })
    }

    fn settle(&self, topic: Topic, group: &str, partition: usize, offset: usize, outcome: Settle) {
        self.with_topic(topic, |log| {
            let cursor = &mut log.group(group).cursors[partition];
            if cursor.offset != offset {
                return;
            }
            cursor.in_flight = false;
            match outcome {
                Settle::Commit => {
                    cursor.offset += 1;
                    cursor.attempts = 0;
                    cursor.ready_at = None;
                }
                Settle::Retry(delay) => {
                    cursor.ready_at = Some(Instant::now() + delay);
                }
            }
        });
        self.notify.notify_waiters();
    }
}

/// In-memory message bus
#[derive(Clone)]
pub struct InMemoryBus {
    shared: Arc<Shared>,
}

impl InMemoryBus {
    /// Create new bus with the given partition count per topic
    pub fn new(num_partitions: u32) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                partitioning: HashPartitioning::new(num_partitions),
                topics: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                closed,
            }),
        }
    }

    /// Every message ever published on `topic`, partition by partition
    pub fn messages(&self, topic: Topic) -> Vec<Message> {
        self.shared
            .with_topic(topic, |log| log.partitions.iter().flatten().cloned().collect())
    }

    /// Messages on `topic` not yet committed by `group`
    pub fn lag(&self, topic: Topic, group: &str) -> usize {
        self.shared.with_topic(topic, |log| {
            let lengths: Vec<usize> = log.partitions.iter().map(Vec::len).collect();
            log.group(group)
                .cursors
                .iter()
                .zip(lengths)
                .map(|(cursor, len)| len.saturating_sub(cursor.offset))
                .sum()
        })
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, message: Message) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::Closed);
        }

        let partition = self.shared.partitioning.partition(&message.key) as usize;
        debug!(
            message_id = %message.id,
            topic = %message.topic,
            key = %message.key,
            partition,
            "Message appended"
        );
        self.shared
            .with_topic(message.topic, |log| log.partitions[partition].push(message));
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topic: Topic, group: &str) -> Result<Box<dyn Subscription>> {
        if self.shared.is_closed() {
            return Err(Error::Closed);
        }

        self.shared.with_topic(topic, |log| {
            log.group(group);
        });

        Ok(Box::new(MemorySubscription {
            shared: self.shared.clone(),
            topic,
            group: group.to_string(),
            closed: self.shared.closed.subscribe(),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shared.closed.send_replace(true);
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    topic: Topic,
    group: String,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Result<Delivery>> {
        loop {
            let closed = *self.closed.borrow();
            if closed {
                return None;
            }

            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.shared.poll(self.topic, &self.group) {
                Poll::Ready {
                    message,
                    attempt,
                    partition,
                    offset,
                } => {
                    let acker = MemoryAcker {
                        shared: self.shared.clone(),
                        topic: self.topic,
                        group: self.group.clone(),
                        partition,
                        offset,
                        settled: false,
                    };
                    return Some(Ok(Delivery::new(message, attempt, Box::new(acker))));
                }
                Poll::Wait(deadline) => {
                    let retry_due = async move {
                        match deadline {
                            Some(deadline) => tokio::time::sleep_until(deadline).await,
                            None => std::future::pending::<()>().await,
                        }
                    };

                    tokio::select! {
                        _ = &mut notified => {}
                        _ = retry_due => {}
                        changed = self.closed.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                    }
                }
            }
        }
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    topic: Topic,
    group: String,
    partition: usize,
    offset: usize,
    settled: bool,
}

impl MemoryAcker {
    fn settle(&mut self, outcome: Settle) {
        if !self.settled {
            self.settled = true;
            self.shared
                .settle(self.topic, &self.group, self.partition, self.offset, outcome);
        }
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(mut self: Box<Self>) -> Result<()> {
        self.settle(Settle::Commit);
        Ok(())
    }

    async fn nak(mut self: Box<Self>, delay: Duration) -> Result<()> {
        self.settle(Settle::Retry(delay));
        Ok(())
    }

    async fn term(mut self: Box<Self>) -> Result<()> {
        self.settle(Settle::Commit);
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        // Crash between processing and commit: redeliver
        self.settle(Settle::Retry(Duration::ZERO));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PartitionKey;
    use tokio::time::timeout;

    fn msg(key: &str, body: &str) -> Message {
        Message::new(
            Topic::TransactionCreated,
            PartitionKey::new(key),
            body.as_bytes().to_vec(),
        )
    }

    async fn next(sub: &mut Box<dyn Subscription>) -> Delivery {
        timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("delivery timed out")
            .expect("subscription closed")
            .expect("delivery failed")
    }

    #[tokio::test]
    async fn test_publish_and_ack() {
        let bus = InMemoryBus::new(4);
        let mut sub = bus.subscribe(Topic::TransactionCreated, "g").await.unwrap();
        bus.publish(msg("a", "1")).await.unwrap();

        let delivery = next(&mut sub).await;
        assert_eq!(delivery.attempt, 1);
        assert_eq!(delivery.message.payload, b"1");
        delivery.ack().await.unwrap();

        assert_eq!(bus.lag(Topic::TransactionCreated, "g"), 0);
    }

    #[tokio::test]
    async fn test_each_group_receives_every_message() {
        let bus = InMemoryBus::new(4);
        let mut fraud = bus.subscribe(Topic::TransactionCreated, "fraud").await.unwrap();
        let mut audit = bus.subscribe(Topic::TransactionCreated, "audit").await.unwrap();
        bus.publish(msg("a", "1")).await.unwrap();

        let d1 = next(&mut fraud).await;
        let d2 = next(&mut audit).await;
        assert_eq!(d1.message.id, d2.message.id);
        d1.ack().await.unwrap();
        d2.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_group_members_share_work() {
        let bus = InMemoryBus::new(1);
        let mut first = bus.subscribe(Topic::TransactionCreated, "g").await.unwrap();
        let mut second = bus.subscribe(Topic::TransactionCreated, "g").await.unwrap();
        bus.publish(msg("a", "1")).await.unwrap();
        bus.publish(msg("a", "2")).await.unwrap();

        let d1 = next(&mut first).await;
        // Same partition, first message still in flight
        assert!(timeout(Duration::from_millis(50), second.next()).await.is_err());
        d1.ack().await.unwrap();

        let d2 = next(&mut second).await;
        assert_eq!(d2.message.payload, b"2");
        d2.ack().await.unwrap();
        assert_eq!(bus.lag(Topic::TransactionCreated, "g"), 0);
    }

    #[tokio::test]
    async fn test_nak_redelivers_in_order() {
        let bus = InMemoryBus::new(1);
        let mut sub = bus.subscribe(Topic::TransactionCreated, "g").await.unwrap();
        bus.publish(msg("a", "1")).await.unwrap();
        bus.publish(msg("a", "2")).await.unwrap();

        let first = next(&mut sub).await;
        first.nak(Duration::from_millis(10)).await.unwrap();

        let retried = next(&mut sub).await;
        assert_eq!(retried.message.payload, b"1");
        assert_eq!(retried.attempt, 2);
        retried.ack().await.unwrap();

        let second = next(&mut sub).await;
        assert_eq!(second.message.payload, b"2");
        assert_eq!(second.attempt, 1);
        second.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_delivery_is_redelivered() {
        let bus = InMemoryBus::new(2);
        let mut sub = bus.subscribe(Topic::TransactionCreated, "g").await.unwrap();
        bus.publish(msg("a", "1")).await.unwrap();

        drop(next(&mut sub).await);

        let again = next(&mut sub).await;
        assert_eq!(again.attempt, 2);
        again.term().await.unwrap();
        assert_eq!(bus.lag(Topic::TransactionCreated, "g"), 0);
    }

    #[tokio::test]
    async fn test_late_group_reads_from_start() {
        let bus = InMemoryBus::new(2);
        bus.publish(msg("a", "1")).await.unwrap();

        let mut sub = bus.subscribe(Topic::TransactionCreated, "late").await.unwrap();
        let delivery = next(&mut sub).await;
        assert_eq!(delivery.message.payload, b"1");
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscriptions() {
        let bus = InMemoryBus::new(2);
        let mut sub = bus.subscribe(Topic::TransactionCreated, "g").await.unwrap();

        let waiter = tokio::spawn(async move { sub.next().await.is_none() });
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.shutdown().await.unwrap();

        assert!(timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap());
        assert!(matches!(bus.publish(msg("a", "1")).await, Err(Error::Closed)));
    }
}
