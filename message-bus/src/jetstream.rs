//! JetStream provisioning and consumption
//!
//! - One stream per topic, subjects `<topic>.<partition>`
//! - Durable pull consumer per consumer group, explicit ack
//! - Deduplication on `Nats-Msg-Id` within the stream's duplicate window
//!
//! Redelivery is bounded by the subscriber (which dead-letters), not by the
//! consumer's `max_deliver`, so a message is never silently discarded by the broker.

use async_nats::jetstream::{
    consumer::{self, AckPolicy, DeliverPolicy, PullConsumer, ReplayPolicy},
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
    AckKind, Context as JetStreamContext,
};
use async_nats::HeaderMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use crate::bus::{Acker, Delivery, Subscription};
use crate::client::{NatsConfig, MSG_ID_HEADER, PARTITION_KEY_HEADER, TIMESTAMP_HEADER};
use crate::types::{PartitionKey, Topic};
use crate::{Error, Message, Result};

/// Create (or reuse) the stream for every topic
pub async fn ensure_streams(context: &JetStreamContext, config: &NatsConfig) -> Result<()> {
    info!("Initializing JetStream streams for {} topics", Topic::ALL.len());

    for topic in Topic::ALL {
        create_topic_stream(context, topic, config).await?;
    }

    Ok(())
}

async fn create_topic_stream(
    context: &JetStreamContext,
    topic: Topic,
    config: &NatsConfig,
) -> Result<()> {
    let stream_config = StreamConfig {
        name: topic.stream_name().to_string(),
        description: Some(format!("Saga topic {}", topic)),
        subjects: vec![topic.subject_filter()],
        retention: RetentionPolicy::Limits,
        max_age: Duration::from_secs(config.max_age_days * 24 * 3600),
        storage: StorageType::File,
        num_replicas: config.num_replicas,
        duplicate_window: Duration::from_secs(config.duplicate_window_secs),
        ..Default::default()
    };

    match context.get_or_create_stream(stream_config).await {
        Ok(_) => {
            info!("Stream {} ready", topic.stream_name());
            Ok(())
        }
        Err(e) => {
            error!("Failed to create stream {}: {}", topic.stream_name(), e);
            Err(Error::StreamCreation(e.to_string()))
        }
    }
}

/// Create (or join) the durable consumer of `group` on `topic`
pub async fn durable_consumer(
    context: &JetStreamContext,
    topic: Topic,
    group: &str,
    config: &NatsConfig,
) -> Result<PullConsumer> {
    let stream = context
        .get_stream(topic.stream_name())
        .await
        .map_err(|e| Error::JetStream(e.to_string()))?;

    let consumer_config = consumer::pull::Config {
        durable_name: Some(group.to_string()),
        description: Some(format!("Consumer group {} on {}", group, topic)),
        filter_subject: topic.subject_filter(),
        ack_policy: AckPolicy::Explicit,
        ack_wait: Duration::from_secs(config.ack_wait_secs),
        max_deliver: -1,
        max_ack_pending: config.max_ack_pending,
        deliver_policy: DeliverPolicy::All,
        replay_policy: ReplayPolicy::Instant,
        ..Default::default()
    };

    stream
        .get_or_create_consumer(group, consumer_config)
        .await
        .map_err(|e| Error::ConsumerCreation(e.to_string()))
}

/// Deliveries from a JetStream pull consumer
pub struct NatsSubscription {
    topic: Topic,
    messages: consumer::pull::Stream,
    closed: watch::Receiver<bool>,
}

impl NatsSubscription {
    pub(crate) fn new(
        topic: Topic,
        messages: consumer::pull::Stream,
        closed: watch::Receiver<bool>,
    ) -> Self {
        Self {
            topic,
            messages,
            closed,
        }
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Option<Result<Delivery>> {
        let closed = *self.closed.borrow();
        if closed {
            return None;
        }

        tokio::select! {
            item = self.messages.next() => match item {
                None => None,
                Some(Err(e)) => Some(Err(Error::Subscribe(e.to_string()))),
                Some(Ok(msg)) => Some(Ok(into_delivery(self.topic, msg))),
            },
            _ = self.closed.changed() => None,
        }
    }
}

const RESERVED_HEADERS: [&str; 3] = [MSG_ID_HEADER, PARTITION_KEY_HEADER, TIMESTAMP_HEADER];

/// NATS headers for `message`: its own headers plus the reserved envelope ones
pub(crate) fn outgoing_headers(message: &Message) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &message.headers {
        if !is_reserved(name) {
            headers.insert(name.as_str(), value.as_str());
        }
    }
    headers.insert(MSG_ID_HEADER, message.id.to_string().as_str());
    headers.insert(PARTITION_KEY_HEADER, message.key.as_str());
    headers.insert(TIMESTAMP_HEADER, message.timestamp.to_rfc3339().as_str());
    headers
}

/// Application headers carried by a delivered NATS message
pub(crate) fn incoming_headers(headers: Option<&HeaderMap>) -> HashMap<String, String> {
    headers
        .map(|headers| {
            headers
                .iter()
                .map(|(name, values)| (name.to_string(), values))
                .filter(|(name, _)| !is_reserved(name))
                .filter_map(|(name, values)| {
                    values
                        .last()
                        .map(|value| (name, value.as_str().to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn is_reserved(name: &str) -> bool {
    RESERVED_HEADERS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

fn into_delivery(topic: Topic, msg: async_nats::jetstream::Message) -> Delivery {
    let attempt = msg
        .info()
        .map(|info| info.delivered.max(1) as u32)
        .unwrap_or(1);

    let header = |name: &str| {
        msg.headers
            .as_ref()
            .and_then(|headers| headers.get(name))
            .map(|value| value.to_string())
    };

    let id = header(MSG_ID_HEADER)
        .and_then(|raw| Uuid::parse_str(&raw).ok())
        .unwrap_or_else(Uuid::now_v7);
    let key = PartitionKey::new(header(PARTITION_KEY_HEADER).unwrap_or_default());
    let timestamp = header(TIMESTAMP_HEADER)
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let message = Message {
        id,
        topic: Topic::from_subject(&msg.subject).unwrap_or(topic),
        key,
        payload: msg.payload.to_vec(),
        timestamp,
        headers: incoming_headers(msg.headers.as_ref()),
    };

    Delivery::new(message, attempt, Box::new(NatsAcker { message: msg }))
}

struct NatsAcker {
    message: async_nats::jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }

    async fn nak(self: Box<Self>, delay: Duration) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }

    async fn term(self: Box<Self>) -> Result<()> {
        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }
}
