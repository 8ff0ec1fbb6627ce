//! Configuration for the anti-fraud service

use message_bus::{ConsumerGroup, NatsConfig, PublisherConfig, SubscriberConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::decision::ThresholdRule;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// NATS connection
    pub nats: NatsConfig,

    /// Consumer settings
    pub consumer: ConsumerConfig,

    /// Publisher settings
    pub publisher: PublishConfig,

    /// Decision rule
    pub rule: RuleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nats: NatsConfig::default(),
            consumer: ConsumerConfig::default(),
            publisher: PublishConfig::default(),
            rule: RuleConfig::default(),
        }
    }
}

/// Consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Consumer group
    pub group: String,

    /// Deliveries before a transient failure is dead-lettered
    pub max_deliver: u32,

    /// First redelivery delay (milliseconds)
    pub initial_backoff_ms: u64,

    /// Max redelivery delay (milliseconds)
    pub max_backoff_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: ConsumerGroup::ANTI_FRAUD.to_string(),
            max_deliver: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
        }
    }
}

/// Publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Attempts per publish
    pub max_retry_attempts: u32,

    /// First retry delay (milliseconds)
    pub initial_retry_delay_ms: u64,

    /// Max retry delay (milliseconds)
    pub max_retry_delay_ms: u64,

    /// Timeout per attempt (milliseconds)
    pub publish_timeout_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 2_000,
            publish_timeout_ms: 5_000,
        }
    }
}

/// Decision rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Highest approved value
    pub max_allowed: Decimal,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            max_allowed: ThresholdRule::DEFAULT_MAX_ALLOWED,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse TOML; missing sections fall back to defaults
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    /// Load from `ANTI_FRAUD_CONFIG` (if set) and environment overrides
    pub fn from_env() -> crate::Result<Self> {
        let mut config = match std::env::var("ANTI_FRAUD_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Config::default(),
        };

        if let Ok(url) = std::env::var("NATS_URL") {
            config.nats.url = url;
        }

        if let Ok(raw) = std::env::var("ANTI_FRAUD_MAX_ALLOWED") {
            config.rule.max_allowed = Decimal::from_str(&raw).map_err(|e| {
                crate::Error::InvalidConfig(format!("ANTI_FRAUD_MAX_ALLOWED: {}", e))
            })?;
        }

        if let Ok(raw) = std::env::var("ANTI_FRAUD_MAX_DELIVER") {
            config.consumer.max_deliver = raw.parse().map_err(|e| {
                crate::Error::InvalidConfig(format!("ANTI_FRAUD_MAX_DELIVER: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the service relies on
    pub fn validate(&self) -> crate::Result<()> {
        if self.nats.url.is_empty() {
            return Err(crate::Error::InvalidConfig("NATS URL is required".into()));
        }
        if self.consumer.max_deliver == 0 {
            return Err(crate::Error::InvalidConfig(
                "consumer.max_deliver must be at least 1".into(),
            ));
        }
        ThresholdRule::new(self.rule.max_allowed)?;
        Ok(())
    }

    /// Subscriber settings
    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            consumer_group: self.consumer.group.clone(),
            max_deliver: self.consumer.max_deliver,
            initial_backoff: Duration::from_millis(self.consumer.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.consumer.max_backoff_ms),
        }
    }

    /// Publisher settings
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            publish_timeout: Duration::from_millis(self.publisher.publish_timeout_ms),
            max_retry_attempts: self.publisher.max_retry_attempts,
            initial_retry_delay: Duration::from_millis(self.publisher.initial_retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.publisher.max_retry_delay_ms),
        }
    }
}
