use config::{ConfigError, Environment, File};
use message_bus::{ConsumerGroup, NatsConfig, PublisherConfig, SubscriberConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::outbox::RelayConfig;
use crate::service::SagaSettings;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub consumer: ConsumerConfig,
    pub publisher: PublishConfig,
    pub outbox: OutboxConfig,
    pub saga: SagaSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL URL, or `memory://` for an in-process store
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConsumerConfig {
    pub group: String,
    pub max_deliver: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PublishConfig {
    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub publish_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutboxConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("server.workers", 4)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("nats.url", "nats://localhost:4222")?
            .set_default("consumer.group", ConsumerGroup::TRANSACTION)?
            .set_default("consumer.max_deliver", 5)?
            .set_default("consumer.initial_backoff_ms", 200)?
            .set_default("consumer.max_backoff_ms", 10_000)?
            .set_default("publisher.max_retry_attempts", 3)?
            .set_default("publisher.initial_retry_delay_ms", 100)?
            .set_default("publisher.max_retry_delay_ms", 2_000)?
            .set_default("publisher.publish_timeout_ms", 5_000)?
            .set_default("outbox.poll_interval_ms", 1_000)?
            .set_default("outbox.batch_size", 100)?
            .set_default("saga.inline_publish", true)?
            .set_default("saga.verdict_policy", "last_write_wins")?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("TRANSACTION_SERVICE")
                .separator("__")
                .try_parsing(true),
        );

        // Special handling for common env vars
        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(nats_url) = env::var("NATS_URL") {
            builder = builder.set_override("nats.url", nats_url)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.nats.url.is_empty() {
            return Err("NATS URL is required".to_string());
        }

        if self.consumer.max_deliver == 0 {
            return Err("consumer.max_deliver must be at least 1".to_string());
        }

        if self.outbox.batch_size == 0 {
            return Err("outbox.batch_size must be at least 1".to_string());
        }

        Ok(())
    }

    /// Whether the in-process store was requested
    pub fn uses_memory_store(&self) -> bool {
        self.database.url.starts_with("memory://")
    }

    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            consumer_group: self.consumer.group.clone(),
            max_deliver: self.consumer.max_deliver,
            initial_backoff: Duration::from_millis(self.consumer.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.consumer.max_backoff_ms),
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            publish_timeout: Duration::from_millis(self.publisher.publish_timeout_ms),
            max_retry_attempts: self.publisher.max_retry_attempts,
            initial_retry_delay: Duration::from_millis(self.publisher.initial_retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.publisher.max_retry_delay_ms),
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_millis(self.outbox.poll_interval_ms),
            batch_size: self.outbox.batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VerdictPolicy;

    fn config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 3000,
                workers: 1,
            },
            database: DatabaseConfig {
                url: "memory://".into(),
                max_connections: 1,
            },
            nats: NatsConfig::default(),
            consumer: ConsumerConfig {
                group: ConsumerGroup::TRANSACTION.into(),
                max_deliver: 5,
                initial_backoff_ms: 200,
                max_backoff_ms: 10_000,
            },
            publisher: PublishConfig {
                max_retry_attempts: 3,
                initial_retry_delay_ms: 100,
                max_retry_delay_ms: 2_000,
                publish_timeout_ms: 5_000,
            },
            outbox: OutboxConfig {
                poll_interval_ms: 1_000,
                batch_size: 100,
            },
            saga: SagaSettings::default(),
        }
    }

    #[test]
    fn test_validate() {
        let mut config = config();
        assert!(config.validate().is_ok());
        assert!(config.uses_memory_store());

        config.database.url.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_settings() {
        let config = config();
        assert_eq!(config.subscriber_config().consumer_group, "transaction-consumer-group");
        assert_eq!(config.relay_config().poll_interval, Duration::from_secs(1));
        assert_eq!(config.publisher_config().max_retry_delay, Duration::from_secs(2));
        assert_eq!(config.saga.verdict_policy, VerdictPolicy::LastWriteWins);
    }

    #[test]
    fn test_policy_names() {
        let saga: SagaSettings =
            serde_json::from_str(r#"{"verdict_policy": "first_write_wins"}"#).unwrap();
        assert_eq!(saga.verdict_policy, VerdictPolicy::FirstWriteWins);
        assert!(saga.inline_publish);
    }
}
