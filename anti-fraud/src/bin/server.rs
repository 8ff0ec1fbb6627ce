//! Anti-fraud service binary

use anti_fraud::{Config, ThresholdRule, ValidationCoordinator};
use message_bus::{MessageBus, NatsBus, Publisher, Subscriber, Topic};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting anti-fraud service");

    // Load configuration
    let config = Config::from_env()?;
    let rule = ThresholdRule::new(config.rule.max_allowed)?;
    tracing::info!(max_allowed = %rule.max_allowed(), "Configuration loaded");

    // Connect bus
    let bus: Arc<dyn MessageBus> = Arc::new(NatsBus::connect(config.nats.clone()).await?);

    let publisher = Publisher::new(bus.clone(), config.publisher_config());
    let coordinator = Arc::new(ValidationCoordinator::new(rule, publisher));
    let subscriber = Subscriber::new(bus.clone(), config.subscriber_config(), Topic::TransactionCreated);

    let worker = tokio::spawn(async move { subscriber.run(coordinator).await });

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down anti-fraud service");
    bus.shutdown().await?;
    worker.await??;
    Ok(())
}
