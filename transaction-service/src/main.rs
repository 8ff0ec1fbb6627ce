use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use message_bus::{MessageBus, NatsBus, Publisher, Subscriber, Topic};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use transaction_service::{
    handlers, Config, MemoryStore, OutboxRelay, PgStore, TransactionService, TransactionStore,
    VerdictConsumer,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .json()
        .init();

    info!("Starting Transaction Service...");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().map_err(anyhow::Error::msg)?;

    info!("Configuration loaded successfully");

    // Initialize store
    let store: Arc<dyn TransactionStore> = if config.uses_memory_store() {
        info!("Using in-memory store");
        Arc::new(MemoryStore::seeded())
    } else {
        let store = PgStore::connect(&config.database.url, config.database.max_connections)
            .await
            .context("Failed to connect to database")?;
        store.migrate().await.context("Failed to prepare schema")?;
        info!("Database connected successfully");
        Arc::new(store)
    };

    // Initialize NATS
    let bus: Arc<dyn MessageBus> = Arc::new(
        NatsBus::connect(config.nats.clone())
            .await
            .context("Failed to connect to NATS")?,
    );

    info!("NATS connected successfully");

    let publisher = Publisher::new(bus.clone(), config.publisher_config());
    let service = Arc::new(TransactionService::new(
        store.clone(),
        publisher.clone(),
        config.saga.clone(),
    ));

    // Start verdict consumer
    let subscriber = Subscriber::new(bus.clone(), config.subscriber_config(), Topic::TransactionValidated);
    let consumer = Arc::new(VerdictConsumer::new(service.clone()));
    let consumer_task = tokio::spawn(async move { subscriber.run(consumer).await });

    // Start outbox relay
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = OutboxRelay::new(store, publisher, config.relay_config());
    let relay_task = tokio::spawn(async move { relay.run(shutdown_rx).await });

    // Start HTTP server
    let server_config = config.server.clone();
    let service_data = web::Data::new(service);

    info!(
        "Starting HTTP server on {}:{}",
        server_config.host, server_config.port
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(service_data.clone())
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(handlers::configure_routes)
    })
    .workers(server_config.workers)
    .bind((server_config.host, server_config.port))?
    .run();

    let served = server.await;

    info!("Shutting down Transaction Service...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = bus.shutdown().await {
        error!("Failed to close NATS connection: {}", e);
    }
    relay_task.await?;
    consumer_task.await??;

    served.map_err(Into::into)
}
