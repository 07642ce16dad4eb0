//! Buzon Outbox Relay Daemon
//!
//! Wires the Postgres store and the NATS publisher into the background
//! relay and runs it until SIGINT.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::info;

use buzon_infrastructure::config::DatabaseSettings;
use buzon_infrastructure::messaging::nats::{NatsConfig, NatsEventPublisher};
use buzon_infrastructure::messaging::outbox_relay::{OutboxRelay, RelayConfig};
use buzon_infrastructure::observability::{init_tracing, TelemetryConfig};
use buzon_infrastructure::persistence::outbox::PostgresOutboxRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(&TelemetryConfig::default());

    info!("starting buzon-relayd");

    let db_settings = DatabaseSettings::from_env().context("database settings")?;
    let pool = db_settings
        .connect()
        .await
        .context("failed to connect to database")?;
    info!("connected to database");

    let relay_config = RelayConfig::from_env();
    let repository = PostgresOutboxRepository::new(pool)
        .with_error_message_cap(relay_config.error_message_cap);
    repository
        .run_migrations()
        .await
        .context("outbox migrations")?;

    let nats_config = NatsConfig::from_env();
    let publisher = NatsEventPublisher::connect(nats_config)
        .await
        .context("failed to connect to NATS")?;
    publisher.ping().await.context("NATS health check")?;
    info!("connected to NATS");

    let relay = OutboxRelay::new(Arc::new(repository), Arc::new(publisher), relay_config);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let relay_handle = tokio::spawn({
        let relay = relay.clone();
        async move { relay.start(shutdown_rx).await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(());
    relay_handle.await.context("relay task panicked")?;

    info!(metrics = %relay.metrics(), "buzon-relayd stopped");
    Ok(())
}
