//! Entry point for the ticket worker: consume confirmed registrations,
//! write signed QR ticket artifacts.

use std::sync::Arc;

use emrelay::consumer::{self, connect_with_retry, shutdown_signal, Consumer};
use emrelay::handlers::TicketHandler;
use emrelay::ticket::{QrGenerator, TicketService};
use emrelay::TicketWorkerConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = TicketWorkerConfig::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.service.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        service = config.service.name,
        environment = %config.service.environment,
        queue = %config.broker.queue,
        qr_dir = %config.ticket.qr_output_dir.display(),
        "starting ticket worker"
    );

    let qr = QrGenerator::new(config.ticket.qr_output_dir.clone(), config.ticket.qr_size)?;
    let tickets = TicketService::new(
        config.ticket.secret_key.clone(),
        qr,
        config.ticket.metadata_dir.clone(),
    )?;
    let handler = Arc::new(TicketHandler::new(tickets));
    let mut consumer = Consumer::new(config.broker, handler);

    connect_with_retry(
        &mut consumer,
        consumer::CONNECT_MAX_RETRIES,
        consumer::CONNECT_INITIAL_BACKOFF,
    )
    .await?;

    let closer = consumer.close_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, closing consumer");
        closer.close().await;
    });

    consumer.start().await?;
    consumer.close().await;
    Ok(())
}
