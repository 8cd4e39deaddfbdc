//! Entry point for the notification worker: consume registration and event
//! keys, send templated email.

use std::sync::Arc;

use emrelay::consumer::{self, connect_with_retry, shutdown_signal, Consumer};
use emrelay::email::EmailSender;
use emrelay::handlers::NotificationHandler;
use emrelay::NotificationConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = NotificationConfig::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

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
        "starting notification worker"
    );

    let sender = EmailSender::from_config(&config.email)?;
    let handler = Arc::new(NotificationHandler::new(sender));
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

    // Blocks until the delivery stream closes (shutdown or broker loss).
    consumer.start().await?;
    consumer.close().await;
    Ok(())
}
