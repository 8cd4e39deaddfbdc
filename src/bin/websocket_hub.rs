//! Entry point for the websocket hub: consume event and registration keys,
//! fan out to connected WebSocket clients, serve `/ws`, `/health`, `/stats`.

use std::future::IntoFuture;
use std::sync::Arc;

use emrelay::consumer::{self, connect_with_retry, shutdown_signal, Consumer};
use emrelay::handlers::UpdateHandler;
use emrelay::{create_app, Hub, HubConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = HubConfig::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

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
        port = config.server.port,
        "starting websocket hub"
    );

    let (hub, hub_loop) = Hub::new();
    tokio::spawn(hub_loop.run());

    let handler = Arc::new(UpdateHandler::new(hub.clone()));
    let mut consumer = Consumer::new(config.broker, handler);
    connect_with_retry(
        &mut consumer,
        consumer::CONNECT_MAX_RETRIES,
        consumer::CONNECT_INITIAL_BACKOFF,
    )
    .await?;
    let closer = consumer.close_handle();

    let mut consumer_task = tokio::spawn(async move { consumer.start().await });

    let app = create_app(hub, config.service.name);
    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.server.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "websocket server listening");

    tokio::select! {
        served = axum::serve(listener, app).into_future() => {
            served?;
            anyhow::bail!("http server stopped");
        }
        consumed = &mut consumer_task => {
            consumed??;
            // The broker closed the stream; let the orchestrator restart us.
            anyhow::bail!("delivery stream closed");
        }
        () = shutdown_signal() => {
            tracing::info!("shutdown signal received, closing consumer");
            closer.close().await;
        }
    }

    Ok(())
}
