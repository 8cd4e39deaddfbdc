//! Asynchronous event-processing workers for the EM-Connect platform.
//!
//! Three services consume domain events from the topic broker and fan them
//! out to side effects: templated email (notification worker), signed QR
//! ticket artifacts (ticket worker), and live WebSocket push (websocket
//! hub). They share the envelope decoders, the consumer runtime, and the
//! dispatch seam in this crate.

pub mod config;
pub mod consumer;
pub mod email;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod templates;
pub mod ticket;

pub use config::{HubConfig, NotificationConfig, TicketWorkerConfig};
pub use consumer::Consumer;
pub use error::{WorkerError, WorkerResult};
pub use hub::{Hub, HubState};

use axum::routing::get;

/// Build the hub worker's router (`/ws`, `/health`, `/stats`). Used by the
/// binary and by integration tests.
pub fn create_app(hub: Hub, service: &'static str) -> axum::Router {
    axum::Router::new()
        .route("/ws", get(hub::handle_ws))
        .route("/health", get(hub::health))
        .route("/stats", get(hub::stats))
        .with_state(HubState { hub, service })
}
