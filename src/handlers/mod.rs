//! Per-worker event handlers and the dispatch seam the consumer runtime
//! drives.

pub mod notification;
pub mod ticket;
pub mod updates;

use async_trait::async_trait;

use crate::error::WorkerResult;

pub use notification::NotificationHandler;
pub use ticket::TicketHandler;
pub use updates::UpdateHandler;

/// Dispatch seam between the consumer runtime and a worker's side effects.
///
/// Implementations decode the body, route on the event type, and run the
/// side effect to completion. An unknown event type must return `Ok` so the
/// delivery is acked rather than dead-lettered; any error propagates to the
/// consumer runtime, which performs the DLQ path.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> WorkerResult<()>;
}
