//! Ticket worker: produces signed QR artifacts for confirmed registrations.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::WorkerResult;
use crate::handlers::EventHandler;
use crate::models::event::{decode, DomainEvent};
use crate::ticket::TicketService;

pub struct TicketHandler {
    tickets: TicketService,
}

impl TicketHandler {
    pub fn new(tickets: TicketService) -> Self {
        Self { tickets }
    }
}

#[async_trait]
impl EventHandler for TicketHandler {
    async fn handle(&self, body: &[u8]) -> WorkerResult<()> {
        let (envelope, event) = decode(body)?;
        info!(event_type = %envelope.event_type, event_id = envelope.event_id, "received event");

        match event {
            DomainEvent::RegistrationConfirmed(e) => {
                info!(
                    user = %event_user(&e.user_name, &e.user_email),
                    event_title = %e.event_title,
                    ticket_code = %e.ticket_code,
                    "generating ticket"
                );
                self.tickets.generate(&e, envelope.event_id).await
            }
            // Only confirmed registrations produce a ticket.
            _ => {
                debug!(event_type = %envelope.event_type, "event not relevant for tickets");
                Ok(())
            }
        }
    }
}

fn event_user(name: &str, email: &str) -> String {
    format!("{name} <{email}>")
}
