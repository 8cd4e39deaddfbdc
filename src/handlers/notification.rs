//! Notification worker: turns domain events into templated emails.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::email::{Email, EmailSender};
use crate::error::WorkerResult;
use crate::handlers::EventHandler;
use crate::models::event::{
    decode, DomainEvent, EventCancelled, EventPublished, EventReminder, RegistrationCancelled,
    RegistrationConfirmed,
};
use crate::templates::EmailTemplate;

pub struct NotificationHandler {
    email: EmailSender,
}

impl NotificationHandler {
    pub fn new(email: EmailSender) -> Self {
        Self { email }
    }

    async fn send(&self, to: &str, template: EmailTemplate<'_>) -> WorkerResult<()> {
        let email = Email {
            to: to.to_string(),
            subject: template.subject(),
            html_body: template.render(),
        };
        self.email.send_with_retry(&email).await
    }

    async fn on_registration_confirmed(&self, event: &RegistrationConfirmed) -> WorkerResult<()> {
        info!(
            to = %event.user_email,
            event_title = %event.event_title,
            ticket_code = %event.ticket_code,
            "registration confirmed"
        );
        self.send(
            &event.user_email,
            EmailTemplate::RegistrationConfirmed {
                user_name: &event.user_name,
                event_title: &event.event_title,
                event_location: &event.event_location,
                event_date: event.event_start_date.human_format(),
                ticket_code: &event.ticket_code,
            },
        )
        .await
    }

    async fn on_registration_cancelled(&self, event: &RegistrationCancelled) -> WorkerResult<()> {
        info!(to = %event.user_email, event_title = %event.event_title, "registration cancelled");
        self.send(
            &event.user_email,
            EmailTemplate::RegistrationCancelled {
                user_name: &event.user_name,
                event_title: &event.event_title,
            },
        )
        .await
    }

    async fn on_event_published(&self, event: &EventPublished) -> WorkerResult<()> {
        info!(
            to = %event.organizer_email,
            event_title = %event.event_title,
            "event published"
        );
        self.send(
            &event.organizer_email,
            EmailTemplate::EventPublished {
                event_title: &event.event_title,
                event_description: &event.event_description,
                event_location: &event.event_location,
                event_date: event.start_date.human_format(),
                capacity: event.capacity,
            },
        )
        .await
    }

    async fn on_event_cancelled(&self, event: &EventCancelled) -> WorkerResult<()> {
        info!(
            to = %event.organizer_email,
            event_title = %event.event_title,
            affected = event.affected_registrations,
            "event cancelled"
        );
        self.send(
            &event.organizer_email,
            EmailTemplate::EventCancelled {
                event_title: &event.event_title,
                original_date: event.original_start_date.human_format(),
                affected_registrations: event.affected_registrations,
            },
        )
        .await
    }

    async fn on_event_reminder(&self, event: &EventReminder) -> WorkerResult<()> {
        info!(to = %event.user_email, event_title = %event.event_title, "event reminder");
        self.send(
            &event.user_email,
            EmailTemplate::EventReminder {
                user_name: &event.user_name,
                event_title: &event.event_title,
                event_location: &event.event_location,
                event_date: event.event_start_date.human_format(),
                ticket_code: &event.ticket_code,
            },
        )
        .await
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    async fn handle(&self, body: &[u8]) -> WorkerResult<()> {
        let (envelope, event) = decode(body)?;
        info!(event_type = %envelope.event_type, event_id = envelope.event_id, "received event");

        match event {
            DomainEvent::RegistrationConfirmed(e) => self.on_registration_confirmed(&e).await,
            DomainEvent::RegistrationCancelled(e) => self.on_registration_cancelled(&e).await,
            DomainEvent::EventPublished(e) => self.on_event_published(&e).await,
            DomainEvent::EventCancelled(e) => self.on_event_cancelled(&e).await,
            DomainEvent::EventReminder(e) => self.on_event_reminder(&e).await,
            DomainEvent::Unknown(event_type) => {
                warn!(event_type = %event_type, "unknown event type, ignoring");
                Ok(())
            }
        }
    }
}
