//! Hub worker: translates domain events into WebSocket broadcast messages.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::WorkerResult;
use crate::handlers::EventHandler;
use crate::hub::message::ServerMessage;
use crate::hub::{event_topic, BroadcastMessage, EventUpdatePayload, Hub, ParticipantCountPayload};
use crate::models::event::{
    decode, DomainEvent, EventCancelled, EventPublished, RegistrationCancelled,
    RegistrationConfirmed,
};

pub struct UpdateHandler {
    hub: Hub,
}

impl UpdateHandler {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }

    fn on_event_published(&self, event_id: i64, event: &EventPublished) -> WorkerResult<()> {
        info!(event_title = %event.event_title, "event published, broadcasting to all clients");

        let payload = EventUpdatePayload {
            event_id,
            event_title: event.event_title.clone(),
            event_type: "EVENT_PUBLISHED".to_string(),
            location: some_nonempty(&event.event_location),
            start_date: some_nonempty(&event.start_date.wire_format()),
            organizer_name: some_nonempty(&event.organizer_name),
        };
        self.hub.broadcast(BroadcastMessage::to_all(ServerMessage::new(
            "event.published",
            serde_json::to_value(payload)?,
        )));
        Ok(())
    }

    fn on_event_cancelled(&self, event_id: i64, event: &EventCancelled) -> WorkerResult<()> {
        info!(event_title = %event.event_title, "event cancelled, broadcasting to all and topic");

        let payload = serde_json::to_value(EventUpdatePayload {
            event_id,
            event_title: event.event_title.clone(),
            event_type: "EVENT_CANCELLED".to_string(),
            location: None,
            start_date: None,
            organizer_name: None,
        })?;

        // Everyone hears the announcement; watchers of this event hear it on
        // their topic as well.
        self.hub.broadcast(BroadcastMessage::to_all(ServerMessage::new(
            "event.cancelled",
            payload.clone(),
        )));
        self.hub.broadcast(BroadcastMessage::to_topic(
            event_topic(event_id),
            ServerMessage::new("event.cancelled", payload),
        ));
        Ok(())
    }

    fn on_registration_confirmed(
        &self,
        event_id: i64,
        event: &RegistrationConfirmed,
    ) -> WorkerResult<()> {
        let topic = event_topic(event_id);
        info!(topic = %topic, user_name = %event.user_name, "registration confirmed");

        let payload = ParticipantCountPayload {
            event_id,
            event_title: event.event_title.clone(),
            count: event.current_participants,
            action: "registered".to_string(),
            user_name: event.user_name.clone(),
        };
        self.hub.broadcast(BroadcastMessage::to_topic(
            topic,
            ServerMessage::new("participant.count", serde_json::to_value(payload)?),
        ));
        Ok(())
    }

    fn on_registration_cancelled(
        &self,
        event_id: i64,
        event: &RegistrationCancelled,
    ) -> WorkerResult<()> {
        let topic = event_topic(event_id);
        info!(topic = %topic, user_name = %event.user_name, "registration cancelled");

        let payload = ParticipantCountPayload {
            event_id,
            event_title: event.event_title.clone(),
            count: event.current_participants,
            action: "cancelled".to_string(),
            user_name: event.user_name.clone(),
        };
        self.hub.broadcast(BroadcastMessage::to_topic(
            topic,
            ServerMessage::new("participant.count", serde_json::to_value(payload)?),
        ));
        Ok(())
    }
}

#[async_trait]
impl EventHandler for UpdateHandler {
    async fn handle(&self, body: &[u8]) -> WorkerResult<()> {
        let (envelope, event) = decode(body)?;
        info!(event_type = %envelope.event_type, event_id = envelope.event_id, "received event");

        match event {
            DomainEvent::EventPublished(e) => self.on_event_published(envelope.event_id, &e),
            DomainEvent::EventCancelled(e) => self.on_event_cancelled(envelope.event_id, &e),
            DomainEvent::RegistrationConfirmed(e) => {
                self.on_registration_confirmed(envelope.event_id, &e)
            }
            DomainEvent::RegistrationCancelled(e) => {
                self.on_registration_cancelled(envelope.event_id, &e)
            }
            // Reminders are for the notification worker; everything else is
            // an unknown type.
            DomainEvent::EventReminder(_) | DomainEvent::Unknown(_) => {
                warn!(event_type = %envelope.event_type, "ignoring event type");
                Ok(())
            }
        }
    }
}

fn some_nonempty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::message::ClientMessage;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    async fn recv_json(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let frame = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        serde_json::from_str(&frame).unwrap()
    }

    /// Register a raw client with a running hub loop and return its queue.
    async fn connect_client(hub: &Hub) -> (uuid::Uuid, mpsc::Sender<String>, mpsc::Receiver<String>) {
        let (out_tx, mut out_rx) = mpsc::channel(256);
        let (kill_tx, _kill_rx) = tokio::sync::watch::channel(false);
        let id = uuid::Uuid::new_v4();
        hub.register(crate::hub::ClientHandle {
            id,
            out: out_tx.clone(),
            kill: kill_tx,
        })
        .await;
        let welcome = recv_json(&mut out_rx).await;
        assert_eq!(welcome["type"], "connected");
        (id, out_tx, out_rx)
    }

    fn cancelled_body(event_id: i64) -> Vec<u8> {
        serde_json::json!({
            "eventId": event_id,
            "eventType": "EVENT_CANCELLED",
            "timestamp": 1_700_000_000,
            "eventTitle": "Talk",
            "originalStartDate": [2026, 3, 1, 20, 11],
            "organizerEmail": "org@b",
            "affectedRegistrations": 2
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn event_cancelled_fans_out_to_all_and_topic_subscribers() {
        let (hub, hub_loop) = Hub::new();
        tokio::spawn(hub_loop.run());

        let (id_a, out_a, mut rx_a) = connect_client(&hub).await;
        let (_id_b, _out_b, mut rx_b) = connect_client(&hub).await;

        // Client A subscribes the way a real frame would arrive.
        let subscribe: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","payload":{"eventId":5}}"#).unwrap();
        match subscribe {
            ClientMessage::Subscribe { payload } => {
                hub.subscribe(id_a, &out_a, payload.event_id).await;
            }
            other => panic!("unexpected message: {other:?}"),
        }
        let ack = recv_json(&mut rx_a).await;
        assert_eq!(ack["type"], "subscribed");

        let handler = UpdateHandler::new(hub.clone());
        handler.handle(&cancelled_body(5)).await.unwrap();

        // A receives two copies (broadcast-all plus topic), B exactly one.
        let first = recv_json(&mut rx_a).await;
        let second = recv_json(&mut rx_a).await;
        assert_eq!(first["type"], "event.cancelled");
        assert_eq!(second["type"], "event.cancelled");
        assert_eq!(first["payload"]["eventId"], 5);

        let only = recv_json(&mut rx_b).await;
        assert_eq!(only["type"], "event.cancelled");
        assert!(timeout(Duration::from_millis(100), rx_b.recv()).await.is_err());
    }

    #[tokio::test]
    async fn registration_confirmed_targets_the_event_topic() {
        let (hub, hub_loop) = Hub::new();
        tokio::spawn(hub_loop.run());

        let (id, out, mut rx) = connect_client(&hub).await;
        hub.subscribe(id, &out, 7).await;
        recv_json(&mut rx).await; // ack

        let body = serde_json::json!({
            "eventId": 7,
            "eventType": "REGISTRATION_CONFIRMED",
            "timestamp": 1_700_000_000,
            "userId": 42,
            "userEmail": "a@b",
            "userName": "Ann",
            "eventTitle": "Talk",
            "eventLocation": "Room 1",
            "eventStartDate": [2026, 3, 1, 20, 11],
            "eventEndDate": [2026, 3, 1, 21, 11],
            "ticketCode": "T-001",
            "currentParticipants": 12
        })
        .to_string();

        let handler = UpdateHandler::new(hub.clone());
        handler.handle(body.as_bytes()).await.unwrap();

        let frame = recv_json(&mut rx).await;
        assert_eq!(frame["type"], "participant.count");
        assert_eq!(frame["payload"]["action"], "registered");
        assert_eq!(frame["payload"]["userName"], "Ann");
        assert_eq!(frame["payload"]["count"], 12);
    }

    #[tokio::test]
    async fn event_published_omits_empty_optional_fields() {
        let (hub, hub_loop) = Hub::new();
        tokio::spawn(hub_loop.run());
        let (_id, _out, mut rx) = connect_client(&hub).await;
        let handler = UpdateHandler::new(hub.clone());

        let body = serde_json::json!({
            "eventId": 8,
            "eventType": "EVENT_PUBLISHED",
            "timestamp": 1_700_000_000,
            "eventTitle": "Talk",
            "eventLocation": "",
            "startDate": [2026, 3, 1, 20, 11],
            "endDate": [2026, 3, 1, 21, 11],
            "capacity": 50,
            "organizerEmail": "org@b"
        })
        .to_string();
        handler.handle(body.as_bytes()).await.unwrap();

        let frame = recv_json(&mut rx).await;
        assert_eq!(frame["type"], "event.published");
        assert_eq!(frame["payload"]["startDate"], "2026-03-01T20:11:00");
        // Empty location and absent organizer name are dropped, not
        // serialized as empty strings.
        assert!(frame["payload"].get("location").is_none());
        assert!(frame["payload"].get("organizerName").is_none());
    }

    #[tokio::test]
    async fn unknown_and_reminder_events_are_ignored() {
        let (hub, hub_loop) = Hub::new();
        tokio::spawn(hub_loop.run());
        let handler = UpdateHandler::new(hub.clone());

        handler
            .handle(br#"{"eventId":2,"eventType":"WAT","timestamp":0}"#)
            .await
            .unwrap();

        let reminder = serde_json::json!({
            "eventId": 2,
            "eventType": "EVENT_REMINDER",
            "timestamp": 0,
            "userId": 1,
            "userEmail": "a@b",
            "userName": "Ann",
            "eventTitle": "Talk",
            "eventLocation": "Room 1",
            "eventStartDate": [2026, 3, 1, 20, 11],
            "ticketCode": "T-001"
        })
        .to_string();
        handler.handle(reminder.as_bytes()).await.unwrap();
    }
}
