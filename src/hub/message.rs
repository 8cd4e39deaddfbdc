//! Wire messages exchanged with WebSocket clients.

use serde::{Deserialize, Serialize};
use serde_json::json;

// ── Messages FROM client TO server ─────────────────────────────────────

/// Inbound frame: `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { payload: SubscribePayload },
    Unsubscribe { payload: SubscribePayload },
    Ping,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    pub event_id: i64,
}

// ── Messages FROM server TO client ─────────────────────────────────────

/// Outbound frame. The payload shape varies by `type`
/// (`connected`, `subscribed`, `pong`, `event.published`, `event.cancelled`,
/// `participant.count`).
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

impl ServerMessage {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub(crate) fn connected(total_clients: usize) -> Self {
        Self::new(
            "connected",
            json!({
                "message": "Connected to EM-Connect WebSocket Hub",
                "totalClients": total_clients,
            }),
        )
    }

    pub(crate) fn subscribed(event_id: i64, topic: &str) -> Self {
        Self::new("subscribed", json!({ "eventId": event_id, "topic": topic }))
    }

    pub(crate) fn pong(timestamp_ms: i64) -> Self {
        Self::new("pong", json!({ "timestamp": timestamp_ms }))
    }

    pub(crate) fn to_frame(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// Payload for `event.published` and `event.cancelled`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventUpdatePayload {
    pub event_id: i64,
    pub event_title: String,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizer_name: Option<String>,
}

/// Payload for `participant.count`. `count` rides along only when the
/// upstream event carries the current total.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantCountPayload {
    pub event_id: i64,
    pub event_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    /// `registered` or `cancelled`.
    pub action: String,
    pub user_name: String,
}

/// Routes a [`ServerMessage`] to the right clients. An empty topic means
/// broadcast to every registered client.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub topic: String,
    pub message: ServerMessage,
}

impl BroadcastMessage {
    pub fn to_all(message: ServerMessage) -> Self {
        Self {
            topic: String::new(),
            message,
        }
    }

    pub fn to_topic(topic: impl Into<String>, message: ServerMessage) -> Self {
        Self {
            topic: topic.into(),
            message,
        }
    }
}

/// Topic name for a given upstream event id.
pub fn event_topic(event_id: i64) -> String {
    format!("event:{event_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_parses_subscribe() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","payload":{"eventId":5}}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { payload } if payload.event_id == 5));
    }

    #[test]
    fn client_message_parses_bare_ping() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn client_message_rejects_unknown_type() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"shout"}"#).is_err());
    }

    #[test]
    fn server_message_serializes_with_type_tag() {
        let frame = ServerMessage::subscribed(5, "event:5").to_frame().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "subscribed");
        assert_eq!(value["payload"]["eventId"], 5);
        assert_eq!(value["payload"]["topic"], "event:5");
    }

    #[test]
    fn participant_count_omits_unknown_count() {
        let payload = ParticipantCountPayload {
            event_id: 5,
            event_title: "Talk".to_string(),
            count: None,
            action: "registered".to_string(),
            user_name: "Ann".to_string(),
        };
        let value = serde_json::to_value(payload).unwrap();
        assert!(value.get("count").is_none());
    }
}
