//! Upstream domain events and the two-pass envelope decoder.

use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};
use crate::models::time::{EventDateTime, EventInstant};

/// Fields common to every upstream message. Decoded first so dispatch can
/// route on `event_type` before committing to a variant shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event_id: i64,
    pub event_type: String,
    pub timestamp: EventInstant,
}

/// Typed payload selected by the envelope's `event_type`.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    RegistrationConfirmed(RegistrationConfirmed),
    RegistrationCancelled(RegistrationCancelled),
    EventPublished(EventPublished),
    EventCancelled(EventCancelled),
    EventReminder(EventReminder),
    /// Recognizably well-formed envelope with an event type this service
    /// does not know. Treated as a successful no-op downstream.
    Unknown(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationConfirmed {
    #[serde(default)]
    pub registration_id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub user_name: String,
    pub event_title: String,
    pub event_location: String,
    pub event_start_date: EventDateTime,
    pub event_end_date: EventDateTime,
    pub ticket_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_participants: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCancelled {
    #[serde(default)]
    pub registration_id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub user_name: String,
    pub event_title: String,
    pub cancelled_at: EventDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_participants: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPublished {
    pub event_title: String,
    #[serde(default)]
    pub event_description: String,
    pub event_location: String,
    pub start_date: EventDateTime,
    pub end_date: EventDateTime,
    pub capacity: i64,
    #[serde(default)]
    pub organizer_id: i64,
    #[serde(default)]
    pub organizer_name: String,
    pub organizer_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCancelled {
    pub event_title: String,
    pub original_start_date: EventDateTime,
    #[serde(default)]
    pub organizer_id: i64,
    pub organizer_email: String,
    pub affected_registrations: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReminder {
    pub user_id: i64,
    pub user_email: String,
    pub user_name: String,
    pub event_title: String,
    pub event_location: String,
    pub event_start_date: EventDateTime,
    pub ticket_code: String,
}

/// Decode a raw delivery: envelope first, then the variant its type selects.
///
/// An unrecognized `event_type` is not an error; the caller decides whether
/// to act on [`DomainEvent::Unknown`]. A recognized type whose payload does
/// not parse is a decode error carrying the raw bytes.
pub fn decode(body: &[u8]) -> WorkerResult<(Envelope, DomainEvent)> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| WorkerError::decode(e, body))?;

    let event = match envelope.event_type.as_str() {
        "REGISTRATION_CONFIRMED" => DomainEvent::RegistrationConfirmed(parse_variant(body)?),
        "REGISTRATION_CANCELLED" => DomainEvent::RegistrationCancelled(parse_variant(body)?),
        "EVENT_PUBLISHED" => DomainEvent::EventPublished(parse_variant(body)?),
        "EVENT_CANCELLED" => DomainEvent::EventCancelled(parse_variant(body)?),
        "EVENT_REMINDER" => DomainEvent::EventReminder(parse_variant(body)?),
        other => DomainEvent::Unknown(other.to_string()),
    };

    Ok((envelope, event))
}

fn parse_variant<T: serde::de::DeserializeOwned>(body: &[u8]) -> WorkerResult<T> {
    serde_json::from_slice(body).map_err(|e| WorkerError::decode(e, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration_confirmed_body() -> Vec<u8> {
        serde_json::json!({
            "eventId": 1,
            "eventType": "REGISTRATION_CONFIRMED",
            "timestamp": 1_700_000_000,
            "registrationId": 10,
            "userId": 42,
            "userEmail": "a@b",
            "userName": "Ann",
            "eventTitle": "Talk",
            "eventLocation": "Room 1",
            "eventStartDate": [2026, 3, 1, 20, 11],
            "eventEndDate": [2026, 3, 1, 21, 11],
            "ticketCode": "T-001"
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn decodes_registration_confirmed() {
        let (envelope, event) = decode(&registration_confirmed_body()).unwrap();
        assert_eq!(envelope.event_id, 1);
        assert_eq!(envelope.event_type, "REGISTRATION_CONFIRMED");
        match event {
            DomainEvent::RegistrationConfirmed(e) => {
                assert_eq!(e.user_id, 42);
                assert_eq!(e.ticket_code, "T-001");
                assert_eq!(e.event_start_date.wire_format(), "2026-03-01T20:11:00");
                assert_eq!(e.current_participants, None);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_not_an_error() {
        let body = br#"{"eventId":2,"eventType":"WAT","timestamp":0}"#;
        let (envelope, event) = decode(body).unwrap();
        assert_eq!(envelope.event_type, "WAT");
        assert!(matches!(event, DomainEvent::Unknown(t) if t == "WAT"));
    }

    #[test]
    fn missing_envelope_field_is_a_decode_error() {
        let body = br#"{"eventType":"EVENT_PUBLISHED"}"#;
        let err = decode(body).unwrap_err();
        assert!(matches!(err, WorkerError::Decode { .. }), "got {err}");
    }

    #[test]
    fn recognized_type_with_bad_payload_is_a_decode_error() {
        // Valid envelope, but the variant is missing required fields.
        let body = br#"{"eventId":3,"eventType":"EVENT_CANCELLED","timestamp":0}"#;
        let err = decode(body).unwrap_err();
        match err {
            WorkerError::Decode { raw, .. } => assert!(raw.contains("EVENT_CANCELLED")),
            other => panic!("wrong error: {other}"),
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&registration_confirmed_body()).unwrap();
        value["somethingNew"] = serde_json::json!({"nested": true});
        let body = value.to_string().into_bytes();
        assert!(decode(&body).is_ok());
    }

    #[test]
    fn variants_round_trip_through_canonical_encoding() {
        let (_, event) = decode(&registration_confirmed_body()).unwrap();
        let DomainEvent::RegistrationConfirmed(original) = event else {
            panic!("wrong variant");
        };
        let encoded = serde_json::to_vec(&original).unwrap();
        let decoded: RegistrationConfirmed = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.event_start_date, original.event_start_date);
        assert_eq!(decoded.ticket_code, original.ticket_code);
        assert_eq!(decoded.user_id, original.user_id);
    }
}
