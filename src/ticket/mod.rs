//! Ticket generation: signed QR payload plus a JSON metadata sidecar.

pub mod qr;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};
use crate::models::event::RegistrationConfirmed;

pub use qr::QrGenerator;

type HmacSha256 = Hmac<Sha256>;

/// Data encoded into the QR image. The signature covers the identity fields
/// so a scanned ticket can be verified offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPayload {
    pub ticket_code: String,
    pub event_id: i64,
    pub user_id: i64,
    pub event_title: String,
    pub user_name: String,
    pub event_date: String,
    pub location: String,
    #[serde(default)]
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Valid,
    Used,
    Cancelled,
}

/// Sidecar written next to the QR image for downstream lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketMetadata {
    pub ticket_code: String,
    pub event_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub user_email: String,
    pub event_title: String,
    pub event_location: String,
    pub event_start_date: String,
    pub qr_image_path: String,
    pub generated_at: DateTime<Utc>,
    pub status: TicketStatus,
}

/// Builds, signs, and persists ticket artifacts for confirmed registrations.
/// Generation is idempotent on ticket code; a repeated delivery overwrites
/// the previous artifacts.
pub struct TicketService {
    secret_key: String,
    qr_generator: QrGenerator,
    metadata_dir: PathBuf,
}

impl TicketService {
    /// Create the service, creating the metadata directory if absent.
    pub fn new(
        secret_key: impl Into<String>,
        qr_generator: QrGenerator,
        metadata_dir: impl Into<PathBuf>,
    ) -> WorkerResult<Self> {
        let metadata_dir = metadata_dir.into();
        std::fs::create_dir_all(&metadata_dir)?;
        Ok(Self {
            secret_key: secret_key.into(),
            qr_generator,
            metadata_dir,
        })
    }

    /// Payload → signature → QR PNG → metadata sidecar. Any failure aborts
    /// the whole operation and propagates to the caller.
    pub async fn generate(&self, event: &RegistrationConfirmed, event_id: i64) -> WorkerResult<()> {
        let mut payload = self.build_payload(event, event_id);
        payload.signature = self.sign(&payload)?;

        let payload_json = serde_json::to_string(&payload)?;
        let qr_path = self
            .qr_generator
            .generate(&event.ticket_code, &payload_json)?;

        let metadata = TicketMetadata {
            ticket_code: event.ticket_code.clone(),
            event_id,
            user_id: event.user_id,
            user_name: event.user_name.clone(),
            user_email: event.user_email.clone(),
            event_title: event.event_title.clone(),
            event_location: event.event_location.clone(),
            event_start_date: event.event_start_date.wire_format(),
            qr_image_path: qr_path.display().to_string(),
            generated_at: Utc::now(),
            status: TicketStatus::Valid,
        };
        self.save_metadata(&metadata).await?;

        info!(
            ticket_code = %event.ticket_code,
            qr_path = %qr_path.display(),
            "ticket generated"
        );
        Ok(())
    }

    fn build_payload(&self, event: &RegistrationConfirmed, event_id: i64) -> TicketPayload {
        TicketPayload {
            ticket_code: event.ticket_code.clone(),
            event_id,
            user_id: event.user_id,
            event_title: event.event_title.clone(),
            user_name: event.user_name.clone(),
            event_date: event.event_start_date.wire_format(),
            location: event.event_location.clone(),
            signature: String::new(),
        }
    }

    /// Hex HMAC-SHA256 over the identity fields in a fixed order. The output
    /// is deterministic for identical payload fields.
    pub fn sign(&self, payload: &TicketPayload) -> WorkerResult<String> {
        let data = format!(
            "{}:{}:{}:{}",
            payload.ticket_code, payload.event_id, payload.user_id, payload.event_date
        );
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| WorkerError::Ticket(format!("HMAC init: {e}")))?;
        mac.update(data.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Recompute and compare the signature in constant time.
    pub fn verify_signature(&self, payload: &TicketPayload) -> bool {
        let data = format!(
            "{}:{}:{}:{}",
            payload.ticket_code, payload.event_id, payload.user_id, payload.event_date
        );
        let Ok(expected) = hex::decode(&payload.signature) else {
            return false;
        };
        let mut mac = match HmacSha256::new_from_slice(self.secret_key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(data.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    async fn save_metadata(&self, metadata: &TicketMetadata) -> WorkerResult<()> {
        let path = self.metadata_path(&metadata.ticket_code);
        let data = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    /// Read a previously written metadata sidecar.
    pub async fn load_metadata(&self, ticket_code: &str) -> WorkerResult<TicketMetadata> {
        let path = self.metadata_path(ticket_code);
        let data = tokio::fs::read(&path).await?;
        let metadata = serde_json::from_slice(&data)
            .map_err(|e| WorkerError::Ticket(format!("metadata for {ticket_code}: {e}")))?;
        Ok(metadata)
    }

    fn metadata_path(&self, ticket_code: &str) -> PathBuf {
        self.metadata_dir.join(format!("{ticket_code}.json"))
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::DomainEvent;

    fn sample_event() -> RegistrationConfirmed {
        let body = serde_json::json!({
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
        .to_string();
        let (_, event) = crate::models::event::decode(body.as_bytes()).unwrap();
        match event {
            DomainEvent::RegistrationConfirmed(e) => e,
            other => panic!("wrong variant: {other:?}"),
        }
    }

    fn service(dir: &std::path::Path) -> TicketService {
        let qr = QrGenerator::new(dir.join("qr"), 128).unwrap();
        TicketService::new("test-secret", qr, dir.join("metadata")).unwrap()
    }

    #[test]
    fn sign_is_deterministic_and_verifiable() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let mut payload = service.build_payload(&sample_event(), 1);

        let first = service.sign(&payload).unwrap();
        let second = service.sign(&payload).unwrap();
        assert_eq!(first, second);

        payload.signature = first;
        assert!(service.verify_signature(&payload));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let mut payload = service.build_payload(&sample_event(), 1);
        payload.signature = service.sign(&payload).unwrap();

        payload.user_id = 43;
        assert!(!service.verify_signature(&payload));

        let mut garbled = service.build_payload(&sample_event(), 1);
        garbled.signature = "not-hex!".to_string();
        assert!(!service.verify_signature(&garbled));
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        let dir = tempfile::tempdir().unwrap();
        let qr_a = QrGenerator::new(dir.path().join("a"), 64).unwrap();
        let qr_b = QrGenerator::new(dir.path().join("b"), 64).unwrap();
        let a = TicketService::new("secret-a", qr_a, dir.path().join("ma")).unwrap();
        let b = TicketService::new("secret-b", qr_b, dir.path().join("mb")).unwrap();

        let payload = a.build_payload(&sample_event(), 1);
        assert_ne!(a.sign(&payload).unwrap(), b.sign(&payload).unwrap());
    }

    #[tokio::test]
    async fn generate_writes_png_and_valid_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let event = sample_event();

        service.generate(&event, 1).await.unwrap();

        let qr_bytes = std::fs::read(dir.path().join("qr/T-001.png")).unwrap();
        assert!(!qr_bytes.is_empty());

        let raw = std::fs::read_to_string(dir.path().join("metadata/T-001.json")).unwrap();
        assert!(raw.contains("\"status\": \"VALID\""));
        assert!(raw.contains("\"ticketCode\": \"T-001\""));

        let metadata = service.load_metadata("T-001").await.unwrap();
        assert_eq!(metadata.status, TicketStatus::Valid);
        assert_eq!(metadata.event_start_date, "2026-03-01T20:11:00");
        assert_eq!(metadata.user_id, 42);
    }

    #[tokio::test]
    async fn generate_is_idempotent_on_ticket_code() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let event = sample_event();

        service.generate(&event, 1).await.unwrap();
        service.generate(&event, 1).await.unwrap();

        let metadata = service.load_metadata("T-001").await.unwrap();
        assert_eq!(metadata.ticket_code, "T-001");
    }
}
