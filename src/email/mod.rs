//! Outbound email: transport abstraction (HTTP API or SMTP) and the
//! retrying sender used by the notification worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{EmailConfig, EmailTransportKind};
use crate::error::{WorkerError, WorkerResult};

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// A rendered email ready for delivery.
#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// A single delivery attempt over some transport. Retry policy lives in
/// [`EmailSender`], not here.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &Email) -> WorkerResult<()>;
}

/// Sends emails with bounded retries and linear backoff between attempts.
#[derive(Clone)]
pub struct EmailSender {
    transport: Arc<dyn EmailTransport>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl EmailSender {
    pub fn new(transport: Arc<dyn EmailTransport>, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            transport,
            max_retries,
            retry_backoff,
        }
    }

    /// Build a sender with the transport selected by configuration.
    pub fn from_config(config: &EmailConfig) -> WorkerResult<Self> {
        let transport: Arc<dyn EmailTransport> = match config.transport {
            EmailTransportKind::Api => Arc::new(HttpApiTransport::new(config)?),
            EmailTransportKind::Smtp => Arc::new(SmtpEmailTransport::new(config)?),
        };
        Ok(Self::new(transport, config.max_retries, config.retry_backoff))
    }

    /// Attempt delivery up to `max_retries` times, sleeping
    /// `retry_backoff × attempt` between attempts. The final error names the
    /// attempt count and carries the last transport diagnostic.
    pub async fn send_with_retry(&self, email: &Email) -> WorkerResult<()> {
        let mut last_err = None;

        for attempt in 1..=self.max_retries {
            match self.transport.send(email).await {
                Ok(()) => {
                    info!(to = %email.to, attempt, "email sent");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        to = %email.to,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "email send failed"
                    );
                    last_err = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_backoff * attempt).await;
                    }
                }
            }
        }

        let last = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(WorkerError::Email(format!(
            "failed to send email after {} attempts: {last}",
            self.max_retries
        )))
    }
}

// ── SendGrid v3 API payload types ──────────────────────────────────────

#[derive(Serialize)]
struct SgMailBody<'a> {
    personalizations: Vec<SgPersonalization<'a>>,
    from: SgAddress<'a>,
    subject: &'a str,
    content: Vec<SgContent<'a>>,
}

#[derive(Serialize)]
struct SgPersonalization<'a> {
    to: Vec<SgAddress<'a>>,
}

#[derive(Serialize)]
struct SgAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
struct SgContent<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a str,
}

/// SendGrid-style HTTP API transport.
pub struct HttpApiTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from_address: String,
    from_name: String,
}

impl HttpApiTransport {
    pub fn new(config: &EmailConfig) -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| WorkerError::Email(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: SENDGRID_ENDPOINT.to_string(),
            api_key: config.sendgrid_api_key.clone(),
            from_address: config.from_address.clone(),
            from_name: config.from_name.clone(),
        })
    }

    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl EmailTransport for HttpApiTransport {
    async fn send(&self, email: &Email) -> WorkerResult<()> {
        let payload = SgMailBody {
            personalizations: vec![SgPersonalization {
                to: vec![SgAddress {
                    email: &email.to,
                    name: None,
                }],
            }],
            from: SgAddress {
                email: &self.from_address,
                name: Some(&self.from_name),
            },
            subject: &email.subject,
            content: vec![SgContent {
                kind: "text/html",
                value: &email.html_body,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WorkerError::Email(format!("http request: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(WorkerError::Email(format!(
            "mail API error (HTTP {status}): {body}"
        )))
    }
}

/// SMTP transport via lettre.
pub struct SmtpEmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_header: String,
}

impl SmtpEmailTransport {
    pub fn new(config: &EmailConfig) -> WorkerResult<Self> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| WorkerError::Email(format!("smtp relay: {e}")))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ))
            .timeout(Some(SEND_TIMEOUT))
            .build();
        Ok(Self {
            mailer,
            from_header: format!("{} <{}>", config.from_name, config.from_address),
        })
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send(&self, email: &Email) -> WorkerResult<()> {
        let message = Message::builder()
            .from(
                self.from_header
                    .parse()
                    .map_err(|e| WorkerError::Email(format!("invalid from address: {e}")))?,
            )
            .to(email
                .to
                .parse()
                .map_err(|e| WorkerError::Email(format!("invalid to address: {e}")))?)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| WorkerError::Email(format!("failed to build email: {e}")))?;

        self.mailer
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| WorkerError::Email(format!("smtp send: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        failures_remaining: AtomicU32,
        attempts: AtomicU32,
    }

    impl FlakyTransport {
        fn failing(n: u32) -> Self {
            Self {
                failures_remaining: AtomicU32::new(n),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl EmailTransport for FlakyTransport {
        async fn send(&self, _email: &Email) -> WorkerResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(WorkerError::Email("mail API error (HTTP 401)".to_string()));
            }
            Ok(())
        }
    }

    fn sample_email() -> Email {
        Email {
            to: "a@b".to_string(),
            subject: "hi".to_string(),
            html_body: "<p>hi</p>".to_string(),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let transport = Arc::new(FlakyTransport::failing(2));
        let sender = EmailSender::new(transport.clone(), 3, Duration::from_millis(1));

        sender.send_with_retry(&sample_email()).await.unwrap();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_name_the_attempt_count() {
        let transport = Arc::new(FlakyTransport::failing(u32::MAX));
        let sender = EmailSender::new(transport.clone(), 3, Duration::from_millis(1));

        let err = sender.send_with_retry(&sample_email()).await.unwrap_err();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        let text = err.to_string();
        assert!(text.contains("after 3 attempts"), "error was: {text}");
        assert!(text.contains("HTTP 401"), "error was: {text}");
    }

    #[tokio::test]
    async fn first_attempt_success_sends_once() {
        let transport = Arc::new(FlakyTransport::failing(0));
        let sender = EmailSender::new(transport.clone(), 3, Duration::from_millis(1));

        sender.send_with_retry(&sample_email()).await.unwrap();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_transport_reports_status_and_body() {
        // Point the transport at a closed port so the request itself fails.
        let config = EmailConfig {
            transport: EmailTransportKind::Api,
            sendgrid_api_key: "k".to_string(),
            from_address: "from@x".to_string(),
            from_name: "X".to_string(),
            max_retries: 1,
            retry_backoff: Duration::from_millis(1),
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
        };
        let transport =
            HttpApiTransport::new(&config).unwrap().with_endpoint("http://127.0.0.1:1/mail");
        let err = transport.send(&sample_email()).await.unwrap_err();
        assert!(matches!(err, WorkerError::Email(_)));
    }
}
