//! Broker consumer runtime shared by all workers: connection lifecycle,
//! topology declaration (including dead-letter infrastructure), the serial
//! consume loop, and failure isolation via DLQ republish.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{error, info, warn};

use crate::config::BrokerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handlers::EventHandler;

/// Connection attempts made by [`connect_with_retry`] before giving up.
pub const CONNECT_MAX_RETRIES: u32 = 5;
/// First retry delay; doubles after every failed attempt.
pub const CONNECT_INITIAL_BACKOFF: Duration = Duration::from_secs(3);

/// Consumes deliveries from the service queue and routes them through an
/// [`EventHandler`]. Processing is strictly serial so per-routing-key order
/// survives through to side-effect invocation.
pub struct Consumer {
    config: BrokerConfig,
    handler: Arc<dyn EventHandler>,
    connection: Option<Arc<Connection>>,
    channel: Option<Channel>,
}

impl Consumer {
    pub fn new(config: BrokerConfig, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            config,
            handler,
            connection: None,
            channel: None,
        }
    }

    /// Dial the broker, open a channel, set prefetch, and declare topology.
    /// Performs a single attempt; wrap with [`connect_with_retry`] at startup.
    pub async fn connect(&mut self) -> WorkerResult<()> {
        info!(
            exchange = %self.config.exchange,
            queue = %self.config.queue,
            "connecting to broker"
        );

        let connection =
            Connection::connect(&self.config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;

        self.declare_topology(&channel).await?;

        self.connection = Some(Arc::new(connection));
        self.channel = Some(channel);
        info!("connected to broker");
        Ok(())
    }

    /// Idempotently declare the main exchange, the service queue with its
    /// bindings, and the dead-letter exchange/queue pair.
    async fn declare_topology(&self, channel: &Channel) -> WorkerResult<()> {
        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                durable_exchange(),
                FieldTable::default(),
            )
            .await?;

        // Broker-side rejections route to the DLX as well.
        let mut queue_args = FieldTable::default();
        queue_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.config.dlq_exchange.as_str().into()),
        );
        channel
            .queue_declare(&self.config.queue, durable_queue(), queue_args)
            .await?;
        for key in &self.config.routing_keys {
            channel
                .queue_bind(
                    &self.config.queue,
                    &self.config.exchange,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            info!(routing_key = %key, queue = %self.config.queue, "bound routing key");
        }

        channel
            .exchange_declare(
                &self.config.dlq_exchange,
                ExchangeKind::Topic,
                durable_exchange(),
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(&self.config.dlq_queue, durable_queue(), FieldTable::default())
            .await?;
        channel
            .queue_bind(
                &self.config.dlq_queue,
                &self.config.dlq_exchange,
                &self.config.failed_routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(queue = %self.config.dlq_queue, "dead letter queue configured");

        Ok(())
    }

    /// Consume with manual acknowledgement until the delivery stream closes.
    ///
    /// Every delivery is either acked after successful handling or acked
    /// after a DLQ republish; a poison message never re-enters the queue.
    pub async fn start(&self) -> WorkerResult<()> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| WorkerError::Config("consumer is not connected".to_string()))?;

        let mut deliveries = channel
            .basic_consume(
                &self.config.queue,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.config.queue, "waiting for messages");

        while let Some(delivery) = deliveries.next().await {
            match delivery {
                Ok(delivery) => self.process(channel, delivery).await,
                Err(e) => {
                    error!(error = %e, "delivery stream error");
                    return Err(e.into());
                }
            }
        }

        info!("delivery stream closed");
        Ok(())
    }

    async fn process(&self, channel: &Channel, delivery: Delivery) {
        let routing_key = delivery.routing_key.as_str().to_string();

        match self.handler.handle(&delivery.data).await {
            Ok(()) => {
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!(error = %e, routing_key = %routing_key, "failed to ack message");
                }
            }
            Err(handler_err) => {
                warn!(
                    error = %handler_err,
                    routing_key = %routing_key,
                    "handler failed, dead-lettering message"
                );
                if let Err(publish_err) = self
                    .publish_to_dlq(channel, &delivery, &handler_err.to_string())
                    .await
                {
                    error!(error = %publish_err, "failed to publish to DLQ");
                }
                // Acked either way so the poison message is not redelivered.
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!(error = %e, routing_key = %routing_key, "failed to ack dead-lettered message");
                }
            }
        }
    }

    async fn publish_to_dlq(
        &self,
        channel: &Channel,
        delivery: &Delivery,
        error_message: &str,
    ) -> WorkerResult<()> {
        let headers = dlq_headers(
            delivery.routing_key.as_str(),
            delivery.exchange.as_str(),
            error_message,
        );
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_headers(headers);

        channel
            .basic_publish(
                &self.config.dlq_exchange,
                &self.config.failed_routing_key,
                BasicPublishOptions::default(),
                &delivery.data,
                properties,
            )
            .await?
            .await?;

        info!(routing_key = %self.config.failed_routing_key, "message sent to dead letter queue");
        Ok(())
    }

    /// Handle for closing the consumer from another task (signal watcher).
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            channel: self.channel.clone(),
            connection: self.connection.clone(),
        }
    }

    /// Close channel then connection. Idempotent; closing an already-closed
    /// consumer is a no-op.
    pub async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            let _ = channel.close(200, "shutting down").await;
        }
        if let Some(connection) = self.connection.take() {
            let _ = connection.close(200, "shutting down").await;
        }
    }
}

/// Cloneable closer; closing ends the delivery stream so `start` returns.
#[derive(Clone)]
pub struct CloseHandle {
    channel: Option<Channel>,
    connection: Option<Arc<Connection>>,
}

impl CloseHandle {
    pub async fn close(&self) {
        if let Some(channel) = &self.channel {
            let _ = channel.close(200, "shutting down").await;
        }
        if let Some(connection) = &self.connection {
            let _ = connection.close(200, "shutting down").await;
        }
        info!("consumer closed");
    }
}

/// Retry [`Consumer::connect`] with exponential backoff. Returns the last
/// connection error once `max_retries` attempts are exhausted.
pub async fn connect_with_retry(
    consumer: &mut Consumer,
    max_retries: u32,
    initial_backoff: Duration,
) -> WorkerResult<()> {
    let mut backoff = initial_backoff;
    let mut last_err = None;

    for attempt in 1..=max_retries {
        match consumer.connect().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, max_retries, error = %e, "broker connection attempt failed");
                last_err = Some(e);
                if attempt < max_retries {
                    info!(backoff_secs = backoff.as_secs(), "retrying broker connection");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| WorkerError::Config("broker connect retries exhausted".to_string())))
}

/// Completes when SIGINT or SIGTERM is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => {
                error!("failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

fn durable_exchange() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

fn dlq_headers(routing_key: &str, exchange: &str, error_message: &str) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        "x-original-routing-key".into(),
        AMQPValue::LongString(routing_key.into()),
    );
    headers.insert(
        "x-error-message".into(),
        AMQPValue::LongString(error_message.into()),
    );
    headers.insert(
        "x-original-exchange".into(),
        AMQPValue::LongString(exchange.into()),
    );
    headers
}
