//! RabbitMQ connection manager.
//!
//! Maintains one live AMQP connection with exactly one channel, declares the
//! routing topology on every (re)connect, and serializes all publishes
//! through that single channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{
    BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{Message, QueueConfig, QueueError, QueueManager, Result};

/// Routing key used both for the queue binding and for every publish.
pub const BOUNCE_ROUTING_KEY: &str = "email.bounce";

/// Fixed wait between reconnect attempts. No backoff, no retry cap.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// AMQP reply code for a clean close.
const REPLY_SUCCESS: u16 = 200;

/// One live connection plus its single channel.
struct Session {
    connection: Connection,
    channel: Channel,
}

/// RabbitMQ implementation of `QueueManager`.
///
/// The connect/retry loop runs on its own task; `publish` fails fast with
/// `QueueError::NotConnected` whenever no session is live. The session
/// mutex is the single-writer discipline for the channel: concurrent
/// connection handlers may request publishes, but the channel only ever
/// sees one at a time.
pub struct RabbitMqManager {
    config: QueueConfig,
    session: Arc<Mutex<Option<Session>>>,
}

impl RabbitMqManager {
    /// Create a manager from validated connection parameters.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Declare the exchange, queue, and binding.
    ///
    /// Durable declarations with identical parameters are idempotent on the
    /// broker, so this is safe to repeat across reconnects.
    pub async fn declare_topology(channel: &Channel, config: &QueueConfig) -> Result<()> {
        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connect(format!("Failed to declare exchange: {}", e)))?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connect(format!("Failed to declare queue: {}", e)))?;

        channel
            .queue_bind(
                &config.queue,
                &config.exchange,
                BOUNCE_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Connect(format!("Failed to bind queue: {}", e)))
    }

    /// Dial the broker, open the channel, declare topology.
    ///
    /// Returns the session and a watch that fires on connection loss.
    async fn connect_and_setup(
        config: &QueueConfig,
    ) -> Result<(Session, watch::Receiver<Option<String>>)> {
        let connection = Connection::connect(&config.uri, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connect(format!("Failed to dial broker: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connect(format!("Failed to create channel: {}", e)))?;

        Self::declare_topology(&channel, config).await?;

        let (loss_tx, loss_rx) = watch::channel(None);
        connection.on_error(move |err| {
            let _ = loss_tx.send(Some(err.to_string()));
        });

        Ok((
            Session {
                connection,
                channel,
            },
            loss_rx,
        ))
    }

    /// Connect/retry loop. Retries indefinitely until cancellation.
    async fn run(
        config: QueueConfig,
        session: Arc<Mutex<Option<Session>>>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match Self::connect_and_setup(&config).await {
                Ok((new_session, mut loss)) => {
                    info!(
                        exchange = %config.exchange,
                        queue = %config.queue,
                        "Connected to RabbitMQ"
                    );
                    *session.lock().await = Some(new_session);

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = loss.changed() => {
                            let reason = loss
                                .borrow()
                                .clone()
                                .unwrap_or_else(|| "connection closed".to_string());
                            let err = QueueError::ConnectionLost(reason);
                            warn!(error = %err, "Broker connection lost, reconnecting");
                            // Drop the dead handles so publishes fail fast
                            // instead of writing into a closed channel.
                            session.lock().await.take();
                        }
                    }
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in = ?RECONNECT_INTERVAL,
                        "Failed to connect to RabbitMQ"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_INTERVAL) => {}
                    }
                }
            }
        }

        info!("Stopping RabbitMQ manager");
        if let Err(e) = Self::close_session(&session).await {
            warn!(error = %e, "Error closing RabbitMQ session");
        }
    }

    /// Close channel then connection. Both steps are attempted; the first
    /// error encountered is the one returned.
    async fn close_session(session: &Mutex<Option<Session>>) -> Result<()> {
        let Some(live) = session.lock().await.take() else {
            return Ok(());
        };

        let mut first_err = None;
        if let Err(e) = live.channel.close(REPLY_SUCCESS, "shutting down").await {
            first_err = Some(QueueError::Close(format!("Failed to close channel: {}", e)));
        }
        if let Err(e) = live.connection.close(REPLY_SUCCESS, "shutting down").await {
            first_err.get_or_insert(QueueError::Close(format!(
                "Failed to close connection: {}",
                e
            )));
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl QueueManager for RabbitMqManager {
    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let config = self.config.clone();
        let session = Arc::clone(&self.session);
        tokio::spawn(Self::run(config, session, cancel));
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<()> {
        let guard = self.session.lock().await;
        let live = guard.as_ref().ok_or(QueueError::NotConnected)?;

        let confirm = live
            .channel
            .basic_publish(
                &self.config.exchange,
                BOUNCE_ROUTING_KEY,
                BasicPublishOptions::default(),
                message.as_bytes(),
                BasicProperties::default().with_content_type("text/plain".into()),
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        confirm
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Self::close_session(&self.session).await
    }
}
