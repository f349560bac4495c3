//! Kafka backend placeholder.
//!
//! Selectable by configuration but not implemented. Every operation fails
//! loudly so that a misconfigured deployment cannot silently drop traffic.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Message, QueueConfig, QueueError, QueueManager, Result};

/// Placeholder Kafka implementation of `QueueManager`.
pub struct KafkaManager {
    _config: QueueConfig,
}

impl KafkaManager {
    pub fn new(config: QueueConfig) -> Self {
        Self { _config: config }
    }
}

#[async_trait]
impl QueueManager for KafkaManager {
    async fn start(&self, _cancel: CancellationToken) -> Result<()> {
        Err(QueueError::Unsupported("kafka"))
    }

    async fn publish(&self, _message: Message) -> Result<()> {
        Err(QueueError::Unsupported("kafka"))
    }

    async fn close(&self) -> Result<()> {
        Err(QueueError::Unsupported("kafka"))
    }
}
