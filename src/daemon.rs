//! Bridge wiring.
//!
//! Connects the socket server's per-connection payloads to the queue
//! manager's publish path and coordinates shutdown ordering.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::queue::{self, Message, QueueError, QueueManager};
use crate::socket::{PayloadHandler, SocketError, SocketServer};

/// Startup errors for the bridge. Anything after startup is handled locally.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Forwards each received payload to the queue manager exactly once.
struct PublishHandler {
    queue: Arc<dyn QueueManager>,
}

impl PayloadHandler for PublishHandler {
    fn handle(&self, message: Message) -> BoxFuture<'static, Result<(), QueueError>> {
        let queue = Arc::clone(&self.queue);
        Box::pin(async move { queue.publish(message).await })
    }
}

/// Run the bridge until the cancellation token fires.
///
/// On cancellation the socket server stops accepting first; in-flight
/// connection handlers get a bounded grace window to finish their read and
/// one publish attempt, then the broker session is torn down.
pub async fn run(config: Config, cancel: CancellationToken) -> Result<(), DaemonError> {
    let queue = queue::create_manager(&config.queue);
    queue.start(cancel.clone()).await?;

    let server = SocketServer::new(config.input.clone());
    let handler = Arc::new(PublishHandler {
        queue: Arc::clone(&queue),
    });
    server.start(cancel.clone(), handler).await?;

    cancel.cancelled().await;

    let grace = config.shutdown.grace();
    if !server.drain(grace).await {
        warn!(grace = ?grace, "Grace window expired with handlers still in flight");
    }

    if let Err(e) = queue.close().await {
        warn!(error = %e, "Error closing queue manager");
    }

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct RecordingQueue {
        published: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl QueueManager for RecordingQueue {
        async fn start(&self, _cancel: CancellationToken) -> queue::Result<()> {
            Ok(())
        }

        async fn publish(&self, message: Message) -> queue::Result<()> {
            self.published.lock().await.push(message.as_bytes().to_vec());
            Ok(())
        }

        async fn close(&self) -> queue::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_handler_forwards_payload_unmodified() {
        let queue = Arc::new(RecordingQueue {
            published: Mutex::new(Vec::new()),
        });
        let handler = PublishHandler {
            queue: Arc::clone(&queue) as Arc<dyn QueueManager>,
        };

        handler
            .handle(Message::new(b"DSN-BODY-1".to_vec()))
            .await
            .unwrap();

        let published = queue.published.lock().await;
        assert_eq!(published.as_slice(), &[b"DSN-BODY-1".to_vec()]);
    }
}
