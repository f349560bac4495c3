//! Local socket server.
//!
//! Accepts short-lived local connections, reads one payload per connection
//! (terminated by the peer closing its write side), and forwards each
//! payload to a caller-supplied handler. The accept loop never blocks on a
//! handler and never stops for a single bad connection.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::queue::{Message, QueueError};

/// Socket kind discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketKind {
    /// Unix domain socket (local IPC).
    #[default]
    Uds,
    /// TCP socket (network).
    Tcp,
}

/// Socket listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Socket kind discriminator.
    #[serde(rename = "type")]
    pub kind: SocketKind,
    /// Filesystem path for uds, host:port for tcp.
    pub listen: String,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            kind: SocketKind::Uds,
            listen: "/var/run/mta2amqp.sock".to_string(),
        }
    }
}

impl SocketConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::MissingField("input.listen"));
        }
        Ok(())
    }
}

/// Errors raised while setting up or tearing down the listener.
/// All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("Socket file {0} exists and is already in use")]
    AddressInUse(PathBuf),

    #[error("Failed to bind {0}: {1}")]
    Bind(String, #[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Receives one payload per accepted connection.
pub trait PayloadHandler: Send + Sync {
    fn handle(&self, message: Message) -> BoxFuture<'static, Result<(), QueueError>>;
}

enum Listener {
    Uds(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    async fn accept(&self) -> io::Result<(Box<dyn AsyncRead + Send + Unpin>, String)> {
        match self {
            Listener::Uds(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((Box::new(stream), format!("{:?}", addr)))
            }
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok((Box::new(stream), addr.to_string()))
            }
        }
    }
}

/// Local socket server.
///
/// `start` binds the listener and spawns the accept loop; each accepted
/// connection runs on its own task, tracked so that shutdown can wait
/// (bounded) for in-flight payloads instead of sleeping blindly.
pub struct SocketServer {
    config: SocketConfig,
    shutdown: CancellationToken,
    handlers: TaskTracker,
}

impl SocketServer {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            handlers: TaskTracker::new(),
        }
    }

    /// Bind the listener and start accepting connections.
    ///
    /// A leftover socket file is probed with a trial connection first: if
    /// something answers, the address is genuinely in use and startup fails;
    /// otherwise the stale file is removed. On cancellation the listener is
    /// closed and the socket file removed.
    pub async fn start(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn PayloadHandler>,
    ) -> Result<(), SocketError> {
        self.recover_stale_socket().await?;

        let listener = self.bind().await?;
        info!(
            kind = ?self.config.kind,
            listen = %self.config.listen,
            "Listening for bounce reports"
        );

        let shutdown = self.shutdown.clone();
        let handlers = self.handlers.clone();
        tokio::spawn(Self::accept_loop(listener, shutdown, handlers, handler));

        let config = self.config.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            info!("Shutting down socket server");
            if let Err(e) = close_listener(&config, &shutdown) {
                warn!(error = %e, "Failed to close socket cleanly");
            }
        });

        Ok(())
    }

    /// Stop the listener and remove the socket file. Both operations are
    /// attempted even if the first fails; the first error is surfaced.
    pub fn close(&self) -> Result<(), SocketError> {
        close_listener(&self.config, &self.shutdown)
    }

    /// Wait (bounded) for in-flight connection handlers to finish.
    ///
    /// Returns `false` if the grace window expired with handlers still
    /// running.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.handlers.close();
        tokio::time::timeout(grace, self.handlers.wait())
            .await
            .is_ok()
    }

    async fn recover_stale_socket(&self) -> Result<(), SocketError> {
        if self.config.kind != SocketKind::Uds {
            return Ok(());
        }
        let path = Path::new(&self.config.listen);
        if !path.exists() {
            return Ok(());
        }

        // A trial connection distinguishes an active listener from a stale
        // file left behind by an unclean shutdown.
        match UnixStream::connect(path).await {
            Ok(_) => Err(SocketError::AddressInUse(path.to_path_buf())),
            Err(_) => {
                info!(path = %path.display(), "Removing stale socket file");
                std::fs::remove_file(path)?;
                Ok(())
            }
        }
    }

    async fn bind(&self) -> Result<Listener, SocketError> {
        match self.config.kind {
            SocketKind::Uds => UnixListener::bind(&self.config.listen)
                .map(Listener::Uds)
                .map_err(|e| SocketError::Bind(self.config.listen.clone(), e)),
            SocketKind::Tcp => TcpListener::bind(&self.config.listen)
                .await
                .map(Listener::Tcp)
                .map_err(|e| SocketError::Bind(self.config.listen.clone(), e)),
        }
    }

    async fn accept_loop(
        listener: Listener,
        shutdown: CancellationToken,
        handlers: TaskTracker,
        handler: Arc<dyn PayloadHandler>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    // Deliberate close, not a fault.
                    debug!("Listener closed, stopping accept loop");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&handler);
                        handlers.spawn(Self::handle_connection(stream, peer, handler));
                    }
                    Err(e) => {
                        // Transient accept errors must never stop the server.
                        warn!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }
    }

    async fn handle_connection(
        mut stream: Box<dyn AsyncRead + Send + Unpin>,
        peer: String,
        handler: Arc<dyn PayloadHandler>,
    ) {
        debug!(peer = %peer, "Accepted connection");

        let mut payload = Vec::new();
        if let Err(e) = stream.read_to_end(&mut payload).await {
            error!(peer = %peer, error = %e, "Failed to read payload");
            return;
        }

        let bytes = payload.len();
        match handler.handle(Message::new(payload)).await {
            Ok(()) => debug!(peer = %peer, bytes, "Payload forwarded"),
            Err(e) => error!(peer = %peer, bytes, error = %e, "Failed to forward payload"),
        }
    }
}

fn close_listener(config: &SocketConfig, shutdown: &CancellationToken) -> Result<(), SocketError> {
    let mut first_err = None;

    if config.kind == SocketKind::Uds {
        if let Err(e) = std::fs::remove_file(&config.listen) {
            if e.kind() != io::ErrorKind::NotFound {
                first_err = Some(SocketError::Io(e));
            }
        }
    }

    // Unblocks the accept loop, which drops the listener on exit.
    shutdown.cancel();

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SocketConfig::default();
        assert_eq!(config.kind, SocketKind::Uds);
        assert_eq!(config.listen, "/var/run/mta2amqp.sock");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_rejects_empty_listen() {
        let config = SocketConfig {
            kind: SocketKind::Uds,
            listen: String::new(),
        };
        assert!(config.validate().is_err());
    }
}
