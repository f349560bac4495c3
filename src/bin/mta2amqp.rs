//! mta2amqp: MTA bounce report bridge daemon.
//!
//! Reads bounce (DSN) payloads from a local socket, one payload per
//! connection, and republishes each onto the configured message broker.
//!
//! ## Configuration
//! - `config.yaml` in the working directory, or `MTA2AMQP_CONFIG`
//! - `MTA2AMQP`-prefixed environment variables (e.g. `MTA2AMQP_QUEUE__URI`)
//! - `MTA2AMQP_LOG`: tracing filter override

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mta2amqp::config::Config;
use mta2amqp::{daemon, logging};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(None)?;
    logging::init(&config.log)?;

    config.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    info!("Starting mta2amqp");

    let cancel = CancellationToken::new();
    let mut bridge = tokio::spawn(daemon::run(config, cancel.clone()));

    tokio::select! {
        // Startup failure or unexpected bridge exit.
        res = &mut bridge => res??,
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            cancel.cancel();
            bridge.await??;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
