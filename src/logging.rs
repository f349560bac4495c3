//! Logging setup.
//!
//! Builds the tracing subscriber once at startup from an explicit
//! configuration object enumerating level and sinks; no process-wide level
//! mutation happens afterwards.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LOG_ENV_VAR;

/// Log level discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log sink discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSinkKind {
    Stdout,
    File,
}

/// One log sink.
#[derive(Debug, Clone, Deserialize)]
pub struct LogOutput {
    #[serde(rename = "type")]
    pub kind: LogSinkKind,
    /// Required for file sinks.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration. An empty output list means stdout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub outputs: Vec<LogOutput>,
}

/// Install the global subscriber.
///
/// `MTA2AMQP_LOG` overrides the configured level with a full env-filter
/// expression when set.
pub fn init(config: &LogConfig) -> io::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer(&config.outputs)?))
        .init();

    Ok(())
}

fn make_writer(outputs: &[LogOutput]) -> io::Result<BoxMakeWriter> {
    let mut writer: Option<BoxMakeWriter> = None;

    for output in outputs {
        let next = match output.kind {
            LogSinkKind::Stdout => BoxMakeWriter::new(io::stdout),
            LogSinkKind::File => {
                let path = output.path.as_ref().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "file log output requires a path",
                    )
                })?;
                let file = Arc::new(OpenOptions::new().create(true).append(true).open(path)?);
                BoxMakeWriter::new(move || Arc::clone(&file))
            }
        };
        writer = Some(match writer {
            Some(current) => BoxMakeWriter::new(current.and(next)),
            None => next,
        });
    }

    Ok(writer.unwrap_or_else(|| BoxMakeWriter::new(io::stdout)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_is_info() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert!(config.outputs.is_empty());
    }

    #[test]
    fn test_level_as_str() {
        assert_eq!(LogLevel::Debug.as_str(), "debug");
        assert_eq!(LogLevel::Error.as_str(), "error");
    }

    #[test]
    fn test_file_output_without_path_is_rejected() {
        let outputs = vec![LogOutput {
            kind: LogSinkKind::File,
            path: None,
        }];
        assert!(make_writer(&outputs).is_err());
    }

    #[test]
    fn test_file_output_opens_writer() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = vec![
            LogOutput {
                kind: LogSinkKind::Stdout,
                path: None,
            },
            LogOutput {
                kind: LogSinkKind::File,
                path: Some(dir.path().join("mta2amqp.log")),
            },
        ];
        assert!(make_writer(&outputs).is_ok());
    }
}
