//! mta2amqp - MTA bounce report bridge
//!
//! Accepts opaque DSN (bounce report) payloads from a mail transfer agent
//! over a local socket and republishes each payload onto a durable message
//! broker for downstream parsing.

pub mod config;
pub mod daemon;
pub mod logging;
pub mod queue;
pub mod socket;
