//! Metric transport abstraction and implementations.
//!
//! The flush cycle hands each window's metrics to a [`MetricsSender`]:
//! tuples are buffered with `add_metric` and shipped with `write_and_send`,
//! which clears the buffer whether or not transmission succeeded. Delivery
//! is therefore at most once per window; a collector outage loses that
//! window rather than blocking the pipeline.

use crate::error::PipelineError;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// One metric observation queued for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchTuple {
    /// Window timestamp in whole epoch seconds
    pub timestamp: u64,
    /// Context name (sanitized endpoint label)
    pub context: String,
    /// Metric name within the context, e.g. `ok.pct95`
    pub name: String,
    /// Value rendered as text
    pub value: String,
}

/// Transport used by the flush cycle to deliver one window's metrics.
///
/// Setup parameters (host, port, root prefix) are supplied to the concrete
/// implementation's constructor.
#[async_trait]
pub trait MetricsSender: Send {
    /// Buffer one metric tuple for the next transmission.
    fn add_metric(&mut self, timestamp: u64, context: &str, name: &str, value: &str);

    /// Serialize and transmit every buffered tuple.
    ///
    /// The buffer is cleared regardless of the transmission outcome.
    async fn write_and_send(&mut self) -> Result<(), PipelineError>;

    /// Release transport resources.
    async fn destroy(&mut self);
}

/// Available sender implementations, selected by configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum SenderKind {
    /// Plaintext Graphite protocol over TCP
    #[clap(name = "text")]
    Text,
    /// Log each tuple instead of transmitting
    #[clap(name = "console")]
    Console,
}

impl std::fmt::Display for SenderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderKind::Text => write!(f, "text"),
            SenderKind::Console => write!(f, "console"),
        }
    }
}

/// Build the configured sender implementation.
pub fn create_sender(
    kind: SenderKind,
    host: &str,
    port: u16,
    prefix: &str,
) -> Box<dyn MetricsSender> {
    match kind {
        SenderKind::Text => Box::new(TextGraphiteSender::new(host, port, prefix)),
        SenderKind::Console => Box::new(ConsoleSender::new(prefix)),
    }
}

/// Replace characters the collector cannot accept in a metric path segment.
/// Anything other than ASCII alphanumerics, `-` and `_` becomes `_`.
pub fn sanitize_name(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Plaintext-protocol Graphite sender.
///
/// Each tuple becomes one line, `<prefix><context>.<name> <value> <timestamp>`,
/// written over a fresh TCP connection on every transmission.
pub struct TextGraphiteSender {
    host: String,
    port: u16,
    prefix: String,
    payload: String,
    queued: usize,
}

impl TextGraphiteSender {
    pub fn new(host: impl Into<String>, port: u16, prefix: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            prefix: prefix.into(),
            payload: String::new(),
            queued: 0,
        }
    }
}

#[async_trait]
impl MetricsSender for TextGraphiteSender {
    fn add_metric(&mut self, timestamp: u64, context: &str, name: &str, value: &str) {
        // Writing to a String cannot fail.
        let _ = writeln!(
            self.payload,
            "{}{}.{} {} {}",
            self.prefix, context, name, value, timestamp
        );
        self.queued += 1;
    }

    async fn write_and_send(&mut self) -> Result<(), PipelineError> {
        let payload = std::mem::take(&mut self.payload);
        let queued = std::mem::take(&mut self.queued);
        if payload.is_empty() {
            return Ok(());
        }
        debug!("sending {} metrics to {}:{}", queued, self.host, self.port);
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.write_all(payload.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn destroy(&mut self) {
        self.payload.clear();
        self.queued = 0;
    }
}

/// Sender that logs each tuple instead of transmitting it.
///
/// Useful for dry runs and demos where no collector is listening.
pub struct ConsoleSender {
    prefix: String,
    buffer: Vec<DispatchTuple>,
}

impl ConsoleSender {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            buffer: Vec::new(),
        }
    }
}

#[async_trait]
impl MetricsSender for ConsoleSender {
    fn add_metric(&mut self, timestamp: u64, context: &str, name: &str, value: &str) {
        self.buffer.push(DispatchTuple {
            timestamp,
            context: context.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    async fn write_and_send(&mut self) -> Result<(), PipelineError> {
        for tuple in self.buffer.drain(..) {
            info!(
                "{}{}.{} {} {}",
                self.prefix, tuple.context, tuple.name, tuple.value, tuple.timestamp
            );
        }
        Ok(())
    }

    async fn destroy(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("login"), "login");
        assert_eq!(sanitize_name("GET /users/:id"), "GET__users__id");
        assert_eq!(sanitize_name("99.9"), "99_9");
        assert_eq!(sanitize_name("api-v2_search"), "api-v2_search");
    }

    #[test]
    fn test_text_sender_line_format() {
        let mut sender = TextGraphiteSender::new("localhost", 2003, "jmeter.");
        sender.add_metric(1700000000, "login", "ok.count", "42");
        sender.add_metric(1700000000, "login", "a.pct95", "123.5");

        assert_eq!(sender.queued, 2);
        assert_eq!(
            sender.payload,
            "jmeter.login.ok.count 42 1700000000\njmeter.login.a.pct95 123.5 1700000000\n"
        );
    }

    #[tokio::test]
    async fn test_empty_send_is_a_no_op() {
        let mut sender = TextGraphiteSender::new("localhost", 1, "jmeter.");
        // No metrics queued, so no connection is attempted.
        sender.write_and_send().await.unwrap();
    }

    #[tokio::test]
    async fn test_console_sender_clears_buffer() {
        let mut sender = ConsoleSender::new("jmeter.");
        sender.add_metric(1, "a", "ok.count", "1");
        assert_eq!(sender.buffer.len(), 1);
        sender.write_and_send().await.unwrap();
        assert!(sender.buffer.is_empty());
    }
}
