//! # Graphite Telemetry Pipeline
//!
//! An in-process telemetry aggregation and periodic dispatch pipeline for
//! load-testing engines. The engine feeds batches of per-request outcome
//! records into the pipeline; the pipeline folds them into per-endpoint
//! running statistics over a fixed one-second window and pushes each
//! window's aggregated metrics to a Graphite-compatible collector.
//!
//! ## Architecture Overview
//!
//! - **Ingestion grouper**: partitions incoming batches by endpoint label
//!   so that consecutive traffic for one endpoint is folded under a single
//!   lock acquisition; heterogeneous batches force an out-of-band flush.
//! - **Aggregate registry**: one aggregate per endpoint (success, failure,
//!   and all-records latency partitions plus counters) and a distinguished
//!   cumulative aggregate that observes every record regardless of the
//!   endpoint filter.
//! - **Flush scheduler**: a background task that snapshots, emits, and
//!   resets every non-empty aggregate once per second.
//! - **Metric naming taxonomy**: deterministic metric identifiers computed
//!   once at setup (`ok.count`, `a.pct99`, ...), reused every window.
//! - **Senders**: pluggable transports implementing the
//!   [`MetricsSender`] contract; the plaintext Graphite TCP sender is the
//!   default.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use graphite_telemetry::{OutcomeRecord, PipelineConfig, TelemetryPipeline};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::default();
//!     let pipeline = TelemetryPipeline::start(&config)?;
//!
//!     pipeline
//!         .ingest(vec![OutcomeRecord::new("login", true, Duration::from_millis(42))])
//!         .await;
//!
//!     // Stops the scheduler, flushes buffered records, releases the sender.
//!     pipeline.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! Any number of producer tasks may call [`TelemetryPipeline::ingest`]
//! concurrently. A single mutex serializes registry access and the pending
//! buffer; collector I/O always happens outside that lock, so a slow or
//! unreachable collector delays only the task that initiated that flush.
//! Delivery is at most once per window: after a transmission attempt the
//! window's state is cleared regardless of the outcome.

/// Per-endpoint aggregates and the shared registry
///
/// Each aggregate partitions its traffic into ok/ko/all latency
/// accumulators with success, failure, and hit counters; the registry adds
/// the cumulative aggregate fed by every record.
pub mod aggregate;

/// Command-line interface and pipeline configuration
pub mod cli;

/// Library error type
pub mod error;

/// Endpoint filtering (summary-only, explicit list, or regex)
pub mod filter;

/// Colorized tracing formatter for the workload driver binary
pub mod logging;

/// Percentile parsing and the deterministic metric-name taxonomy
pub mod naming;

/// The aggregation-and-dispatch engine: ingestion grouping, flush
/// scheduling, and lifecycle control
pub mod pipeline;

/// Outcome record input type
pub mod record;

/// Metric transport abstraction and the Graphite senders
pub mod sender;

/// Latency statistics accumulator backed by HDR histograms
pub mod stats;

// Re-export the types that embedding engines interact with.

pub use cli::{Args, PipelineConfig};
pub use error::PipelineError;
pub use pipeline::TelemetryPipeline;
pub use record::OutcomeRecord;
pub use sender::{DispatchTuple, MetricsSender, SenderKind};

/// The current version of the pipeline crate, from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default Graphite plaintext-protocol port
    pub const COLLECTOR_PORT: u16 = 2003;

    /// Default metric-path root prefix
    ///
    /// Kept as `jmeter.` for drop-in compatibility with dashboards built
    /// against JMeter's Graphite listener.
    pub const ROOT_PREFIX: &str = "jmeter.";

    /// Default percentile configuration, semicolon-separated
    pub const PERCENTILES: &str = "90;95;99";

    /// Per-endpoint aggregation is off unless endpoints are filtered in
    pub const SUMMARY_ONLY: bool = true;

    /// Flush period in whole seconds
    ///
    /// The collector stores per-second datapoints; changing this skews
    /// every rate computed downstream.
    pub const FLUSH_PERIOD_SECS: u64 = 1;

    /// Grace period for scheduler shutdown, in seconds
    pub const SHUTDOWN_GRACE_SECS: u64 = 30;

    /// Default number of concurrent producer tasks in the workload driver
    pub const PRODUCERS: usize = 2;
}
