use thiserror::Error;

/// Errors surfaced by pipeline setup and metric transmission.
///
/// Recoverable conditions (malformed percentile entries, sender transmission
/// failures, scheduler shutdown timeouts) are logged and skipped rather than
/// represented here; anything else is a contract violation reported to the
/// caller of the lifecycle method in progress.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The endpoint filter was configured as a regular expression that does
    /// not compile.
    #[error("invalid endpoint filter pattern: {0}")]
    InvalidFilterPattern(#[from] regex::Error),

    /// Latency histogram construction failed.
    #[error("failed to construct latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::errors::CreationError),

    /// The sender could not reach the collector.
    #[error("metrics transmission failed: {0}")]
    Transport(#[from] std::io::Error),
}
