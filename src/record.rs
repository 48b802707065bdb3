use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single request outcome reported by the test-execution engine.
///
/// Records arrive in ordered batches; a batch may mix several endpoint
/// labels in any order. The pipeline never mutates a record after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Endpoint label grouping this record for aggregation
    pub label: String,
    /// Whether the request succeeded
    pub success: bool,
    /// Observed request latency
    pub latency: Duration,
    /// Hit-count contribution of this record
    pub hits: u64,
}

impl OutcomeRecord {
    /// Create a record with a hit contribution of one.
    pub fn new(label: impl Into<String>, success: bool, latency: Duration) -> Self {
        Self {
            label: label.into(),
            success,
            latency,
            hits: 1,
        }
    }
}
