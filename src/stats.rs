use crate::error::PipelineError;
use hdrhistogram::Histogram;
use std::time::Duration;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Highest latency the histogram tracks exactly: one minute, in nanoseconds.
const MAX_TRACKABLE_NANOS: u64 = 60_000_000_000;

/// Running statistics over a set of latency samples.
///
/// Backed by an HDR histogram with three significant figures covering
/// 1 ns to one minute. Samples are recorded with nanosecond precision;
/// queries report milliseconds, which is what the collector expects for
/// response-time metrics.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    histogram: Histogram<u64>,
}

impl LatencyStats {
    pub fn new() -> Result<Self, PipelineError> {
        let histogram = Histogram::<u64>::new_with_bounds(1, MAX_TRACKABLE_NANOS, 3)?;
        Ok(Self { histogram })
    }

    /// Record one latency sample. Values above one minute clamp to the
    /// histogram's upper bound rather than failing the fold.
    pub fn add(&mut self, latency: Duration) {
        self.histogram.saturating_record(latency.as_nanos() as u64);
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn min_ms(&self) -> f64 {
        self.histogram.min() as f64 / NANOS_PER_MILLI
    }

    pub fn max_ms(&self) -> f64 {
        self.histogram.max() as f64 / NANOS_PER_MILLI
    }

    pub fn mean_ms(&self) -> f64 {
        self.histogram.mean() / NANOS_PER_MILLI
    }

    pub fn stddev_ms(&self) -> f64 {
        self.histogram.stdev() / NANOS_PER_MILLI
    }

    /// Latency at percentile `p`, where `p` is in (0, 100).
    pub fn percentile_ms(&self, p: f64) -> f64 {
        self.histogram.value_at_percentile(p) as f64 / NANOS_PER_MILLI
    }

    /// Clear all samples, keeping the configured precision.
    pub fn reset(&mut self) {
        self.histogram.reset();
    }
}
