use crate::error::PipelineError;
use crate::record::OutcomeRecord;
use crate::stats::LatencyStats;
use std::collections::HashMap;

/// Per-endpoint running statistics for one flush window.
///
/// Three latency accumulators partition the traffic: *ok* sees successes,
/// *ko* sees failures, *all* sees every record. Counters satisfy
/// `total == successes + failures` at all times; `reset` zeroes everything
/// while preserving the aggregate's identity in the registry.
#[derive(Debug, Clone)]
pub struct Aggregate {
    ok: LatencyStats,
    ko: LatencyStats,
    all: LatencyStats,
    successes: u64,
    failures: u64,
    hits: u64,
}

impl Aggregate {
    pub fn new() -> Result<Self, PipelineError> {
        Ok(Self {
            ok: LatencyStats::new()?,
            ko: LatencyStats::new()?,
            all: LatencyStats::new()?,
            successes: 0,
            failures: 0,
            hits: 0,
        })
    }

    /// Fold one outcome record into this aggregate.
    pub fn add(&mut self, record: &OutcomeRecord) {
        if record.success {
            self.successes += 1;
            self.ok.add(record.latency);
        } else {
            self.failures += 1;
            self.ko.add(record.latency);
        }
        self.all.add(record.latency);
        self.hits += record.hits;
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn ok_stats(&self) -> &LatencyStats {
        &self.ok
    }

    pub fn ko_stats(&self) -> &LatencyStats {
        &self.ko
    }

    pub fn all_stats(&self) -> &LatencyStats {
        &self.all
    }

    /// Clear counters and accumulators for the next window.
    pub fn reset(&mut self) {
        self.ok.reset();
        self.ko.reset();
        self.all.reset();
        self.successes = 0;
        self.failures = 0;
        self.hits = 0;
    }
}

/// Endpoint-name to aggregate mapping, plus the distinguished cumulative
/// aggregate that observes every record regardless of filtering.
///
/// Aggregates are created lazily on the first record for a new label and
/// live for the rest of the run; flushes reset them in place.
#[derive(Debug)]
pub struct AggregateRegistry {
    endpoints: HashMap<String, Aggregate>,
    cumulative: Aggregate,
    /// Prototype cloned for lazy endpoint creation; histogram construction
    /// is fallible, cloning is not.
    template: Aggregate,
}

impl AggregateRegistry {
    pub fn new() -> Result<Self, PipelineError> {
        let template = Aggregate::new()?;
        Ok(Self {
            endpoints: HashMap::new(),
            cumulative: template.clone(),
            template,
        })
    }

    /// Aggregate for `label`, created on first use.
    pub fn endpoint_mut(&mut self, label: &str) -> &mut Aggregate {
        self.endpoints
            .entry(label.to_string())
            .or_insert_with(|| self.template.clone())
    }

    pub fn cumulative(&self) -> &Aggregate {
        &self.cumulative
    }

    pub fn cumulative_mut(&mut self) -> &mut Aggregate {
        &mut self.cumulative
    }

    pub fn endpoints(&self) -> impl Iterator<Item = (&str, &Aggregate)> {
        self.endpoints.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn endpoints_mut(&mut self) -> impl Iterator<Item = (&str, &mut Aggregate)> {
        self.endpoints.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(label: &str, success: bool, ms: u64) -> OutcomeRecord {
        OutcomeRecord::new(label, success, Duration::from_millis(ms))
    }

    #[test]
    fn test_fold_partitions_by_outcome() {
        let mut aggregate = Aggregate::new().unwrap();
        aggregate.add(&record("login", true, 100));
        aggregate.add(&record("login", true, 200));
        aggregate.add(&record("login", false, 50));

        assert_eq!(aggregate.successes(), 2);
        assert_eq!(aggregate.failures(), 1);
        assert_eq!(aggregate.total(), 3);
        assert_eq!(aggregate.hits(), 3);
        assert_eq!(aggregate.ok_stats().count(), 2);
        assert_eq!(aggregate.ko_stats().count(), 1);
        assert_eq!(aggregate.all_stats().count(), 3);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut aggregate = Aggregate::new().unwrap();
        aggregate.add(&record("login", true, 100));
        aggregate.reset();

        assert_eq!(aggregate.total(), 0);
        assert_eq!(aggregate.hits(), 0);
        assert_eq!(aggregate.ok_stats().count(), 0);
        assert_eq!(aggregate.all_stats().count(), 0);
    }

    #[test]
    fn test_registry_creates_lazily_and_keeps_identity() {
        let mut registry = AggregateRegistry::new().unwrap();
        assert!(registry.is_empty());

        registry.endpoint_mut("login").add(&record("login", true, 10));
        registry.endpoint_mut("login").add(&record("login", false, 20));
        assert_eq!(registry.len(), 1);

        let aggregate = registry.endpoint_mut("login");
        assert_eq!(aggregate.total(), 2);
        aggregate.reset();
        // Reset keeps the entry alive for the rest of the run.
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.endpoint_mut("login").total(), 0);
    }

    #[test]
    fn test_cumulative_is_independent_of_endpoints() {
        let mut registry = AggregateRegistry::new().unwrap();
        registry.cumulative_mut().add(&record("login", true, 10));
        registry.cumulative_mut().add(&record("search", false, 20));

        assert!(registry.is_empty());
        assert_eq!(registry.cumulative().total(), 2);
        assert_eq!(registry.cumulative().successes(), 1);
        assert_eq!(registry.cumulative().failures(), 1);
    }
}
