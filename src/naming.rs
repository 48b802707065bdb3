//! Deterministic metric-name taxonomy.
//!
//! Metric identifiers follow the collector's conventions: a fixed prefix per
//! partition (`ok`, `ko`, `a` for all records, `h` for hits) joined with a
//! fixed suffix per statistic. Percentile names are derived once at setup
//! from the configured percentile list and reused every window.

use crate::sender::sanitize_name;
use tracing::{error, warn};

const METRIC_SEPARATOR: &str = ".";
const METRIC_OK_PREFIX: &str = "ok";
const METRIC_KO_PREFIX: &str = "ko";
const METRIC_ALL_PREFIX: &str = "a";
const METRIC_HITS_PREFIX: &str = "h";

const METRIC_COUNT: &str = "count";
const METRIC_MIN: &str = "min";
const METRIC_MAX: &str = "max";
const METRIC_AVG: &str = "avg";
const METRIC_STDDEV: &str = "stddev";
const METRIC_PERCENTILE: &str = "pct";

const PERCENTILE_SEPARATOR: char = ';';

/// Parse a semicolon-separated percentile list.
///
/// Empty entries are skipped silently. Entries that do not parse as a float
/// or fall outside (0, 100) are logged and skipped, never fatal. Duplicates
/// collapse to the first occurrence; configuration order is preserved.
pub fn parse_percentiles(spec: &str) -> Vec<f64> {
    let mut values: Vec<f64> = Vec::new();
    for entry in spec.split(PERCENTILE_SEPARATOR) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.parse::<f64>() {
            Ok(value) if value > 0.0 && value < 100.0 => {
                if !values.iter().any(|v| (*v - value).abs() < f64::EPSILON) {
                    values.push(value);
                }
            }
            Ok(value) => {
                warn!("percentile {} outside (0, 100), skipping", value);
            }
            Err(e) => {
                error!("error parsing percentile '{}': {}", entry, e);
            }
        }
    }
    values
}

/// Render a percentile with at most two decimal digits, trailing zeros
/// trimmed: `90.0` becomes `"90"`, `99.9` becomes `"99.9"`.
fn format_percentile(value: f64) -> String {
    let mut text = format!("{:.2}", value);
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    text
}

/// One partition's precomputed metric identifiers.
#[derive(Debug, Clone)]
pub struct PartitionNames {
    pub count: String,
    pub min: String,
    pub max: String,
    pub avg: String,
    pub stddev: String,
    /// Percentile metric names paired with the percentile they query,
    /// in configuration order.
    pub percentiles: Vec<(String, f64)>,
}

impl PartitionNames {
    fn new(prefix: &str, percentiles: &[f64]) -> Self {
        let name = |suffix: &str| format!("{}{}{}", prefix, METRIC_SEPARATOR, suffix);
        let percentiles = percentiles
            .iter()
            .map(|&p| {
                let formatted = sanitize_name(&format_percentile(p));
                let metric = format!(
                    "{}{}{}{}",
                    prefix, METRIC_SEPARATOR, METRIC_PERCENTILE, formatted
                );
                (metric, p)
            })
            .collect();
        Self {
            count: name(METRIC_COUNT),
            min: name(METRIC_MIN),
            max: name(METRIC_MAX),
            avg: name(METRIC_AVG),
            stddev: name(METRIC_STDDEV),
            percentiles,
        }
    }
}

/// The full metric-name taxonomy, computed once at setup and reused for
/// every flush cycle.
#[derive(Debug, Clone)]
pub struct MetricNames {
    pub ok: PartitionNames,
    pub ko: PartitionNames,
    pub all: PartitionNames,
    /// Hit count shares the window with the other counters: `h.count`.
    pub hits_count: String,
}

impl MetricNames {
    pub fn new(percentiles: &[f64]) -> Self {
        Self {
            ok: PartitionNames::new(METRIC_OK_PREFIX, percentiles),
            ko: PartitionNames::new(METRIC_KO_PREFIX, percentiles),
            all: PartitionNames::new(METRIC_ALL_PREFIX, percentiles),
            hits_count: format!(
                "{}{}{}",
                METRIC_HITS_PREFIX, METRIC_SEPARATOR, METRIC_COUNT
            ),
        }
    }

    /// Build the taxonomy straight from the configured percentile string.
    pub fn from_spec(spec: &str) -> Self {
        Self::new(&parse_percentiles(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_percentiles() {
        assert_eq!(parse_percentiles("90;95;99"), vec![90.0, 95.0, 99.0]);
    }

    #[test]
    fn test_parse_skips_malformed_and_out_of_range() {
        assert_eq!(parse_percentiles("90;;abc; 95 ;0;100;-5"), vec![90.0, 95.0]);
    }

    #[test]
    fn test_parse_collapses_duplicates() {
        assert_eq!(parse_percentiles("99;99;99.9"), vec![99.0, 99.9]);
    }

    #[test]
    fn test_format_percentile_trims_zeros() {
        assert_eq!(format_percentile(90.0), "90");
        assert_eq!(format_percentile(99.9), "99.9");
        assert_eq!(format_percentile(99.99), "99.99");
    }

    #[test]
    fn test_fixed_metric_names() {
        let names = MetricNames::from_spec("90;95;99");
        assert_eq!(names.ok.count, "ok.count");
        assert_eq!(names.ko.stddev, "ko.stddev");
        assert_eq!(names.all.avg, "a.avg");
        assert_eq!(names.all.min, "a.min");
        assert_eq!(names.all.max, "a.max");
        assert_eq!(names.hits_count, "h.count");
    }

    #[test]
    fn test_percentile_metric_names() {
        let names = MetricNames::from_spec("90;99.9");
        let ok: Vec<&str> = names.ok.percentiles.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(ok, vec!["ok.pct90", "ok.pct99_9"]);
        let all: Vec<&str> = names.all.percentiles.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(all, vec!["a.pct90", "a.pct99_9"]);
    }
}
