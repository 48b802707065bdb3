use crate::sender::SenderKind;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Graphite telemetry pipeline - aggregates load-test outcomes and ships
/// per-second statistics to a collector
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Sender implementation used to deliver metrics
    #[clap(long, value_enum, default_value_t = SenderKind::Text, help_heading = "Collector Options")]
    pub sender: SenderKind,

    /// Collector host
    #[clap(long, default_value = "127.0.0.1", help_heading = "Collector Options")]
    pub host: String,

    /// Collector port
    #[clap(short = 'p', long, default_value_t = crate::defaults::COLLECTOR_PORT, help_heading = "Collector Options")]
    pub port: u16,

    /// Root prefix prepended to every metric path
    #[clap(long, default_value = crate::defaults::ROOT_PREFIX, help_heading = "Collector Options")]
    pub prefix: String,

    /// Only report the cumulative summary, skipping per-endpoint aggregates
    #[clap(long, default_value_t = crate::defaults::SUMMARY_ONLY, action = clap::ArgAction::Set, help_heading = "Aggregation Options")]
    pub summary_only: bool,

    /// Semicolon-separated endpoint labels to aggregate individually
    /// (a regular expression with --regex-filter)
    #[clap(long, default_value = "", help_heading = "Aggregation Options")]
    pub filter_endpoints: String,

    /// Interpret --filter-endpoints as a regular expression matched against
    /// the whole label
    #[clap(long, default_value_t = false, help_heading = "Aggregation Options")]
    pub regex_filter: bool,

    /// Semicolon-separated percentiles to emit per partition
    #[clap(long, default_value = crate::defaults::PERCENTILES, help_heading = "Aggregation Options")]
    pub percentiles: String,

    /// How long to generate synthetic load
    #[clap(short = 'd', long, value_parser = parse_duration, default_value = "10s", help_heading = "Workload Options")]
    pub duration: Duration,

    /// Number of distinct synthetic endpoint labels
    #[clap(long, default_value_t = 3, help_heading = "Workload Options")]
    pub endpoint_count: usize,

    /// Records per generated batch
    #[clap(long, default_value_t = 64, help_heading = "Workload Options")]
    pub batch_size: usize,

    /// Number of concurrent producer tasks
    #[clap(short = 'c', long, default_value_t = crate::defaults::PRODUCERS, help_heading = "Workload Options")]
    pub producers: usize,
}

/// Configuration consumed by the pipeline lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub sender: SenderKind,
    pub host: String,
    pub port: u16,
    pub prefix: String,
    pub summary_only: bool,
    pub endpoint_filter: String,
    pub regex_filter: bool,
    pub percentiles: String,
}

impl From<&Args> for PipelineConfig {
    fn from(args: &Args) -> Self {
        Self {
            sender: args.sender,
            host: args.host.clone(),
            port: args.port,
            prefix: args.prefix.clone(),
            summary_only: args.summary_only,
            endpoint_filter: args.filter_endpoints.clone(),
            regex_filter: args.regex_filter,
            percentiles: args.percentiles.clone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sender: SenderKind::Text,
            host: "127.0.0.1".to_string(),
            port: crate::defaults::COLLECTOR_PORT,
            prefix: crate::defaults::ROOT_PREFIX.to_string(),
            summary_only: crate::defaults::SUMMARY_ONLY,
            endpoint_filter: String::new(),
            regex_filter: false,
            percentiles: crate::defaults::PERCENTILES.to_string(),
        }
    }
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;

    let duration = match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs(num as u64),
        "m" => Duration::from_secs((num * 60.0) as u64),
        "h" => Duration::from_secs((num * 3600.0) as u64),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.port, 2003);
        assert_eq!(config.prefix, "jmeter.");
        assert!(config.summary_only);
        assert_eq!(config.percentiles, "90;95;99");
    }

    #[test]
    fn test_config_from_args() {
        let args = Args::parse_from([
            "graphite-telemetry",
            "--host",
            "collector.internal",
            "--summary-only",
            "false",
            "--filter-endpoints",
            "login;search",
            "--percentiles",
            "50;99.9",
        ]);
        let config = PipelineConfig::from(&args);
        assert_eq!(config.host, "collector.internal");
        assert!(!config.summary_only);
        assert_eq!(config.endpoint_filter, "login;search");
        assert!(!config.regex_filter);
        assert_eq!(config.percentiles, "50;99.9");
    }
}
