use crate::error::PipelineError;
use regex::Regex;
use std::collections::HashSet;

/// Selects which endpoint labels receive per-endpoint aggregates.
///
/// The cumulative aggregate is unaffected by filtering; it observes every
/// record regardless of which variant is active.
#[derive(Debug, Clone)]
pub enum EndpointFilter {
    /// Per-endpoint aggregation disabled; only the cumulative aggregate runs.
    SummaryOnly,
    /// Explicit whitelist of endpoint labels.
    List(HashSet<String>),
    /// Regular expression matched against the whole label.
    Pattern(Regex),
}

impl EndpointFilter {
    /// Build the filter from configuration.
    ///
    /// `spec` is a semicolon-separated label list, or a regular expression
    /// when `use_regex` is set. The pattern is anchored so it must match the
    /// entire label. Summary-only mode wins over both.
    pub fn from_config(
        summary_only: bool,
        spec: &str,
        use_regex: bool,
    ) -> Result<Self, PipelineError> {
        if summary_only {
            return Ok(Self::SummaryOnly);
        }
        if use_regex {
            let anchored = format!("^(?:{})$", spec);
            return Ok(Self::Pattern(Regex::new(&anchored)?));
        }
        let labels = spec
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Ok(Self::List(labels))
    }

    /// Whether `label` gets its own aggregate.
    pub fn admits(&self, label: &str) -> bool {
        match self {
            Self::SummaryOnly => false,
            Self::List(labels) => labels.contains(label),
            Self::Pattern(pattern) => pattern.is_match(label),
        }
    }
}
