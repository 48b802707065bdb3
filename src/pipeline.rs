//! The aggregation-and-dispatch engine.
//!
//! Producers hand ordered batches of [`OutcomeRecord`]s to
//! [`TelemetryPipeline::ingest`]. Records are grouped by endpoint label to
//! amortize lock acquisitions: consecutive records for one label accumulate
//! in a pending buffer, and as soon as a batch proves heterogeneous the
//! buffered run is folded into the registry and a flush cycle is forced
//! out of band. A background scheduler additionally flushes once per second
//! regardless of ingestion volume.
//!
//! A single mutex guards the aggregate registry, the pending buffer, and
//! the endpoint filter. Flush cycles snapshot and reset aggregates under
//! that lock, then transmit outside it so slow collector I/O never blocks
//! producers.

use crate::aggregate::{Aggregate, AggregateRegistry};
use crate::cli::PipelineConfig;
use crate::error::PipelineError;
use crate::filter::EndpointFilter;
use crate::naming::{MetricNames, PartitionNames};
use crate::record::OutcomeRecord;
use crate::sender::{create_sender, sanitize_name, DispatchTuple, MetricsSender};
use crate::stats::LatencyStats;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Fixed flush period. The collector expects per-second datapoints.
const FLUSH_PERIOD: Duration = Duration::from_secs(crate::defaults::FLUSH_PERIOD_SECS);

/// How long shutdown waits for an in-flight scheduled flush to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(crate::defaults::SHUTDOWN_GRACE_SECS);

/// Mutable pipeline state guarded by the single shared lock.
struct CoreState {
    registry: AggregateRegistry,
    /// Records buffered for the current single-label run. The run's target
    /// label is the label of the first buffered record.
    pending: Vec<OutcomeRecord>,
    filter: EndpointFilter,
    flush_cycles: u64,
}

impl CoreState {
    /// Absorb the leading run of `batch` into the pending buffer.
    ///
    /// Records are appended while they carry the pending buffer's target
    /// label (the first record establishes it when the buffer is empty);
    /// the first record with a different label and everything after it are
    /// returned as overflow. Also counts the label transitions in `batch`,
    /// which tells the caller whether the batch held more than one group.
    fn absorb_leading_run(
        &mut self,
        batch: Vec<OutcomeRecord>,
    ) -> (usize, Vec<OutcomeRecord>) {
        let mut run_count = 0;
        let mut last_label: Option<String> = None;
        let mut target = self.pending.first().map(|r| r.label.clone());
        let mut overflow = Vec::new();
        let mut boundary_hit = false;

        for record in batch {
            if last_label.as_deref() != Some(record.label.as_str()) {
                run_count += 1;
                last_label = Some(record.label.clone());
            }
            if boundary_hit {
                overflow.push(record);
                continue;
            }
            match &target {
                Some(label) if *label == record.label => self.pending.push(record),
                Some(_) => {
                    boundary_hit = true;
                    overflow.push(record);
                }
                None => {
                    target = Some(record.label.clone());
                    self.pending.push(record);
                }
            }
        }
        (run_count, overflow)
    }

    /// Fold every pending record into the registry and clear the buffer,
    /// unsetting the target label.
    ///
    /// The filter decides per-endpoint folding; the cumulative aggregate
    /// observes every record unconditionally.
    fn fold_pending(&mut self) {
        for record in self.pending.drain(..) {
            if self.filter.admits(&record.label) {
                self.registry.endpoint_mut(&record.label).add(&record);
            }
            self.registry.cumulative_mut().add(&record);
        }
    }

    /// One flush cycle's snapshot step: emit dispatch tuples for every
    /// non-empty aggregate and reset each aggregate in place.
    ///
    /// The cumulative aggregate is folded and reset like the others but
    /// never emitted; it only feeds the in-process grand total.
    fn snapshot_and_reset(&mut self, timestamp: u64, names: &MetricNames) -> Vec<DispatchTuple> {
        let mut tuples = Vec::new();
        for (label, aggregate) in self.registry.endpoints_mut() {
            if aggregate.total() == 0 {
                continue;
            }
            let context = sanitize_name(label);
            emit_aggregate(&mut tuples, timestamp, &context, aggregate, names);
            aggregate.reset();
        }
        self.registry.cumulative_mut().reset();
        self.flush_cycles += 1;
        tuples
    }
}

/// No response-time metrics are emitted for an empty partition; counts are
/// always emitted once the aggregate saw any traffic.
fn emit_aggregate(
    tuples: &mut Vec<DispatchTuple>,
    timestamp: u64,
    context: &str,
    aggregate: &Aggregate,
    names: &MetricNames,
) {
    push(tuples, timestamp, context, &names.ok.count, aggregate.successes().to_string());
    push(tuples, timestamp, context, &names.ko.count, aggregate.failures().to_string());
    push(tuples, timestamp, context, &names.all.count, aggregate.total().to_string());
    push(tuples, timestamp, context, &names.hits_count, aggregate.hits().to_string());
    if aggregate.successes() > 0 {
        emit_partition(tuples, timestamp, context, &names.ok, aggregate.ok_stats());
    }
    if aggregate.failures() > 0 {
        emit_partition(tuples, timestamp, context, &names.ko, aggregate.ko_stats());
    }
    emit_partition(tuples, timestamp, context, &names.all, aggregate.all_stats());
}

fn emit_partition(
    tuples: &mut Vec<DispatchTuple>,
    timestamp: u64,
    context: &str,
    names: &PartitionNames,
    stats: &LatencyStats,
) {
    push(tuples, timestamp, context, &names.stddev, stats.stddev_ms().to_string());
    push(tuples, timestamp, context, &names.min, stats.min_ms().to_string());
    push(tuples, timestamp, context, &names.max, stats.max_ms().to_string());
    push(tuples, timestamp, context, &names.avg, stats.mean_ms().to_string());
    for (name, p) in &names.percentiles {
        push(tuples, timestamp, context, name, stats.percentile_ms(*p).to_string());
    }
}

fn push(
    tuples: &mut Vec<DispatchTuple>,
    timestamp: u64,
    context: &str,
    name: &str,
    value: String,
) {
    tuples.push(DispatchTuple {
        timestamp,
        context: context.to_string(),
        name: name.to_string(),
        value,
    });
}

fn epoch_seconds() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

struct PipelineInner {
    state: Mutex<CoreState>,
    sender: AsyncMutex<Box<dyn MetricsSender>>,
    names: MetricNames,
    shutdown: watch::Sender<bool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one test run's aggregation pipeline.
///
/// Cheap to clone; every clone shares the same registry, scheduler, and
/// sender, so producers can each hold their own handle.
#[derive(Clone)]
pub struct TelemetryPipeline {
    inner: Arc<PipelineInner>,
}

impl TelemetryPipeline {
    /// Set up the pipeline per `config` and start the flush scheduler.
    ///
    /// Parses the percentile list, builds the endpoint filter, constructs
    /// the configured sender, and spawns the background scheduler. Must be
    /// called within a tokio runtime.
    pub fn start(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let sender = create_sender(config.sender, &config.host, config.port, &config.prefix);
        Self::start_with_sender(config, sender)
    }

    /// Same as [`Self::start`], with a caller-supplied sender.
    pub fn start_with_sender(
        config: &PipelineConfig,
        sender: Box<dyn MetricsSender>,
    ) -> Result<Self, PipelineError> {
        let names = MetricNames::from_spec(&config.percentiles);
        let filter = EndpointFilter::from_config(
            config.summary_only,
            &config.endpoint_filter,
            config.regex_filter,
        )?;
        let registry = AggregateRegistry::new()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pipeline = Self {
            inner: Arc::new(PipelineInner {
                state: Mutex::new(CoreState {
                    registry,
                    pending: Vec::new(),
                    filter,
                    flush_cycles: 0,
                }),
                sender: AsyncMutex::new(sender),
                names,
                shutdown: shutdown_tx,
                scheduler: Mutex::new(None),
            }),
        };
        let handle = tokio::spawn(run_scheduler(pipeline.clone(), shutdown_rx));
        *pipeline.inner.scheduler.lock() = Some(handle);
        debug!("telemetry pipeline started, flushing every {:?}", FLUSH_PERIOD);
        Ok(pipeline)
    }

    /// Ingest one ordered batch of outcome records.
    ///
    /// Safe to call concurrently from multiple producers. Consecutive
    /// records for a single label stay buffered across calls; once a batch
    /// proves heterogeneous, each complete run is folded and a flush cycle
    /// is forced out of band. Records still buffered when this returns are
    /// swept up by a later call or by [`Self::shutdown`].
    pub async fn ingest(&self, mut batch: Vec<OutcomeRecord>) {
        loop {
            let tuples = {
                let mut state = self.inner.state.lock();
                let (run_count, overflow) = state.absorb_leading_run(batch);
                if overflow.is_empty() && run_count <= 1 {
                    break;
                }
                state.fold_pending();
                batch = overflow;
                state.snapshot_and_reset(epoch_seconds(), &self.inner.names)
            };
            self.dispatch(tuples).await;
        }
    }

    /// Run one flush cycle: snapshot and reset under the lock, transmit
    /// outside it. Pending buffered records are not folded here; they wait
    /// for the next ingest call or for shutdown.
    pub async fn flush(&self) {
        let tuples = {
            let mut state = self.inner.state.lock();
            state.snapshot_and_reset(epoch_seconds(), &self.inner.names)
        };
        self.dispatch(tuples).await;
    }

    async fn dispatch(&self, tuples: Vec<DispatchTuple>) {
        let mut sender = self.inner.sender.lock().await;
        for tuple in &tuples {
            sender.add_metric(tuple.timestamp, &tuple.context, &tuple.name, &tuple.value);
        }
        if let Err(e) = sender.write_and_send().await {
            // At most one delivery attempt per window; the window is lost.
            warn!("metrics transmission failed, dropping window: {}", e);
        }
    }

    /// Stop the scheduler, sweep still-buffered records through one final
    /// flush cycle, and release the sender.
    ///
    /// Cancellation only prevents future ticks; an in-flight scheduled
    /// flush is awaited for up to thirty seconds, after which a timeout is
    /// logged and shutdown proceeds anyway.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        let handle = self.inner.scheduler.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => debug!("flush scheduler terminated"),
                Ok(Err(e)) => warn!("flush scheduler task failed: {}", e),
                Err(_) => warn!(
                    "timed out after {:?} waiting for flush scheduler to stop",
                    SHUTDOWN_GRACE
                ),
            }
        }
        {
            let mut state = self.inner.state.lock();
            state.fold_pending();
        }
        self.flush().await;
        self.inner.sender.lock().await.destroy().await;
    }

    /// Number of completed flush cycles (scheduled, forced, and final).
    pub fn flush_cycles(&self) -> u64 {
        self.inner.state.lock().flush_cycles
    }

    /// Records buffered but not yet folded into any aggregate.
    pub fn buffered_records(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Grand total of records folded in the current window, including
    /// records whose endpoints the filter rejects.
    pub fn cumulative_total(&self) -> u64 {
        self.inner.state.lock().registry.cumulative().total()
    }
}

/// Background task driving scheduled flushes at the fixed period.
async fn run_scheduler(pipeline: TelemetryPipeline, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(FLUSH_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // A tokio interval fires immediately; consume the first tick so the
    // first scheduled flush lands one full period after startup.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => pipeline.flush().await,
            _ = shutdown.changed() => break,
        }
    }
    debug!("flush scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn record(label: &str, success: bool, ms: u64) -> OutcomeRecord {
        OutcomeRecord::new(label, success, Duration::from_millis(ms))
    }

    fn state_admitting_all() -> CoreState {
        CoreState {
            registry: AggregateRegistry::new().unwrap(),
            pending: Vec::new(),
            filter: EndpointFilter::Pattern(regex::Regex::new(".*").unwrap()),
            flush_cycles: 0,
        }
    }

    #[test]
    fn test_absorb_buffers_single_label_batch() {
        let mut state = state_admitting_all();
        let (run_count, overflow) =
            state.absorb_leading_run(vec![record("a", true, 1), record("a", true, 2)]);

        assert_eq!(run_count, 1);
        assert!(overflow.is_empty());
        assert_eq!(state.pending.len(), 2);
    }

    #[test]
    fn test_absorb_splits_at_first_label_change() {
        let mut state = state_admitting_all();
        let batch = vec![
            record("a", true, 100),
            record("b", true, 200),
            record("a", false, 50),
        ];
        let (run_count, overflow) = state.absorb_leading_run(batch);

        assert_eq!(run_count, 3);
        assert_eq!(state.pending.len(), 1);
        assert_eq!(state.pending[0].label, "a");
        assert!(state.pending[0].success);
        // Everything after the first boundary overflows, order preserved.
        let labels: Vec<&str> = overflow.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "a"]);
    }

    #[test]
    fn test_absorb_respects_existing_target_label() {
        let mut state = state_admitting_all();
        state.pending.push(record("a", true, 1));

        let (run_count, overflow) =
            state.absorb_leading_run(vec![record("b", true, 2), record("b", true, 3)]);
        assert_eq!(run_count, 1);
        assert_eq!(overflow.len(), 2);
        assert_eq!(state.pending.len(), 1);
    }

    #[test]
    fn test_fold_pending_applies_filter_but_not_to_cumulative() {
        let mut state = state_admitting_all();
        let mut admitted = HashSet::new();
        admitted.insert("a".to_string());
        state.filter = EndpointFilter::List(admitted);

        state.pending = vec![
            record("a", true, 10),
            record("b", true, 20),
            record("b", false, 30),
        ];
        state.fold_pending();

        assert!(state.pending.is_empty());
        assert_eq!(state.registry.len(), 1);
        assert_eq!(state.registry.endpoint_mut("a").total(), 1);
        // Filtered-out records still reach the grand total.
        assert_eq!(state.registry.cumulative().total(), 3);
        assert_eq!(state.registry.cumulative().failures(), 1);
    }

    #[test]
    fn test_snapshot_skips_empty_aggregates_and_resets() {
        let mut state = state_admitting_all();
        state.pending = vec![record("a", true, 10), record("a", false, 20)];
        state.fold_pending();
        let names = MetricNames::new(&[90.0, 95.0, 99.0]);

        let tuples = state.snapshot_and_reset(1700000000, &names);
        assert!(!tuples.is_empty());
        assert!(tuples.iter().all(|t| t.context == "a"));

        // Counters were reset, so an immediate second cycle emits nothing.
        let again = state.snapshot_and_reset(1700000001, &names);
        assert!(again.is_empty());
        assert_eq!(state.flush_cycles, 2);
        assert_eq!(state.registry.cumulative().total(), 0);
    }

    #[test]
    fn test_snapshot_emits_expected_ok_names() {
        let mut state = state_admitting_all();
        state.pending = vec![record("a", true, 10), record("a", true, 20)];
        state.fold_pending();
        let names = MetricNames::new(&[90.0, 95.0, 99.0]);

        let tuples = state.snapshot_and_reset(1700000000, &names);
        let emitted: HashSet<&str> = tuples.iter().map(|t| t.name.as_str()).collect();
        let expected: HashSet<&str> = [
            "ok.count", "ko.count", "a.count", "h.count", "ok.stddev", "ok.min", "ok.max",
            "ok.avg", "ok.pct90", "ok.pct95", "ok.pct99", "a.stddev", "a.min", "a.max",
            "a.avg", "a.pct90", "a.pct95", "a.pct99",
        ]
        .into_iter()
        .collect();
        assert_eq!(emitted, expected);

        let ok_count = tuples.iter().find(|t| t.name == "ok.count").unwrap();
        assert_eq!(ok_count.value, "2");
        let ko_count = tuples.iter().find(|t| t.name == "ko.count").unwrap();
        assert_eq!(ko_count.value, "0");
    }

    #[test]
    fn test_snapshot_sanitizes_context_name() {
        let mut state = state_admitting_all();
        state.pending = vec![record("GET /users", true, 10)];
        state.fold_pending();
        let names = MetricNames::new(&[]);

        let tuples = state.snapshot_and_reset(1700000000, &names);
        assert!(tuples.iter().all(|t| t.context == "GET__users"));
    }
}
