//! # Graphite Telemetry - Workload Driver
//!
//! Binary entry point that stands in for the test-execution engine: it
//! generates batches of synthetic outcome records across a handful of
//! endpoint labels, pushes them through the aggregation pipeline for a
//! configured duration, and then shuts the pipeline down cleanly so the
//! final buffered records are flushed to the collector.
//!
//! Point it at a Graphite-compatible collector (`--host`, `--port`), or run
//! with `--sender console` to log the metric lines instead of transmitting.

use anyhow::Result;
use clap::Parser;
use graphite_telemetry::{
    cli::{Args, PipelineConfig},
    logging::ColorizedFormatter,
    pipeline::TelemetryPipeline,
    record::OutcomeRecord,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Log level is controlled via RUST_LOG, e.g. RUST_LOG=debug.
    tracing_subscriber::fmt()
        .event_format(ColorizedFormatter)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    info!(
        "starting telemetry pipeline: sender={} collector={}:{} prefix={}",
        args.sender, args.host, args.port, args.prefix
    );

    let config = PipelineConfig::from(&args);
    let pipeline = TelemetryPipeline::start(&config)?;

    let started = Instant::now();
    let mut producers = Vec::with_capacity(args.producers);
    for worker in 0..args.producers {
        producers.push(tokio::spawn(generate_load(
            pipeline.clone(),
            worker,
            args.clone(),
        )));
    }

    let mut total_records: u64 = 0;
    for producer in producers {
        total_records += producer.await?;
    }

    info!("workload complete, shutting down pipeline");
    pipeline.shutdown().await;

    let summary = json!({
        "records": total_records,
        "flush_cycles": pipeline.flush_cycles(),
        "elapsed_secs": started.elapsed().as_secs_f64(),
        "endpoints": args.endpoint_count,
        "producers": args.producers,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

/// One producer task: builds batches of synthetic outcome records and
/// ingests them until the configured duration elapses. Returns the number
/// of records it produced.
async fn generate_load(pipeline: TelemetryPipeline, worker: usize, args: Args) -> u64 {
    let deadline = Instant::now() + args.duration;
    let mut produced = 0u64;

    while Instant::now() < deadline {
        // The rng must not live across an await point.
        let batch: Vec<OutcomeRecord> = {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            (0..args.batch_size)
                .map(|_| {
                    let endpoint =
                        format!("endpoint_{:02}", rng.gen_range(0..args.endpoint_count.max(1)));
                    let success = rng.gen_bool(0.95);
                    let latency = Duration::from_micros(rng.gen_range(500..250_000));
                    OutcomeRecord::new(endpoint, success, latency)
                })
                .collect()
        };
        produced += batch.len() as u64;
        pipeline.ingest(batch).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    info!("producer {} finished after {} records", worker, produced);
    produced
}
