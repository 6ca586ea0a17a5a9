//! Signer Pipeline
//!
//! Computes a deterministic aggregate digest over a sequence of integers by
//! streaming them through concurrently running stages.
//!
//! # Architecture
//!
//! - **Signer**: the slow digest and fast checksum primitives behind a trait
//! - **Pipeline**: a typed multi-stage executor over bounded channels
//! - **Stages**: SingleHash, MultiHash and CombineResults, which fan out
//!   per-item checksum sub-tasks and re-serialize them in launch order
//!
//! # Usage
//!
//! ```no_run
//! use signer_pipeline::{run_pipeline, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let digest = run_pipeline(config).await?;
//!     println!("{}", digest);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod pipeline;
pub mod signer;

pub use config::{Config, ProcessingConfig, SignerConfig};
pub use pipeline::{CombineResults, Metrics, MultiHash, Pipeline, SingleHash, Stage};
pub use signer::{DataSigner, Signer, SimulatedLatency};

use anyhow::Result;
use pipeline::MetricsReporter;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Run the full pipeline with the given configuration and return the
/// combined digest.
pub async fn run_pipeline(config: Config) -> Result<String> {
    config.validate()?;

    tracing::info!("Starting signer pipeline");

    let values = config.input.sequence()?;
    let total_items = values.len() as u64;
    let processing = &config.processing;
    let metrics = Metrics::new();

    tracing::info!(
        "Processing {} items (channel capacity {})",
        total_items,
        processing.channel_capacity
    );

    // Start metrics reporter if enabled
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let reporter_handle = if processing.enable_metrics {
        let reporter = MetricsReporter::new(
            metrics.clone(),
            processing.metrics_interval_secs,
            total_items,
        );
        Some(tokio::spawn(reporter.run(shutdown_rx)))
    } else {
        drop(shutdown_rx);
        None
    };

    let result = if config.signer.has_latency() {
        let signer = Arc::new(SimulatedLatency::from_config(DataSigner, &config.signer));
        execute(signer, values, processing, metrics.clone()).await
    } else {
        execute(Arc::new(DataSigner), values, processing, metrics.clone()).await
    };

    // Shutdown metrics reporter
    let _ = shutdown_tx.send(()).await;
    if let Some(handle) = reporter_handle {
        let _ = handle.await;
    }

    let digest = result?;

    if processing.enable_metrics {
        let reporter = MetricsReporter::new(
            metrics.clone(),
            processing.metrics_interval_secs,
            total_items,
        );
        reporter.log_summary();

        if let Some(ref path) = processing.metrics_output_path {
            if let Err(e) = metrics.snapshot().save_to_file(path) {
                tracing::warn!("Failed to save metrics to {}: {}", path, e);
            }
        }
    }

    tracing::info!("Pipeline complete: {} bytes of output", digest.len());

    Ok(digest)
}

/// Run SingleHash → MultiHash → CombineResults over `values`.
pub async fn execute<S: Signer>(
    signer: Arc<S>,
    values: Vec<i64>,
    processing: &ProcessingConfig,
    metrics: Arc<Metrics>,
) -> Result<String> {
    let single_hash = SingleHash::new(signer.clone(), metrics.clone())
        .with_max_pending(processing.single_hash_max_pending);
    let multi_hash = MultiHash::new(signer, metrics.clone())
        .with_max_pending(Some(processing.multi_hash_max_pending));

    let mut output = Pipeline::from_values(values, processing.channel_capacity)
        .stage(single_hash)
        .stage(multi_hash)
        .stage(CombineResults::new(metrics))
        .collect()
        .await?;

    if output.len() != 1 {
        anyhow::bail!("Expected exactly one combined result, got {}", output.len());
    }
    output
        .pop()
        .ok_or_else(|| anyhow::anyhow!("Pipeline produced no result"))
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
