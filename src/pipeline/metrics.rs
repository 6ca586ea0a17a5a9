//! Throughput monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for the pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Integers received by SingleHash
    pub single_hash_in: AtomicU64,

    /// Values emitted by SingleHash
    pub single_hash_out: AtomicU64,

    /// Strings received by MultiHash
    pub multi_hash_in: AtomicU64,

    /// Values emitted by MultiHash
    pub multi_hash_out: AtomicU64,

    /// Strings received by CombineResults
    pub combined_in: AtomicU64,

    /// Slow digest invocations
    pub slow_digest_calls: AtomicU64,

    /// Fast checksum invocations
    pub fast_checksum_calls: AtomicU64,

    /// Fan-out sub-tasks spawned
    pub subtasks_spawned: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    /// Time spent in slow digest calls (microseconds)
    pub slow_digest_us: AtomicU64,

    /// Time spent in fast checksum calls (microseconds, summed across threads)
    pub fast_checksum_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_single_hash_in(&self) {
        self.single_hash_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_single_hash_out(&self) {
        self.single_hash_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_multi_hash_in(&self) {
        self.multi_hash_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_multi_hash_out(&self) {
        self.multi_hash_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_combined_in(&self) {
        self.combined_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fan-out sub-task launch.
    pub fn add_subtask_spawned(&self) {
        self.subtasks_spawned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one slow digest call and its duration.
    pub fn add_slow_digest(&self, duration: Duration) {
        self.slow_digest_calls.fetch_add(1, Ordering::Relaxed);
        self.slow_digest_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record one fast checksum call and its duration.
    pub fn add_fast_checksum(&self, duration: Duration) {
        self.fast_checksum_calls.fetch_add(1, Ordering::Relaxed);
        self.fast_checksum_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get input items per second through SingleHash.
    pub fn items_per_second(&self) -> f64 {
        let items = self.single_hash_out.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            items as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            single_hash_in: self.single_hash_in.load(Ordering::Relaxed),
            single_hash_out: self.single_hash_out.load(Ordering::Relaxed),
            multi_hash_in: self.multi_hash_in.load(Ordering::Relaxed),
            multi_hash_out: self.multi_hash_out.load(Ordering::Relaxed),
            combined_in: self.combined_in.load(Ordering::Relaxed),
            slow_digest_calls: self.slow_digest_calls.load(Ordering::Relaxed),
            fast_checksum_calls: self.fast_checksum_calls.load(Ordering::Relaxed),
            subtasks_spawned: self.subtasks_spawned.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            items_per_second: self.items_per_second(),
            slow_digest_secs: self.slow_digest_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            fast_checksum_secs: self.fast_checksum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub single_hash_in: u64,
    pub single_hash_out: u64,
    pub multi_hash_in: u64,
    pub multi_hash_out: u64,
    pub combined_in: u64,
    pub slow_digest_calls: u64,
    pub fast_checksum_calls: u64,
    pub subtasks_spawned: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub items_per_second: f64,
    /// Total time spent in slow digests (seconds, sequential)
    pub slow_digest_secs: f64,
    /// Total time spent in fast checksums (seconds, summed across threads)
    pub fast_checksum_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SingleHash: {} in, {} out | MultiHash: {} in, {} out | Combine: {} in | \
             Calls: slow {} fast {} | Sub-tasks: {} | Rate: {:.1} items/s | Elapsed: {:.1}s",
            self.single_hash_in,
            self.single_hash_out,
            self.multi_hash_in,
            self.multi_hash_out,
            self.combined_in,
            self.slow_digest_calls,
            self.fast_checksum_calls,
            self.subtasks_spawned,
            self.items_per_second,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_items: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_items: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_items,
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total_items > 0 {
                        snapshot.multi_hash_out as f64 / self.total_items as f64 * 100.0
                    } else {
                        0.0
                    };

                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }

    /// Render the final summary block.
    pub fn summary(&self) -> String {
        use std::fmt::Write;

        let snapshot = self.metrics.snapshot();
        let mut out = String::new();

        // Writing to a String cannot fail
        let _ = writeln!(out, "=== Pipeline Summary ===");
        let _ = writeln!(out, "Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        let _ = writeln!(out, "Items: {}", snapshot.single_hash_in);
        let _ = writeln!(out, "Slow digest calls: {}", snapshot.slow_digest_calls);
        let _ = writeln!(out, "Fast checksum calls: {}", snapshot.fast_checksum_calls);
        let _ = writeln!(out, "Sub-tasks spawned: {}", snapshot.subtasks_spawned);
        let _ = writeln!(out, "Processing rate: {:.1} items/s", snapshot.items_per_second);

        let total_component = snapshot.slow_digest_secs + snapshot.fast_checksum_secs;
        if total_component > 0.0 {
            let _ = writeln!(out, "--- Primitive Time Breakdown ---");
            let _ = writeln!(out, "Slow digest:   {:>7.2}s ({:>5.1}%)", snapshot.slow_digest_secs, snapshot.slow_digest_secs / total_component * 100.0);
            let _ = writeln!(out, "Fast checksum: {:>7.2}s ({:>5.1}%)", snapshot.fast_checksum_secs, snapshot.fast_checksum_secs / total_component * 100.0);
        }
        let _ = write!(out, "========================");
        out
    }

    /// Log the final summary. Stdout is reserved for the digest.
    pub fn log_summary(&self) {
        for line in self.summary().lines() {
            tracing::info!("{}", line);
        }
    }
}
