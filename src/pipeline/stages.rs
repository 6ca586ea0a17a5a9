//! The three signer stages.
//!
//! ```text
//! ┌────────────┐     ┌────────────┐     ┌────────────────┐
//! │ SingleHash │────▶│ MultiHash  │────▶│ CombineResults │────▶ final
//! │  i64→text  │     │ text→text  │     │  text*→text    │
//! └────────────┘     └────────────┘     └────────────────┘
//! ```
//!
//! SingleHash and MultiHash fan each item out into checksum sub-tasks and
//! fan back in by reading results in launch order, so their output order is
//! their input order no matter how the sub-tasks interleave.

use crate::pipeline::executor::{emit, Stage};
use crate::pipeline::fanout::{spawn_checksum, Deferred, FanOut, InFlight};
use crate::pipeline::Metrics;
use crate::signer::Signer;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Sub-tasks MultiHash launches per item.
pub const MULTI_HASH_FANOUT: usize = 6;

/// Per-item digest: `fast(text) ~ fast(slow(text))`.
pub struct SingleHash<S> {
    signer: Arc<S>,
    metrics: Arc<Metrics>,
    max_pending: Option<usize>,
}

impl<S: Signer> SingleHash<S> {
    /// Every item is launched before the first read.
    pub fn new(signer: Arc<S>, metrics: Arc<Metrics>) -> Self {
        Self {
            signer,
            metrics,
            max_pending: None,
        }
    }

    /// Cap the number of items whose checksums are in flight.
    pub fn with_max_pending(mut self, max_pending: Option<usize>) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// One slow digest on the blocking pool, awaited before returning.
    async fn slow_digest(&self, text: String) -> Result<(String, String)> {
        let signer = Arc::clone(&self.signer);
        let metrics = Arc::clone(&self.metrics);

        Deferred::spawn_blocking(move || {
            let start = Instant::now();
            let digest = signer.slow_digest(&text);
            metrics.add_slow_digest(start.elapsed());
            (text, digest)
        })
        .resolve()
        .await
    }

    fn launch(&self, text: String, digest: String) -> FanOut {
        let mut batch = FanOut::new("~");
        batch.push(spawn_checksum(&self.signer, &self.metrics, text));
        batch.push(spawn_checksum(&self.signer, &self.metrics, digest));
        batch
    }

    async fn emit_batch(&self, output: &mpsc::Sender<String>, batch: FanOut) -> Result<()> {
        emit(output, batch.resolve().await?).await?;
        self.metrics.add_single_hash_out();
        Ok(())
    }
}

impl<S: Signer> Stage for SingleHash<S> {
    type Input = i64;
    type Output = String;

    fn name(&self) -> &'static str {
        "single_hash"
    }

    async fn run(self, mut input: mpsc::Receiver<i64>, output: mpsc::Sender<String>) -> Result<()> {
        // Slow digests run strictly one at a time
        let mut digests = Vec::new();
        while let Some(value) = input.recv().await {
            self.metrics.add_single_hash_in();
            digests.push(self.slow_digest(value.to_string()).await?);
        }

        tracing::debug!("SingleHash computed {} slow digests", digests.len());

        let mut in_flight = InFlight::new(self.max_pending);
        for (text, digest) in digests {
            in_flight.push(self.launch(text, digest));
            while let Some(batch) = in_flight.pop_if_full() {
                self.emit_batch(&output, batch).await?;
            }
        }
        while let Some(batch) = in_flight.pop() {
            self.emit_batch(&output, batch).await?;
        }

        Ok(())
    }
}

/// Per-item expansion: `fast("0"+s) … fast("5"+s)` concatenated.
pub struct MultiHash<S> {
    signer: Arc<S>,
    metrics: Arc<Metrics>,
    max_pending: Option<usize>,
}

impl<S: Signer> MultiHash<S> {
    /// Each item is emitted before the next one is received.
    pub fn new(signer: Arc<S>, metrics: Arc<Metrics>) -> Self {
        Self {
            signer,
            metrics,
            max_pending: Some(1),
        }
    }

    /// Let up to `max_pending` items run ahead. `None` launches every item
    /// before the first read.
    pub fn with_max_pending(mut self, max_pending: Option<usize>) -> Self {
        self.max_pending = max_pending;
        self
    }

    fn launch(&self, data: &str) -> FanOut {
        let mut batch = FanOut::new("");
        for index in 0..MULTI_HASH_FANOUT {
            batch.push(spawn_checksum(
                &self.signer,
                &self.metrics,
                format!("{}{}", index, data),
            ));
        }
        batch
    }

    async fn emit_batch(&self, output: &mpsc::Sender<String>, batch: FanOut) -> Result<()> {
        emit(output, batch.resolve().await?).await?;
        self.metrics.add_multi_hash_out();
        Ok(())
    }
}

impl<S: Signer> Stage for MultiHash<S> {
    type Input = String;
    type Output = String;

    fn name(&self) -> &'static str {
        "multi_hash"
    }

    async fn run(self, mut input: mpsc::Receiver<String>, output: mpsc::Sender<String>) -> Result<()> {
        let mut in_flight = InFlight::new(self.max_pending);

        while let Some(data) = input.recv().await {
            self.metrics.add_multi_hash_in();
            in_flight.push(self.launch(&data));
            while let Some(batch) = in_flight.pop_if_full() {
                self.emit_batch(&output, batch).await?;
            }
        }
        while let Some(batch) = in_flight.pop() {
            self.emit_batch(&output, batch).await?;
        }

        Ok(())
    }
}

/// Sorts everything it receives and emits one `_`-joined string.
pub struct CombineResults {
    metrics: Arc<Metrics>,
}

impl CombineResults {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl Stage for CombineResults {
    type Input = String;
    type Output = String;

    fn name(&self) -> &'static str {
        "combine_results"
    }

    async fn run(self, mut input: mpsc::Receiver<String>, output: mpsc::Sender<String>) -> Result<()> {
        let mut all = Vec::new();
        while let Some(data) = input.recv().await {
            self.metrics.add_combined_in();
            all.push(data);
        }

        all.sort();
        tracing::debug!("Combining {} results", all.len());
        emit(&output, all.join("_")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::signer::mock::MockSigner;
    use crate::signer::DataSigner;
    use std::time::Duration;

    async fn run_stage<S: Stage>(stage: S, inputs: Vec<S::Input>) -> Vec<S::Output> {
        Pipeline::from_values(inputs, 1)
            .stage(stage)
            .collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_hash_formula() {
        let signer = Arc::new(MockSigner::new());
        let out = run_stage(SingleHash::new(signer, Metrics::new()), vec![0]).await;
        assert_eq!(out, vec!["fast(0)~fast(slow(0))".to_string()]);
    }

    #[tokio::test]
    async fn test_single_hash_with_data_signer() {
        let signer = DataSigner;
        let expected = format!(
            "{}~{}",
            signer.fast_checksum("0"),
            signer.fast_checksum(&signer.slow_digest("0"))
        );

        let out = run_stage(SingleHash::new(Arc::new(DataSigner), Metrics::new()), vec![0]).await;
        assert_eq!(out, vec![expected]);
    }

    #[tokio::test]
    async fn test_single_hash_negative_values() {
        let signer = Arc::new(MockSigner::new());
        let out = run_stage(SingleHash::new(signer, Metrics::new()), vec![-12]).await;
        assert_eq!(out, vec!["fast(-12)~fast(slow(-12))".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_hash_preserves_order_under_jitter() {
        for _ in 0..5 {
            let signer = Arc::new(MockSigner::with_jitter(15));
            let out = run_stage(SingleHash::new(signer, Metrics::new()), vec![0, 1, 2]).await;
            assert_eq!(
                out,
                vec![
                    "fast(0)~fast(slow(0))".to_string(),
                    "fast(1)~fast(slow(1))".to_string(),
                    "fast(2)~fast(slow(2))".to_string(),
                ]
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_hash_slow_digests_never_overlap() {
        let signer = Arc::new(MockSigner::with_jitter(5));
        let out = run_stage(SingleHash::new(signer.clone(), Metrics::new()), (0..8).collect()).await;

        assert_eq!(out.len(), 8);
        assert_eq!(signer.slow_calls(), 8);
        assert_eq!(signer.max_slow_overlap(), 1);
    }

    #[tokio::test]
    async fn test_single_hash_spawns_two_subtasks_per_item() {
        let signer = Arc::new(MockSigner::new());
        let metrics = Metrics::new();
        run_stage(SingleHash::new(signer.clone(), metrics.clone()), vec![0, 1, 2]).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.subtasks_spawned, 6);
        assert_eq!(snapshot.fast_checksum_calls, 6);
        assert_eq!(snapshot.slow_digest_calls, 3);
        assert_eq!(snapshot.single_hash_in, 3);
        assert_eq!(snapshot.single_hash_out, 3);
        assert_eq!(signer.fast_calls(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_hash_bounded_window_same_output() {
        let inputs: Vec<i64> = (0..10).collect();
        let unbounded = run_stage(
            SingleHash::new(Arc::new(MockSigner::with_jitter(3)), Metrics::new()),
            inputs.clone(),
        )
        .await;
        let bounded = run_stage(
            SingleHash::new(Arc::new(MockSigner::with_jitter(3)), Metrics::new())
                .with_max_pending(Some(2)),
            inputs,
        )
        .await;
        assert_eq!(unbounded, bounded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_hash_checksums_run_in_parallel() {
        use crate::signer::SimulatedLatency;

        // 20 checksums at 100ms each would take 2s back to back
        let signer = Arc::new(SimulatedLatency::new(
            DataSigner,
            Duration::ZERO,
            Duration::from_millis(100),
            0,
        ));
        let start = std::time::Instant::now();
        let out = run_stage(SingleHash::new(signer, Metrics::new()), (0..10).collect()).await;

        assert_eq!(out.len(), 10);
        assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
    }

    #[tokio::test]
    async fn test_single_hash_empty_input() {
        let out = run_stage(SingleHash::new(Arc::new(MockSigner::new()), Metrics::new()), vec![]).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_multi_hash_concatenates_in_index_order() {
        let signer = Arc::new(MockSigner::new());
        let out = run_stage(MultiHash::new(signer, Metrics::new()), vec!["x".to_string()]).await;
        assert_eq!(
            out,
            vec!["fast(0x)fast(1x)fast(2x)fast(3x)fast(4x)fast(5x)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_multi_hash_with_data_signer() {
        let signer = DataSigner;
        let expected: String = (0..6)
            .map(|i| signer.fast_checksum(&format!("{}x", i)))
            .collect();

        let out = run_stage(MultiHash::new(Arc::new(DataSigner), Metrics::new()), vec!["x".to_string()]).await;
        assert_eq!(out, vec![expected]);
    }

    #[tokio::test]
    async fn test_multi_hash_spawns_six_subtasks_per_item() {
        let signer = Arc::new(MockSigner::new());
        let metrics = Metrics::new();
        let inputs = vec!["a".to_string(), "b".to_string()];
        run_stage(MultiHash::new(signer.clone(), metrics.clone()), inputs).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.subtasks_spawned, 12);
        assert_eq!(snapshot.multi_hash_in, 2);
        assert_eq!(snapshot.multi_hash_out, 2);
        assert_eq!(signer.fast_calls(), 12);
        assert_eq!(signer.slow_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_multi_hash_preserves_order_for_any_window() {
        let inputs: Vec<String> = ["p", "q", "r", "s"].iter().map(|s| s.to_string()).collect();
        let expected: Vec<String> = inputs
            .iter()
            .map(|s| (0..6).map(|i| format!("fast({}{})", i, s)).collect())
            .collect();

        for window in [Some(1), Some(3), None] {
            let signer = Arc::new(MockSigner::with_jitter(10));
            let out = run_stage(
                MultiHash::new(signer, Metrics::new()).with_max_pending(window),
                inputs.clone(),
            )
            .await;
            assert_eq!(out, expected, "window {:?}", window);
        }
    }

    #[tokio::test]
    async fn test_combine_results_sorts_and_joins() {
        let inputs = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        let out = run_stage(CombineResults::new(Metrics::new()), inputs).await;
        assert_eq!(out, vec!["a_b_c".to_string()]);
    }

    #[tokio::test]
    async fn test_combine_results_single_item() {
        let out = run_stage(CombineResults::new(Metrics::new()), vec!["z".to_string()]).await;
        assert_eq!(out, vec!["z".to_string()]);
    }

    #[tokio::test]
    async fn test_combine_results_sorts_bytewise() {
        let inputs = vec!["b".to_string(), "B".to_string(), "10".to_string(), "9".to_string()];
        let out = run_stage(CombineResults::new(Metrics::new()), inputs).await;
        assert_eq!(out, vec!["10_9_B_b".to_string()]);
    }

    #[tokio::test]
    async fn test_combine_results_empty_input() {
        let metrics = Metrics::new();
        let out = run_stage(CombineResults::new(metrics.clone()), vec![]).await;
        assert_eq!(out, vec![String::new()]);
        assert_eq!(metrics.snapshot().combined_in, 0);
    }
}
