//! Fan-out/fan-in helpers used inside stages.
//!
//! A stage launches its per-item sub-computations as [`Deferred`] handles,
//! groups them into a [`FanOut`] batch, and queues batches in an
//! [`InFlight`] window. Batches are always resolved front to back and the
//! parts of a batch in the order they were launched, so emission order never
//! depends on which sub-task finishes first.

use crate::pipeline::Metrics;
use crate::signer::Signer;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Result of a sub-task running on the blocking pool. Read exactly once.
pub struct Deferred<T> {
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Deferred<T> {
    /// Run `f` on the blocking pool.
    pub fn spawn_blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            handle: tokio::task::spawn_blocking(f),
        }
    }

    /// Wait for the sub-task and take its value.
    pub async fn resolve(self) -> Result<T> {
        self.handle
            .await
            .map_err(|e| anyhow::anyhow!("Sub-task panicked: {}", e))
    }
}

/// Launch `signer.fast_checksum(data)` as a counted sub-task.
pub fn spawn_checksum<S: Signer>(
    signer: &Arc<S>,
    metrics: &Arc<Metrics>,
    data: String,
) -> Deferred<String> {
    metrics.add_subtask_spawned();

    let signer = Arc::clone(signer);
    let metrics = Arc::clone(metrics);
    Deferred::spawn_blocking(move || {
        let start = Instant::now();
        let checksum = signer.fast_checksum(&data);
        metrics.add_fast_checksum(start.elapsed());
        checksum
    })
}

/// The sub-tasks launched for one item, joined by `separator` on resolve.
pub struct FanOut {
    parts: Vec<Deferred<String>>,
    separator: &'static str,
}

impl FanOut {
    pub fn new(separator: &'static str) -> Self {
        Self {
            parts: Vec::new(),
            separator,
        }
    }

    pub fn push(&mut self, part: Deferred<String>) {
        self.parts.push(part);
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Await every part in launch order and concatenate.
    pub async fn resolve(self) -> Result<String> {
        let FanOut { parts, separator } = self;

        let mut combined = String::new();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                combined.push_str(separator);
            }
            combined.push_str(&part.resolve().await?);
        }
        Ok(combined)
    }
}

/// FIFO of launched batches that have not been read yet.
///
/// `limit: None` never reports full, so every item is launched before the
/// first read.
pub struct InFlight<B> {
    queue: VecDeque<B>,
    limit: Option<usize>,
}

impl<B> InFlight<B> {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            queue: VecDeque::new(),
            limit,
        }
    }

    pub fn push(&mut self, batch: B) {
        self.queue.push_back(batch);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.limit.map_or(false, |limit| self.queue.len() >= limit)
    }

    /// Oldest batch, only while the window is at its limit.
    pub fn pop_if_full(&mut self) -> Option<B> {
        if self.is_full() {
            self.queue.pop_front()
        } else {
            None
        }
    }

    /// Oldest batch, regardless of the limit.
    pub fn pop(&mut self) -> Option<B> {
        self.queue.pop_front()
    }
}
