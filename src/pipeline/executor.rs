//! Multi-stage pipeline executor.
//!
//! Stages are chained with bounded channels, one task per stage:
//!
//! ```text
//! ┌────────┐     ┌─────────┐     ┌─────────┐     ┌─────────┐
//! │ source │────▶│ stage 0 │────▶│ stage 1 │────▶│ stage N │────▶ output
//! └────────┘     └─────────┘     └─────────┘     └─────────┘
//! ```
//!
//! Each link is typed by the stages on either side of it. A stage closes its
//! output by dropping its sender when it returns, so the downstream stage
//! only finishes after the upstream one has emitted everything.
//!
//! The pipeline is complete once the output is drained and every task
//! handle has been joined. Any stage error or panic fails the whole run.

use anyhow::Result;
use futures::future::join_all;
use std::future::Future;
use std::marker::PhantomData;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A unit of work that drains its input and writes to its output.
pub trait Stage: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Consume `input` until it closes. Dropping `output` on return closes
    /// the downstream link.
    fn run(
        self,
        input: mpsc::Receiver<Self::Input>,
        output: mpsc::Sender<Self::Output>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// A stage built from a closure.
pub struct FnStage<I, O, F> {
    name: &'static str,
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

/// Wrap `f` as a named stage.
pub fn stage_fn<I, O, F, Fut>(name: &'static str, f: F) -> FnStage<I, O, F>
where
    F: FnOnce(mpsc::Receiver<I>, mpsc::Sender<O>) -> Fut,
{
    FnStage {
        name,
        f,
        _marker: PhantomData,
    }
}

impl<I, O, F, Fut> Stage for FnStage<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnOnce(mpsc::Receiver<I>, mpsc::Sender<O>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &'static str {
        self.name
    }

    fn run(
        self,
        input: mpsc::Receiver<I>,
        output: mpsc::Sender<O>,
    ) -> impl Future<Output = Result<()>> + Send {
        (self.f)(input, output)
    }
}

/// Send one value downstream.
pub async fn emit<T>(output: &mpsc::Sender<T>, value: T) -> Result<()> {
    output
        .send(value)
        .await
        .map_err(|_| anyhow::anyhow!("Downstream receiver closed"))
}

struct StageTask {
    name: &'static str,
    handle: JoinHandle<Result<()>>,
}

/// A chain of running stages whose last link carries `T`.
///
/// Building a pipeline spawns tasks, so it must happen inside a Tokio
/// runtime.
///
/// Every link is a bounded Tokio `mpsc` channel. Tokio has no rendezvous
/// channel, so a `capacity` of 0 is raised to 1. With the default capacity
/// of 1 a producer can therefore run one value ahead of its consumer rather
/// than blocking until the value is taken. This changes scheduling only;
/// values still arrive in send order and the output is the same for any
/// capacity.
pub struct Pipeline<T> {
    output: mpsc::Receiver<T>,
    tasks: Vec<StageTask>,
    capacity: usize,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Start a pipeline from an externally fed channel. `capacity` applies
    /// to the links this pipeline creates and is clamped to at least 1.
    pub fn new(input: mpsc::Receiver<T>, capacity: usize) -> Self {
        Self {
            output: input,
            tasks: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Start a pipeline from a finite sequence. A source task feeds the
    /// values and is joined along with the stages.
    pub fn from_values<I>(values: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let values = values.into_iter();

        let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
            for value in values {
                emit(&tx, value).await?;
            }
            Ok(())
        });

        Self {
            output: rx,
            tasks: vec![StageTask {
                name: "source",
                handle,
            }],
            capacity,
        }
    }

    /// Append a stage reading from the current end of the chain.
    pub fn stage<S>(self, stage: S) -> Pipeline<S::Output>
    where
        S: Stage<Input = T>,
    {
        let Pipeline {
            output: input,
            mut tasks,
            capacity,
        } = self;

        let (tx, rx) = mpsc::channel(capacity);
        let name = stage.name();

        let handle = tokio::spawn(async move {
            tracing::debug!("Stage {} started", name);
            let result = stage.run(input, tx).await;
            match &result {
                Ok(()) => tracing::debug!("Stage {} finished", name),
                Err(e) => tracing::warn!("Stage {} failed: {:#}", name, e),
            }
            result
        });

        tasks.push(StageTask { name, handle });

        Pipeline {
            output: rx,
            tasks,
            capacity,
        }
    }

    /// Number of tasks the executor will join (source included).
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Drain the output and wait for every task.
    pub async fn collect(self) -> Result<Vec<T>> {
        let Pipeline {
            mut output, tasks, ..
        } = self;

        let mut values = Vec::new();
        while let Some(value) = output.recv().await {
            values.push(value);
        }

        join_tasks(tasks).await?;
        Ok(values)
    }

    /// Forward the output into `sink` and wait for every task.
    pub async fn run_into(self, sink: mpsc::Sender<T>) -> Result<()> {
        let Pipeline {
            mut output, tasks, ..
        } = self;

        let mut sink_closed = false;
        while let Some(value) = output.recv().await {
            if sink.send(value).await.is_err() {
                sink_closed = true;
                break;
            }
        }
        drop(output);

        join_tasks(tasks).await?;
        if sink_closed {
            anyhow::bail!("Pipeline sink closed before output was drained");
        }
        Ok(())
    }
}

/// Await every task handle.
///
/// A failed send cascades upstream, so the furthest-downstream failure is
/// the one reported.
async fn join_tasks(tasks: Vec<StageTask>) -> Result<()> {
    let total = tasks.len();
    let (names, handles): (Vec<_>, Vec<_>) =
        tasks.into_iter().map(|task| (task.name, task.handle)).unzip();

    let mut root_cause = None;
    for (name, joined) in names.into_iter().zip(join_all(handles).await) {
        let failure = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.context(format!("Stage {} failed", name)),
            Err(e) => anyhow::anyhow!("Stage {} task panicked: {}", name, e),
        };
        root_cause = Some(failure);
    }

    match root_cause {
        Some(e) => Err(e),
        None => {
            tracing::debug!("Joined {} pipeline tasks", total);
            Ok(())
        }
    }
}
