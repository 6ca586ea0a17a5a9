//! Staged pipeline execution and the signer stages.

mod executor;
mod fanout;
mod metrics;
mod stages;


pub use executor::{emit, stage_fn, FnStage, Pipeline, Stage};
pub use fanout::{spawn_checksum, Deferred, FanOut, InFlight};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use stages::{CombineResults, MultiHash, SingleHash, MULTI_HASH_FANOUT};
