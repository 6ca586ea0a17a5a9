//! Configuration for the signer pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input sequence configuration
    #[serde(default)]
    pub input: InputConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Digest primitive configuration
    #[serde(default)]
    pub signer: SignerConfig,
}

/// Input sequence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Feed `0..count` into the pipeline
    #[serde(default = "default_count")]
    pub count: u64,

    /// Explicit input values. Takes precedence over `count` when set.
    #[serde(default)]
    pub values: Option<Vec<i64>>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            values: None,
        }
    }
}

impl InputConfig {
    /// The ordered input sequence.
    pub fn sequence(&self) -> anyhow::Result<Vec<i64>> {
        match &self.values {
            Some(values) => Ok(values.clone()),
            None => Ok((0..self.generated_len()?).collect()),
        }
    }

    /// Upper bound of the generated `0..count` range.
    fn generated_len(&self) -> anyhow::Result<i64> {
        i64::try_from(self.count)
            .map_err(|_| anyhow::anyhow!("Input count {} exceeds {}", self.count, i64::MAX))
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Capacity of every inter-stage channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Items SingleHash keeps in flight before reading results.
    /// Unset means every item is launched before the first read.
    #[serde(default)]
    pub single_hash_max_pending: Option<usize>,

    /// Items MultiHash keeps in flight before reading results
    #[serde(default = "default_multi_hash_max_pending")]
    pub multi_hash_max_pending: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Enable metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            single_hash_max_pending: None,
            multi_hash_max_pending: default_multi_hash_max_pending(),
            worker_threads: None,
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

/// Artificial latency added in front of the digest primitives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Fixed delay per slow digest call in milliseconds
    #[serde(default)]
    pub slow_delay_ms: u64,

    /// Fixed delay per fast checksum call in milliseconds
    #[serde(default)]
    pub fast_delay_ms: u64,

    /// Upper bound of random extra delay per call in milliseconds
    #[serde(default)]
    pub jitter_ms: u64,
}

impl SignerConfig {
    /// Whether any latency is configured.
    pub fn has_latency(&self) -> bool {
        self.slow_delay_ms > 0 || self.fast_delay_ms > 0 || self.jitter_ms > 0
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input.values.is_none() {
            self.input.generated_len()?;
        }
        if self.processing.channel_capacity == 0 {
            anyhow::bail!("Channel capacity must be > 0");
        }
        if self.processing.single_hash_max_pending == Some(0) {
            anyhow::bail!("single_hash_max_pending must be > 0 when set");
        }
        if self.processing.multi_hash_max_pending == 0 {
            anyhow::bail!("multi_hash_max_pending must be > 0");
        }
        if self.processing.worker_threads == Some(0) {
            anyhow::bail!("worker_threads must be > 0 when set");
        }
        if self.processing.enable_metrics && self.processing.metrics_interval_secs == 0 {
            anyhow::bail!("Metrics interval must be > 0");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_count() -> u64 { 10 }
fn default_channel_capacity() -> usize { 1 }
fn default_multi_hash_max_pending() -> usize { 1 }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }
