//! Signer Pipeline CLI
//!
//! Computes the combined digest of an integer sequence.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use signer_pipeline::{build_runtime, run_pipeline, Config};

#[derive(Parser)]
#[command(name = "signer-pipeline")]
#[command(about = "Compute a combined digest over an integer sequence", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override the input count (feeds 0..count)
    #[arg(long, global = true)]
    count: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (default if no command specified)
    Run,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            run_command(cli.config, cli.count)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(config_path: &PathBuf) -> Result<Config> {
    if config_path.exists() {
        Config::from_file(config_path)
    } else {
        tracing::info!(
            "No config at {}, using defaults",
            config_path.display()
        );
        Ok(Config::default())
    }
}

fn run_command(config_path: PathBuf, count: Option<u64>) -> Result<()> {
    let mut config = load_config(&config_path)?;

    // Apply overrides
    if let Some(c) = count {
        config.input.count = c;
        config.input.values = None;
    }

    config.validate()?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    let digest = runtime.block_on(async { run_pipeline(config).await })?;

    println!("{}", digest);

    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# Signer Pipeline Configuration

# === INPUT: The integer sequence to digest ===
input:
  # Feed 0..count into the pipeline
  count: 10

  # Or list the values explicitly (takes precedence over count)
  # values: [0, 1, 1, 2, 3, 5, 8]

# === PROCESSING: Concurrency tuning (never changes the result) ===
processing:
  # Capacity of each channel between stages
  channel_capacity: 1

  # Items SingleHash keeps in flight before reading results
  # (omit to launch every item before the first read)
  # single_hash_max_pending: 64

  # Items MultiHash keeps in flight before reading results
  multi_hash_max_pending: 1

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Print progress metrics during processing
  enable_metrics: true

  # Metrics reporting interval in seconds
  metrics_interval_secs: 10

  # Save final metrics as JSON
  # metrics_output_path: "metrics.json"

# === SIGNER: Simulated primitive latency ===
signer:
  # Fixed delay per slow digest call
  slow_delay_ms: 0

  # Fixed delay per fast checksum call
  fast_delay_ms: 0

  # Random extra delay per call, 0..=jitter_ms
  jitter_ms: 0
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
