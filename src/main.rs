//! lww-ingest - converge a newline-delimited JSON update log
//!
//! Reads `{"user": .., "timestamp": .., "values": {..}}` records in parallel,
//! applies last-writer-wins per user and key, and prints the final state as a
//! single JSON object on stdout.
//!
//! ## Usage
//!
//! ```bash
//! lww-ingest --input updates.jsonl
//! lww-ingest -i updates.jsonl --parsing 8 --computing 16
//! RUST_LOG=debug lww-ingest -i updates.jsonl --log-format json
//! ```
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | State emitted |
//! | 1 | Input missing, a directory, or unopenable |
//! | 2 | Any other failure (bad record, timeout, config, ...) |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::Parser;
use lww_ingest::config::PipelineConfig;
use lww_ingest::observability::{init_tracing, LogFormat};
use lww_ingest::{JsonSink, PipelineError, QueueFullPolicy};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

#[derive(Parser)]
#[command(name = "lww-ingest")]
#[command(about = "Apply last-writer-wins updates from a JSON lines file and print the final state")]
#[command(version)]
struct Cli {
    /// The input file to process
    #[arg(short, long)]
    input: PathBuf,

    /// Number of threads dedicated to parsing the input file
    #[arg(short, long)]
    parsing: Option<usize>,

    /// Number of threads dedicated to computing the result
    #[arg(short, long)]
    computing: Option<usize>,

    /// TOML configuration file (flags and LWW_* variables take precedence)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Timeout for each phase, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Capacity of each shard queue
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Fail instead of waiting when a shard queue is full
    #[arg(long)]
    reject_when_full: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig, PipelineError> {
        let base = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        let mut config = base.with_env_overrides();

        if let Some(n) = self.parsing {
            config.parsing_threads = n;
        }
        if let Some(n) = self.computing {
            config.compute_threads = n;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if self.reject_when_full {
            config.queue_full_policy = QueueFullPolicy::Reject;
        }

        config.validate().map_err(PipelineError::Config)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    // Checked up front so a bad path never starts a worker
    if !cli.input.exists() || cli.input.is_dir() {
        eprintln!("Invalid file.");
        return ExitCode::from(1);
    }

    let config = match cli.pipeline_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let sink = Arc::new(JsonSink::stdout());
    match lww_ingest::run(&cli.input, &config, sink).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e @ PipelineError::FileAccess { .. }) => {
            error!("{}", e);
            eprintln!("Unable to open file.");
            ExitCode::from(e.exit_code())
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
