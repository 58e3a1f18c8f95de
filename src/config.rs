//! Pipeline configuration
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! environment variables, then CLI flags (applied by the binary).
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | LWW_PARSING_THREADS | 4 | Chunk ingestors |
//! | LWW_COMPUTE_THREADS | 4 | Compute shards |
//! | LWW_QUEUE_CAPACITY | 1000000 | Per-shard queue bound |
//! | LWW_QUEUE_POLICY | block | `block` or `reject` when a queue is full |
//! | LWW_TIMEOUT_SECS | 60 | Per-phase timeout |
//!
//! ## TOML
//!
//! ```toml
//! parsing_threads = 8
//! compute_threads = 16
//! queue_capacity = 100000
//! queue_full_policy = "block"
//! timeout_secs = 120
//! ```

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_PARSING_THREADS: usize = 4;
pub const DEFAULT_COMPUTE_THREADS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub const THREADS_MAX: usize = 1024;
pub const QUEUE_CAPACITY_MAX: usize = 100_000_000;
pub const TIMEOUT_MAX: Duration = Duration::from_secs(24 * 60 * 60);

/// What a producer does when the target shard queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueFullPolicy {
    /// Await free capacity (backpressure on the ingestor)
    Block,
    /// Fail the routing call with `PipelineError::Backpressure`
    Reject,
}

impl Default for QueueFullPolicy {
    fn default() -> Self {
        QueueFullPolicy::Block
    }
}

impl FromStr for QueueFullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(QueueFullPolicy::Block),
            "reject" => Ok(QueueFullPolicy::Reject),
            other => Err(format!("unknown queue policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of chunk ingestors (and chunks)
    pub parsing_threads: usize,
    /// Number of compute shards
    pub compute_threads: usize,
    /// Bound of each shard queue
    pub queue_capacity: usize,
    pub queue_full_policy: QueueFullPolicy,
    /// Applied separately to the ingestion and the compute phase
    #[serde(rename = "timeout_secs", with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            parsing_threads: DEFAULT_PARSING_THREADS,
            compute_threads: DEFAULT_COMPUTE_THREADS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_full_policy: QueueFullPolicy::Block,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by the environment
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, PipelineError> {
        toml::from_str(content).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `LWW_*` variables on top of `self`. Unparseable values are ignored
    /// with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = env_parse("LWW_PARSING_THREADS") {
            self.parsing_threads = n;
        }
        if let Some(n) = env_parse("LWW_COMPUTE_THREADS") {
            self.compute_threads = n;
        }
        if let Some(n) = env_parse("LWW_QUEUE_CAPACITY") {
            self.queue_capacity = n;
        }
        if let Some(policy) = env_parse("LWW_QUEUE_POLICY") {
            self.queue_full_policy = policy;
        }
        if let Some(secs) = env_parse::<u64>("LWW_TIMEOUT_SECS") {
            self.timeout = Duration::from_secs(secs);
        }
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.parsing_threads == 0 || self.parsing_threads > THREADS_MAX {
            return Err(format!(
                "parsing_threads must be in 1..={}, got {}",
                THREADS_MAX, self.parsing_threads
            ));
        }
        if self.compute_threads == 0 || self.compute_threads > THREADS_MAX {
            return Err(format!(
                "compute_threads must be in 1..={}, got {}",
                THREADS_MAX, self.compute_threads
            ));
        }
        if self.queue_capacity == 0 || self.queue_capacity > QUEUE_CAPACITY_MAX {
            return Err(format!(
                "queue_capacity must be in 1..={}, got {}",
                QUEUE_CAPACITY_MAX, self.queue_capacity
            ));
        }
        if self.timeout.is_zero() || self.timeout > TIMEOUT_MAX {
            return Err(format!(
                "timeout must be between 1s and {:?}, got {:?}",
                TIMEOUT_MAX, self.timeout
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}

/// Serde helper for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
