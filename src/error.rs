//! Pipeline error taxonomy
//!
//! Every failure is fatal to the run. Nothing here is retried: malformed input,
//! a sharding bug or a stalled phase all surface to the caller, who decides
//! whether to fix the input and re-run.

use crate::state::MergeCollisionError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Phase of a run bounded by the global timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Chunk ingestors reading and routing records
    Ingestion,
    /// Shards draining their queues after parsing finished
    Compute,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Ingestion => write!(f, "ingestion"),
            Phase::Compute => write!(f, "compute"),
        }
    }
}

#[derive(Debug)]
pub enum PipelineError {
    /// Input file missing, not a regular file, or unopenable
    FileAccess { path: PathBuf, source: io::Error },
    /// A line could not be decoded into an update record
    Decode {
        offset: u64,
        line_number: usize,
        reason: String,
    },
    /// The same user was found in two shard states at merge time
    InvariantViolation { user: String },
    /// Shard queue full under the reject policy
    Backpressure { shard_id: usize, capacity: usize },
    /// Shard queue closed while records were still being routed
    QueueClosed { shard_id: usize },
    /// A phase did not finish inside its window
    Timeout { phase: Phase, after: Duration },
    /// Stopped because the run was cancelled after another failure
    Cancelled,
    /// Final emission failed
    Output(io::Error),
    /// Configuration rejected by validation
    Config(String),
    /// Task join failure or misuse of the engine
    Internal(String),
}

impl PipelineError {
    /// Process exit code for the CLI: 1 for file problems, 2 for everything else
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::FileAccess { .. } => 1,
            _ => 2,
        }
    }

    pub fn file_access(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::FileAccess {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::FileAccess { path, source } => {
                write!(f, "cannot access input file '{}': {}", path.display(), source)
            }
            PipelineError::Decode {
                offset,
                line_number,
                reason,
            } => write!(
                f,
                "malformed record in chunk at byte {} line {}: {}",
                offset, line_number, reason
            ),
            PipelineError::InvariantViolation { user } => write!(
                f,
                "invariant violation: user '{}' present in more than one shard",
                user
            ),
            PipelineError::Backpressure { shard_id, capacity } => write!(
                f,
                "shard {} queue full (capacity {})",
                shard_id, capacity
            ),
            PipelineError::QueueClosed { shard_id } => {
                write!(f, "shard {} queue closed unexpectedly", shard_id)
            }
            PipelineError::Timeout { phase, after } => {
                write!(f, "{} phase did not complete within {:?}", phase, after)
            }
            PipelineError::Cancelled => write!(f, "run cancelled"),
            PipelineError::Output(e) => write!(f, "failed to emit final state: {}", e),
            PipelineError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            PipelineError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::FileAccess { source, .. } => Some(source),
            PipelineError::Output(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MergeCollisionError> for PipelineError {
    fn from(e: MergeCollisionError) -> Self {
        PipelineError::InvariantViolation { user: e.user }
    }
}
