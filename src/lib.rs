pub mod compute;
pub mod config;
pub mod error;
pub mod ingest;
pub mod observability;
pub mod pipeline;
pub mod state;

#[cfg(test)]
mod stateright;

pub use compute::{CompletionReport, ComputeEngine, JsonSink, MemorySink, StateSink};
pub use config::{PipelineConfig, QueueFullPolicy};
pub use error::{Phase, PipelineError};
pub use ingest::{ByteRange, UpdateRecord};
pub use pipeline::{run, RunSummary};
pub use state::{Snapshot, StateStore};
