//! Hash-sharded compute: shard actors, the engine that routes to them, and the
//! sinks that receive the merged result.

mod engine;
mod shard_actor;
mod sink;

pub use engine::{shard_index, CompletionReport, ComputeEngine};
pub use shard_actor::{ShardMessage, ShardReport};
pub use sink::{JsonSink, MemorySink, StateSink};
