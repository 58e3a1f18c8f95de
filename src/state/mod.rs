//! Per-shard last-writer-wins state

mod error;
mod store;

pub use error::MergeCollisionError;
pub use store::{Changes, Snapshot, StampedValue, StateStore, UserSnapshot};
