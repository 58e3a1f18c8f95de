//! Parallel ingestion: line-aligned chunk planning and the readers that decode
//! each chunk into update records.

mod chunk_reader;
mod planner;
mod record;

pub use chunk_reader::{ChunkReader, IngestStats};
pub use planner::{is_exact_cover, plan_chunks, plan_file, ByteRange};
pub use record::UpdateRecord;
