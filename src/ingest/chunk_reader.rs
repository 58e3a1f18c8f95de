//! Chunk Ingestor - decode one byte range and feed the compute engine
//!
//! Every reader opens its own file handle: a shared handle would share the
//! cursor between readers. The range is line-aligned by the planner, so the
//! reader just splits on `\n`; a last line without newline is a normal line.

use super::planner::ByteRange;
use super::record::UpdateRecord;
use crate::compute::ComputeEngine;
use crate::error::PipelineError;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Longest prefix of a bad line echoed into the log
const LOGGED_LINE_MAX: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub bytes: u64,
}

pub struct ChunkReader {
    index: usize,
    path: PathBuf,
    range: ByteRange,
    engine: Arc<ComputeEngine>,
    cancel: CancellationToken,
}

impl ChunkReader {
    pub fn new(index: usize, path: PathBuf, range: ByteRange, engine: Arc<ComputeEngine>) -> Self {
        let cancel = engine.cancellation_token();
        ChunkReader {
            index,
            path,
            range,
            engine,
            cancel,
        }
    }

    /// Route every record of the range, then report parsing done exactly once.
    ///
    /// A malformed line fails the reader immediately and parsing done is never
    /// reported. Cancellation interrupts the reader wherever it is waiting,
    /// including on a full shard queue.
    pub async fn run(self) -> Result<IngestStats, PipelineError> {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(chunk = self.index, "ingestor cancelled");
                Err(PipelineError::Cancelled)
            }
            result = self.ingest() => result,
        }
    }

    async fn ingest(&self) -> Result<IngestStats, PipelineError> {
        let stats = self.read_range().await?;
        self.engine.report_parsing_done().await?;
        debug!(
            chunk = self.index,
            offset = self.range.offset,
            lines = stats.lines,
            "ingestor finished"
        );
        Ok(stats)
    }

    async fn read_range(&self) -> Result<IngestStats, PipelineError> {
        let mut stats = IngestStats::default();
        if self.range.is_empty() {
            return Ok(stats);
        }

        let mut file = File::open(&self.path)
            .await
            .map_err(|e| PipelineError::file_access(&self.path, e))?;
        file.seek(SeekFrom::Start(self.range.offset))
            .await
            .map_err(|e| PipelineError::file_access(&self.path, e))?;

        let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file.take(self.range.len));
        let mut lines = reader.split(b'\n');

        while let Some(line) = lines
            .next_segment()
            .await
            .map_err(|e| PipelineError::file_access(&self.path, e))?
        {
            stats.lines += 1;
            stats.bytes += line.len() as u64 + 1;

            let record = UpdateRecord::decode(&line).map_err(|e| {
                let shown = &line[..line.len().min(LOGGED_LINE_MAX)];
                error!(
                    chunk = self.index,
                    offset = self.range.offset,
                    line_number = stats.lines,
                    line = %String::from_utf8_lossy(shown),
                    "malformed record: {}",
                    e
                );
                PipelineError::Decode {
                    offset: self.range.offset,
                    line_number: stats.lines as usize,
                    reason: e.to_string(),
                }
            })?;

            self.engine.route_update(record).await?;
        }

        // Last line may lack its newline
        stats.bytes = stats.bytes.min(self.range.len);
        Ok(stats)
    }
}
