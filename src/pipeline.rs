//! Pipeline runner: plan → ingest → compute → emit
//!
//! The input file is checked and planned before any worker starts, so a bad
//! path never leaves tasks behind. Both phases get `config.timeout`. Any
//! ingestor failure or timeout cancels the whole run through the engine's
//! cancellation token; nothing is emitted in that case.

use crate::compute::{CompletionReport, ComputeEngine, StateSink};
use crate::config::PipelineConfig;
use crate::error::{Phase, PipelineError};
use crate::ingest::{plan_file, ChunkReader, IngestStats};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub chunks: usize,
    pub lines: u64,
    pub bytes: u64,
    pub completion: CompletionReport,
    pub elapsed: Duration,
}

pub async fn run(
    input: &Path,
    config: &PipelineConfig,
    sink: Arc<dyn StateSink>,
) -> Result<RunSummary, PipelineError> {
    config.validate().map_err(PipelineError::Config)?;
    let started = Instant::now();

    let ranges = {
        let path = input.to_path_buf();
        let n = config.parsing_threads;
        tokio::task::spawn_blocking(move || plan_file(&path, n))
            .await
            .map_err(|e| PipelineError::Internal(format!("chunk planner failed: {}", e)))??
    };
    let chunks = ranges.len();
    info!(
        input = %input.display(),
        chunks,
        largest = ranges.iter().map(|r| r.len).max().unwrap_or(0),
        "input planned"
    );

    let engine = ComputeEngine::start(config, chunks, sink);

    let mut readers = JoinSet::new();
    for (index, range) in ranges.into_iter().enumerate() {
        let reader = ChunkReader::new(index, input.to_path_buf(), range, engine.clone());
        readers.spawn(reader.run());
    }

    let ingested = match tokio::time::timeout(config.timeout, drain(&mut readers)).await {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => {
            warn!("ingestion failed, cancelling run: {}", e);
            engine.cancel();
            engine.join().await;
            return Err(e);
        }
        Err(_) => {
            warn!(timeout = ?config.timeout, "ingestion timed out, cancelling run");
            engine.cancel();
            engine.join().await;
            return Err(PipelineError::Timeout {
                phase: Phase::Ingestion,
                after: config.timeout,
            });
        }
    };

    let completion = engine.wait_for_completion(config.timeout).await;
    engine.join().await;
    let completion = completion?;

    let summary = RunSummary {
        chunks,
        lines: ingested.lines,
        bytes: ingested.bytes,
        completion,
        elapsed: started.elapsed(),
    };
    info!(
        lines = summary.lines,
        users = completion.users,
        keys = completion.keys,
        changes = completion.changes_applied,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "run complete"
    );
    Ok(summary)
}

/// Join every reader, failing on the first error
async fn drain(
    readers: &mut JoinSet<Result<IngestStats, PipelineError>>,
) -> Result<IngestStats, PipelineError> {
    let mut total = IngestStats::default();
    while let Some(joined) = readers.join_next().await {
        let stats = joined
            .map_err(|e| PipelineError::Internal(format!("ingestor task failed: {}", e)))??;
        total.lines += stats.lines;
        total.bytes += stats.bytes;
    }
    Ok(total)
}
