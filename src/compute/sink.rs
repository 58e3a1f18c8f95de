//! Output sinks for the converged state
//!
//! The engine hands the final snapshot to exactly one `StateSink::emit` call.
//! `JsonSink` serializes it as one JSON object followed by a newline;
//! `MemorySink` keeps it in memory for tests and embedding.

use crate::state::Snapshot;
use parking_lot::Mutex;
use std::io::{self, Stdout, Write};
use std::sync::Arc;

pub trait StateSink: Send + Sync {
    fn emit(&self, state: &Snapshot) -> io::Result<()>;
}

/// Writes `{"user":{"key":"value"}}` to any writer
pub struct JsonSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        JsonSink {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> StateSink for JsonSink<W> {
    fn emit(&self, state: &Snapshot) -> io::Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, state)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

/// Records every emitted snapshot; clones share the same buffer
#[derive(Clone, Default)]
pub struct MemorySink {
    emitted: Arc<Mutex<Vec<Snapshot>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit_count(&self) -> usize {
        self.emitted.lock().len()
    }

    /// Most recent snapshot, if any
    pub fn last(&self) -> Option<Snapshot> {
        self.emitted.lock().last().cloned()
    }
}

impl StateSink for MemorySink {
    fn emit(&self, state: &Snapshot) -> io::Result<()> {
        self.emitted.lock().push(state.clone());
        Ok(())
    }
}
