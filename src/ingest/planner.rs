//! Chunk Planner - split a file into line-aligned byte ranges
//!
//! The file is cut into `n` candidate chunks of `ceil(size / n)` bytes. Every
//! chunk but the last is then stretched forward until its last byte is a
//! newline, so no record straddles two chunks. The last chunk takes whatever is
//! left. Chunk sizes drift from the ideal by at most one line each.
//!
//! ```text
//! |---- expected ----|->|---- expected ----|--->|-- remainder --|
//!                     \n                         \n             EOF
//! ```
//!
//! When the newline search runs into EOF the current chunk ends there, and all
//! later chunks are empty ranges anchored at EOF. The plan always has exactly
//! `n` entries.

use crate::error::PipelineError;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Bytes read per step while looking for the next newline
const SCAN_WINDOW: usize = 64 * 1024;

/// Half-open byte range `[offset, offset + len)` of the input file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    pub fn new(offset: u64, len: u64) -> Self {
        ByteRange { offset, len }
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Open `path` and plan `n` chunks over it.
///
/// Any failure to open, stat or read the file is a `FileAccess` error, raised
/// before a single worker starts.
pub fn plan_file(path: &Path, n: usize) -> Result<Vec<ByteRange>, PipelineError> {
    let mut file = File::open(path).map_err(|e| PipelineError::file_access(path, e))?;
    let metadata = file
        .metadata()
        .map_err(|e| PipelineError::file_access(path, e))?;

    if !metadata.is_file() {
        return Err(PipelineError::file_access(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }

    plan_chunks(&mut file, metadata.len(), n).map_err(|e| PipelineError::file_access(path, e))
}

/// Plan `n` line-aligned ranges over the first `file_size` bytes of `source`.
pub fn plan_chunks<R: Read + Seek>(
    source: &mut R,
    file_size: u64,
    n: usize,
) -> io::Result<Vec<ByteRange>> {
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "chunk count must be at least 1",
        ));
    }

    let expected = (file_size + n as u64 - 1) / n as u64;
    let mut ranges = Vec::with_capacity(n);
    let mut start = 0u64;

    for _ in 0..n - 1 {
        if start >= file_size {
            ranges.push(ByteRange::new(file_size, 0));
            continue;
        }

        // Last byte of the candidate chunk; expected >= 1 once the file is non-empty
        let candidate_last = start + expected - 1;
        let end = if candidate_last >= file_size {
            file_size
        } else {
            find_line_end(source, candidate_last, file_size)?
        };

        ranges.push(ByteRange::new(start, end - start));
        start = end;
    }

    ranges.push(ByteRange::new(start, file_size - start));

    debug_assert!(
        is_exact_cover(&ranges, file_size),
        "Postcondition: plan must cover [0, {}) exactly",
        file_size
    );
    Ok(ranges)
}

/// Position just past the first `\n` at or after `from`, or `limit` if there is
/// none before it.
fn find_line_end<R: Read + Seek>(source: &mut R, from: u64, limit: u64) -> io::Result<u64> {
    source.seek(SeekFrom::Start(from))?;

    let mut buf = vec![0u8; SCAN_WINDOW];
    let mut pos = from;

    while pos < limit {
        let want = (limit - pos).min(SCAN_WINDOW as u64) as usize;
        let read = source.read(&mut buf[..want])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shorter than expected: EOF at byte {}", pos),
            ));
        }

        if let Some(idx) = memchr::memchr(b'\n', &buf[..read]) {
            return Ok(pos + idx as u64 + 1);
        }
        pos += read as u64;
    }

    Ok(limit)
}

/// Ranges are contiguous, start at 0 and end at `file_size`
pub fn is_exact_cover(ranges: &[ByteRange], file_size: u64) -> bool {
    let mut expected_offset = 0u64;
    for range in ranges {
        if range.offset != expected_offset {
            return false;
        }
        expected_offset = range.end();
    }
    expected_offset == file_size
}
