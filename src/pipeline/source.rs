//! Append-only record sources read from an explicit byte offset.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

/// Upper bound on bytes pulled from a source in one read.
pub const DEFAULT_MAX_READ_BYTES: usize = 4 * 1024 * 1024;

/// Outcome of reading a source from a given offset.
#[derive(Debug, PartialEq, Eq)]
pub enum SourceRead {
    /// The source does not exist (yet).
    Missing,
    /// No complete new record past the offset.
    Idle,
    /// Complete records and the offset just past the last one consumed.
    Lines { lines: Vec<String>, next_offset: u64 },
}

/// A growing, append-only sequence of newline-terminated records.
///
/// Implementations must never return bytes before `offset` and only hand out
/// complete lines, so a writer caught mid-record is picked up on the next read.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn read_from(&self, offset: u64) -> Result<SourceRead>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// Tails a local file.
pub struct FileSource {
    path: PathBuf,
    max_read_bytes: usize,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }

    pub fn with_max_read_bytes(mut self, max_read_bytes: usize) -> Self {
        self.max_read_bytes = max_read_bytes.max(1);
        self
    }
}

#[async_trait]
impl RecordSource for FileSource {
    async fn read_from(&self, offset: u64) -> Result<SourceRead> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SourceRead::Missing),
            Err(e) => {
                return Err(e).with_context(|| format!("stat {}", self.path.display()));
            }
        };

        if metadata.len() <= offset {
            return Ok(SourceRead::Idle);
        }

        let available = (metadata.len() - offset).min(self.max_read_bytes as u64);
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .with_context(|| format!("open {}", self.path.display()))?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = Vec::with_capacity(available as usize);
        file.take(available).read_to_end(&mut buf).await?;

        Ok(split_complete_lines(&buf, offset, self.max_read_bytes))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Splits `buf` (read at `offset`) into complete lines, leaving any trailing
/// partial line for the next read.
pub(crate) fn split_complete_lines(buf: &[u8], offset: u64, max_read_bytes: usize) -> SourceRead {
    let consumed = match buf.iter().rposition(|&b| b == b'\n') {
        Some(last_newline) => last_newline + 1,
        // A single record longer than the read window would otherwise stall forever.
        None if buf.len() >= max_read_bytes => {
            warn!(offset, bytes = buf.len(), "Oversized record without newline, consuming as-is");
            buf.len()
        }
        None => return SourceRead::Idle,
    };

    let lines = String::from_utf8_lossy(&buf[..consumed])
        .lines()
        .map(str::to_string)
        .collect();

    SourceRead::Lines {
        lines,
        next_offset: offset + consumed as u64,
    }
}
