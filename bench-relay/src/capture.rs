//! Captured client input.
//!
//! A capture is the raw byte stream a client read from stdin during the
//! `collect` run, stored without any framing. Test runs replay it verbatim
//! to every client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{RelayError, Result};

/// Read a whole capture file.
pub async fn read_capture(path: &Path) -> Result<Arc<[u8]>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| capture_error(path, source))?;
    tracing::debug!("Read {} captured bytes from {}", bytes.len(), path.display());
    Ok(bytes.into())
}

/// Incremental writer for a capture file.
#[derive(Debug)]
pub struct CaptureWriter {
    path: PathBuf,
    file: File,
    written: u64,
}

impl CaptureWriter {
    /// Create (or truncate) the capture file.
    pub async fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .await
            .map_err(|source| capture_error(path, source))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written: 0,
        })
    }

    /// Append one chunk. Chunks are flushed immediately so an interrupted
    /// collect run still leaves everything read so far on disk.
    pub async fn record(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|source| capture_error(&self.path, source))?;
        self.file
            .flush()
            .await
            .map_err(|source| capture_error(&self.path, source))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Bytes recorded so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Sync the file to disk and return the number of bytes recorded.
    pub async fn finish(mut self) -> Result<u64> {
        self.file
            .flush()
            .await
            .map_err(|source| capture_error(&self.path, source))?;
        self.file
            .sync_all()
            .await
            .map_err(|source| capture_error(&self.path, source))?;
        tracing::debug!("Captured {} bytes into {}", self.written, self.path.display());
        Ok(self.written)
    }
}

fn capture_error(path: &Path, source: std::io::Error) -> RelayError {
    RelayError::Capture {
        path: path.to_path_buf(),
        source,
    }
}
