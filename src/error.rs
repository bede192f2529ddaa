//! Error taxonomy for the ingestion/detection pipeline.
//!
//! Only `ResourceExhausted` is fatal. Everything else is
//! logged by the component that observed it and the owning loop carries on.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::frame::StreamKind;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The stream source could not be opened. Retried by the acquisition loop.
    #[error("{stream} source failed to connect to {target}: {reason}")]
    ConnectFailed {
        stream: StreamKind,
        target: String,
        reason: String,
    },

    /// One read failed. Treated as "no frame this tick".
    #[error("{stream} source read failed: {reason}")]
    ReadFailed { stream: StreamKind, reason: String },

    /// The detector rejected a frame. Only that frame is skipped.
    #[error("{stream} detector failed: {reason}")]
    DetectFailed { stream: StreamKind, reason: String },

    /// An image or ledger write failed. The detection event is still consumed.
    #[error("failed to persist {}: {source}", .path.display())]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk full or out of memory. Propagates to the orchestrator.
    #[error("resource exhausted while writing {}: {source}", .path.display())]
    ResourceExhausted {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// Classify an I/O failure at `path` as either a skippable persistence
    /// failure or a fatal resource exhaustion.
    pub fn persist(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::StorageFull | io::ErrorKind::OutOfMemory => {
                PipelineError::ResourceExhausted { path, source }
            }
            _ => PipelineError::PersistFailed { path, source },
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::ResourceExhausted { .. })
    }
}
