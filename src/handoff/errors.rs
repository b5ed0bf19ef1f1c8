use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by [`HandoffManager`](super::HandoffManager) operations.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("cannot copy from {from} to {to}")]
    UnsupportedCopy { from: String, to: String },

    #[error("local path has no file name: {}", .0.display())]
    InvalidLocalPath(PathBuf),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for HandoffError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WorkflowNotFound(id) => HandoffError::WorkflowNotFound(id),
            other => HandoffError::Store(other),
        }
    }
}

impl HandoffError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HandoffError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when a compare-and-swap write lost a race with another station.
    pub fn is_revision_conflict(&self) -> bool {
        matches!(self, HandoffError::Store(e) if e.is_revision_conflict())
    }
}
