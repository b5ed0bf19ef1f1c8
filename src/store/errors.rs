use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by the state and artifact stores.
///
/// Missing keys, objects and documents are never errors here; reads return
/// `None` instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("provision bucket {bucket}: {source}")]
    Provision {
        bucket: String,
        #[source]
        source: BackendError,
    },

    #[error("{operation} {key}: {source}")]
    Backend {
        operation: &'static str,
        key: String,
        #[source]
        source: BackendError,
    },

    #[error("revision conflict on {key}: read revision {expected}, store has {found:?}")]
    RevisionConflict {
        key: String,
        expected: u64,
        found: Option<u64>,
    },

    #[error("encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("decode {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("read file data: {0}")]
    ReadInput(#[source] std::io::Error),

    #[error("file too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("workflow context not found: {0}")]
    WorkflowNotFound(String),
}

impl StoreError {
    /// Wraps a backend failure with the operation and key it hit. Revision
    /// mismatches become [`StoreError::RevisionConflict`] so callers can match
    /// on a lost race without digging into the backend error.
    pub(crate) fn backend(operation: &'static str, key: &str, source: BackendError) -> Self {
        match source {
            BackendError::RevisionMismatch {
                key,
                expected,
                found,
            } => StoreError::RevisionConflict {
                key,
                expected,
                found,
            },
            source => StoreError::Backend {
                operation,
                key: key.to_string(),
                source,
            },
        }
    }

    pub fn is_revision_conflict(&self) -> bool {
        matches!(self, StoreError::RevisionConflict { .. })
    }
}
