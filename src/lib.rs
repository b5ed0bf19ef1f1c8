// Station Handoff Library - shared state and artifact handoff between workflow stations
// This exposes the core components for embedding, testing and the CLI

pub mod backend;
pub mod cli;
pub mod config;
pub mod git;
pub mod handoff;
pub mod store;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use backend::{BackendError, BackendKind, BlobService, FilesystemBackend, KeyValueService, MemoryBackend};
pub use config::{config, init_config, HandoffConfig};
pub use git::{Git2Operations, GitInfo, GitOperations};
pub use handoff::{
    CompleteStepInput, CopyOptions, FileSource, HandoffError, HandoffManager, PreloadFile,
    PreviousStepContext, StartStepInput, StartWorkflowInput,
};
pub use store::{ArtifactStore, FileMetadata, PutFileOptions, StateStore, StoreError, StoredFile};
pub use telemetry::{create_handoff_span, generate_correlation_id, init_telemetry};
pub use workflow::{ConcurrencyMode, RunState, RunStatus, WorkflowContext, WorkflowStepSummary};
