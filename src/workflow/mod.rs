//! Documents describing workflow progress, and the two read-modify-write
//! operations other stations rely on: appending a finished step and merging
//! shared data.

pub mod context;
pub mod types;

pub use context::ConcurrencyMode;
pub use types::{RunState, RunStatus, WorkflowContext, WorkflowStepSummary};
