//! Git context for step records
//!
//! Stations record the branch and commit they worked on. This module reads
//! them from the enclosing repository through libgit2 instead of shelling out.

pub mod operations;

pub use operations::{Git2Operations, GitInfo, GitOperations};
