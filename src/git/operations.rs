use anyhow::{Context, Result};
use git2::{ErrorCode, Repository};
use std::path::Path;

/// Read-only repository queries used when recording a step
pub trait GitOperations {
    /// Short name of the checked-out branch, `None` on a detached or unborn HEAD
    fn current_branch(&self) -> Result<Option<String>>;

    /// Full id of the HEAD commit, `None` before the first commit
    fn head_commit(&self) -> Result<Option<String>>;

    fn info(&self) -> Result<GitInfo> {
        Ok(GitInfo {
            branch: self.current_branch()?,
            commit: self.head_commit()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitInfo {
    pub branch: Option<String>,
    pub commit: Option<String>,
}

impl GitInfo {
    /// Git context of the repository enclosing `path`, or an empty value
    /// when `path` is not inside a repository.
    pub fn discover<P: AsRef<Path>>(path: P) -> GitInfo {
        match Git2Operations::discover(path) {
            Ok(ops) => ops.info().unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Could not read git context");
                GitInfo::default()
            }),
            Err(_) => GitInfo::default(),
        }
    }
}

/// Implementation of GitOperations using git2
pub struct Git2Operations {
    repo: Repository,
}

impl Git2Operations {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::open(path).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Opens the repository containing `path`, searching parent directories.
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::discover(path).context("Failed to discover git repository")?;
        Ok(Self { repo })
    }
}

impl GitOperations for Git2Operations {
    fn current_branch(&self) -> Result<Option<String>> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(e).context("Failed to read HEAD"),
        };
        if !head.is_branch() {
            return Ok(None);
        }
        Ok(head.shorthand().map(str::to_string))
    }

    fn head_commit(&self) -> Result<Option<String>> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(e).context("Failed to read HEAD"),
        };
        let commit = head.peel_to_commit().context("HEAD does not point at a commit")?;
        Ok(Some(commit.id().to_string()))
    }
}
