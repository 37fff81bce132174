use std::path::Path;

use async_trait::async_trait;

use crate::domain::branch::BranchName;
use crate::domain::repository::RepositoryUrl;
use crate::error::AppResult;

/// Operations on the run's exclusively owned working tree.
#[async_trait]
pub trait VersionControlService: Send + Sync {
    async fn clone_repository(
        &self,
        url: &RepositoryUrl,
        base_branch: &str,
        destination: &Path,
    ) -> AppResult<()>;
    /// Creates or resets `branch` at the current HEAD and checks it out.
    async fn create_branch(&self, tree: &Path, branch: &BranchName) -> AppResult<()>;
    /// Stages everything and commits; returns the short commit hash.
    async fn commit_all(&self, tree: &Path, message: &str) -> AppResult<String>;
    /// Force-pushes so re-runs overwrite the ticket's branch.
    async fn push_branch(&self, tree: &Path, branch: &BranchName) -> AppResult<()>;
}
