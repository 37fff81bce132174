use async_trait::async_trait;

use crate::domain::repository::RepositorySlug;
use crate::domain::run::PullRequest;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[async_trait]
pub trait PullRequestService: Send + Sync {
    /// Creates the pull request. Implementations must not retry.
    async fn open_pull_request(
        &self,
        repository: &RepositorySlug,
        request: &PullRequestRequest,
    ) -> AppResult<PullRequest>;
}
