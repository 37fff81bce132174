use async_trait::async_trait;

use crate::domain::ticket::{ExternalReference, ExternalReferenceKind};
use crate::error::AppResult;
use crate::infra::confluence::ConfluenceClient;
use crate::infra::github::GitHubClient;
use crate::services::{ReferenceDocument, ReferenceFetcher};

/// Routes each reference to the host that serves its kind.
pub struct HttpReferenceFetcher {
    confluence: ConfluenceClient,
    github: GitHubClient,
}

impl HttpReferenceFetcher {
    pub fn new(confluence: ConfluenceClient, github: GitHubClient) -> Self {
        Self { confluence, github }
    }
}

#[async_trait]
impl ReferenceFetcher for HttpReferenceFetcher {
    async fn fetch(&self, reference: &ExternalReference) -> AppResult<ReferenceDocument> {
        match reference.kind {
            ExternalReferenceKind::WikiPage => self.confluence.fetch_page(&reference.url).await,
            ExternalReferenceKind::PullRequest => {
                self.github.fetch_pull_request(&reference.url).await
            }
        }
    }
}
