use async_trait::async_trait;

use crate::domain::ticket::ExternalReference;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDocument {
    pub title: String,
    pub text: String,
}

#[async_trait]
pub trait ReferenceFetcher: Send + Sync {
    async fn fetch(&self, reference: &ExternalReference) -> AppResult<ReferenceDocument>;
}
