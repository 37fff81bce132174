use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    IssueTrackerService, LanguageModelService, PullRequestService, ReferenceFetcher,
    VersionControlService,
};

/// Resolved configuration plus every collaborator one run talks to.
#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub version_control: Arc<dyn VersionControlService>,
    pub issue_tracker: Arc<dyn IssueTrackerService>,
    pub language_model: Arc<dyn LanguageModelService>,
    pub pull_requests: Arc<dyn PullRequestService>,
    pub references: Arc<dyn ReferenceFetcher>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        version_control: Arc<dyn VersionControlService>,
        issue_tracker: Arc<dyn IssueTrackerService>,
        language_model: Arc<dyn LanguageModelService>,
        pull_requests: Arc<dyn PullRequestService>,
        references: Arc<dyn ReferenceFetcher>,
    ) -> Self {
        Self {
            config,
            version_control,
            issue_tracker,
            language_model,
            pull_requests,
            references,
        }
    }
}
