//! In-memory collaborators shared by the workflow tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::branch::BranchName;
use crate::domain::repository::{RepositorySlug, RepositoryUrl};
use crate::domain::run::PullRequest;
use crate::domain::ticket::{
    ExternalReference, FileReference, ParsedTicket, Ticket, TicketKey, TicketRecord,
};
use crate::error::{AppError, AppResult};
use crate::services::{
    IssueTrackerService, LanguageModelService, PullRequestRequest, PullRequestService,
    ReferenceDocument, ReferenceFetcher, VersionControlService,
};

pub fn parsed_ticket(paths: &[&str]) -> ParsedTicket {
    ParsedTicket {
        ticket: Ticket {
            key: TicketKey::parse("ENG-1234").unwrap(),
            summary: "Add greeting".to_string(),
            url: Some("https://acme.atlassian.net/browse/ENG-1234".to_string()),
        },
        repository: RepositoryUrl::parse("https://github.com/acme/widgets.git").unwrap(),
        instructions: String::new(),
        file_references: paths
            .iter()
            .map(|p| FileReference {
                path: p.to_string(),
                snippet: String::new(),
            })
            .collect(),
        external_references: Vec::new(),
    }
}

/// Version control over a plain directory: cloning writes the fixture files.
#[derive(Default)]
pub struct FakeVcs {
    pub fixture: Vec<(String, String)>,
    pub fail_push: bool,
    pub transient_push: bool,
    pub fail_commit: bool,
    pub push_attempts: Mutex<u32>,
    pub clones: Mutex<Vec<PathBuf>>,
    pub created_branches: Mutex<Vec<String>>,
    pub commits: Mutex<Vec<String>>,
    pub pushes: Mutex<Vec<String>>,
}

impl FakeVcs {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            fixture: files
                .iter()
                .map(|(path, content)| (path.to_string(), content.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn branches(&self) -> Vec<String> {
        self.created_branches.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> Vec<String> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl VersionControlService for FakeVcs {
    async fn clone_repository(
        &self,
        _url: &RepositoryUrl,
        _base_branch: &str,
        destination: &Path,
    ) -> AppResult<()> {
        for (path, content) in &self.fixture {
            let target = destination.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }
        std::fs::create_dir_all(destination)?;
        self.clones.lock().unwrap().push(destination.to_path_buf());
        Ok(())
    }

    async fn create_branch(&self, _tree: &Path, branch: &BranchName) -> AppResult<()> {
        self.created_branches
            .lock()
            .unwrap()
            .push(branch.as_str().to_string());
        Ok(())
    }

    async fn commit_all(&self, _tree: &Path, message: &str) -> AppResult<String> {
        if self.fail_commit {
            return Err(AppError::VersionControl(
                "no changes to commit; the applied patches match the base branch".to_string(),
            ));
        }
        self.commits.lock().unwrap().push(message.to_string());
        Ok("abc1234".to_string())
    }

    async fn push_branch(&self, _tree: &Path, branch: &BranchName) -> AppResult<()> {
        *self.push_attempts.lock().unwrap() += 1;
        if self.transient_push {
            return Err(AppError::TransientRemote {
                service: "git",
                message: "connection reset".to_string(),
            });
        }
        if self.fail_push {
            return Err(AppError::Publish(format!(
                "remote rejected {}",
                branch.as_str()
            )));
        }
        self.pushes.lock().unwrap().push(branch.as_str().to_string());
        Ok(())
    }
}

pub struct FakeTracker {
    pub record: TicketRecord,
}

impl FakeTracker {
    pub fn new(summary: &str, description: &str) -> Self {
        Self {
            record: TicketRecord {
                key: TicketKey::parse("ENG-1234").unwrap(),
                summary: summary.to_string(),
                description: description.to_string(),
                custom_fields: Default::default(),
                url: Some("https://acme.atlassian.net/browse/ENG-1234".to_string()),
            },
        }
    }
}

#[async_trait]
impl IssueTrackerService for FakeTracker {
    async fn fetch_ticket(&self, key: &TicketKey) -> AppResult<TicketRecord> {
        if key != &self.record.key {
            return Err(AppError::IssueTracker(format!("{key} not found")));
        }
        Ok(self.record.clone())
    }
}

/// Replies with scripted completions in order.
pub struct FakeModel {
    replies: Mutex<VecDeque<AppResult<String>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeModel {
    pub fn replying(replies: Vec<AppResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModelService for FakeModel {
    async fn complete(&self, prompt: &str, _max_output_tokens: u32) -> AppResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::LanguageModel("no scripted reply".to_string())))
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    pub documents: HashMap<String, String>,
    pub hang: Vec<String>,
}

#[async_trait]
impl ReferenceFetcher for FakeFetcher {
    async fn fetch(&self, reference: &ExternalReference) -> AppResult<ReferenceDocument> {
        if self.hang.contains(&reference.url) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.documents
            .get(&reference.url)
            .map(|text| ReferenceDocument {
                title: "Design".to_string(),
                text: text.clone(),
            })
            .ok_or_else(|| AppError::SourceHost(format!("404 for {}", reference.url)))
    }
}

#[derive(Default)]
pub struct FakePullRequests {
    pub fail: Option<String>,
    pub opened: Mutex<Vec<(RepositorySlug, PullRequestRequest)>>,
}

impl FakePullRequests {
    pub fn opened(&self) -> Vec<(RepositorySlug, PullRequestRequest)> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestService for FakePullRequests {
    async fn open_pull_request(
        &self,
        repository: &RepositorySlug,
        request: &PullRequestRequest,
    ) -> AppResult<PullRequest> {
        if let Some(message) = &self.fail {
            return Err(AppError::Publish(message.clone()));
        }
        let mut opened = self.opened.lock().unwrap();
        opened.push((repository.clone(), request.clone()));
        Ok(PullRequest {
            number: opened.len() as u64,
            url: format!("https://github.com/{repository}/pull/{}", opened.len()),
        })
    }
}
