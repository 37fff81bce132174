use std::path::PathBuf;

use crate::domain::branch::BranchName;
use crate::domain::context::ExternalOmission;
use crate::domain::patch::{Patch, PatchRejection, PatchState};
use crate::domain::ticket::ParsedTicket;

/// One pipeline invocation for a single ticket. Never persisted.
#[derive(Debug, Clone)]
pub struct Run {
    pub ticket: ParsedTicket,
    pub workspace: PathBuf,
    pub branch: BranchName,
    pub patches: Vec<Patch>,
    /// Blocks dropped during response parsing, before any patch existed.
    pub dropped: Vec<PatchRejection>,
    pub omitted_references: Vec<ExternalOmission>,
    pub prompt_fingerprint: String,
}

impl Run {
    pub fn new(ticket: ParsedTicket, workspace: PathBuf, branch: BranchName) -> Self {
        Self {
            ticket,
            workspace,
            branch,
            patches: Vec::new(),
            dropped: Vec::new(),
            omitted_references: Vec::new(),
            prompt_fingerprint: String::new(),
        }
    }

    pub fn applied(&self) -> impl Iterator<Item = &Patch> {
        self.patches
            .iter()
            .filter(|patch| patch.state() == &PatchState::Applied)
    }

    /// Parse-time drops followed by apply-time rejections.
    pub fn rejections(&self) -> Vec<PatchRejection> {
        let mut rejections = self.dropped.clone();
        rejections.extend(self.patches.iter().filter_map(|patch| match patch.state() {
            PatchState::Rejected(reason) => Some(PatchRejection {
                path: patch.path.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }));
        rejections
    }
}

#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub pull_request: PullRequest,
    pub branch: BranchName,
    pub applied: Vec<String>,
    pub rejected: Vec<PatchRejection>,
}
