use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::domain::run::{PullRequest, Run};
use crate::error::{AppError, AppResult};
use crate::services::{PullRequestRequest, PullRequestService, VersionControlService};
use crate::workflow::retry::{CallKind, RetryPolicy};

pub struct PullRequestPublisher {
    vcs: Arc<dyn VersionControlService>,
    pull_requests: Arc<dyn PullRequestService>,
    base_branch: String,
    retry: RetryPolicy,
}

impl PullRequestPublisher {
    pub fn new(
        vcs: Arc<dyn VersionControlService>,
        pull_requests: Arc<dyn PullRequestService>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            pull_requests,
            base_branch: base_branch.into(),
            retry: RetryPolicy::once(Duration::ZERO),
        }
    }

    /// Commits, pushes and opens the pull request. Neither the push nor the
    /// pull request is retried, and every failure here is a publish failure so
    /// the local branch survives it.
    #[instrument(skip_all, fields(ticket = %run.ticket.ticket.key, branch = %run.branch))]
    pub async fn publish(&self, run: &Run) -> AppResult<PullRequest> {
        let ticket = &run.ticket.ticket;
        let slug = run.ticket.repository.slug().ok_or_else(|| {
            AppError::Publish(format!(
                "cannot derive owner/repo from {}",
                run.ticket.repository
            ))
        })?;

        let message = commit_message(ticket.key.as_str(), &ticket.summary);
        let commit = self
            .vcs
            .commit_all(&run.workspace, &message)
            .await
            .map_err(|error| as_publish("commit", error))?;
        info!(commit = %commit, "changes committed");

        let vcs = &self.vcs;
        self.retry
            .run("push branch", CallKind::SideEffect, move || {
                vcs.push_branch(&run.workspace, &run.branch)
            })
            .await
            .map_err(|error| as_publish("push", error))?;
        info!("branch pushed");

        let request = PullRequestRequest {
            title: pull_request_title(ticket.key.as_str(), &ticket.summary),
            body: pull_request_body(run),
            head: run.branch.as_str().to_string(),
            base: self.base_branch.clone(),
        };
        let (pull_requests, slug, request) = (&self.pull_requests, &slug, &request);
        let pull_request = self
            .retry
            .run("open pull request", CallKind::SideEffect, move || {
                pull_requests.open_pull_request(slug, request)
            })
            .await
            .map_err(|error| as_publish("pull request creation", error))?;
        info!(number = pull_request.number, url = %pull_request.url, "pull request opened");
        Ok(pull_request)
    }
}

fn as_publish(step: &str, error: AppError) -> AppError {
    match error {
        AppError::Publish(_) => error,
        other => AppError::Publish(format!("{step} failed: {other}")),
    }
}

pub fn commit_message(key: &str, summary: &str) -> String {
    let summary = summary.trim();
    if summary.is_empty() {
        key.to_string()
    } else {
        format!("{key}: {summary}")
    }
}

fn pull_request_title(key: &str, summary: &str) -> String {
    let summary = summary.trim();
    if summary.is_empty() {
        key.to_string()
    } else {
        summary.to_string()
    }
}

/// Links the ticket and reports every applied, rejected and omitted item.
pub fn pull_request_body(run: &Run) -> String {
    let ticket = &run.ticket.ticket;
    let mut body = String::new();
    match &ticket.url {
        Some(url) => {
            let _ = writeln!(body, "Resolves [{}]({url}).", ticket.key);
        }
        None => {
            let _ = writeln!(body, "Resolves {}.", ticket.key);
        }
    }

    body.push_str("\n### Applied files\n");
    for patch in run.applied() {
        let _ = write!(body, "- `{}` ({})", patch.path, patch.body.mode());
        if patch.is_unreferenced() {
            body.push_str(" _not referenced by the ticket_");
        }
        body.push('\n');
    }

    let rejections = run.rejections();
    if !rejections.is_empty() {
        body.push_str("\n### Rejected files\n");
        for rejection in &rejections {
            let _ = writeln!(body, "- `{}`: {}", rejection.path, rejection.reason);
        }
    }

    if !run.omitted_references.is_empty() {
        body.push_str("\n### Omitted references\n");
        for omission in &run.omitted_references {
            let _ = writeln!(body, "- {}: {}", omission.url, omission.reason);
        }
    }

    if !run.prompt_fingerprint.is_empty() {
        let _ = write!(body, "\nPrompt fingerprint: `{}`\n", run.prompt_fingerprint);
    }
    body
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::domain::branch::BranchName;
    use crate::domain::context::{ExternalOmission, OmissionReason};
    use crate::domain::patch::{Patch, PatchBody, PatchOrigin, PatchRejection};
    use crate::workflow::testing::{FakePullRequests, FakeVcs, parsed_ticket};

    fn run_with_results() -> Run {
        let ticket = parsed_ticket(&["src/a.py", "src/b.py"]);
        let branch = BranchName::for_ticket("ai/", &ticket.ticket.key);
        let mut run = Run::new(ticket, PathBuf::from("/tmp/ticketpr/eng-1234"), branch);
        let mut applied = Patch::new(
            "src/a.py".to_string(),
            PatchBody::Replace("print('hello')\n".to_string()),
            PatchOrigin::Referenced,
        );
        applied.mark_applied();
        let mut extra = Patch::new(
            "docs/notes.md".to_string(),
            PatchBody::Replace("# Notes\n".to_string()),
            PatchOrigin::Unreferenced,
        );
        extra.mark_applied();
        let mut rejected = Patch::new(
            "src/b.py".to_string(),
            PatchBody::Replace(String::new()),
            PatchOrigin::Referenced,
        );
        rejected.mark_rejected("hunk 1 does not match the current content");
        run.patches = vec![applied, extra, rejected];
        run.dropped.push(PatchRejection {
            path: "../escape.py".to_string(),
            reason: "path escapes the repository".to_string(),
        });
        run.omitted_references.push(ExternalOmission {
            url: "https://acme.atlassian.net/wiki/spaces/ENG/pages/9".to_string(),
            reason: OmissionReason::TimedOut,
        });
        run.prompt_fingerprint = "0123456789abcdef".to_string();
        run
    }

    #[test]
    fn body_lists_applied_rejected_and_omitted() {
        let body = pull_request_body(&run_with_results());
        assert!(
            body.starts_with("Resolves [ENG-1234](https://acme.atlassian.net/browse/ENG-1234).")
        );
        assert!(body.contains("- `src/a.py` (replace)\n"));
        assert!(body.contains("- `docs/notes.md` (replace) _not referenced by the ticket_"));
        assert!(body.contains("- `src/b.py`: hunk 1 does not match"));
        assert!(body.contains("- `../escape.py`: path escapes the repository"));
        assert!(body.contains("pages/9: fetch timed out"));
        assert!(body.contains("`0123456789abcdef`"));
    }

    #[tokio::test]
    async fn publishes_commit_push_and_pull_request() {
        let vcs = Arc::new(FakeVcs::default());
        let prs = Arc::new(FakePullRequests::default());
        let publisher = PullRequestPublisher::new(vcs.clone(), prs.clone(), "main");

        let pull_request = publisher.publish(&run_with_results()).await.unwrap();

        assert_eq!(pull_request.url, "https://github.com/acme/widgets/pull/1");
        assert_eq!(
            vcs.commits.lock().unwrap().clone(),
            vec!["ENG-1234: Add greeting".to_string()]
        );
        assert_eq!(vcs.pushes(), vec!["ai/eng-1234".to_string()]);
        let opened = prs.opened();
        assert_eq!(opened[0].0.to_string(), "acme/widgets");
        assert_eq!(opened[0].1.title, "Add greeting");
        assert_eq!(opened[0].1.head, "ai/eng-1234");
        assert_eq!(opened[0].1.base, "main");
    }

    #[tokio::test]
    async fn push_rejection_is_a_publish_error_without_pull_request() {
        let vcs = Arc::new(FakeVcs {
            fail_push: true,
            ..FakeVcs::default()
        });
        let prs = Arc::new(FakePullRequests::default());
        let publisher = PullRequestPublisher::new(vcs, prs.clone(), "main");

        let err = publisher.publish(&run_with_results()).await.unwrap_err();

        assert!(matches!(err, AppError::Publish(_)));
        assert!(prs.opened().is_empty());
    }

    #[tokio::test]
    async fn commit_failure_is_a_publish_error() {
        let vcs = Arc::new(FakeVcs {
            fail_commit: true,
            ..FakeVcs::default()
        });
        let prs = Arc::new(FakePullRequests::default());
        let publisher = PullRequestPublisher::new(vcs.clone(), prs.clone(), "main");

        let err = publisher.publish(&run_with_results()).await.unwrap_err();

        assert!(matches!(err, AppError::Publish(ref message) if message.contains("no changes")));
        assert!(vcs.pushes().is_empty());
        assert!(prs.opened().is_empty());
    }

    #[tokio::test]
    async fn transient_push_failure_is_not_retried() {
        let vcs = Arc::new(FakeVcs {
            transient_push: true,
            ..FakeVcs::default()
        });
        let prs = Arc::new(FakePullRequests::default());
        let publisher = PullRequestPublisher::new(vcs.clone(), prs.clone(), "main");

        let err = publisher.publish(&run_with_results()).await.unwrap_err();

        assert!(matches!(err, AppError::Publish(_)));
        assert_eq!(*vcs.push_attempts.lock().unwrap(), 1);
    }

    #[test]
    fn commit_message_references_the_ticket() {
        assert_eq!(commit_message("ENG-1", "  Fix login "), "ENG-1: Fix login");
        assert_eq!(commit_message("ENG-1", ""), "ENG-1");
    }
}
