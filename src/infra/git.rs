//! Git operations on the run's working tree via the `git` CLI.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::domain::branch::BranchName;
use crate::domain::repository::RepositoryUrl;
use crate::error::{AppError, AppResult};
use crate::services::VersionControlService;

const COMMITTER_NAME: &str = "ticketpr";
const COMMITTER_EMAIL: &str = "ticketpr@users.noreply.github.com";

pub struct GitCli {
    token: Option<String>,
    timeout: Duration,
}

impl GitCli {
    pub fn new(token: Option<String>, timeout: Duration) -> Self {
        Self { token, timeout }
    }

    /// Runs one git command and returns its trimmed stdout. `op` is what gets
    /// logged; arguments may carry credentials and never are.
    async fn git(&self, op: &str, tree: Option<&Path>, args: &[&str]) -> AppResult<String> {
        debug!(op, "running git");
        let mut command = Command::new("git");
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(tree) = tree {
            command.current_dir(tree);
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| AppError::TransientRemote {
                service: "git",
                message: format!("git {op} did not finish within {}s", self.timeout.as_secs()),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = match stderr.trim() {
                "" => stdout.trim(),
                stderr => stderr,
            };
            return Err(AppError::VersionControl(format!(
                "git {op} failed: {}",
                self.redact(detail)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn redact(&self, text: &str) -> String {
        match self.token.as_deref() {
            Some(token) if !token.is_empty() => text.replace(token, "***"),
            _ => text.to_string(),
        }
    }
}

fn clone_args<'a>(remote: &'a str, base_branch: &'a str, destination: &'a str) -> Vec<&'a str> {
    vec![
        "clone",
        "--branch",
        base_branch,
        "--single-branch",
        "--",
        remote,
        destination,
    ]
}

/// Pushes to an explicit URL so credentials are never written to the remote
/// configuration.
fn push_args(remote: &str, branch: &str) -> Vec<String> {
    vec![
        "push".to_string(),
        "--force".to_string(),
        remote.to_string(),
        format!("refs/heads/{branch}:refs/heads/{branch}"),
    ]
}

#[async_trait]
impl VersionControlService for GitCli {
    /// The token is only used for the transfer; `origin` is reset to the plain
    /// URL so it never stays in `.git/config`.
    #[instrument(skip_all, fields(destination = %destination.display(), base = base_branch))]
    async fn clone_repository(
        &self,
        url: &RepositoryUrl,
        base_branch: &str,
        destination: &Path,
    ) -> AppResult<()> {
        let remote = url.authenticated(self.token.as_deref());
        let destination_arg = destination.to_string_lossy();
        self.git(
            "clone",
            None,
            &clone_args(&remote, base_branch, &destination_arg),
        )
        .await?;
        self.git(
            "remote set-url",
            Some(destination),
            &["remote", "set-url", "origin", url.as_str()],
        )
        .await?;
        Ok(())
    }

    async fn create_branch(&self, tree: &Path, branch: &BranchName) -> AppResult<()> {
        if branch.as_str().is_empty() {
            return Err(AppError::VersionControl(
                "branch name cannot be empty".to_string(),
            ));
        }
        self.git("checkout", Some(tree), &["checkout", "-B", branch.as_str()])
            .await?;
        Ok(())
    }

    async fn commit_all(&self, tree: &Path, message: &str) -> AppResult<String> {
        self.git("add", Some(tree), &["add", "-A"]).await?;
        let staged = self
            .git("status", Some(tree), &["status", "--porcelain"])
            .await?;
        if staged.is_empty() {
            return Err(AppError::VersionControl(
                "no changes to commit; the applied patches match the base branch".to_string(),
            ));
        }
        let name = format!("user.name={COMMITTER_NAME}");
        let email = format!("user.email={COMMITTER_EMAIL}");
        self.git(
            "commit",
            Some(tree),
            &["-c", &name, "-c", &email, "commit", "-m", message],
        )
        .await?;
        self.git("rev-parse", Some(tree), &["rev-parse", "--short", "HEAD"])
            .await
    }

    async fn push_branch(&self, tree: &Path, branch: &BranchName) -> AppResult<()> {
        let origin = self
            .git("remote get-url", Some(tree), &["remote", "get-url", "origin"])
            .await
            .map_err(into_publish)?;
        let remote = match RepositoryUrl::parse(&origin) {
            Some(url) => url.authenticated(self.token.as_deref()),
            None => origin,
        };
        let args = push_args(&remote, branch.as_str());
        let args = args.iter().map(String::as_str).collect::<Vec<_>>();
        self.git("push", Some(tree), &args)
            .await
            .map_err(into_publish)?;
        Ok(())
    }
}

fn into_publish(error: AppError) -> AppError {
    match error {
        AppError::VersionControl(message) => AppError::Publish(message),
        AppError::TransientRemote { message, .. } => AppError::Publish(message),
        other => other,
    }
}
