use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::context::AppContext;
use crate::domain::branch::BranchName;
use crate::domain::context::ContextBundle;
use crate::domain::run::{Run, RunOutcome};
use crate::domain::ticket::{ParsedTicket, TicketKey};
use crate::error::{AppError, AppResult};
use crate::workflow::apply::PatchApplier;
use crate::workflow::external::ExternalContextFetcher;
use crate::workflow::generate::PatchGenerator;
use crate::workflow::parser::TicketParser;
use crate::workflow::prompt::PromptAssembler;
use crate::workflow::publish::PullRequestPublisher;
use crate::workflow::repository::RepositoryContextBuilder;
use crate::workflow::retry::{CallKind, RetryPolicy, within};

/// Runs the whole pipeline for one ticket and returns the opened pull request.
///
/// The ticket's workspace is recreated from scratch, and removed again unless
/// publishing failed, in which case the local branch is left for recovery.
#[instrument(skip_all, fields(ticket = %key))]
pub async fn run_ticket(ctx: &AppContext, key: &TicketKey) -> AppResult<RunOutcome> {
    let pipeline = &ctx.config.pipeline;
    let retry = RetryPolicy::once(pipeline.retry_backoff);

    let tracker = &ctx.issue_tracker;
    let record = retry
        .run("fetch ticket", CallKind::ReadOnly, move || {
            within("issue tracker", pipeline.remote_timeout, tracker.fetch_ticket(key))
        })
        .await?;
    let parsed = TicketParser::new(pipeline).parse(&record)?;
    info!(
        repository = %parsed.repository,
        files = parsed.file_references.len(),
        references = parsed.external_references.len(),
        "ticket parsed"
    );

    let workspace = workspace_for(&ctx.config.workspace_root, key);
    reset_workspace(&workspace).await?;

    let result = execute(ctx, parsed, workspace.clone()).await;
    match &result {
        Err(AppError::Publish(_)) => {
            warn!(workspace = %workspace.display(), "publish failed; local branch kept");
        }
        _ => remove_workspace(&workspace).await,
    }
    result.map_err(|error| match error {
        AppError::Publish(message) => AppError::Publish(format!(
            "{message} (local branch kept in {})",
            workspace.display()
        )),
        other => other,
    })
}

async fn execute(
    ctx: &AppContext,
    parsed: ParsedTicket,
    workspace: PathBuf,
) -> AppResult<RunOutcome> {
    let pipeline = &ctx.config.pipeline;

    ctx.version_control
        .clone_repository(&parsed.repository, &pipeline.base_branch, &workspace)
        .await?;

    let external = ExternalContextFetcher::new(
        pipeline,
        ctx.references.clone(),
        ctx.language_model.clone(),
    );
    let repository = RepositoryContextBuilder::new(pipeline);
    let (external_context, repository_context) = tokio::join!(
        external.gather(&parsed.external_references),
        repository.build(&workspace, &parsed.file_references),
    );
    let bundle = ContextBundle::new(repository_context?, external_context);

    let prompt = PromptAssembler::new(pipeline).assemble(&parsed, &bundle);
    let generated = PatchGenerator::new(pipeline, ctx.language_model.clone())
        .generate(&prompt, &parsed)
        .await?;

    let branch = BranchName::for_ticket(&pipeline.branch_prefix, &parsed.ticket.key);
    let mut run = Run::new(parsed, workspace, branch);
    run.patches = generated.patches;
    run.dropped = generated.dropped;
    run.omitted_references = bundle.external.omitted;
    run.prompt_fingerprint = prompt.fingerprint;

    PatchApplier::new(ctx.version_control.clone())
        .apply(&mut run)
        .await?;

    let pull_request = PullRequestPublisher::new(
        ctx.version_control.clone(),
        ctx.pull_requests.clone(),
        pipeline.base_branch.clone(),
    )
    .publish(&run)
    .await?;

    Ok(RunOutcome {
        applied: run.applied().map(|patch| patch.path.clone()).collect(),
        rejected: run.rejections(),
        branch: run.branch,
        pull_request,
    })
}

/// One workspace per ticket, so concurrent tickets never share a tree.
pub fn workspace_for(root: &Path, key: &TicketKey) -> PathBuf {
    root.join(key.as_str().to_lowercase())
}

async fn reset_workspace(workspace: &Path) -> AppResult<()> {
    match tokio::fs::remove_dir_all(workspace).await {
        Ok(()) => info!(workspace = %workspace.display(), "stale workspace removed"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    if let Some(parent) = workspace.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

async fn remove_workspace(workspace: &Path) {
    match tokio::fs::remove_dir_all(workspace).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(workspace = %workspace.display(), %err, "could not remove workspace"),
    }
}
