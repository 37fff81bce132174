mod cmd;
mod config;
mod context;
mod domain;
mod error;
mod infra;
mod logging;
mod services;
mod workflow;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::warn;

use crate::cmd::config::{self as config_cmd, ConfigArgs};
use crate::cmd::run::{self as run_cmd, RunCommandArgs};
use crate::config::{AppConfig, LlmProvider};
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::infra::confluence::ConfluenceClient;
use crate::infra::git::GitCli;
use crate::infra::github::GitHubClient;
use crate::infra::jira::JiraClient;
use crate::infra::llm::GeminiClient;
use crate::infra::references::HttpReferenceFetcher;
use crate::services::LanguageModelService;

#[derive(Parser)]
#[command(
    name = "ticketpr",
    author,
    version,
    about = "Turn a Jira ticket into a generated patch and a GitHub pull request",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Ticket key to resolve, e.g. ENG-1234.
    ticket: Option<String>,

    /// Branch to clone and target with the pull request.
    #[arg(long, value_name = "BRANCH")]
    base_branch: Option<String>,

    /// Truncate long external references instead of summarizing them.
    #[arg(long)]
    no_summarize: bool,

    /// Directory that holds per-ticket working trees.
    #[arg(long, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage stored configuration.
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let kind = error.kind();
            eprintln!("error[{}]: {error}", kind.as_str());
            ExitCode::from(kind.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    if let Some(Commands::Config(args)) = cli.command {
        return config_cmd::run(args.command);
    }
    let Some(ticket) = cli.ticket.clone() else {
        return Err(AppError::Input(
            "a ticket key is required (e.g. `ticketpr ENG-1234`)".to_string(),
        ));
    };

    let mut config = AppConfig::load()?;
    if let Some(base_branch) = cli.base_branch {
        config.pipeline.base_branch = base_branch;
    }
    if cli.no_summarize {
        config.pipeline.summarize_external = false;
    }
    if let Some(workspace) = cli.workspace {
        config.workspace_root = workspace;
    }

    let context = build_context(config)?;
    let outcome = run_cmd::run(&context, RunCommandArgs { ticket }).await?;

    println!("Pull request opened: {}", outcome.pull_request.url);
    println!("Branch: {}", outcome.branch.as_str());
    println!("Applied: {}", outcome.applied.join(", "));
    if !outcome.rejected.is_empty() {
        println!("Rejected files:");
        for rejection in &outcome.rejected {
            println!("  - {rejection}");
        }
    }
    Ok(())
}

fn build_context(config: AppConfig) -> AppResult<AppContext> {
    let pipeline = &config.pipeline;

    if config.jira.base_url.is_none() {
        warn!("Jira base URL not configured; ticket fetch will fail");
    }
    if config.github.token.is_none() {
        warn!("GitHub token not configured; private clones and pull request creation will fail");
    }
    if config.gemini.api_key.is_none() {
        warn!("Gemini API key not configured; patch generation will fail");
    }

    let language_model: Arc<dyn LanguageModelService> = match &config.llm_provider {
        LlmProvider::Gemini => Arc::new(GeminiClient::new(&config.gemini, pipeline.remote_timeout)?),
        LlmProvider::Custom(provider) => {
            warn!(%provider, "custom LLM provider not supported; using Gemini");
            Arc::new(GeminiClient::new(&config.gemini, pipeline.remote_timeout)?)
        }
    };

    let git = Arc::new(GitCli::new(
        config.github.token.clone(),
        pipeline.remote_timeout,
    ));
    let issue_tracker = Arc::new(JiraClient::new(&config.jira, pipeline.remote_timeout)?);
    let pull_requests = Arc::new(GitHubClient::new(
        &config.github,
        pipeline.remote_timeout,
        pipeline.pr_files_limit,
    )?);
    let references = Arc::new(HttpReferenceFetcher::new(
        ConfluenceClient::new(&config.jira, pipeline.external_fetch_timeout)?,
        GitHubClient::new(
            &config.github,
            pipeline.external_fetch_timeout,
            pipeline.pr_files_limit,
        )?,
    ));

    Ok(AppContext::new(
        config,
        git,
        issue_tracker,
        language_model,
        pull_requests,
        references,
    ))
}
