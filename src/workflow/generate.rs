use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::config::PipelineConfig;
use crate::domain::diff::UnifiedDiff;
use crate::domain::patch::{Patch, PatchBody, PatchOrigin, PatchRejection, safe_relative_path};
use crate::domain::ticket::ParsedTicket;
use crate::error::{AppError, AppResult};
use crate::services::LanguageModelService;
use crate::workflow::prompt::Prompt;
use crate::workflow::retry::{CallKind, RetryPolicy, within};

/// Opens a block: `=== PATCH <path> <replace|diff> ===`.
pub const PATCH_OPEN: &str = "=== PATCH ";
pub const PATCH_CLOSE: &str = "=== END PATCH ===";
const HEADER_TAIL: &str = "===";

#[derive(Debug, Clone, Default)]
pub struct GeneratedPatches {
    pub patches: Vec<Patch>,
    /// Blocks that were recognized but could not become a patch.
    pub dropped: Vec<PatchRejection>,
}

pub struct PatchGenerator {
    model: Arc<dyn LanguageModelService>,
    retry: RetryPolicy,
    timeout: Duration,
    max_output_tokens: u32,
}

impl PatchGenerator {
    pub fn new(config: &PipelineConfig, model: Arc<dyn LanguageModelService>) -> Self {
        Self {
            model,
            retry: RetryPolicy::once(config.retry_backoff),
            timeout: config.remote_timeout,
            max_output_tokens: config.max_output_tokens,
        }
    }

    #[instrument(skip_all, fields(ticket = %ticket.ticket.key, fingerprint = %prompt.fingerprint))]
    pub async fn generate(
        &self,
        prompt: &Prompt,
        ticket: &ParsedTicket,
    ) -> AppResult<GeneratedPatches> {
        let model = &self.model;
        let text = prompt.text.as_str();
        let (timeout, max_output_tokens) = (self.timeout, self.max_output_tokens);
        let response = self
            .retry
            .run("model completion", CallKind::ReadOnly, move || {
                within("language model", timeout, model.complete(text, max_output_tokens))
            })
            .await?;

        let generated = parse_response(&response, ticket)?;
        info!(
            patches = generated.patches.len(),
            dropped = generated.dropped.len(),
            unreferenced = generated.patches.iter().filter(|p| p.is_unreferenced()).count(),
            "model response parsed"
        );
        Ok(generated)
    }
}

struct RawBlock<'a> {
    path: &'a str,
    mode: &'a str,
    body: Vec<&'a str>,
}

/// Splits a model response into validated patches.
///
/// A response with no block header at all is prose and fails with
/// [`AppError::GenerationFormat`]. Headers without a single well-formed,
/// terminated block fail with [`AppError::GenerationEmpty`]. Anything wrong
/// with an individual block only drops that block.
pub fn parse_response(response: &str, ticket: &ParsedTicket) -> AppResult<GeneratedPatches> {
    if !response
        .lines()
        .any(|line| line.trim_start().starts_with(PATCH_OPEN))
    {
        return Err(AppError::GenerationFormat(
            "model response contains no patch blocks".to_string(),
        ));
    }

    let blocks = split_blocks(response);
    if blocks.is_empty() {
        return Err(AppError::GenerationEmpty);
    }

    let mut generated = GeneratedPatches::default();
    let mut seen = HashSet::new();
    for block in blocks {
        let Some(path) = safe_relative_path(block.path) else {
            generated.dropped.push(PatchRejection {
                path: block.path.to_string(),
                reason: "path escapes the repository".to_string(),
            });
            continue;
        };
        if !seen.insert(path.clone()) {
            generated.dropped.push(PatchRejection {
                path,
                reason: "duplicate block; the first one was kept".to_string(),
            });
            continue;
        }
        let body = unwrap_fence(&block.body);
        let body = match block.mode {
            "replace" => PatchBody::Replace(join_lines(body)),
            _ => match UnifiedDiff::parse(&join_lines(body))
                .and_then(|diff| diff.check_paths(&path).map(|()| diff))
            {
                Ok(diff) => PatchBody::Diff(diff),
                Err(error) => {
                    warn!(path = %path, %error, "invalid diff dropped");
                    generated.dropped.push(PatchRejection {
                        path,
                        reason: format!("invalid diff: {error}"),
                    });
                    continue;
                }
            },
        };
        let origin = if ticket.references_path(&path) {
            PatchOrigin::Referenced
        } else {
            warn!(path = %path, "model patched a file the ticket did not reference");
            PatchOrigin::Unreferenced
        };
        generated.patches.push(Patch::new(path, body, origin));
    }
    if generated.patches.is_empty() {
        for rejection in &generated.dropped {
            warn!(path = %rejection.path, reason = %rejection.reason, "patch block dropped");
        }
        return Err(AppError::GenerationEmpty);
    }
    Ok(generated)
}

fn split_blocks(response: &str) -> Vec<RawBlock<'_>> {
    let mut blocks = Vec::new();
    let mut open: Option<RawBlock<'_>> = None;
    for line in response.lines() {
        let trimmed = line.trim();
        if trimmed == PATCH_CLOSE {
            if let Some(block) = open.take() {
                blocks.push(block);
            }
            continue;
        }
        if trimmed.starts_with(PATCH_OPEN) {
            if let Some(block) = open.take() {
                warn!(path = block.path, "unterminated patch block ignored");
            }
            open = parse_header(trimmed);
            if open.is_none() {
                warn!(header = trimmed, "malformed patch header ignored");
            }
            continue;
        }
        if let Some(block) = open.as_mut() {
            block.body.push(line);
        }
    }
    if let Some(block) = open {
        warn!(path = block.path, "unterminated patch block ignored");
    }
    blocks
}

fn parse_header(line: &str) -> Option<RawBlock<'_>> {
    let inner = line
        .strip_prefix(PATCH_OPEN)?
        .strip_suffix(HEADER_TAIL)?
        .trim();
    let (path, mode) = inner.rsplit_once(char::is_whitespace)?;
    let path = path.trim();
    if path.is_empty() || !matches!(mode, "replace" | "diff") {
        return None;
    }
    Some(RawBlock {
        path,
        mode,
        body: Vec::new(),
    })
}

/// Strips a single surrounding markdown fence.
fn unwrap_fence<'a, 'b>(body: &'b [&'a str]) -> &'b [&'a str] {
    let first = body.iter().position(|line| !line.trim().is_empty());
    let last = body.iter().rposition(|line| !line.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last))
            if last > first
                && body[first].trim_start().starts_with("```")
                && body[last].trim() == "```" =>
        {
            &body[first + 1..last]
        }
        _ => body,
    }
}

fn join_lines(lines: &[&str]) -> String {
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}
