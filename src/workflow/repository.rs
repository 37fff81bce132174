use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::domain::context::{
    CharBudget, FileStatus, RepositoryContext, RepositoryEntry, char_len, file_frame_len,
    truncate_chars,
};
use crate::domain::ticket::FileReference;
use crate::error::AppResult;

/// Bytes inspected when sniffing for binary content.
const BINARY_SNIFF_BYTES: usize = 8000;

#[derive(Debug, Clone)]
pub struct RepositoryContextBuilder {
    budget: usize,
}

impl RepositoryContextBuilder {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            budget: config.repository_budget,
        }
    }

    /// Reads each referenced file from the working tree in ticket order.
    #[instrument(
        skip_all,
        fields(tree = %tree.display(), files = references.len(), budget = self.budget)
    )]
    pub async fn build(
        &self,
        tree: &Path,
        references: &[FileReference],
    ) -> AppResult<RepositoryContext> {
        let mut budget = CharBudget::new(self.budget);
        let mut entries = Vec::with_capacity(references.len());

        for reference in references {
            let status = read_status(&tree.join(&reference.path)).await?;
            let entry = fit_entry(&reference.path, status, &mut budget);
            match &entry.status {
                FileStatus::Missing => {
                    info!(path = %entry.path, "file missing; model may create it")
                }
                FileStatus::Unsupported { reason } => {
                    warn!(path = %entry.path, reason = %reason, "file excluded from context")
                }
                FileStatus::Omitted => {
                    warn!(path = %entry.path, "repository context budget exhausted; file omitted")
                }
                FileStatus::Included { truncated, .. } => {
                    debug!(path = %entry.path, truncated, "file included")
                }
            }
            entries.push(entry);
        }

        info!(
            files = entries.len(),
            chars = budget.used(),
            truncated = entries.iter().filter(|e| e.is_truncated()).count(),
            "repository context assembled"
        );
        Ok(RepositoryContext { entries, budget })
    }
}

/// Raw status before budgeting. Included files carry their full text.
async fn read_status(path: &Path) -> AppResult<FileStatus> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(FileStatus::Missing),
        Err(err) => return Err(err.into()),
    };
    if !metadata.is_file() {
        return Ok(FileStatus::Unsupported {
            reason: "not a regular file".to_string(),
        });
    }
    let bytes = tokio::fs::read(path).await?;
    if bytes.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0) {
        return Ok(FileStatus::Unsupported {
            reason: "binary content".to_string(),
        });
    }
    match String::from_utf8(bytes) {
        Ok(content) => Ok(FileStatus::Included {
            content,
            truncated: false,
        }),
        Err(_) => Ok(FileStatus::Unsupported {
            reason: "not valid UTF-8 text".to_string(),
        }),
    }
}

/// Charges the entry against the budget, truncating or omitting as needed.
fn fit_entry(path: &str, status: FileStatus, budget: &mut CharBudget) -> RepositoryEntry {
    let status = match status {
        FileStatus::Included { content, .. } => {
            let full = file_frame_len(path, false) + char_len(&content);
            if budget.try_consume(full) {
                FileStatus::Included {
                    content,
                    truncated: false,
                }
            } else {
                let frame = file_frame_len(path, true);
                if budget.remaining() >= frame {
                    let kept = truncate_chars(&content, budget.remaining() - frame).to_string();
                    budget.try_consume(frame + char_len(&kept));
                    FileStatus::Included {
                        content: kept,
                        truncated: true,
                    }
                } else {
                    FileStatus::Omitted
                }
            }
        }
        other => {
            let candidate = RepositoryEntry {
                path: path.to_string(),
                status: other,
            };
            if budget.try_consume(candidate.rendered_len()) {
                candidate.status
            } else {
                FileStatus::Omitted
            }
        }
    };
    RepositoryEntry {
        path: path.to_string(),
        status,
    }
}
