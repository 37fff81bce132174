use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::domain::diff::{DiffError, UnifiedDiff};
use crate::domain::patch::{PatchBody, safe_relative_path};
use crate::domain::run::Run;
use crate::error::{AppError, AppResult};
use crate::services::VersionControlService;

/// Why a single patch could not be applied. Recorded, never raised.
#[derive(Debug, Error)]
enum Rejection {
    #[error("path escapes the repository")]
    OutsideTree,
    #[error("no existing file to apply the diff to")]
    MissingBase,
    #[error("file already exists; a creation diff cannot apply")]
    AlreadyExists,
    #[error("existing file is not UTF-8 text")]
    NotText,
    #[error("{0}")]
    Diff(#[from] DiffError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub struct PatchApplier {
    vcs: Arc<dyn VersionControlService>,
}

impl PatchApplier {
    pub fn new(vcs: Arc<dyn VersionControlService>) -> Self {
        Self { vcs }
    }

    /// Checks out the run's branch and applies every patch in order.
    ///
    /// Fails with [`AppError::NoApplicablePatch`] when nothing applied; the
    /// branch then only exists locally.
    #[instrument(skip_all, fields(branch = %run.branch, patches = run.patches.len()))]
    pub async fn apply(&self, run: &mut Run) -> AppResult<()> {
        self.vcs.create_branch(&run.workspace, &run.branch).await?;

        let root = tokio::fs::canonicalize(&run.workspace).await?;
        for patch in &mut run.patches {
            match apply_one(&root, &patch.path, &patch.body).await {
                Ok(()) => {
                    info!(path = %patch.path, mode = patch.body.mode(), "patch applied");
                    patch.mark_applied();
                }
                Err(reason) => {
                    warn!(path = %patch.path, %reason, "patch rejected");
                    patch.mark_rejected(reason.to_string());
                }
            }
        }

        let applied = run.applied().count();
        if applied == 0 {
            return Err(AppError::NoApplicablePatch {
                rejected: run.rejections().len(),
            });
        }
        info!(applied, rejected = run.rejections().len(), "patches applied");
        Ok(())
    }
}

async fn apply_one(root: &Path, path: &str, body: &PatchBody) -> Result<(), Rejection> {
    let target = resolve_inside(root, path).await?;
    match body {
        PatchBody::Replace(content) => {
            tokio::fs::write(&target, content.as_bytes()).await?;
            Ok(())
        }
        PatchBody::Diff(diff) => apply_diff(&target, diff).await,
    }
}

async fn apply_diff(target: &Path, diff: &UnifiedDiff) -> Result<(), Rejection> {
    let original = match tokio::fs::read(target).await {
        Ok(bytes) => Some(String::from_utf8(bytes).map_err(|_| Rejection::NotText)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };
    match (original, diff.creates_file()) {
        (None, false) => Err(Rejection::MissingBase),
        (Some(_), true) => Err(Rejection::AlreadyExists),
        (None, true) => {
            tokio::fs::write(target, diff.apply("")?).await?;
            Ok(())
        }
        (Some(original), false) => {
            let updated = diff.apply(&original)?;
            if diff.deletes_file() {
                tokio::fs::remove_file(target).await?;
            } else {
                tokio::fs::write(target, updated).await?;
            }
            Ok(())
        }
    }
}

/// Creates missing parent directories and confirms the real location of
/// the target stays under `root`, symlinks included.
async fn resolve_inside(root: &Path, path: &str) -> Result<PathBuf, Rejection> {
    let relative = safe_relative_path(path).ok_or(Rejection::OutsideTree)?;
    let target = root.join(&relative);
    let parent = target.parent().ok_or(Rejection::OutsideTree)?;
    tokio::fs::create_dir_all(parent).await?;
    let real_parent = tokio::fs::canonicalize(parent).await?;
    if !real_parent.starts_with(root) {
        return Err(Rejection::OutsideTree);
    }
    if let Ok(meta) = tokio::fs::symlink_metadata(&target).await {
        if meta.file_type().is_symlink() {
            let real = tokio::fs::canonicalize(&target).await?;
            if !real.starts_with(root) {
                return Err(Rejection::OutsideTree);
            }
        }
    }
    Ok(target)
}
