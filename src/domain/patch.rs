use std::fmt;

use crate::domain::diff::UnifiedDiff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchBody {
    Replace(String),
    Diff(UnifiedDiff),
}

impl PatchBody {
    pub fn mode(&self) -> &'static str {
        match self {
            PatchBody::Replace(_) => "replace",
            PatchBody::Diff(_) => "diff",
        }
    }
}

/// How the model came to touch a path. Every patch is model-generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOrigin {
    /// The ticket referenced this path.
    Referenced,
    /// The model introduced a path the ticket never mentioned.
    Unreferenced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchState {
    Unvalidated,
    Applied,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub path: String,
    pub body: PatchBody,
    pub origin: PatchOrigin,
    state: PatchState,
}

impl Patch {
    pub fn new(path: String, body: PatchBody, origin: PatchOrigin) -> Self {
        Self {
            path,
            body,
            origin,
            state: PatchState::Unvalidated,
        }
    }

    pub fn state(&self) -> &PatchState {
        &self.state
    }

    pub fn is_unreferenced(&self) -> bool {
        self.origin == PatchOrigin::Unreferenced
    }

    /// Transitions are one-way out of `Unvalidated`.
    pub fn mark_applied(&mut self) {
        if self.state == PatchState::Unvalidated {
            self.state = PatchState::Applied;
        }
    }

    pub fn mark_rejected(&mut self, reason: impl Into<String>) {
        if self.state == PatchState::Unvalidated {
            self.state = PatchState::Rejected(reason.into());
        }
    }
}

/// Normalizes a model-supplied path. `None` when it could escape the
/// working tree or is not a plain relative path.
pub fn safe_relative_path(raw: &str) -> Option<String> {
    let candidate = raw.trim().trim_matches('`').replace('\\', "/");
    let candidate = candidate.strip_prefix("./").unwrap_or(&candidate);
    if candidate.is_empty() || candidate.starts_with('/') || candidate.contains(':') {
        return None;
    }
    let clean = candidate
        .split('/')
        .all(|part| !part.is_empty() && part != "." && part != ".." && part != ".git");
    clean.then(|| candidate.to_string())
}

/// A per-file failure, collected and reported once at the end of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRejection {
    pub path: String,
    pub reason: String,
}

impl fmt::Display for PatchRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}
