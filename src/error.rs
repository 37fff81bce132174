use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("input error: {0}")]
    Input(String),
    #[error(
        "input error: no repository URL found in custom field `{field}` or in the ticket text"
    )]
    MissingRepository { field: String },
    #[error("{service} transient failure: {message}")]
    TransientRemote {
        service: &'static str,
        message: String,
    },
    #[error("issue tracker error: {0}")]
    IssueTracker(String),
    #[error("version control error: {0}")]
    VersionControl(String),
    #[error("source host error: {0}")]
    SourceHost(String),
    #[error("language model error: {0}")]
    LanguageModel(String),
    #[error("generation error: model response contained no parsable patch blocks")]
    GenerationEmpty,
    #[error("generation error: {0}")]
    GenerationFormat(String),
    #[error("no applicable patch: all {rejected} patch(es) were rejected")]
    NoApplicablePatch { rejected: usize },
    #[error("publish error: {0}")]
    Publish(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// Stable failure classification surfaced on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Input,
    TransientRemote,
    Remote,
    Generation,
    NoApplicablePatch,
    Publish,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Input => "input",
            ErrorKind::TransientRemote => "transient_remote",
            ErrorKind::Remote => "remote",
            ErrorKind::Generation => "generation",
            ErrorKind::NoApplicablePatch => "no_applicable_patch",
            ErrorKind::Publish => "publish",
            ErrorKind::Io => "io",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Io => 1,
            ErrorKind::Configuration => 2,
            ErrorKind::Input => 3,
            ErrorKind::TransientRemote => 4,
            ErrorKind::Remote => 5,
            ErrorKind::Generation => 6,
            ErrorKind::NoApplicablePatch => 7,
            ErrorKind::Publish => 8,
        }
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Configuration(_) => ErrorKind::Configuration,
            AppError::Input(_) | AppError::MissingRepository { .. } => ErrorKind::Input,
            AppError::TransientRemote { .. } => ErrorKind::TransientRemote,
            AppError::IssueTracker(_)
            | AppError::VersionControl(_)
            | AppError::SourceHost(_)
            | AppError::LanguageModel(_) => ErrorKind::Remote,
            AppError::GenerationEmpty | AppError::GenerationFormat(_) => ErrorKind::Generation,
            AppError::NoApplicablePatch { .. } => ErrorKind::NoApplicablePatch,
            AppError::Publish(_) => ErrorKind::Publish,
            AppError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientRemote { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_kind() {
        let kinds = [
            ErrorKind::Configuration,
            ErrorKind::Input,
            ErrorKind::TransientRemote,
            ErrorKind::Remote,
            ErrorKind::Generation,
            ErrorKind::NoApplicablePatch,
            ErrorKind::Publish,
            ErrorKind::Io,
        ];
        let mut codes = kinds.iter().map(ErrorKind::exit_code).collect::<Vec<_>>();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(codes.iter().all(|code| *code != 0));
    }

    #[test]
    fn missing_repository_is_an_input_error() {
        let error = AppError::MissingRepository {
            field: "customfield_11712".to_string(),
        };
        assert_eq!(error.kind(), ErrorKind::Input);
        assert!(error.to_string().contains("customfield_11712"));
    }
}
