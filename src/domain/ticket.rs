use std::collections::BTreeMap;
use std::fmt;

use crate::domain::repository::RepositoryUrl;
use crate::error::{AppError, AppResult};

/// Issue key such as `ENG-1234`, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TicketKey(String);

impl TicketKey {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let key = raw.trim().to_uppercase();
        let (project, number) = key.split_once('-').ok_or_else(|| {
            AppError::Input(format!("ticket key `{raw}` is not of the form PROJECT-123"))
        })?;
        let project_ok = project
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && project
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        let number_ok = !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
        if !project_ok || !number_ok {
            return Err(AppError::Input(format!(
                "ticket key `{raw}` is not of the form PROJECT-123"
            )));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ticket as returned by the issue tracker, before any parsing.
#[derive(Debug, Clone)]
pub struct TicketRecord {
    pub key: TicketKey,
    pub summary: String,
    pub description: String,
    pub custom_fields: BTreeMap<String, String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Ticket {
    pub key: TicketKey,
    pub summary: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    pub path: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalReferenceKind {
    WikiPage,
    PullRequest,
}

impl ExternalReferenceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ExternalReferenceKind::WikiPage => "WIKI",
            ExternalReferenceKind::PullRequest => "PULL REQUEST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalReference {
    pub url: String,
    pub kind: ExternalReferenceKind,
}

/// Everything the pipeline needs from one ticket.
#[derive(Debug, Clone)]
pub struct ParsedTicket {
    pub ticket: Ticket,
    pub repository: RepositoryUrl,
    pub instructions: String,
    pub file_references: Vec<FileReference>,
    pub external_references: Vec<ExternalReference>,
}

impl ParsedTicket {
    pub fn references_path(&self, path: &str) -> bool {
        self.file_references.iter().any(|r| r.path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_ticket_key() {
        let key = TicketKey::parse(" eng-1234 ").unwrap();
        assert_eq!(key.as_str(), "ENG-1234");
        assert_eq!(TicketKey::parse("DATA_OPS-7").unwrap().as_str(), "DATA_OPS-7");
    }

    #[test]
    fn rejects_malformed_ticket_keys() {
        for raw in ["", "ENG", "ENG-", "-12", "1ENG-3", "ENG-12a", "ENG 12"] {
            assert!(TicketKey::parse(raw).is_err(), "{raw} should be rejected");
        }
    }
}
