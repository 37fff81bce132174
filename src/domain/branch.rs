use std::fmt;

use crate::domain::ticket::TicketKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchName(pub String);

impl BranchName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fixed prefix plus the lower-cased ticket key, e.g. `ai/eng-1234`.
    pub fn for_ticket(prefix: &str, key: &TicketKey) -> Self {
        Self(format!("{}{}", prefix, sanitize(key.as_str())))
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sanitize(input: &str) -> String {
    let clean = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>();
    let trimmed = clean.trim_matches('-');
    if trimmed.is_empty() {
        "ticket".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_branch_from_ticket_key() {
        let key = TicketKey::parse("ENG-1234").unwrap();
        let name = BranchName::for_ticket("ai/", &key);
        assert_eq!(name.as_str(), "ai/eng-1234");
    }

    #[test]
    fn branch_name_is_deterministic() {
        let first = BranchName::for_ticket("ai/", &TicketKey::parse("ENG-1234").unwrap());
        let second = BranchName::for_ticket("ai/", &TicketKey::parse("eng-1234").unwrap());
        assert_eq!(first, second);
    }
}
