//! Deterministic prompt rendering.
//!
//! The prompt is made of fixed text plus three bounded sections: the ticket
//! (bounded by the instruction budget) and the two context sections whose
//! budgets were enforced when the [`ContextBundle`] was built. Nothing is
//! truncated after the fact.

use std::fmt::Write as _;

use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::domain::context::{
    ContextBundle, FileStatus, char_len, truncate_chars, truncate_with_marker,
};
use crate::domain::ticket::ParsedTicket;
use crate::workflow::generate::{PATCH_CLOSE, PATCH_OPEN};

const PREAMBLE: &str = "You are a senior software engineer working in an existing repository. \
Implement the ticket below by changing the listed files. Keep unrelated code untouched \
and follow the conventions of the surrounding code.";

const EMPTY_SECTION: &str = "(none)\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    /// Short blake3 digest of `text`, quoted in logs and the pull request.
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    instruction_budget: usize,
    repository_budget: usize,
    external_budget: usize,
    preview_chars: usize,
}

impl PromptAssembler {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            instruction_budget: config.instruction_budget,
            repository_budget: config.repository_budget,
            external_budget: config.external_budget,
            preview_chars: config.prompt_preview_chars,
        }
    }

    pub fn assemble(&self, ticket: &ParsedTicket, bundle: &ContextBundle) -> Prompt {
        let ticket_block =
            truncate_with_marker(&ticket_section(ticket, bundle), self.instruction_budget);
        let repository_block = bundle
            .repository
            .entries
            .iter()
            .map(|entry| entry.render())
            .collect::<String>();
        let external_block = bundle
            .external
            .entries
            .iter()
            .map(|entry| entry.render())
            .collect::<String>();

        let text = render(&ticket_block, &repository_block, &external_block);
        let fingerprint = fingerprint(&text);

        info!(
            ticket = %ticket.ticket.key,
            chars = char_len(&text),
            context_chars = bundle.total_chars(),
            bound = self.bound(),
            fingerprint = %fingerprint,
            "prompt assembled"
        );
        if self.preview_chars > 0 {
            debug!(preview = truncate_chars(&text, self.preview_chars), "prompt preview");
        }
        Prompt { text, fingerprint }
    }

    /// Upper bound on the length of any prompt this assembler renders.
    pub fn bound(&self) -> usize {
        self.instruction_budget + self.repository_budget + self.external_budget + overhead()
    }
}

/// Characters contributed by the fixed text alone.
pub fn overhead() -> usize {
    char_len(&render("", "", ""))
}

fn render(ticket: &str, repository: &str, external: &str) -> String {
    let or_empty = |block: &str| {
        if block.is_empty() {
            EMPTY_SECTION.to_string()
        } else {
            block.to_string()
        }
    };
    let mut text = String::new();
    text.push_str(PREAMBLE);
    text.push_str("\n\n=== TICKET ===\n");
    text.push_str(ticket);
    text.push_str("\n\n=== REPOSITORY FILES ===\n");
    text.push_str(&or_empty(repository));
    text.push_str("\n=== EXTERNAL CONTEXT ===\n");
    text.push_str(&or_empty(external));
    text.push_str("\n=== RESPONSE FORMAT ===\n");
    text.push_str(&response_format());
    text
}

fn ticket_section(ticket: &ParsedTicket, bundle: &ContextBundle) -> String {
    let mut section = format!("{}: {}\n", ticket.ticket.key, ticket.ticket.summary.trim());
    if !ticket.instructions.is_empty() {
        section.push('\n');
        section.push_str(&ticket.instructions);
        section.push('\n');
    }
    section.push_str("\nFiles to change:\n");
    for reference in &ticket.file_references {
        let note = match bundle.status_of(&reference.path) {
            Some(FileStatus::Included { truncated: false, .. }) => "current content below",
            Some(FileStatus::Included {
                truncated: true, ..
            }) => "current content below, truncated",
            Some(FileStatus::Missing) => "does not exist yet; create it",
            Some(FileStatus::Unsupported { .. }) => "binary; do not modify",
            Some(FileStatus::Omitted) | None => "content not shown",
        };
        let _ = writeln!(section, "- {} ({note})", reference.path);
        if !reference.snippet.is_empty() {
            let _ = writeln!(section, "  mentioned in: {}", reference.snippet);
        }
    }
    section
}

fn response_format() -> String {
    format!(
        "Reply with one block per file you change and nothing else.\n\
         For a new file, or to rewrite a file completely:\n\
         {PATCH_OPEN}path/relative/to/repo replace ===\n\
         <entire new file content>\n\
         {PATCH_CLOSE}\n\
         To edit an existing file with a unified diff:\n\
         {PATCH_OPEN}path/relative/to/repo diff ===\n\
         --- a/path/relative/to/repo\n\
         +++ b/path/relative/to/repo\n\
         @@ -10,3 +10,4 @@\n\
         <hunk lines>\n\
         {PATCH_CLOSE}\n\
         Use the exact paths listed above. Diff context lines must match the current content.\n"
    )
}

pub fn fingerprint(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::{
        CharBudget, ExternalContext, ExternalEntry, ExternalTextOrigin, RepositoryContext,
        RepositoryEntry,
    };
    use crate::domain::repository::RepositoryUrl;
    use crate::domain::ticket::{FileReference, Ticket, TicketKey};

    fn parsed(description: &str, paths: &[&str]) -> ParsedTicket {
        ParsedTicket {
            ticket: Ticket {
                key: TicketKey::parse("ENG-1234").unwrap(),
                summary: "Add greeting".to_string(),
                url: None,
            },
            repository: RepositoryUrl::parse("https://github.com/acme/widgets.git").unwrap(),
            instructions: description.to_string(),
            file_references: paths
                .iter()
                .map(|p| FileReference {
                    path: p.to_string(),
                    snippet: format!("Add file `{p}`"),
                })
                .collect(),
            external_references: Vec::new(),
        }
    }

    fn bundle(entries: Vec<RepositoryEntry>, external: Vec<ExternalEntry>) -> ContextBundle {
        let repo_used = entries.iter().map(RepositoryEntry::rendered_len).sum();
        let ext_used = external.iter().map(ExternalEntry::rendered_len).sum();
        let mut repo_budget = CharBudget::new(6000);
        repo_budget.try_consume(repo_used);
        let mut ext_budget = CharBudget::new(6000);
        ext_budget.try_consume(ext_used);
        ContextBundle::new(
            RepositoryContext {
                entries,
                budget: repo_budget,
            },
            ExternalContext {
                entries: external,
                omitted: Vec::new(),
                budget: ext_budget,
            },
        )
    }

    #[test]
    fn missing_file_is_requested_for_creation() {
        let ticket = parsed("Add file `src/a.py` that prints hello", &["src/a.py"]);
        let bundle = bundle(
            vec![RepositoryEntry {
                path: "src/a.py".to_string(),
                status: FileStatus::Missing,
            }],
            Vec::new(),
        );
        let prompt = PromptAssembler::new(&PipelineConfig::default()).assemble(&ticket, &bundle);
        assert!(prompt.text.contains("- src/a.py (does not exist yet; create it)"));
        assert!(prompt.text.contains("--- FILE src/a.py does not exist yet; create it ---"));
        assert!(prompt.text.contains(PATCH_OPEN));
    }

    #[test]
    fn rendering_is_deterministic() {
        let ticket = parsed("Update `app/main.go`", &["app/main.go"]);
        let bundle = bundle(
            vec![RepositoryEntry {
                path: "app/main.go".to_string(),
                status: FileStatus::Included {
                    content: "package main\n".to_string(),
                    truncated: false,
                },
            }],
            vec![ExternalEntry {
                url: "https://acme.atlassian.net/wiki/spaces/ENG/pages/1".to_string(),
                label: "WIKI".to_string(),
                text: "Design notes".to_string(),
                origin: ExternalTextOrigin::Raw,
            }],
        );
        let assembler = PromptAssembler::new(&PipelineConfig::default());
        let first = assembler.assemble(&ticket, &bundle);
        let second = assembler.assemble(&ticket, &bundle);
        assert_eq!(first, second);
        assert_eq!(first.fingerprint.len(), 16);
        let ticket_at = first.text.find("=== TICKET ===").unwrap();
        let repo_at = first.text.find("--- BEGIN FILE app/main.go ---").unwrap();
        let wiki_at = first.text.find("--- BEGIN WIKI").unwrap();
        assert!(ticket_at < repo_at && repo_at < wiki_at);
    }

    #[test]
    fn long_instructions_are_truncated_with_marker() {
        let description = "Refactor `src/big.py` carefully.\n".repeat(500);
        let ticket = parsed(&description, &["src/big.py"]);
        let bundle = bundle(Vec::new(), Vec::new());
        let config = PipelineConfig {
            instruction_budget: 300,
            ..PipelineConfig::default()
        };
        let prompt = PromptAssembler::new(&config).assemble(&ticket, &bundle);
        assert!(prompt.text.contains(crate::domain::context::TRUNCATION_MARKER));
        assert!(char_len(&prompt.text) <= 300 + overhead());
    }

    #[test]
    fn prompt_never_exceeds_bound() {
        let config = PipelineConfig {
            instruction_budget: 500,
            repository_budget: 700,
            external_budget: 400,
            ..PipelineConfig::default()
        };
        let assembler = PromptAssembler::new(&config);
        let ticket = parsed(&"x".repeat(5000), &["a.py", "b.py", "c.py"]);
        let entries = vec![RepositoryEntry {
            path: "a.py".to_string(),
            status: FileStatus::Included {
                content: "y".repeat(600),
                truncated: false,
            },
        }];
        let external = vec![ExternalEntry {
            url: "https://github.com/acme/widgets/pull/7".to_string(),
            label: "PULL REQUEST".to_string(),
            text: "z".repeat(300),
            origin: ExternalTextOrigin::Truncated,
        }];
        let bundle = bundle(entries, external);
        assert!(bundle.repository_chars() <= 700 && bundle.external_chars() <= 400);
        let prompt = assembler.assemble(&ticket, &bundle);
        assert!(char_len(&prompt.text) <= assembler.bound());
    }
}
