//! Size-bounded context handed to the prompt assembler.
//!
//! Every entry knows how it renders into the prompt, and the character
//! budgets are charged with the rendered length. Whatever ends up in a
//! [`ContextBundle`] therefore fits its budget by construction.

pub const TRUNCATION_MARKER: &str = "[... truncated to fit the context budget ...]";

/// Running character allowance for one section of the prompt.
#[derive(Debug, Clone, Copy)]
pub struct CharBudget {
    limit: usize,
    used: usize,
}

impl CharBudget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.used
    }

    pub fn try_consume(&mut self, chars: usize) -> bool {
        if chars > self.remaining() {
            return false;
        }
        self.used += chars;
        true
    }
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Cuts `text` to at most `max_chars`, preferring the last line break in the
/// second half of the allowance so lines are not split.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    let cut = match text.char_indices().nth(max_chars) {
        Some((idx, _)) => idx,
        None => return text,
    };
    let head = &text[..cut];
    match head.rfind('\n') {
        Some(newline) if char_len(&head[..newline]) >= max_chars / 2 => &head[..=newline],
        _ => head,
    }
}

/// Truncates to `max_chars` including the trailing marker.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if char_len(text) <= max_chars {
        return text.to_string();
    }
    let marker = format!("\n{TRUNCATION_MARKER}");
    let room = max_chars.saturating_sub(char_len(&marker));
    if room == 0 {
        return truncate_chars(TRUNCATION_MARKER, max_chars).to_string();
    }
    let mut out = truncate_chars(text, room).trim_end_matches('\n').to_string();
    out.push_str(&marker);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Included { content: String, truncated: bool },
    Missing,
    Unsupported { reason: String },
    /// Not even the entry header fit the remaining budget.
    Omitted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryEntry {
    pub path: String,
    pub status: FileStatus,
}

impl RepositoryEntry {
    pub fn render(&self) -> String {
        let path = &self.path;
        match &self.status {
            FileStatus::Included {
                content,
                truncated: false,
            } => format!("{}{content}{}", file_header(path, false), file_footer(path)),
            FileStatus::Included {
                content,
                truncated: true,
            } => format!(
                "{}{content}\n{TRUNCATION_MARKER}{}",
                file_header(path, true),
                file_footer(path)
            ),
            FileStatus::Missing => missing_note(path),
            FileStatus::Unsupported { .. } => unsupported_note(path),
            FileStatus::Omitted => String::new(),
        }
    }

    pub fn rendered_len(&self) -> usize {
        char_len(&self.render())
    }

    pub fn is_truncated(&self) -> bool {
        matches!(
            self.status,
            FileStatus::Included {
                truncated: true,
                ..
            }
        )
    }
}

pub fn file_header(path: &str, truncated: bool) -> String {
    if truncated {
        format!("--- BEGIN FILE {path} (truncated) ---\n")
    } else {
        format!("--- BEGIN FILE {path} ---\n")
    }
}

pub fn file_footer(path: &str) -> String {
    format!("\n--- END FILE {path} ---\n")
}

/// Characters an included file costs beyond its content.
pub fn file_frame_len(path: &str, truncated: bool) -> usize {
    let marker = if truncated {
        char_len(TRUNCATION_MARKER) + 1
    } else {
        0
    };
    char_len(&file_header(path, truncated)) + char_len(&file_footer(path)) + marker
}

pub fn missing_note(path: &str) -> String {
    format!("--- FILE {path} does not exist yet; create it ---\n")
}

pub fn unsupported_note(path: &str) -> String {
    format!("--- FILE {path} is binary or not text; do not modify it ---\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTextOrigin {
    Raw,
    Summarized,
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEntry {
    pub url: String,
    pub label: String,
    pub text: String,
    pub origin: ExternalTextOrigin,
}

impl ExternalEntry {
    pub fn render(&self) -> String {
        format!(
            "--- BEGIN {} ({}) ---\n{}\n--- END {} ---\n",
            self.label, self.url, self.text, self.label
        )
    }

    pub fn rendered_len(&self) -> usize {
        char_len(&self.render())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OmissionReason {
    FetchFailed(String),
    TimedOut,
    BudgetExhausted,
}

impl std::fmt::Display for OmissionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OmissionReason::FetchFailed(message) => write!(f, "fetch failed: {message}"),
            OmissionReason::TimedOut => f.write_str("fetch timed out"),
            OmissionReason::BudgetExhausted => f.write_str("external context budget exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalOmission {
    pub url: String,
    pub reason: OmissionReason,
}

#[derive(Debug, Clone)]
pub struct RepositoryContext {
    pub entries: Vec<RepositoryEntry>,
    pub budget: CharBudget,
}

#[derive(Debug, Clone)]
pub struct ExternalContext {
    pub entries: Vec<ExternalEntry>,
    pub omitted: Vec<ExternalOmission>,
    pub budget: CharBudget,
}

impl ExternalContext {
    pub fn empty(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            omitted: Vec::new(),
            budget: CharBudget::new(limit),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub repository: RepositoryContext,
    pub external: ExternalContext,
}

impl ContextBundle {
    pub fn new(repository: RepositoryContext, external: ExternalContext) -> Self {
        Self {
            repository,
            external,
        }
    }

    pub fn repository_chars(&self) -> usize {
        self.repository.budget.used()
    }

    pub fn external_chars(&self) -> usize {
        self.external.budget.used()
    }

    pub fn total_chars(&self) -> usize {
        self.repository_chars() + self.external_chars()
    }

    pub fn status_of(&self, path: &str) -> Option<&FileStatus> {
        self.repository
            .entries
            .iter()
            .find(|entry| entry.path == path)
            .map(|entry| &entry.status)
    }
}
