use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::config::PipelineConfig;
use crate::domain::context::truncate_chars;
use crate::domain::repository::RepositoryUrl;
use crate::domain::ticket::{
    ExternalReference, ExternalReferenceKind, FileReference, ParsedTicket, Ticket, TicketRecord,
};
use crate::error::{AppError, AppResult};

static INLINE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([^{}\n]+?)\}\}").expect("INLINE_CODE_RE regex should compile")
});

static BACKTICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("BACKTICK_RE regex should compile"));

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'|\[\]{}`]+"#).expect("URL_RE regex should compile")
});

static SSH_GIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"git@[\w.-]+:[\w.-]+/[\w.-]+\.git").expect("SSH_GIT_RE regex should compile")
});

static PULL_REQUEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://github\.com/[^/\s]+/[^/\s]+/pull/\d+")
        .expect("PULL_REQUEST_RE regex should compile")
});

const SNIPPET_CHARS: usize = 200;

/// Pure extraction of paths, links and repository identity from ticket text.
#[derive(Debug, Clone)]
pub struct TicketParser {
    extensions: Vec<String>,
    repository_field: String,
}

impl TicketParser {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            extensions: config
                .recognized_extensions
                .iter()
                .map(|ext| ext.to_lowercase())
                .collect(),
            repository_field: config.repository_field.clone(),
        }
    }

    pub fn parse(&self, record: &TicketRecord) -> AppResult<ParsedTicket> {
        let summary = record.summary.trim();
        let description = record.description.trim();
        if summary.is_empty() && description.is_empty() {
            return Err(AppError::Input(format!(
                "ticket {} has neither a summary nor a description",
                record.key
            )));
        }
        let text = format!("{summary}\n{description}");

        let file_references = self.extract_file_references(&text);
        if file_references.is_empty() {
            return Err(AppError::Input(format!(
                "no file references found in ticket {}; mark target files as {{{{path}}}} or `path`",
                record.key
            )));
        }

        let repository_field = record.custom_fields.get(&self.repository_field);
        let repository = self.resolve_repository(repository_field.map(String::as_str), &text)?;
        let external_references = extract_external_references(&text);

        Ok(ParsedTicket {
            ticket: Ticket {
                key: record.key.clone(),
                summary: summary.to_string(),
                url: record.url.clone(),
            },
            repository,
            instructions: description.to_string(),
            file_references,
            external_references,
        })
    }

    /// Paths in `{{...}}` (primary) or backticks (fallback), in reading order.
    pub fn extract_file_references(&self, text: &str) -> Vec<FileReference> {
        let inline = INLINE_CODE_RE
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some((whole.start(), whole.end(), caps.get(1)?.as_str()))
            })
            .collect::<Vec<_>>();

        let mut matches = inline.clone();
        for caps in BACKTICK_RE.captures_iter(text) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let overlaps = inline
                .iter()
                .any(|(start, end, _)| whole.start() < *end && *start < whole.end());
            if !overlaps {
                matches.push((whole.start(), whole.end(), inner.as_str()));
            }
        }
        matches.sort_by_key(|(start, _, _)| *start);

        let mut references: Vec<FileReference> = Vec::new();
        for (start, end, raw) in matches {
            let Some(path) = self.normalize_path(raw) else {
                continue;
            };
            if references.iter().any(|existing| existing.path == path) {
                continue;
            }
            references.push(FileReference {
                path,
                snippet: snippet_around(text, start, end),
            });
        }
        references
    }

    fn normalize_path(&self, raw: &str) -> Option<String> {
        let candidate = raw.trim().trim_matches('`').trim().replace('\\', "/");
        let candidate = candidate.strip_prefix("./").unwrap_or(&candidate);
        if candidate.is_empty()
            || candidate.starts_with('/')
            || candidate.contains(':')
            || candidate.chars().any(char::is_whitespace)
        {
            return None;
        }
        if candidate
            .split('/')
            .any(|part| part.is_empty() || part == "..")
        {
            return None;
        }
        let file_name = candidate.rsplit('/').next()?;
        let (stem, ext) = file_name.rsplit_once('.')?;
        if stem.is_empty() && !file_name.starts_with('.') {
            return None;
        }
        let ext = ext.to_lowercase();
        self.extensions
            .iter()
            .any(|allowed| *allowed == ext)
            .then(|| candidate.to_string())
    }

    /// The custom field wins when present and well-formed.
    fn resolve_repository(
        &self,
        custom_field: Option<&str>,
        text: &str,
    ) -> AppResult<RepositoryUrl> {
        if let Some(value) = custom_field {
            match RepositoryUrl::parse(value) {
                Some(url) => return Ok(url),
                None => warn!(
                    field = %self.repository_field,
                    value,
                    "custom field does not hold a git URL; searching ticket text"
                ),
            }
        }

        let mut tokens = URL_RE
            .find_iter(text)
            .chain(SSH_GIT_RE.find_iter(text))
            .collect::<Vec<_>>();
        tokens.sort_by_key(|m| m.start());
        tokens
            .into_iter()
            .find_map(|token| RepositoryUrl::parse(token.as_str()))
            .ok_or_else(|| AppError::MissingRepository {
                field: self.repository_field.clone(),
            })
    }
}

fn extract_external_references(text: &str) -> Vec<ExternalReference> {
    let mut references: Vec<ExternalReference> = Vec::new();
    for token in URL_RE.find_iter(text) {
        let url = token.as_str().trim_end_matches(['.', ',', ';', ')']);
        let kind = if is_wiki_url(url) {
            ExternalReferenceKind::WikiPage
        } else if PULL_REQUEST_RE.is_match(url) {
            ExternalReferenceKind::PullRequest
        } else {
            continue;
        };
        if references.iter().any(|existing| existing.url == url) {
            continue;
        }
        references.push(ExternalReference {
            url: url.to_string(),
            kind,
        });
    }
    references
}

fn is_wiki_url(url: &str) -> bool {
    url.contains("atlassian.net/wiki")
        || url.contains("/wiki/spaces/")
        || url.contains("confluence")
}

/// The line holding the mention, used as generation guidance.
fn snippet_around(text: &str, start: usize, end: usize) -> String {
    let line_start = text[..start].rfind('\n').map(|idx| idx + 1).unwrap_or(0);
    let line_end = text[end..]
        .find('\n')
        .map(|idx| end + idx)
        .unwrap_or(text.len());
    truncate_chars(text[line_start..line_end].trim(), SNIPPET_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::domain::ticket::TicketKey;

    fn parser() -> TicketParser {
        TicketParser::new(&PipelineConfig::default())
    }

    fn record(summary: &str, description: &str) -> TicketRecord {
        TicketRecord {
            key: TicketKey::parse("ENG-1234").unwrap(),
            summary: summary.to_string(),
            description: description.to_string(),
            custom_fields: BTreeMap::new(),
            url: None,
        }
    }

    fn paths(text: &str) -> Vec<String> {
        parser()
            .extract_file_references(text)
            .into_iter()
            .map(|r| r.path)
            .collect()
    }

    #[test]
    fn extracts_paths_in_reading_order() {
        let cases: &[(&str, &[&str])] = &[
            ("Edit {{src/app.py}} then `lib/util.ts`", &["src/app.py", "lib/util.ts"]),
            ("Edit `lib/util.ts` then {{src/app.py}}", &["lib/util.ts", "src/app.py"]),
            ("{{a.py}} and {{a.py}} and `a.py`", &["a.py"]),
            ("Nested {{`src/a.py`}} marker", &["src/a.py"]),
            ("Backticked `{{src/b.go}}` marker", &["src/b.go"]),
            ("Windows {{.\\src\\win.c}} path", &["src/win.c"]),
            ("Unsupported `image.png` and `Makefile`", &[]),
            ("Prose `run build.sh now` is not a path", &[]),
            ("Escapes `../secrets.txt` and `/etc/hosts.txt`", &[]),
            ("Links `https://example.com/a.json` are not paths", &[]),
            ("Upper-case ext `README.MD`", &["README.MD"]),
            ("Dotfile `.github/ci.yml`", &[".github/ci.yml"]),
        ];
        for (text, expected) in cases {
            assert_eq!(paths(text), *expected, "input: {text}");
        }
    }

    #[test]
    fn extraction_is_idempotent() {
        let text = "Touch {{src/a.py}}, `src/b.py`, and {{src/a.py}} again.";
        let parser = parser();
        assert_eq!(
            parser.extract_file_references(text),
            parser.extract_file_references(text)
        );
    }

    #[test]
    fn records_the_mentioning_line_as_snippet() {
        let refs = parser().extract_file_references("Intro\nAdd file `src/a.py` - print hello\nEnd");
        assert_eq!(refs[0].snippet, "Add file `src/a.py` - print hello");
    }

    #[test]
    fn honours_configured_extensions() {
        let config = PipelineConfig {
            recognized_extensions: vec!["toml".to_string()],
            ..PipelineConfig::default()
        };
        let refs = TicketParser::new(&config).extract_file_references("`Cargo.toml` and `a.py`");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].path, "Cargo.toml");
    }

    #[test]
    fn custom_field_is_authoritative() {
        let mut record = record(
            "Fix {{src/a.py}}",
            "Repo is https://github.com/acme/from-text",
        );
        record.custom_fields.insert(
            "customfield_11712".to_string(),
            "https://github.com/acme/from-field.git".to_string(),
        );
        let parsed = parser().parse(&record).unwrap();
        assert_eq!(parsed.repository.as_str(), "https://github.com/acme/from-field.git");
    }

    #[test]
    fn malformed_custom_field_falls_back_to_text() {
        let mut record = record(
            "Fix {{src/a.py}}",
            "See https://github.com/acme/widgets/pull/7 in git@github.com:acme/widgets.git.",
        );
        record
            .custom_fields
            .insert("customfield_11712".to_string(), "n/a".to_string());
        let parsed = parser().parse(&record).unwrap();
        assert_eq!(parsed.repository.as_str(), "git@github.com:acme/widgets.git");
    }

    #[test]
    fn missing_repository_is_reported() {
        let error = parser()
            .parse(&record("Fix {{src/a.py}}", "no links here"))
            .unwrap_err();
        assert!(matches!(error, AppError::MissingRepository { .. }));
    }

    #[test]
    fn missing_file_references_is_an_input_error() {
        let error = parser()
            .parse(&record("Fix it", "https://github.com/acme/widgets"))
            .unwrap_err();
        assert!(matches!(error, AppError::Input(message) if message.contains("no file references")));
    }

    #[test]
    fn collects_external_references_with_exact_dedup() {
        let parsed = parser()
            .parse(&record(
                "Fix {{src/a.py}}",
                "Repo https://github.com/acme/widgets\n\
                 Design: https://acme.atlassian.net/wiki/spaces/ENG/pages/42/Design.\n\
                 Prior: https://github.com/acme/widgets/pull/17, again https://github.com/acme/widgets/pull/17\n\
                 Variant: https://github.com/acme/widgets/pull/17/files",
            ))
            .unwrap();
        let urls = parsed
            .external_references
            .iter()
            .map(|r| (r.url.as_str(), r.kind))
            .collect::<Vec<_>>();
        assert_eq!(
            urls,
            vec![
                (
                    "https://acme.atlassian.net/wiki/spaces/ENG/pages/42/Design",
                    ExternalReferenceKind::WikiPage
                ),
                (
                    "https://github.com/acme/widgets/pull/17",
                    ExternalReferenceKind::PullRequest
                ),
                (
                    "https://github.com/acme/widgets/pull/17/files",
                    ExternalReferenceKind::PullRequest
                ),
            ]
        );
    }

    #[test]
    fn rejects_empty_ticket() {
        assert!(matches!(
            parser().parse(&record("  ", "")),
            Err(AppError::Input(_))
        ));
    }
}
