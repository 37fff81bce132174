//! Minimal unified-diff model: parsing, header validation and strict
//! context-matching application.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiffError {
    #[error("diff is missing `---`/`+++` file headers")]
    MissingHeaders,
    #[error("diff headers name `{found}`, expected `{expected}`")]
    PathMismatch { expected: String, found: String },
    #[error("diff contains no hunks")]
    NoHunks,
    #[error("malformed hunk header `{0}`")]
    BadHunkHeader(String),
    #[error("hunk {hunk} line counts do not match its header")]
    CountMismatch { hunk: usize },
    #[error("unexpected line in hunk {hunk}: `{line}`")]
    UnexpectedLine { hunk: usize, line: String },
    #[error("hunk {hunk} does not match the base content")]
    Conflict { hunk: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
    /// The last added line carries no trailing newline.
    pub no_newline_at_end: bool,
}

impl Hunk {
    fn old_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            HunkLine::Context(text) | HunkLine::Remove(text) => Some(text.as_str()),
            HunkLine::Add(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedDiff {
    /// `None` for `/dev/null`.
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl UnifiedDiff {
    pub fn parse(text: &str) -> Result<Self, DiffError> {
        let mut lines = text.lines().peekable();
        let mut old_path = None;
        let mut new_path = None;
        let mut saw_headers = false;

        while let Some(line) = lines.next() {
            if let Some(rest) = line.strip_prefix("--- ") {
                let next = lines.peek().copied().unwrap_or_default();
                let Some(new_rest) = next.strip_prefix("+++ ") else {
                    return Err(DiffError::MissingHeaders);
                };
                old_path = header_path(rest, "a/");
                new_path = header_path(new_rest, "b/");
                saw_headers = true;
                lines.next();
                break;
            }
        }
        if !saw_headers {
            return Err(DiffError::MissingHeaders);
        }

        let mut hunks: Vec<Hunk> = Vec::new();
        for line in lines {
            if line.starts_with("@@") {
                let (old_start, old_len, new_start, new_len) = parse_hunk_header(line)?;
                hunks.push(Hunk {
                    old_start,
                    old_len,
                    new_start,
                    new_len,
                    lines: Vec::new(),
                    no_newline_at_end: false,
                });
                continue;
            }
            let index = hunks.len();
            let Some(hunk) = hunks.last_mut() else {
                continue;
            };
            let hunk_line = if let Some(text) = line.strip_prefix('+') {
                HunkLine::Add(text.to_string())
            } else if let Some(text) = line.strip_prefix('-') {
                HunkLine::Remove(text.to_string())
            } else if let Some(text) = line.strip_prefix(' ') {
                HunkLine::Context(text.to_string())
            } else if line.is_empty() {
                HunkLine::Context(String::new())
            } else if line.starts_with('\\') {
                if matches!(hunk.lines.last(), Some(HunkLine::Add(_))) {
                    hunk.no_newline_at_end = true;
                }
                continue;
            } else {
                return Err(DiffError::UnexpectedLine {
                    hunk: index,
                    line: line.to_string(),
                });
            };
            hunk.lines.push(hunk_line);
        }

        if hunks.is_empty() {
            return Err(DiffError::NoHunks);
        }
        for (idx, hunk) in hunks.iter_mut().enumerate() {
            trim_trailing_blank_context(hunk);
            let old = hunk.old_lines().count();
            let new = hunk
                .lines
                .iter()
                .filter(|line| !matches!(line, HunkLine::Remove(_)))
                .count();
            if old != hunk.old_len || new != hunk.new_len {
                return Err(DiffError::CountMismatch { hunk: idx + 1 });
            }
        }

        Ok(Self {
            old_path,
            new_path,
            hunks,
        })
    }

    /// Every non-null header must name `path`, and at least one must.
    pub fn check_paths(&self, path: &str) -> Result<(), DiffError> {
        let named = [self.old_path.as_deref(), self.new_path.as_deref()];
        if named.iter().all(Option::is_none) {
            return Err(DiffError::MissingHeaders);
        }
        for found in named.into_iter().flatten() {
            if found != path {
                return Err(DiffError::PathMismatch {
                    expected: path.to_string(),
                    found: found.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn creates_file(&self) -> bool {
        self.old_path.is_none()
    }

    pub fn deletes_file(&self) -> bool {
        self.new_path.is_none()
    }

    pub fn apply(&self, original: &str) -> Result<String, DiffError> {
        let source = original.split_inclusive('\n').collect::<Vec<_>>();
        let mut output = String::with_capacity(original.len());
        let mut cursor = 0usize;
        let mut offset = 0isize;

        for (idx, hunk) in self.hunks.iter().enumerate() {
            let expected = hunk.old_lines().collect::<Vec<_>>();
            let anchor = (hunk.old_start.max(1) as isize - 1 + offset).max(0) as usize;
            let anchor = if hunk.old_len == 0 {
                (hunk.old_start as isize + offset).max(0) as usize
            } else {
                anchor
            };
            let position = find_block(&source, &expected, anchor, cursor)
                .ok_or(DiffError::Conflict { hunk: idx + 1 })?;

            for line in &source[cursor..position] {
                push_line(&mut output, line);
            }
            let mut consumed = position;
            let added_total = hunk
                .lines
                .iter()
                .filter(|line| matches!(line, HunkLine::Add(_)))
                .count();
            let mut added_seen = 0usize;
            for line in &hunk.lines {
                match line {
                    HunkLine::Context(_) => {
                        push_line(&mut output, source[consumed]);
                        consumed += 1;
                    }
                    HunkLine::Remove(_) => consumed += 1,
                    HunkLine::Add(text) => {
                        added_seen += 1;
                        if !output.is_empty() && !output.ends_with('\n') {
                            output.push('\n');
                        }
                        output.push_str(text);
                        if !(hunk.no_newline_at_end && added_seen == added_total) {
                            output.push('\n');
                        }
                    }
                }
            }
            offset += position as isize - anchor as isize;
            cursor = consumed;
        }
        for line in &source[cursor..] {
            push_line(&mut output, line);
        }
        Ok(output)
    }
}

fn push_line(output: &mut String, line: &str) {
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(line);
}

fn strip_eol(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

fn matches_at(source: &[&str], expected: &[&str], at: usize) -> bool {
    at + expected.len() <= source.len()
        && expected
            .iter()
            .zip(&source[at..])
            .all(|(want, have)| *want == strip_eol(have))
}

/// Searches outward from `anchor`, never before `floor`.
fn find_block(source: &[&str], expected: &[&str], anchor: usize, floor: usize) -> Option<usize> {
    let anchor = anchor.clamp(floor, source.len());
    if matches_at(source, expected, anchor) {
        return Some(anchor);
    }
    let span = source.len().max(1);
    for delta in 1..=span {
        if anchor >= floor + delta && matches_at(source, expected, anchor - delta) {
            return Some(anchor - delta);
        }
        if anchor + delta <= source.len() && matches_at(source, expected, anchor + delta) {
            return Some(anchor + delta);
        }
    }
    None
}

fn header_path(raw: &str, prefix: &str) -> Option<String> {
    let name = raw.split('\t').next().unwrap_or(raw).trim();
    if name == "/dev/null" {
        return None;
    }
    Some(name.strip_prefix(prefix).unwrap_or(name).to_string())
}

fn parse_hunk_header(line: &str) -> Result<(usize, usize, usize, usize), DiffError> {
    let bad = || DiffError::BadHunkHeader(line.to_string());
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|rest| rest.split(" @@").next())
        .ok_or_else(bad)?;
    let mut parts = inner.split_whitespace();
    let old = parts.next().and_then(|p| p.strip_prefix('-')).ok_or_else(bad)?;
    let new = parts.next().and_then(|p| p.strip_prefix('+')).ok_or_else(bad)?;
    let range = |spec: &str| -> Option<(usize, usize)> {
        match spec.split_once(',') {
            Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
            None => Some((spec.parse().ok()?, 1)),
        }
    };
    let (old_start, old_len) = range(old).ok_or_else(bad)?;
    let (new_start, new_len) = range(new).ok_or_else(bad)?;
    Ok((old_start, old_len, new_start, new_len))
}

/// Models often leave a blank line after the last hunk; drop it when the
/// header counts show it is not part of the hunk.
fn trim_trailing_blank_context(hunk: &mut Hunk) {
    while matches!(hunk.lines.last(), Some(HunkLine::Context(text)) if text.is_empty()) {
        let old = hunk.old_lines().count();
        if old <= hunk.old_len {
            break;
        }
        hunk.lines.pop();
    }
}
