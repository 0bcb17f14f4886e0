//! Directory-scoped glob matching for rule patterns.
//!
//! A pattern is split on `/` and every segment is an independent glob token.
//! There is no recursive wildcard across directories: a pattern with N
//! segments only ever matches a path with exactly N segments.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use glob::{MatchOptions, Pattern as SegmentPattern};

const SEGMENT_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// One slash-segmented glob, compiled once.
///
/// Equality, ordering and hashing use the source text only, so two rules
/// written the same way are the same rule.
#[derive(Debug, Clone)]
pub struct Glob {
    source: String,
    segments: Vec<SegmentPattern>,
}

impl Glob {
    pub fn new(source: &str) -> Result<Self, String> {
        if source.is_empty() {
            return Err("pattern must not be empty".to_string());
        }
        let segments = source
            .split('/')
            .map(|segment| {
                SegmentPattern::new(&normalize_segment(segment))
                    .map_err(|err| format!("invalid glob segment '{segment}' in '{source}': {err}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Segment-wise, case-sensitive match of `path` against this glob.
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(parts)
            .all(|(segment, part)| segment.matches_with(part, SEGMENT_OPTIONS))
    }
}

impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Glob {}

impl Hash for Glob {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl PartialOrd for Glob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Glob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.source.cmp(&other.source)
    }
}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// A rule pattern: one glob or an ordered list of alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pattern {
    alternatives: Vec<Glob>,
}

impl Pattern {
    pub fn new<S: AsRef<str>>(alternatives: &[S]) -> Result<Self, String> {
        if alternatives.is_empty() {
            return Err("pattern list must not be empty".to_string());
        }
        let alternatives = alternatives
            .iter()
            .map(|alt| Glob::new(alt.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { alternatives })
    }

    pub fn single(source: &str) -> Result<Self, String> {
        Self::new(&[source])
    }

    /// True if any alternative matches `path`.
    pub fn matches(&self, path: &str) -> bool {
        self.alternatives.iter().any(|glob| glob.matches(path))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<&str> = self.alternatives.iter().map(Glob::as_str).collect();
        f.write_str(&sources.join(", "))
    }
}

/// Match a single pattern string against a path.
///
/// Invalid patterns never match.
pub fn matches(pattern: &str, path: &str) -> bool {
    Glob::new(pattern).is_ok_and(|glob| glob.matches(path))
}

/// Match a list of alternative pattern strings against a path.
pub fn any_matches<S: AsRef<str>>(patterns: &[S], path: &str) -> bool {
    patterns.iter().any(|pattern| matches(pattern.as_ref(), path))
}

/// Candidate relative paths of `path` that a rule scoped to `prefix` could match.
///
/// Every component of `prefix` must equal the corresponding leading component of
/// `path`; otherwise nothing is produced. Empty components are discarded on both
/// sides. The iterator is lazy and can be restarted by cloning.
pub fn possible_suffixes<'a>(
    prefix: &'a str,
    path: &'a str,
) -> impl Iterator<Item = String> + Clone + 'a {
    let prefix_parts: Vec<&str> = non_empty_parts(prefix).collect();
    let parts: Vec<&str> = non_empty_parts(path).collect();
    let prefix_matches = prefix_parts.iter().zip(&parts).all(|(a, b)| a == b);
    let start = if prefix_matches {
        prefix_parts.len()
    } else {
        parts.len()
    };
    (start..parts.len()).map(move |i| parts[i..].join("/"))
}

/// True if `pattern` matches any suffix of `path` under `prefix`.
pub fn matches_anywhere_under(prefix: &str, pattern: &Pattern, path: &str) -> bool {
    possible_suffixes(prefix, path).any(|suffix| pattern.matches(&suffix))
}

/// Rewrite a segment into a form `glob` accepts with shell-style meaning:
/// runs of `*` collapse to one `*` and a `[` with no closing `]` is literal.
fn normalize_segment(segment: &str) -> String {
    let chars: Vec<char> = segment.chars().collect();
    let mut out = String::with_capacity(segment.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                out.push('*');
                while chars.get(i + 1) == Some(&'*') {
                    i += 1;
                }
            }
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.extend(&chars[i..=end]);
                    i = end;
                }
                None => out.push_str("[[]"),
            },
            c => out.push(c),
        }
        i += 1;
    }
    out
}

/// Index of the `]` closing the class opened at `start`. A `]` right after
/// `[` or `[!` is a member of the class, not its end.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if chars.get(j) == Some(&'!') {
        j += 1;
    }
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    chars
        .get(j..)?
        .iter()
        .position(|&c| c == ']')
        .map(|offset| j + offset)
}

fn non_empty_parts(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}
