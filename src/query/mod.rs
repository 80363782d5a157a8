//! Three-segment wildcard query patterns: `org/project/repo`.
//!
//! Each segment is a literal, `*`, or a fused literal+wildcard mix
//! (`prefix*`, `*suffix`, `*infix*`, mixed). Matching is case-insensitive
//! and whole-segment; `?` has no special meaning. Providers without a
//! project tier emit a synthetic project that passes any middle segment.

pub mod engine;

use crate::constants::QUERY_MAX_LEN;
use crate::error::{MgitError, Result};

/// A compiled segment predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentPattern {
    /// Bare `*`: any non-empty value
    Any,
    /// No wildcard; exact case-insensitive match
    Literal(String),
    /// Mixed literal/wildcard; the parts are the literals between `*`s
    Glob(Vec<String>),
}

impl SegmentPattern {
    fn compile(segment: &str) -> Self {
        if segment == "*" {
            return Self::Any;
        }
        if !segment.contains('*') {
            return Self::Literal(segment.to_lowercase());
        }
        Self::Glob(segment.split('*').map(str::to_lowercase).collect())
    }

    /// Whole-segment, case-insensitive match.
    pub fn matches(&self, value: &str) -> bool {
        let value = value.to_lowercase();
        match self {
            Self::Any => !value.is_empty(),
            Self::Literal(lit) => &value == lit,
            Self::Glob(parts) => glob_match(&value, parts),
        }
    }
}

/// Subsequence match of `parts` (the literals between `*`s) against `name`.
fn glob_match(name: &str, parts: &[String]) -> bool {
    let mut pos = 0;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }

        if i == 0 {
            // First segment must match at start
            if !name.starts_with(part.as_str()) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 {
            // Last segment must match at end
            if !name[pos..].ends_with(part.as_str()) {
                return false;
            }
            pos = name.len();
        } else {
            // Middle segment — find anywhere after current pos
            match name[pos..].find(part.as_str()) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }

    true
}

/// A parsed `org/project/repo` query.
#[derive(Debug, Clone)]
pub struct QueryPattern {
    raw: String,
    org: SegmentPattern,
    project: SegmentPattern,
    repo: SegmentPattern,
}

impl QueryPattern {
    /// Parse and validate a query string.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(MgitError::invalid_query("query must not be empty"));
        }
        if input.len() > QUERY_MAX_LEN {
            return Err(MgitError::invalid_query(format!(
                "query exceeds {} characters",
                QUERY_MAX_LEN
            )));
        }
        if input.chars().any(char::is_control) {
            return Err(MgitError::invalid_query(
                "query must not contain control characters",
            ));
        }

        let segments: Vec<&str> = input.split('/').collect();
        if segments.len() != 3 {
            return Err(MgitError::invalid_query(format!(
                "expected exactly three '/'-separated segments (org/project/repo), got {}",
                segments.len()
            )));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(MgitError::invalid_query(
                "query segments must not be empty",
            ));
        }

        Ok(Self {
            raw: input.to_string(),
            org: SegmentPattern::compile(segments[0]),
            project: SegmentPattern::compile(segments[1]),
            repo: SegmentPattern::compile(segments[2]),
        })
    }

    /// The query string as the user wrote it.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches_org(&self, org: &str) -> bool {
        self.org.matches(org)
    }

    /// Synthetic projects pass any middle segment trivially.
    pub fn matches_project(&self, project: &str, is_synthetic: bool) -> bool {
        is_synthetic || self.project.matches(project)
    }

    pub fn matches_repo(&self, repo: &str) -> bool {
        self.repo.matches(repo)
    }

    /// Composite predicate over a candidate triple.
    pub fn matches(&self, org: &str, project: &str, is_synthetic: bool, repo: &str) -> bool {
        self.matches_org(org)
            && self.matches_project(project, is_synthetic)
            && self.matches_repo(repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(s: &str) -> SegmentPattern {
        SegmentPattern::compile(s)
    }

    #[test]
    fn test_segment_exact() {
        assert!(seg("foo").matches("foo"));
        assert!(seg("foo").matches("FOO"));
        assert!(!seg("foo").matches("bar"));
        assert!(!seg("foo").matches("foobar"));
    }

    #[test]
    fn test_segment_suffix_wildcard() {
        assert!(seg("legacy-*").matches("legacy-api"));
        assert!(seg("legacy-*").matches("legacy-"));
        assert!(!seg("legacy-*").matches("new-api"));
    }

    #[test]
    fn test_segment_prefix_wildcard() {
        assert!(seg("*.wiki").matches("repo.wiki"));
        assert!(seg("*.wiki").matches(".wiki"));
        assert!(!seg("*.wiki").matches("repo.git"));
    }

    #[test]
    fn test_segment_middle_wildcard() {
        assert!(seg("test-*-old").matches("test-foo-old"));
        assert!(seg("test-*-old").matches("test--old"));
        assert!(!seg("test-*-old").matches("test-foo-new"));
    }

    #[test]
    fn test_segment_star_never_empty() {
        assert!(seg("*").matches("anything"));
        assert!(!seg("*").matches(""));
    }

    #[test]
    fn test_question_mark_is_literal() {
        assert!(seg("wh?t").matches("wh?t"));
        assert!(!seg("wh?t").matches("what"));
    }

    #[test]
    fn test_parse_valid() {
        let q = QueryPattern::parse("Acme/*/api*").unwrap();
        assert!(q.matches("acme", "Pay", false, "api"));
        assert!(q.matches("ACME", "Ship", false, "api-gateway"));
        assert!(!q.matches("other", "Pay", false, "api"));
        assert!(!q.matches("acme", "Pay", false, "site"));
    }

    #[test]
    fn test_parse_rejects_wrong_arity() {
        assert!(QueryPattern::parse("org/repo").is_err());
        assert!(QueryPattern::parse("a/b/c/d").is_err());
        assert!(QueryPattern::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_segment() {
        assert!(QueryPattern::parse("myorg//repo").is_err());
        assert!(QueryPattern::parse("/project/repo").is_err());
        assert!(QueryPattern::parse("org/project/").is_err());
    }

    #[test]
    fn test_parse_rejects_control_chars() {
        assert!(QueryPattern::parse("org/pro\tject/repo").is_err());
        assert!(QueryPattern::parse("org/project/re\npo").is_err());
    }

    #[test]
    fn test_parse_rejects_oversized() {
        let long = format!("{}/b/c", "a".repeat(QUERY_MAX_LEN));
        assert!(QueryPattern::parse(&long).is_err());
    }

    #[test]
    fn test_synthetic_project_passes_any_pattern() {
        let q = QueryPattern::parse("*/backend/*").unwrap();
        assert!(!q.matches_project("frontend", false));
        assert!(q.matches_project("acme-oss", true));
    }
}
