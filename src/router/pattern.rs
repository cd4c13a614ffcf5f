//! Route pattern compilation.
//!
//! A pattern such as `/users/{id}/posts/{post_id}` is compiled once, at
//! registration, into an ordered list of literal runs and named capture slots
//! plus an anchored regex (`^/users/([^/]+)/posts/([^/]+)$`). Patterns without
//! placeholders skip the regex and compare by string equality.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::context::ParamVec;
use crate::error::{InvalidPatternError, PatternErrorKind};

/// One piece of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSegment {
    /// Text that must appear verbatim, `/` separators included
    Literal(String),
    /// `{name}`: one or more characters other than `/`
    Param(Arc<str>),
}

/// Compiled form of a route pattern.
#[derive(Clone)]
pub struct PathPattern {
    source: String,
    segments: Vec<PatternSegment>,
    param_names: Vec<Arc<str>>,
    /// `None` for static patterns
    regex: Option<Regex>,
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathPattern")
            .field("source", &self.source)
            .field("param_names", &self.param_names)
            .finish()
    }
}

impl PathPattern {
    /// Compile `pattern`. Pure and deterministic: the same input always yields
    /// the same parameter names in the same order.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPatternError`] for a missing leading `/`, an unterminated
    /// or empty placeholder, a name that is not `[A-Za-z_][A-Za-z0-9_]*`, a name
    /// used twice, a stray `}` or two placeholders with nothing between them.
    pub fn compile(pattern: &str) -> Result<Self, InvalidPatternError> {
        let fail = |kind| InvalidPatternError::new(pattern, kind);

        if !pattern.starts_with('/') {
            return Err(fail(PatternErrorKind::MissingLeadingSlash));
        }

        let mut segments = Vec::new();
        let mut param_names: Vec<Arc<str>> = Vec::new();
        let mut seen = HashSet::new();
        let mut literal = String::new();
        let mut rest = pattern;
        let mut offset = 0;

        while let Some(brace) = rest.find(['{', '}']) {
            let at = offset + brace;
            literal.push_str(&rest[..brace]);
            let tail = &rest[brace..];
            if tail.starts_with('}') {
                return Err(fail(PatternErrorKind::UnmatchedClose(at)));
            }

            let body = &tail[1..];
            let close = match body.find(['{', '}', '/']) {
                Some(j) if body[j..].starts_with('}') => j,
                _ => return Err(fail(PatternErrorKind::Unterminated(at))),
            };
            let name = &body[..close];
            if name.is_empty() {
                return Err(fail(PatternErrorKind::EmptyName(at)));
            }
            if !is_valid_name(name) {
                return Err(fail(PatternErrorKind::InvalidName(name.to_string())));
            }
            if !seen.insert(name) {
                return Err(fail(PatternErrorKind::DuplicateName(name.to_string())));
            }

            if literal.is_empty() {
                if let Some(PatternSegment::Param(_)) = segments.last() {
                    return Err(fail(PatternErrorKind::AdjacentPlaceholders(at)));
                }
            } else {
                segments.push(PatternSegment::Literal(std::mem::take(&mut literal)));
            }
            let name: Arc<str> = Arc::from(name);
            param_names.push(Arc::clone(&name));
            segments.push(PatternSegment::Param(name));

            let consumed = brace + 1 + close + 1;
            rest = &rest[consumed..];
            offset += consumed;
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(PatternSegment::Literal(literal));
        }

        let regex = if param_names.is_empty() {
            None
        } else {
            Some(Self::build_regex(&segments).map_err(|e| fail(PatternErrorKind::Compile(e)))?)
        };

        Ok(Self {
            source: pattern.to_string(),
            segments,
            param_names,
            regex,
        })
    }

    fn build_regex(segments: &[PatternSegment]) -> Result<Regex, String> {
        let mut re = String::from("^");
        for segment in segments {
            match segment {
                PatternSegment::Literal(text) => re.push_str(&regex::escape(text)),
                PatternSegment::Param(_) => re.push_str("([^/]+)"),
            }
        }
        re.push('$');
        Regex::new(&re).map_err(|e| e.to_string())
    }

    /// Test `path` against the pattern. The whole path must match; on success
    /// the captured values are returned raw (no percent-decoding) in pattern order.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<ParamVec> {
        let Some(re) = &self.regex else {
            return (path == self.source).then(ParamVec::new);
        };
        let caps = re.captures(path)?;
        let mut params = ParamVec::new();
        for (i, name) in self.param_names.iter().enumerate() {
            let value = caps.get(i + 1)?;
            params.push((Arc::clone(name), value.as_str().to_string()));
        }
        Some(params)
    }

    /// The pattern text as registered.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn param_names(&self) -> &[Arc<str>] {
        &self.param_names
    }

    #[must_use]
    pub fn segments(&self) -> &[PatternSegment] {
        &self.segments
    }

    /// True when the pattern has no placeholders.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.regex.is_none()
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
