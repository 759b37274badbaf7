//! Route pattern compilation and matching - hot path for request routing.
//!
//! Patterns are compiled once at registration time so that per-request
//! matching never pays a regex compilation cost.

use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Maximum number of path parameters before heap allocation.
/// Most REST APIs have ≤4 path params (e.g., /users/:id/posts/:post_id).
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage for the hot path.
///
/// Param names use `Arc<str>` instead of `String` because names come from the
/// static route table (known at startup) and `Arc::clone()` is O(1). Values
/// remain `String` as they are per-request data from the URL.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// The match-all pattern used for hooks registered without a path filter.
static MATCH_ALL: Lazy<RoutePattern> = Lazy::new(|| RoutePattern {
    raw: "**".to_string(),
    segments: vec![Segment::Wildcard],
});

/// A pattern segment failed to compile.
#[derive(Debug, Error)]
#[error("invalid regex segment `{segment}`: {source}")]
pub struct PatternError {
    pub segment: String,
    #[source]
    pub source: regex::Error,
}

/// One segment of a compiled route pattern.
#[derive(Debug, Clone)]
pub enum Segment {
    /// Must equal the candidate segment character for character.
    Static(String),
    /// `:name` - matches any single segment and captures it under `name`.
    Param(Arc<str>),
    /// `{expr}` - the expression must fully match the candidate segment.
    Regex(Regex),
    /// `**` - matches anything. As the entire pattern it matches every path.
    Wildcard,
}

impl Segment {
    fn matches(&self, candidate: &str) -> bool {
        match self {
            Segment::Static(text) => text == candidate,
            Segment::Param(_) => true,
            Segment::Regex(re) => re.is_match(candidate),
            Segment::Wildcard => true,
        }
    }
}

/// A compiled route pattern: an ordered sequence of path segments.
///
/// A pattern that is exactly `**` matches every path unconditionally,
/// including the empty path. Any other pattern only matches candidates with
/// the same number of segments.
///
/// Trailing slashes are normalized away on both sides before segmentation,
/// so `/users/new` and `/users/new/` are equivalent.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

/// Remove every trailing slash so a path and its slash-suffixed variants
/// segment identically.
pub(crate) fn normalize_path(path: &str) -> &str {
    path.trim_end_matches('/')
}

impl RoutePattern {
    /// Compile a pattern string into its segment list.
    ///
    /// `:name` segments become parameters, `{expr}` segments compile their
    /// interior as a regex anchored to the whole segment, `**` becomes a
    /// wildcard, everything else is static text.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] when a `{expr}` segment is not a valid
    /// regular expression.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let mut segments = Vec::new();
        for part in normalize_path(raw).split('/') {
            let segment = if part == "**" {
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix(':') {
                Segment::Param(Arc::from(name))
            } else if part.len() >= 2 && part.starts_with('{') && part.ends_with('}') {
                let expr = part[1..part.len() - 1].trim();
                // Anchor the expression so it must cover the whole segment,
                // not merely find a match somewhere inside it.
                let re = Regex::new(&format!("^(?:{expr})$")).map_err(|source| PatternError {
                    segment: part.to_string(),
                    source,
                })?;
                Segment::Regex(re)
            } else {
                Segment::Static(part.to_string())
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The match-all pattern (`**`).
    #[must_use]
    pub fn match_all() -> Self {
        MATCH_ALL.clone()
    }

    /// The pattern string as registered.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn is_match_all(&self) -> bool {
        matches!(self.segments.as_slice(), [Segment::Wildcard])
    }

    /// Test whether a concrete request path matches this pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        if self.is_match_all() {
            return true;
        }
        let path = normalize_path(path);
        let candidate: SmallVec<[&str; MAX_INLINE_PARAMS]> = path.split('/').collect();
        if candidate.len() != self.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(candidate)
            .all(|(segment, part)| segment.matches(part))
    }

    /// Extract the named `:param` bindings from a matching path.
    ///
    /// Returns an empty collection when the path does not match.
    #[must_use]
    pub fn capture(&self, path: &str) -> ParamVec {
        let mut params = ParamVec::new();
        if self.is_match_all() || !self.matches(path) {
            return params;
        }
        for (segment, part) in self.segments.iter().zip(normalize_path(path).split('/')) {
            if let Segment::Param(name) = segment {
                params.push((Arc::clone(name), part.to_string()));
            }
        }
        params
    }

    /// Extracted parameters as an owned map.
    /// Note: this allocates - use [`RoutePattern::capture`] in hot paths.
    #[must_use]
    pub fn capture_map(&self, path: &str) -> HashMap<String, String> {
        self.capture(path)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}
