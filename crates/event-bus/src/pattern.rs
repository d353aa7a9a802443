//! # Channel Patterns
//!
//! Subscription patterns are either exact channel names or flat shell-style
//! globs: `*` matches any sequence and `?` any single character. The `.`
//! separator has no special meaning, so `game.*` matches both `game.created`
//! and `game.123.moves`. Matching is case-sensitive.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::BusError;

/// Returns `true` if the pattern needs glob matching rather than an exact compare.
#[must_use]
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// A compiled subscription pattern.
#[derive(Debug, Clone)]
pub struct ChannelPattern {
    raw: String,
    matcher: Option<GlobMatcher>,
}

impl ChannelPattern {
    /// Compile a pattern. Exact names never fail.
    pub fn parse(pattern: &str) -> Result<Self, BusError> {
        let matcher = if is_wildcard(pattern) {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(false)
                .backslash_escape(true)
                .build()
                .map_err(|err| BusError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: err.to_string(),
                })?;
            Some(glob.compile_matcher())
        } else {
            None
        };

        Ok(Self {
            raw: pattern.to_string(),
            matcher,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.matcher.is_some()
    }

    /// Check whether a channel name falls under this pattern.
    #[must_use]
    pub fn matches(&self, channel: &str) -> bool {
        if self.raw == channel {
            return true;
        }
        self.matcher
            .as_ref()
            .is_some_and(|matcher| matcher.is_match(channel))
    }
}

impl PartialEq for ChannelPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ChannelPattern {}
