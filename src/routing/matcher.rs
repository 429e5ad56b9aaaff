//! Route matching and path rewriting.
//!
//! # Responsibilities
//! - Match path prefix on segment boundaries (case-sensitive)
//! - Rewrite the matched prefix into the upstream path
//!
//! # Design Decisions
//! - `/api/ai/chat` matches `/api/ai/chat` and `/api/ai/chat/x`, never `/api/ai/chatty`
//! - No regex to guarantee O(n) matching

use crate::config::RewriteConfig;

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The prefix this matcher was built from.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the part of `path` after the prefix, or `None` if it does not match.
    ///
    /// The remainder is either empty or starts with `/`.
    pub fn remainder<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

/// Compiled rewrite rule for a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// Prefix is replaced by a fixed path.
    Replace(String),
    /// Prefix is dropped; an empty remainder becomes the default path.
    Strip { default_path: String },
}

impl From<&RewriteConfig> for Rewrite {
    fn from(config: &RewriteConfig) -> Self {
        match config {
            RewriteConfig::Replace { with } => Rewrite::Replace(with.trim_end_matches('/').to_string()),
            RewriteConfig::Strip { default_path } => Rewrite::Strip {
                default_path: default_path.clone(),
            },
        }
    }
}

impl Rewrite {
    /// Build the upstream path from the remainder left by the matcher.
    pub fn apply(&self, remainder: &str) -> String {
        match self {
            Rewrite::Replace(with) => {
                let joined = format!("{}{}", with, remainder);
                if joined.is_empty() { "/".to_string() } else { joined }
            }
            Rewrite::Strip { default_path } => {
                if remainder.is_empty() || remainder == "/" {
                    default_path.clone()
                } else {
                    remainder.to_string()
                }
            }
        }
    }
}
