//! Comment matching filter

use crate::protocol::Identity;

/// Case-insensitive substring matcher for key comments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentMatcher {
    /// The pattern as configured
    pattern: String,
    /// Lowercased needle used for matching
    needle: String,
}

impl CommentMatcher {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            needle: pattern.to_lowercase(),
        }
    }

    /// Get the pattern being matched
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check if the identity's comment contains the pattern, ignoring case
    pub fn matches(&self, identity: &Identity) -> bool {
        identity.comment().to_lowercase().contains(&self.needle)
    }
}
