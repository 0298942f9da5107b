//! Fingerprint matching filter

use crate::error::{Error, Result};
use crate::protocol::Identity;

/// Matcher for SHA-256 key fingerprints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintMatcher {
    /// The fingerprint (or fingerprint prefix) to match, including `SHA256:`
    pattern: String,
}

impl FingerprintMatcher {
    /// Create a new fingerprint matcher.
    ///
    /// Only `SHA256:` fingerprints can be checked against a key blob, so
    /// `MD5:` patterns are refused here instead of silently never matching.
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.starts_with("MD5:") {
            return Err(Error::Config(format!(
                "MD5 fingerprints are not supported: {}. Use the SHA256:... form",
                pattern
            )));
        }
        match pattern.strip_prefix("SHA256:") {
            Some(rest) if !rest.is_empty() => Ok(Self {
                pattern: pattern.to_string(),
            }),
            _ => Err(Error::Config(format!(
                "Invalid fingerprint format: {}. Expected SHA256:...",
                pattern
            ))),
        }
    }

    /// Get the pattern being matched
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check if the key's fingerprint starts with the pattern.
    ///
    /// Blobs that do not parse as a public key have no fingerprint and never
    /// match.
    pub fn matches(&self, identity: &Identity) -> bool {
        identity
            .fingerprint()
            .is_some_and(|fp| fp.to_string().starts_with(&self.pattern))
    }
}
