//! Allow-list parsing and evaluation

use crate::error::{Error, Result};
use crate::filter::{CommentMatcher, FingerprintMatcher};
use crate::protocol::Identity;
use bytes::Bytes;

/// One configured allow-list entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowListEntry {
    /// Case-insensitive substring of the key comment
    Comment(CommentMatcher),
    /// Prefix of the key's `SHA256:` fingerprint
    Fingerprint(FingerprintMatcher),
}

impl AllowListEntry {
    /// Parse a configured entry.
    ///
    /// `SHA256:` and `MD5:` prefixes select fingerprint matching; anything
    /// else matches against the comment.
    pub fn parse(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(Error::Config("Empty allow-list entry".to_string()));
        }
        if s.starts_with("SHA256:") || s.starts_with("MD5:") {
            return Ok(AllowListEntry::Fingerprint(FingerprintMatcher::new(s)?));
        }
        Ok(AllowListEntry::Comment(CommentMatcher::new(s)))
    }

    pub fn matches(&self, identity: &Identity) -> bool {
        match self {
            AllowListEntry::Comment(m) => m.matches(identity),
            AllowListEntry::Fingerprint(m) => m.matches(identity),
        }
    }

    /// Description for logging
    pub fn description(&self) -> String {
        match self {
            AllowListEntry::Comment(m) => format!("comment:{}", m.pattern()),
            AllowListEntry::Fingerprint(m) => format!("fingerprint:{}", m.pattern()),
        }
    }
}

/// Ordered list of entries; a key is allowed when any entry matches.
///
/// An empty list allows every key: filtering only starts once at least one
/// entry is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<AllowListEntry>,
}

impl AllowList {
    pub fn new(entries: Vec<AllowListEntry>) -> Self {
        Self { entries }
    }

    /// Parse configured strings into an allow-list
    pub fn parse(entries: &[String]) -> Result<Self> {
        let entries = entries
            .iter()
            .map(|s| AllowListEntry::parse(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Check whether an identity may be listed and used for signing
    pub fn allows(&self, identity: &Identity) -> bool {
        self.matching_entry(identity).is_some() || self.entries.is_empty()
    }

    /// The first entry that matches the identity, if any
    pub fn matching_entry(&self, identity: &Identity) -> Option<&AllowListEntry> {
        self.entries.iter().find(|e| e.matches(identity))
    }

    /// Decide on a key by comment and blob
    pub fn is_key_allowed(&self, comment: &str, blob: &Bytes) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        self.allows(&Identity::new(blob.clone(), comment))
    }

    /// Keep only allowed identities, preserving order
    pub fn filter_identities(&self, identities: Vec<Identity>) -> Vec<Identity> {
        identities.into_iter().filter(|i| self.allows(i)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptions of all entries
    pub fn descriptions(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.description()).collect()
    }
}

/// Decide on a key by comment and blob against an allow-list
pub fn is_key_allowed(comment: &str, blob: &Bytes, allow_list: &AllowList) -> bool {
    allow_list.is_key_allowed(comment, blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::seq::SliceRandom;

    fn make_identity(blob: &'static [u8], comment: &str) -> Identity {
        Identity::new(Bytes::from_static(blob), comment)
    }

    fn list(entries: &[&str]) -> AllowList {
        let entries: Vec<String> = entries.iter().map(|s| s.to_string()).collect();
        AllowList::parse(&entries).unwrap()
    }

    #[test]
    fn test_empty_list_allows_all() {
        let allow = AllowList::default();
        assert!(allow.is_empty());
        assert!(allow.is_key_allowed("anything", &Bytes::from_static(b"b")));
        assert!(allow.is_key_allowed("", &Bytes::new()));
    }

    #[test]
    fn test_scenario_laptop_only() {
        let allow = list(&["laptop"]);
        let identities = vec![
            make_identity(b"b1", "laptop-key"),
            make_identity(b"b2", "phone-key"),
        ];

        let filtered = allow.filter_identities(identities);
        assert_eq!(filtered, vec![make_identity(b"b1", "laptop-key")]);
    }

    #[test]
    fn test_any_entry_matches() {
        let allow = list(&["work", "github"]);
        assert!(is_key_allowed("me@WORK", &Bytes::new(), &allow));
        assert!(is_key_allowed("GitHub deploy", &Bytes::new(), &allow));
        assert!(!is_key_allowed("personal", &Bytes::new(), &allow));
    }

    #[test]
    fn test_unknown_comment_denied_when_filtering() {
        let allow = list(&["laptop"]);
        assert!(!allow.is_key_allowed("", &Bytes::from_static(b"b1")));
    }

    #[test]
    fn test_parse_entry_kinds() {
        assert!(matches!(
            AllowListEntry::parse("SHA256:abc").unwrap(),
            AllowListEntry::Fingerprint(_)
        ));
        assert!(matches!(
            AllowListEntry::parse("laptop").unwrap(),
            AllowListEntry::Comment(_)
        ));
        assert!(AllowListEntry::parse("MD5:aa:bb").is_err());
        assert!(AllowListEntry::parse("  ").is_err());
    }

    #[test]
    fn test_descriptions() {
        let allow = list(&["laptop", "SHA256:abc"]);
        assert_eq!(
            allow.descriptions(),
            vec!["comment:laptop", "fingerprint:SHA256:abc"]
        );
    }

    #[test]
    fn test_filter_is_ordered_subsequence() {
        let words = ["alpha", "Beta", "gamma", "DELTA", "epsilon"];
        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let n = rng.gen_range(0..8);
            let identities: Vec<Identity> = (0..n)
                .map(|i| {
                    let comment = format!("{}-{}", words.choose(&mut rng).unwrap(), i);
                    Identity::new(Bytes::from(vec![i as u8]), comment)
                })
                .collect();

            let k = rng.gen_range(0..3);
            let entries: Vec<String> = (0..k)
                .map(|_| words.choose(&mut rng).unwrap().to_uppercase())
                .collect();
            let allow = AllowList::parse(&entries).unwrap();

            let filtered = allow.filter_identities(identities.clone());
            let expected: Vec<Identity> = if entries.is_empty() {
                identities
            } else {
                identities
                    .into_iter()
                    .filter(|i| {
                        entries
                            .iter()
                            .any(|e| i.comment().to_lowercase().contains(&e.to_lowercase()))
                    })
                    .collect()
            };
            assert_eq!(filtered, expected);
        }
    }
}
