//! Key filtering
//!
//! Allow-list entries are matched against an identity's comment
//! (case-insensitive substring) or its SHA-256 fingerprint (prefix).
//! An empty allow-list lets every key through.

mod allow_list;
mod comment;
mod fingerprint;

pub use allow_list::{AllowList, AllowListEntry, is_key_allowed};
pub use comment::CommentMatcher;
pub use fingerprint::FingerprintMatcher;
