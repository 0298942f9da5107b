//! Per-proxy filtering state
//!
//! The allowed-blob cache and the running flag are the only mutable state a
//! proxy shares between its connections. They sit behind one mutex that is
//! held for map access only, never across upstream I/O.

use crate::filter::AllowList;
use crate::protocol::Identity;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    running: bool,
    allowed_blobs: HashMap<Bytes, bool>,
    blob_comments: HashMap<Bytes, String>,
}

/// Outcome of looking up a sign request's key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignDecision {
    pub allowed: bool,
    /// Comment of the key, when it appeared in an identity listing
    pub comment: Option<String>,
}

/// Allow-list plus the decisions recorded for every key observed so far
#[derive(Debug)]
pub struct FilterState {
    allow_list: AllowList,
    inner: Mutex<Inner>,
}

impl FilterState {
    pub fn new(allow_list: AllowList) -> Self {
        Self {
            allow_list,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section only inserts or reads map entries, so a
        // poisoned lock still guards consistent data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Set the running flag, returning the previous value
    pub fn set_running(&self, running: bool) -> bool {
        std::mem::replace(&mut self.lock().running, running)
    }

    /// Decide on every identity of a listing and remember the outcome.
    ///
    /// Denied keys are recorded too, so a later sign request for one of them
    /// can be reported with its comment. Returns one decision per identity.
    pub fn observe(&self, identities: &[Identity]) -> Vec<bool> {
        let decisions: Vec<bool> = identities
            .iter()
            .map(|i| self.allow_list.allows(i))
            .collect();

        let mut inner = self.lock();
        for (identity, allowed) in identities.iter().zip(&decisions) {
            inner.allowed_blobs.insert(identity.blob.clone(), *allowed);
            inner
                .blob_comments
                .insert(identity.blob.clone(), identity.comment().to_string());
        }
        decisions
    }

    /// Look up the decision for the key a sign request targets.
    ///
    /// Keys never seen in a listing are judged with an empty comment, so
    /// comment entries deny them while fingerprint entries (or an empty
    /// allow-list) can still allow them.
    pub fn sign_decision(&self, blob: &Bytes) -> SignDecision {
        let cached = {
            let inner = self.lock();
            inner
                .allowed_blobs
                .get(blob)
                .map(|allowed| (*allowed, inner.blob_comments.get(blob).cloned()))
        };

        match cached {
            Some((allowed, comment)) => SignDecision { allowed, comment },
            None => SignDecision {
                allowed: self.allow_list.is_key_allowed("", blob),
                comment: None,
            },
        }
    }

    /// Number of distinct keys observed so far
    pub fn cached_keys(&self) -> usize {
        self.lock().allowed_blobs.len()
    }
}
