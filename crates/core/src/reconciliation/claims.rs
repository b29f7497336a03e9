//! In-process claims on provider transactions
//!
//! The webhook and sync paths may see the same provider transaction at the
//! same time. Whoever claims it first classifies it; the other treats it as a
//! duplicate.

use std::collections::HashSet;

use parking_lot::Mutex;
use uuid::Uuid;

type ClaimKey = (Uuid, String);

/// Set of (integration, provider transaction id) pairs being classified
#[derive(Debug, Default)]
pub struct ClaimSet {
    held: Mutex<HashSet<ClaimKey>>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a provider transaction; `None` if someone else holds it
    pub fn claim(&self, integration_id: Uuid, provider_txn_id: &str) -> Option<Claim<'_>> {
        let key = (integration_id, provider_txn_id.to_string());
        if !self.held.lock().insert(key.clone()) {
            return None;
        }
        Some(Claim { set: self, key })
    }

    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held claim, released on drop
#[derive(Debug)]
pub struct Claim<'a> {
    set: &'a ClaimSet,
    key: ClaimKey,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set.held.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let claims = ClaimSet::new();
        let id = Uuid::now_v7();

        let first = claims.claim(id, "txn-1");
        assert!(first.is_some());
        assert!(claims.claim(id, "txn-1").is_none());
        assert!(claims.claim(id, "txn-2").is_some());
        assert!(claims.claim(Uuid::now_v7(), "txn-1").is_some());

        drop(first);
        assert!(claims.is_empty());
        assert!(claims.claim(id, "txn-1").is_some());
    }
}
