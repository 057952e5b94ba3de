//! The chain-tip lock: the current previous-block hash plus a short-lived
//! exclusive claim on the next append slot. This is the local serializer for
//! appends; global agreement is a best-effort vote counted by the miner.

use std::sync::Mutex;

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("the append slot is already claimed")]
    AlreadyClaimed,
    #[error("claiming public key is empty")]
    EmptyPublicKey,
    #[error("claiming block id is empty")]
    EmptyBlockId,
    #[error("previous block hash did not match the current tip")]
    WrongPrev,
}

#[derive(Debug, Default)]
struct TipState {
    prev_hash: String,
    claimed: bool,
    claimed_by: String,
    claim_block_id: String,
}

/// Invariant: `claimed == false` iff both `claimed_by` and `claim_block_id`
/// are empty. No I/O ever happens while the lock is held.
#[derive(Debug, Default)]
pub struct ChainTip {
    state: Mutex<TipState>,
}

impl ChainTip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prev_hash(&self) -> String {
        self.lock().prev_hash.clone()
    }

    /// Only the committer advances the tip, on a successful append.
    pub fn set_prev_hash(&self, hash: &str) {
        self.lock().prev_hash = hash.to_string();
    }

    pub fn claim_state(&self) -> (bool, String, String) {
        let state = self.lock();
        (
            state.claimed,
            state.claimed_by.clone(),
            state.claim_block_id.clone(),
        )
    }

    /// Atomic test-and-set of the claim triple.
    pub fn claim(&self, by: &str, block_id: &str, expected_prev: &str) -> Result<(), ClaimError> {
        let mut state = self.lock();
        if state.claimed {
            return Err(ClaimError::AlreadyClaimed);
        }
        if by.is_empty() {
            return Err(ClaimError::EmptyPublicKey);
        }
        if block_id.is_empty() {
            return Err(ClaimError::EmptyBlockId);
        }
        if expected_prev != state.prev_hash {
            return Err(ClaimError::WrongPrev);
        }
        state.claimed = true;
        state.claimed_by = by.to_string();
        state.claim_block_id = block_id.to_string();
        Ok(())
    }

    /// Release a claim the caller owns. Calling this without owning the claim
    /// is a programming defect, so it aborts.
    pub fn release(&self, by: &str, block_id: &str) {
        let mut state = self.lock();
        if by != state.claimed_by || block_id != state.claim_block_id {
            panic!(
                "release() called by a non-owner: claimed_by={:?} claim_block_id={:?}",
                state.claimed_by, state.claim_block_id
            );
        }
        state.claimed = false;
        state.claimed_by.clear();
        state.claim_block_id.clear();
    }

    /// Release only if `(by, block_id)` still holds the claim. Used by the
    /// sign-claim expiry task, where the claim may have been legitimately
    /// released by an accepted block in the meantime.
    pub fn release_if_held(&self, by: &str, block_id: &str) -> bool {
        let mut state = self.lock();
        if by != state.claimed_by || block_id != state.claim_block_id {
            return false;
        }
        state.claimed = false;
        state.claimed_by.clear();
        state.claim_block_id.clear();
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TipState> {
        self.state.lock().expect("chain tip lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_and_release_cycle() {
        let tip = ChainTip::new();
        assert_eq!(tip.prev_hash(), "");
        tip.claim("node-a", "block-1", "").unwrap();
        assert_eq!(
            tip.claim_state(),
            (true, "node-a".into(), "block-1".into())
        );
        tip.release("node-a", "block-1");
        assert_eq!(tip.claim_state(), (false, String::new(), String::new()));
    }

    #[test]
    fn second_claim_is_rejected() {
        let tip = ChainTip::new();
        tip.claim("node-a", "block-1", "").unwrap();
        assert_eq!(
            tip.claim("node-b", "block-2", ""),
            Err(ClaimError::AlreadyClaimed)
        );
    }

    #[test]
    fn claim_validates_inputs() {
        let tip = ChainTip::new();
        assert_eq!(tip.claim("", "block-1", ""), Err(ClaimError::EmptyPublicKey));
        assert_eq!(tip.claim("node-a", "", ""), Err(ClaimError::EmptyBlockId));
        assert_eq!(
            tip.claim("node-a", "block-1", "stale-hash"),
            Err(ClaimError::WrongPrev)
        );
    }

    #[test]
    fn advancing_the_tip_invalidates_stale_claims() {
        let tip = ChainTip::new();
        tip.set_prev_hash("00000aaa");
        assert_eq!(
            tip.claim("node-a", "block-1", ""),
            Err(ClaimError::WrongPrev)
        );
        tip.claim("node-a", "block-1", "00000aaa").unwrap();
    }

    #[test]
    fn release_if_held_ignores_moved_claims() {
        let tip = ChainTip::new();
        tip.claim("node-a", "block-1", "").unwrap();
        assert!(!tip.release_if_held("node-b", "block-1"));
        assert!(tip.release_if_held("node-a", "block-1"));
        // second expiry of the same claim is a no-op
        assert!(!tip.release_if_held("node-a", "block-1"));
    }

    #[test]
    #[should_panic(expected = "non-owner")]
    fn release_by_non_owner_panics() {
        let tip = ChainTip::new();
        tip.claim("node-a", "block-1", "").unwrap();
        tip.release("node-b", "block-1");
    }
}
