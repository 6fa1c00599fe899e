//! Pending-challenge store.
//!
//! Challenges bind an attestation to a specific verification request: the
//! Auditee must embed the challenge in freshly generated key-attestation
//! metadata, so a recorded attestation cannot be replayed. The store is
//! process-global, internally synchronized, and consume-at-most-once.
//! Challenges expire after a bounded window and do not survive a restart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand_core::{OsRng, RngCore};
use tracing::debug;

use crate::codec::CHALLENGE_LENGTH;

/// Tracks challenges that have been issued but not yet presented.
pub struct ChallengeStore {
    pending: Mutex<HashMap<[u8; CHALLENGE_LENGTH], Instant>>,
    ttl: Duration,
}

impl ChallengeStore {
    /// Create a store whose challenges expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh random challenge and start its expiry clock.
    pub fn issue(&self) -> [u8; CHALLENGE_LENGTH] {
        let mut challenge = [0u8; CHALLENGE_LENGTH];
        OsRng.fill_bytes(&mut challenge);

        let mut pending = self.pending.lock().expect("challenge store poisoned");
        let now = Instant::now();
        pending.retain(|_, issued| now.duration_since(*issued) < self.ttl);
        pending.insert(challenge, now);
        debug!(pending = pending.len(), "issued challenge");
        challenge
    }

    /// Atomically test and remove a presented challenge.
    ///
    /// Returns `true` exactly once per issued, unexpired challenge no
    /// matter how many threads race on it.
    pub fn consume(&self, challenge: &[u8]) -> bool {
        let Ok(challenge) = <[u8; CHALLENGE_LENGTH]>::try_from(challenge) else {
            return false;
        };
        let mut pending = self.pending.lock().expect("challenge store poisoned");
        match pending.remove(&challenge) {
            Some(issued) => issued.elapsed() < self.ttl,
            None => false,
        }
    }

    /// Number of unexpired challenges currently outstanding.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        let pending = self.pending.lock().expect("challenge store poisoned");
        pending
            .values()
            .filter(|issued| issued.elapsed() < self.ttl)
            .count()
    }
}
