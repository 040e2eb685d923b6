use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ChallengeId, TransactionId};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeState {
    Active,
    Used,
    Expired,
}

/// A single-use code bound to one pending transaction.
///
/// Exactly one challenge may be `Active` per transaction. Verification that
/// succeeds consumes the challenge (`Active → Used`) in the same step, so a
/// replayed code can never verify twice. Expiry is computed lazily from
/// `created_at` when the code is touched.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Challenge {
    pub id: ChallengeId,
    pub code: String,
    pub transaction: TransactionId,
    pub state: ChallengeState,
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    pub fn new(id: ChallengeId, transaction: TransactionId, code: String) -> Self {
        Self {
            id,
            code,
            transaction,
            state: ChallengeState::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ChallengeState::Active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        self.created_at + ttl < now
    }
}

/// Generates a random numeric code of the given length.
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length).map(|_| rng.gen_range(0..=9).to_string()).collect()
}
