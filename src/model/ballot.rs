use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::election::ElectionId;

pub type BallotId = String;

/// An accepted, encrypted ballot. Append-only.
///
/// Carries neither voter identity nor a cast timestamp. The ID is random
/// rather than a MongoDB object ID, since those embed their creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(rename = "_id")]
    pub id: BallotId,
    pub election_id: ElectionId,
    #[serde(with = "evote_crypto::serde_base64")]
    pub encrypted_choice: Vec<u8>,
}

impl Ballot {
    pub fn new(election_id: ElectionId, encrypted_choice: Vec<u8>) -> Self {
        let mut id = [0u8; 16];
        OsRng.fill_bytes(&mut id);
        Self {
            id: hex::encode(id),
            election_id,
            encrypted_choice,
        }
    }
}
