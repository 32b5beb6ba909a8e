use chrono::{DateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

use super::{election::ElectionId, mongodb::Id};

pub type UserId = Id;

/// Eligibility of one user for one election, and whether they have used it.
///
/// `voted_at` is set exactly once and never cleared; it is the only record of
/// who has voted and is deliberately not linked to any ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterAssignment {
    #[serde(rename = "_id")]
    pub id: Id,
    pub user_id: UserId,
    pub election_id: ElectionId,
    #[serde(default)]
    pub voted_at: Option<BsonDateTime>,
}

impl VoterAssignment {
    pub fn new(user_id: UserId, election_id: ElectionId) -> Self {
        Self {
            id: Id::new(),
            user_id,
            election_id,
            voted_at: None,
        }
    }

    pub fn has_voted(&self) -> bool {
        self.voted_at.is_some()
    }

    pub fn voted_at(&self) -> Option<DateTime<Utc>> {
        self.voted_at.map(BsonDateTime::to_chrono)
    }
}

/// Voter turnout for an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub voted: u64,
    pub not_voted: u64,
}
