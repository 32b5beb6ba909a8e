//! Persistence boundaries for elections, eligibility and ballots.

use chrono::{DateTime, Utc};
use evote_crypto::SealedData;

use crate::error::Result;
use crate::model::{
    ballot::Ballot,
    election::{Election, ElectionId},
    voter::{Participation, UserId, VoterAssignment},
};

#[cfg(test)]
pub(crate) mod memory;
mod mongo;
mod timeout;

pub use mongo::MongoStore;
pub use timeout::TimeoutStore;

/// Result of trying to cast a ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOutcome {
    /// The voter was marked as voted and the ballot appended, together.
    Recorded,
    /// The voter had already voted; nothing was written.
    AlreadyVoted,
    /// The voter has no assignment for this election; nothing was written.
    NotEligible,
    /// The election closed before the ballot could be committed; nothing
    /// was written.
    Closed,
}

/// The ballots of an election alongside the number of voters marked as
/// having voted, read at a single point in time.
#[derive(Debug, Clone)]
pub struct BallotSnapshot {
    pub ballots: Vec<Ballot>,
    pub voted: u64,
}

#[rocket::async_trait]
pub trait ElectionStore: Send + Sync {
    async fn election(&self, id: ElectionId) -> Result<Option<Election>>;

    async fn assignment(
        &self,
        election_id: ElectionId,
        user_id: UserId,
    ) -> Result<Option<VoterAssignment>>;

    async fn participation(&self, election_id: ElectionId) -> Result<Participation>;

    /// Persist encrypted results. `fraud` may only ever raise the flag.
    async fn save_results(
        &self,
        election_id: ElectionId,
        results: &SealedData,
        fraud: bool,
    ) -> Result<()>;

    async fn flag_fraud(&self, election_id: ElectionId) -> Result<()>;

    /// Elections whose end date lies in `(after, until]`.
    async fn elections_ended_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Election>>;
}

#[rocket::async_trait]
pub trait BallotBox: Send + Sync {
    /// Mark `user_id` as having voted and append `ballot`, atomically.
    /// Either both happen or neither does, and neither happens at or after
    /// `closes_at`.
    async fn cast(
        &self,
        user_id: UserId,
        ballot: Ballot,
        closes_at: DateTime<Utc>,
    ) -> Result<CastOutcome>;

    async fn ballots(&self, election_id: ElectionId) -> Result<Vec<Ballot>>;

    async fn snapshot(&self, election_id: ElectionId) -> Result<BallotSnapshot>;
}
