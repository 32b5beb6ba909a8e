use std::future::Future;

use chrono::{DateTime, Utc};
use evote_crypto::SealedData;
use rocket::tokio::time::{timeout, Duration};

use crate::error::{Error, Result};
use crate::model::{
    ballot::Ballot,
    election::{Election, ElectionId},
    voter::{Participation, UserId, VoterAssignment},
};

use super::{BallotBox, BallotSnapshot, CastOutcome, ElectionStore};

/// Wait at most `limit` for a store operation.
async fn bounded<T>(limit: Duration, operation: impl Future<Output = Result<T>>) -> Result<T> {
    match timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(Error::ServiceUnavailable(format!(
            "database did not answer within {}ms",
            limit.as_millis()
        ))),
    }
}

/// A store whose every operation gives up after a fixed time, so a stalled
/// database fails requests instead of hanging them.
#[derive(Clone)]
pub struct TimeoutStore<S> {
    inner: S,
    limit: Duration,
}

impl<S> TimeoutStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[rocket::async_trait]
impl<S: ElectionStore> ElectionStore for TimeoutStore<S> {
    async fn election(&self, id: ElectionId) -> Result<Option<Election>> {
        bounded(self.limit, self.inner.election(id)).await
    }

    async fn assignment(
        &self,
        election_id: ElectionId,
        user_id: UserId,
    ) -> Result<Option<VoterAssignment>> {
        bounded(self.limit, self.inner.assignment(election_id, user_id)).await
    }

    async fn participation(&self, election_id: ElectionId) -> Result<Participation> {
        bounded(self.limit, self.inner.participation(election_id)).await
    }

    async fn save_results(
        &self,
        election_id: ElectionId,
        results: &SealedData,
        fraud: bool,
    ) -> Result<()> {
        bounded(self.limit, self.inner.save_results(election_id, results, fraud)).await
    }

    async fn flag_fraud(&self, election_id: ElectionId) -> Result<()> {
        bounded(self.limit, self.inner.flag_fraud(election_id)).await
    }

    async fn elections_ended_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Election>> {
        bounded(self.limit, self.inner.elections_ended_between(after, until)).await
    }
}

#[rocket::async_trait]
impl<S: BallotBox> BallotBox for TimeoutStore<S> {
    /// A timeout during commit leaves the caller unsure whether the vote
    /// counted, but the ballot and the voter's mark still land together or
    /// not at all.
    async fn cast(
        &self,
        user_id: UserId,
        ballot: Ballot,
        closes_at: DateTime<Utc>,
    ) -> Result<CastOutcome> {
        bounded(self.limit, self.inner.cast(user_id, ballot, closes_at)).await
    }

    async fn ballots(&self, election_id: ElectionId) -> Result<Vec<Ballot>> {
        bounded(self.limit, self.inner.ballots(election_id)).await
    }

    async fn snapshot(&self, election_id: ElectionId) -> Result<BallotSnapshot> {
        bounded(self.limit, self.inner.snapshot(election_id)).await
    }
}
