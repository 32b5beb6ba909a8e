//! In-memory store for tests. A single lock makes `cast` atomic.

use std::{collections::HashMap, sync::Mutex};

use chrono::{DateTime, Utc};
use evote_crypto::SealedData;
use mongodb::bson::DateTime as BsonDateTime;

use crate::error::{Error, Result};
use crate::model::{
    ballot::{Ballot, BallotId},
    election::{Election, ElectionId},
    voter::{Participation, UserId, VoterAssignment},
};

use super::{BallotBox, BallotSnapshot, CastOutcome, ElectionStore};

#[derive(Default)]
struct Inner {
    elections: HashMap<ElectionId, Election>,
    assignments: Vec<VoterAssignment>,
    ballots: Vec<Ballot>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn insert_election(&self, election: Election) {
        self.inner
            .lock()
            .unwrap()
            .elections
            .insert(election.id, election);
    }

    pub fn stored_election(&self, id: ElectionId) -> Election {
        self.inner.lock().unwrap().elections[&id].clone()
    }

    pub fn assign(&self, user_id: UserId, election_id: ElectionId) {
        self.inner
            .lock()
            .unwrap()
            .assignments
            .push(VoterAssignment::new(user_id, election_id));
    }

    /// Append a ballot without touching any assignment, as an attacker with
    /// database access might.
    pub fn inject_ballot(&self, ballot: Ballot) {
        self.inner.lock().unwrap().ballots.push(ballot);
    }

    pub fn remove_ballot(&self, id: &BallotId) {
        self.inner.lock().unwrap().ballots.retain(|b| &b.id != id);
    }

    pub fn ballot_count(&self, election_id: ElectionId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .ballots
            .iter()
            .filter(|b| b.election_id == election_id)
            .count()
    }
}

#[rocket::async_trait]
impl ElectionStore for MemoryStore {
    async fn election(&self, id: ElectionId) -> Result<Option<Election>> {
        Ok(self.inner.lock().unwrap().elections.get(&id).cloned())
    }

    async fn assignment(
        &self,
        election_id: ElectionId,
        user_id: UserId,
    ) -> Result<Option<VoterAssignment>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .assignments
            .iter()
            .find(|a| a.election_id == election_id && a.user_id == user_id)
            .cloned())
    }

    async fn participation(&self, election_id: ElectionId) -> Result<Participation> {
        let inner = self.inner.lock().unwrap();
        let (voted, not_voted) = inner
            .assignments
            .iter()
            .filter(|a| a.election_id == election_id)
            .fold((0, 0), |(voted, not_voted), a| {
                if a.has_voted() {
                    (voted + 1, not_voted)
                } else {
                    (voted, not_voted + 1)
                }
            });
        Ok(Participation { voted, not_voted })
    }

    async fn save_results(
        &self,
        election_id: ElectionId,
        results: &SealedData,
        fraud: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let election = inner
            .elections
            .get_mut(&election_id)
            .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))?;
        election.results = Some(results.clone());
        election.fraud |= fraud;
        Ok(())
    }

    async fn flag_fraud(&self, election_id: ElectionId) -> Result<()> {
        if let Some(election) = self.inner.lock().unwrap().elections.get_mut(&election_id) {
            election.fraud = true;
        }
        Ok(())
    }

    async fn elections_ended_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Election>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .elections
            .values()
            .filter(|e| e.end_date > after && e.end_date <= until)
            .cloned()
            .collect())
    }
}

#[rocket::async_trait]
impl BallotBox for MemoryStore {
    async fn cast(
        &self,
        user_id: UserId,
        ballot: Ballot,
        closes_at: DateTime<Utc>,
    ) -> Result<CastOutcome> {
        let mut guard = self.inner.lock().unwrap();
        if Utc::now() >= closes_at {
            return Ok(CastOutcome::Closed);
        }
        let inner = &mut *guard;
        let Some(assignment) = inner
            .assignments
            .iter_mut()
            .find(|a| a.election_id == ballot.election_id && a.user_id == user_id)
        else {
            return Ok(CastOutcome::NotEligible);
        };
        if assignment.has_voted() {
            return Ok(CastOutcome::AlreadyVoted);
        }
        assignment.voted_at = Some(BsonDateTime::now());
        inner.ballots.push(ballot);
        Ok(CastOutcome::Recorded)
    }

    async fn ballots(&self, election_id: ElectionId) -> Result<Vec<Ballot>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .ballots
            .iter()
            .filter(|b| b.election_id == election_id)
            .cloned()
            .collect())
    }

    async fn snapshot(&self, election_id: ElectionId) -> Result<BallotSnapshot> {
        let inner = self.inner.lock().unwrap();
        let ballots = inner
            .ballots
            .iter()
            .filter(|b| b.election_id == election_id)
            .cloned()
            .collect();
        let voted = inner
            .assignments
            .iter()
            .filter(|a| a.election_id == election_id && a.has_voted())
            .count() as u64;
        Ok(BallotSnapshot { ballots, voted })
    }
}
