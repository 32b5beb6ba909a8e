use chrono::{DateTime, Utc};
use evote_crypto::SealedData;
use log::{debug, warn};
use mongodb::{
    bson::{doc, to_bson, DateTime as BsonDateTime},
    error::Error as DbError,
    options::SessionOptions,
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;

use crate::error::Result;
use crate::model::{
    ballot::Ballot,
    election::{Election, ElectionId},
    mongodb::{is_transient_transaction_error, Coll},
    voter::{Participation, UserId, VoterAssignment},
};

use super::{BallotBox, BallotSnapshot, CastOutcome, ElectionStore};

/// Attempts at a vote transaction before giving up on write conflicts.
const CAST_ATTEMPTS: usize = 3;

/// MongoDB-backed store. Transactions and snapshot reads need a replica set.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    elections: Coll<Election>,
    assignments: Coll<VoterAssignment>,
    ballots: Coll<Ballot>,
}

impl MongoStore {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            elections: Coll::from_db(db),
            assignments: Coll::from_db(db),
            ballots: Coll::from_db(db),
        }
    }

    /// The body of the vote transaction.
    async fn cast_in(
        &self,
        session: &mut ClientSession,
        user_id: UserId,
        ballot: &Ballot,
        closes_at: DateTime<Utc>,
    ) -> std::result::Result<CastOutcome, DbError> {
        if Utc::now() >= closes_at {
            return Ok(CastOutcome::Closed);
        }

        // Only an unused assignment may be marked; this is what makes double
        // voting impossible under concurrency.
        let filter = doc! {
            "election_id": ballot.election_id,
            "user_id": user_id,
            "voted_at": null,
        };
        let update = doc! {
            "$set": { "voted_at": BsonDateTime::now() }
        };
        let result = self
            .assignments
            .update_one_with_session(filter, update, None, session)
            .await?;

        if result.modified_count != 1 {
            let filter = doc! {
                "election_id": ballot.election_id,
                "user_id": user_id,
            };
            let assigned = self
                .assignments
                .find_one_with_session(filter, None, session)
                .await?
                .is_some();
            return Ok(if assigned {
                CastOutcome::AlreadyVoted
            } else {
                CastOutcome::NotEligible
            });
        }

        self.ballots
            .insert_one_with_session(ballot, None, session)
            .await?;
        Ok(CastOutcome::Recorded)
    }
}

#[rocket::async_trait]
impl ElectionStore for MongoStore {
    async fn election(&self, id: ElectionId) -> Result<Option<Election>> {
        Ok(self.elections.find_one(id.as_doc(), None).await?)
    }

    async fn assignment(
        &self,
        election_id: ElectionId,
        user_id: UserId,
    ) -> Result<Option<VoterAssignment>> {
        let filter = doc! {
            "election_id": election_id,
            "user_id": user_id,
        };
        Ok(self.assignments.find_one(filter, None).await?)
    }

    async fn participation(&self, election_id: ElectionId) -> Result<Participation> {
        let eligible = self
            .assignments
            .count_documents(doc! { "election_id": election_id }, None)
            .await?;
        let voted_filter = doc! {
            "election_id": election_id,
            "voted_at": { "$ne": null },
        };
        let voted = self.assignments.count_documents(voted_filter, None).await?;
        Ok(Participation {
            voted,
            not_voted: eligible.saturating_sub(voted),
        })
    }

    async fn save_results(
        &self,
        election_id: ElectionId,
        results: &SealedData,
        fraud: bool,
    ) -> Result<()> {
        let results = to_bson(results).map_err(DbError::from)?;
        let update = if fraud {
            doc! { "$set": { "results": results, "fraud": true } }
        } else {
            doc! { "$set": { "results": results } }
        };
        let result = self
            .elections
            .update_one(election_id.as_doc(), update, None)
            .await?;
        if result.matched_count != 1 {
            return Err(crate::error::Error::not_found(format!(
                "Election with ID '{election_id}'"
            )));
        }
        Ok(())
    }

    async fn flag_fraud(&self, election_id: ElectionId) -> Result<()> {
        let update = doc! { "$set": { "fraud": true } };
        self.elections
            .update_one(election_id.as_doc(), update, None)
            .await?;
        Ok(())
    }

    async fn elections_ended_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Election>> {
        let filter = doc! {
            "end_date": {
                "$gt": BsonDateTime::from_chrono(after),
                "$lte": BsonDateTime::from_chrono(until),
            }
        };
        let elections = self.elections.find(filter, None).await?;
        Ok(elections.try_collect().await?)
    }
}

#[rocket::async_trait]
impl BallotBox for MongoStore {
    async fn cast(
        &self,
        user_id: UserId,
        ballot: Ballot,
        closes_at: DateTime<Utc>,
    ) -> Result<CastOutcome> {
        let mut session = self.client.start_session(None).await?;
        let mut attempt = 1;
        loop {
            session.start_transaction(None).await?;
            let outcome = match self.cast_in(&mut session, user_id, &ballot, closes_at).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    session.abort_transaction().await.ok();
                    if is_transient_transaction_error(&e) && attempt < CAST_ATTEMPTS {
                        debug!("Retrying vote transaction after transient error: {e}");
                        attempt += 1;
                        continue;
                    }
                    return Err(e.into());
                }
            };

            if outcome != CastOutcome::Recorded {
                session.abort_transaction().await?;
                return Ok(outcome);
            }
            // The writes may have taken long enough for voting to end.
            if Utc::now() >= closes_at {
                session.abort_transaction().await?;
                return Ok(CastOutcome::Closed);
            }

            match session.commit_transaction().await {
                Ok(()) => return Ok(outcome),
                Err(e) if is_transient_transaction_error(&e) && attempt < CAST_ATTEMPTS => {
                    warn!("Vote transaction failed to commit, retrying: {e}");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn ballots(&self, election_id: ElectionId) -> Result<Vec<Ballot>> {
        let ballots = self
            .ballots
            .find(doc! { "election_id": election_id }, None)
            .await?;
        Ok(ballots.try_collect().await?)
    }

    async fn snapshot(&self, election_id: ElectionId) -> Result<BallotSnapshot> {
        let session_options = SessionOptions::builder().snapshot(true).build();
        let mut session = self.client.start_session(Some(session_options)).await?;

        let mut cursor = self
            .ballots
            .find_with_session(doc! { "election_id": election_id }, None, &mut session)
            .await?;
        let mut ballots = Vec::new();
        while let Some(ballot) = cursor.next(&mut session).await {
            ballots.push(ballot?);
        }

        let voted_filter = doc! {
            "election_id": election_id,
            "voted_at": { "$ne": null },
        };
        let voted = self
            .assignments
            .count_documents_with_session(voted_filter, None, &mut session)
            .await?;

        Ok(BallotSnapshot { ballots, voted })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::mongodb::{ensure_indexes_exist, Id};

    /// Connect to the replica set named by `EVOTE_TEST_DB_URI` and use a fresh
    /// database on it.
    async fn scratch_store() -> (MongoStore, Database) {
        let uri = std::env::var("EVOTE_TEST_DB_URI")
            .expect("EVOTE_TEST_DB_URI must point at a MongoDB replica set");
        let client = Client::with_uri_str(uri).await.unwrap();
        let db = client.database(&format!("evote_test_{}", Id::new().to_hex()));
        ensure_indexes_exist(&db).await.unwrap();
        (MongoStore::new(client, &db), db)
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set"]
    async fn concurrent_casts_record_one_ballot() {
        let (store, db) = scratch_store().await;
        let election = Election::open_example();
        let voter = Id::new();
        let late_voter = Id::new();
        store.elections.insert_one(&election, None).await.unwrap();
        for user_id in [voter, late_voter] {
            store
                .assignments
                .insert_one(VoterAssignment::new(user_id, election.id), None)
                .await
                .unwrap();
        }

        let (first, second) = rocket::tokio::join!(
            store.cast(voter, Ballot::new(election.id, vec![1]), election.end_date),
            store.cast(voter, Ballot::new(election.id, vec![2]), election.end_date),
        );
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|outcome| *outcome != CastOutcome::Recorded);
        assert_eq!(
            outcomes,
            vec![CastOutcome::Recorded, CastOutcome::AlreadyVoted]
        );

        let closed = store
            .cast(
                late_voter,
                Ballot::new(election.id, vec![3]),
                Utc::now() - Duration::seconds(1),
            )
            .await
            .unwrap();
        assert_eq!(closed, CastOutcome::Closed);
        let late = store.assignment(election.id, late_voter).await.unwrap().unwrap();
        assert!(!late.has_voted());

        let snapshot = store.snapshot(election.id).await.unwrap();
        assert_eq!(snapshot.voted, 1);
        assert_eq!(snapshot.ballots.len(), 1);
        assert_eq!(store.ballots(election.id).await.unwrap(), snapshot.ballots);

        db.drop(None).await.unwrap();
    }
}
