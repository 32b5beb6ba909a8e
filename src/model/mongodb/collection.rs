use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::audit::AuditEntry;
use crate::model::{ballot::Ballot, election::Election, voter::VoterAssignment};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for Election {
    const NAME: &'static str = "elections";
}

impl MongoCollection for VoterAssignment {
    const NAME: &'static str = "voter_assignments";
}

impl MongoCollection for Ballot {
    const NAME: &'static str = "ballots";
}

impl MongoCollection for AuditEntry {
    const NAME: &'static str = "audit_log";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // One assignment per (voter, election).
    let assignment_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "user_id": 1})
        .options(unique)
        .build();
    Coll::<VoterAssignment>::from_db(db)
        .create_index(assignment_index, None)
        .await?;

    // Ballots are only ever scanned per election.
    let ballot_index = IndexModel::builder()
        .keys(doc! {"election_id": 1})
        .build();
    Coll::<Ballot>::from_db(db)
        .create_index(ballot_index, None)
        .await?;

    // Escalation lookups, and reading back an election's trail.
    let offence_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "subject": 1, "kind": 1})
        .build();
    let trail_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "created_at": 1})
        .build();
    Coll::<AuditEntry>::from_db(db)
        .create_indexes([offence_index, trail_index], None)
        .await?;

    Ok(())
}
