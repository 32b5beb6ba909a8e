//! Ballot submission and tally.
//!
//! Submission checks run cheapest first: election window, eligibility, the
//! keyed hash, then the signature (which needs the KMS). Only once all of
//! them pass is the choice encrypted to the election key and cast.

use std::sync::Arc;

use chrono::Utc;
use evote_crypto::{verify, verify_hmac, CryptoError, DecryptionKey, EncryptionKey, SealedData};
use log::{debug, info, warn};
use rocket::tokio::task::spawn_blocking;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::audit::{AuditEntry, AuditKind, AuditLog, Severity};
use crate::error::{Error, Result};
use crate::kms::{KeyKind, KeyService};
use crate::model::{
    ballot::Ballot,
    election::{Election, ElectionId, ElectionPhase},
    voter::{Participation, UserId},
};
use crate::store::{BallotBox, CastOutcome, ElectionStore};

mod tally;

pub use tally::{empty_counts, Counts, Tally};

/// A voter's ballot as submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteSubmission {
    /// Candidate ID or `"blank"`.
    pub choice: String,
    /// HMAC of `choice` under the shared vote secret.
    #[serde(with = "evote_crypto::serde_base64")]
    pub hash: Vec<u8>,
    /// The voter's signature over `choice`.
    #[serde(with = "evote_crypto::serde_base64")]
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyReport {
    pub counts: Counts,
    /// Number of ballots that could not be counted.
    pub discarded: usize,
    pub fraud: bool,
}

/// Secrets shared with clients or kept only by the backend.
pub struct ProtocolSecrets {
    vote_secret: Zeroizing<Vec<u8>>,
    results_key: Zeroizing<Vec<u8>>,
}

impl ProtocolSecrets {
    pub fn new(vote_secret: &[u8], results_key: &[u8]) -> Result<Self> {
        if results_key.len() != evote_crypto::AEAD_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "results key must be {} bytes",
                evote_crypto::AEAD_KEY_LEN
            ))
            .into());
        }
        Ok(Self {
            vote_secret: Zeroizing::new(vote_secret.to_vec()),
            results_key: Zeroizing::new(results_key.to_vec()),
        })
    }
}

pub struct BallotProtocol {
    elections: Arc<dyn ElectionStore>,
    ballots: Arc<dyn BallotBox>,
    kms: Arc<dyn KeyService>,
    audit: AuditLog,
    secrets: ProtocolSecrets,
}

impl BallotProtocol {
    pub fn new(
        elections: Arc<dyn ElectionStore>,
        ballots: Arc<dyn BallotBox>,
        kms: Arc<dyn KeyService>,
        audit: AuditLog,
        secrets: ProtocolSecrets,
    ) -> Self {
        Self {
            elections,
            ballots,
            kms,
            audit,
            secrets,
        }
    }

    async fn election(&self, election_id: ElectionId) -> Result<Election> {
        self.elections
            .election(election_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))
    }

    async fn require_kms(&self) -> Result<()> {
        if self.kms.probe().await {
            Ok(())
        } else {
            Err(Error::ServiceUnavailable(
                "key service did not answer probe".to_string(),
            ))
        }
    }

    async fn reject_repeat_vote(&self, election_id: ElectionId, voter_id: UserId) -> Error {
        let previous = self
            .audit
            .previous_offences(election_id, voter_id, AuditKind::AlreadyVoted)
            .await;
        self.audit
            .record(
                AuditEntry::new(
                    AuditKind::AlreadyVoted,
                    Severity::escalating(previous),
                    format!("Voter {voter_id} tried to vote again (attempt {})", previous + 2),
                )
                .election(election_id)
                .subject(voter_id),
            )
            .await;
        Error::AlreadyVoted(election_id)
    }

    async fn reject_ineligible(&self, election_id: ElectionId, voter_id: UserId) -> Error {
        self.audit
            .record(
                AuditEntry::new(
                    AuditKind::NotEligible,
                    Severity::Medium,
                    format!("User {voter_id} is not assigned to this election"),
                )
                .election(election_id)
                .subject(voter_id),
            )
            .await;
        Error::NotEligible(election_id)
    }

    /// Validate and cast a ballot. Nothing is stored unless every check
    /// passes, and then the voter is marked and the ballot appended together.
    pub async fn submit_vote(
        &self,
        election_id: ElectionId,
        voter_id: UserId,
        submission: &VoteSubmission,
    ) -> Result<()> {
        let election = self.election(election_id).await?;
        if !election.is_open(Utc::now()) {
            return Err(Error::ElectionNotActive(election_id));
        }

        match self.elections.assignment(election_id, voter_id).await? {
            None => return Err(self.reject_ineligible(election_id, voter_id).await),
            Some(assignment) if assignment.has_voted() => {
                return Err(self.reject_repeat_vote(election_id, voter_id).await)
            }
            Some(_) => {}
        }

        let choice = submission.choice.as_bytes();
        if !verify_hmac(choice, &self.secrets.vote_secret, &submission.hash) {
            self.audit
                .record(
                    AuditEntry::new(
                        AuditKind::TamperedContent,
                        Severity::High,
                        format!("Ballot from voter {voter_id} does not match its hash"),
                    )
                    .election(election_id)
                    .subject(voter_id),
                )
                .await;
            return Err(Error::TamperedContent);
        }

        self.require_kms().await?;
        let voter_key = self.kms.public_key(KeyKind::User, voter_id).await?;
        if !verify(choice, &voter_key, &submission.signature) {
            self.audit
                .record(
                    AuditEntry::new(
                        AuditKind::InvalidSignature,
                        Severity::High,
                        format!("Ballot signature from voter {voter_id} did not verify"),
                    )
                    .election(election_id)
                    .subject(voter_id),
                )
                .await;
            return Err(Error::InvalidSignature);
        }

        if !election.accepts_choice(&submission.choice) {
            return Err(Error::BadRequest(format!(
                "not a choice in election {election_id}"
            )));
        }

        let election_key = self.kms.public_key(KeyKind::Election, election_id).await?;
        let encrypted_choice = EncryptionKey::from_der(&election_key)?.encrypt(choice)?;

        match self
            .ballots
            .cast(
                voter_id,
                Ballot::new(election_id, encrypted_choice),
                election.end_date,
            )
            .await?
        {
            CastOutcome::Recorded => {
                self.audit
                    .record(
                        AuditEntry::new(
                            AuditKind::VoteAccepted,
                            Severity::None,
                            format!("Voter {voter_id} cast a ballot"),
                        )
                        .election(election_id)
                        .subject(voter_id),
                    )
                    .await;
                Ok(())
            }
            // Lost a race with a concurrent submission by the same voter.
            CastOutcome::AlreadyVoted => Err(self.reject_repeat_vote(election_id, voter_id).await),
            CastOutcome::NotEligible => Err(self.reject_ineligible(election_id, voter_id).await),
            CastOutcome::Closed => {
                warn!("Ballot from voter {voter_id} arrived after election {election_id} closed");
                Err(Error::ElectionNotActive(election_id))
            }
        }
    }

    /// Decrypt and count every ballot of a closed election, then store the
    /// counts encrypted at rest.
    ///
    /// A mismatch between ballots and voters who have voted raises the fraud
    /// flag before anything touches the KMS; counting still goes ahead.
    pub async fn count_votes(
        &self,
        election_id: ElectionId,
        tally_key: &[u8],
        manager_id: UserId,
    ) -> Result<TallyReport> {
        let election = self.election(election_id).await?;
        if election.phase(Utc::now()) != ElectionPhase::Closed {
            return Err(Error::BadRequest(format!(
                "election {election_id} has not ended"
            )));
        }

        let snapshot = self.ballots.snapshot(election_id).await?;
        let mismatch = snapshot.ballots.len() as u64 != snapshot.voted;
        if mismatch {
            self.elections.flag_fraud(election_id).await?;
            self.audit
                .record(
                    AuditEntry::new(
                        AuditKind::BallotCountMismatch,
                        Severity::High,
                        format!(
                            "Found {} ballots but {} voters have voted",
                            snapshot.ballots.len(),
                            snapshot.voted
                        ),
                    )
                    .election(election_id),
                )
                .await;
        }

        if let Err(e) = self.require_kms().await {
            warn!("Not counting election {election_id}: {e}");
            return Err(e);
        }
        let sealed = self.kms.private_key(KeyKind::Election, election_id).await?;
        let private_der = match sealed.unseal(tally_key) {
            Ok(der) => der,
            Err(CryptoError::AuthenticationFailed) => {
                self.audit
                    .record(
                        AuditEntry::new(
                            AuditKind::TallyRejected,
                            Severity::High,
                            format!("Manager {manager_id} supplied a wrong tally key"),
                        )
                        .election(election_id)
                        .subject(manager_id),
                    )
                    .await;
                return Err(Error::AuthenticationFailed);
            }
            Err(e) => return Err(e.into()),
        };
        let key = DecryptionKey::from_der(&private_der)?;

        debug!(
            "Decrypting {} ballots for election {election_id}",
            snapshot.ballots.len()
        );
        let counted = election.clone();
        let tally =
            spawn_blocking(move || Tally::count(&counted, &key, &snapshot.ballots)).await?;

        for _ in &tally.discarded {
            self.audit
                .record(
                    AuditEntry::new(
                        AuditKind::MalformedBallot,
                        Severity::Medium,
                        "Discarded a ballot that is not a valid choice",
                    )
                    .election(election_id),
                )
                .await;
        }

        let counts = Zeroizing::new(serde_json::to_vec(&tally.counts)?);
        let results = evote_crypto::seal(&self.secrets.results_key, &counts)?;
        self.elections
            .save_results(election_id, &results, mismatch)
            .await?;

        self.audit
            .record(
                AuditEntry::new(
                    AuditKind::TallyCompleted,
                    Severity::None,
                    format!("Manager {manager_id} counted {} votes", tally.total()),
                )
                .election(election_id)
                .subject(manager_id),
            )
            .await;
        info!("Counted election {election_id}");

        Ok(TallyReport {
            counts: tally.counts,
            discarded: tally.discarded.len(),
            fraud: mismatch || election.fraud,
        })
    }

    /// The stored counts of an election, decrypted.
    pub async fn results(&self, election_id: ElectionId) -> Result<Counts> {
        let election = self.election(election_id).await?;
        let sealed: &SealedData = election.results.as_ref().ok_or_else(|| {
            Error::not_found(format!("Results for election with ID '{election_id}'"))
        })?;
        let plain = sealed.open(&self.secrets.results_key)?;
        let stored: Counts = serde_json::from_slice(&plain)?;

        let mut counts = empty_counts(&election);
        counts.extend(stored);
        Ok(counts)
    }

    /// How many assigned voters have and have not voted.
    pub async fn status(&self, election_id: ElectionId) -> Result<Participation> {
        self.election(election_id).await?;
        self.elections.participation(election_id).await
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use evote_crypto::{generate_asymmetric, hmac, sign, KeyRole, SignatureKey};

    use super::*;
    use crate::audit::memory::MemoryAuditSink;
    use crate::kms::memory::MemoryKms;
    use crate::model::mongodb::Id;
    use crate::store::memory::MemoryStore;

    pub const VOTE_SECRET: &[u8] = b"shared vote secret";
    pub const RESULTS_KEY: [u8; 32] = [7; 32];
    pub const TALLY_KEY: &[u8] = b"correct horse battery staple";
    pub const USER_KEY: &[u8] = b"voter passphrase";

    pub struct Fixture {
        pub store: Arc<MemoryStore>,
        pub kms: Arc<MemoryKms>,
        pub sink: Arc<MemoryAuditSink>,
        pub protocol: BallotProtocol,
        pub election: Election,
    }

    impl Fixture {
        pub async fn new(election: Election) -> Self {
            let store = Arc::new(MemoryStore::default());
            let kms = Arc::new(MemoryKms::default());
            let sink = Arc::new(MemoryAuditSink::default());
            store.insert_election(election.clone());

            let keys = generate_asymmetric(KeyRole::Encryption, TALLY_KEY).unwrap();
            kms.store_keys(KeyKind::Election, election.id, &keys)
                .await
                .unwrap();

            let protocol = BallotProtocol::new(
                store.clone(),
                store.clone(),
                kms.clone(),
                AuditLog::new(sink.clone()),
                ProtocolSecrets::new(VOTE_SECRET, &RESULTS_KEY).unwrap(),
            );
            Self {
                store,
                kms,
                sink,
                protocol,
                election,
            }
        }

        /// Register an eligible voter with signing keys in the KMS.
        pub async fn voter(&self) -> (UserId, SignatureKey) {
            let id = Id::new();
            self.store.assign(id, self.election.id);
            let keys = generate_asymmetric(KeyRole::Signing, USER_KEY).unwrap();
            self.kms.store_keys(KeyKind::User, id, &keys).await.unwrap();
            let key = SignatureKey::from_der(&keys.unseal(USER_KEY).unwrap()).unwrap();
            (id, key)
        }

        pub fn submission(choice: &str, key: &SignatureKey) -> VoteSubmission {
            VoteSubmission {
                choice: choice.to_string(),
                hash: hmac(choice.as_bytes(), VOTE_SECRET),
                signature: sign(choice.as_bytes(), key),
            }
        }

        pub async fn vote(&self, choice: &str) -> Result<UserId> {
            let (voter, key) = self.voter().await;
            self.protocol
                .submit_vote(self.election.id, voter, &Self::submission(choice, &key))
                .await?;
            Ok(voter)
        }

        /// Let voting end, keeping every cast ballot.
        pub fn close(&mut self) {
            let now = Utc::now();
            self.election.start_date = now - chrono::Duration::hours(2);
            self.election.end_date = now - chrono::Duration::minutes(1);
            let mut stored = self.store.stored_election(self.election.id);
            stored.start_date = self.election.start_date;
            stored.end_date = self.election.end_date;
            self.store.insert_election(stored);
        }
    }
}
