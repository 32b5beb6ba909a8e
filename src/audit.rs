//! Append-only security event log.
//!
//! Every protocol decision lands here, mirrored into the application log at a
//! level matching its severity. Entries never reveal a ballot's content or
//! link a voter to a ballot.

use std::{fmt::Display, sync::Arc};

use chrono::{DateTime, Utc};
use log::{error, log, warn, Level};
use mongodb::{
    bson::doc, bson::serde_helpers::chrono_datetime_as_bson_datetime, options::FindOptions,
    Database,
};
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    election::ElectionId,
    mongodb::{Coll, Id},
};

/// How serious an audit event is. Ordered from least to most serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    /// Severity of the `n`th repeated offence, counting from zero.
    pub fn escalating(previous_offences: u64) -> Self {
        match previous_offences {
            0 => Self::Low,
            1 => Self::Medium,
            _ => Self::High,
        }
    }

    pub fn level(self) -> Level {
        match self {
            Self::None | Self::Low => Level::Info,
            Self::Medium => Level::Warn,
            Self::High => Level::Error,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        };
        write!(f, "{name}")
    }
}

/// What happened. Used to find earlier events of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    VoteAccepted,
    NotEligible,
    AlreadyVoted,
    TamperedContent,
    InvalidSignature,
    BallotCountMismatch,
    MalformedBallot,
    TallyCompleted,
    TallyRejected,
    IntegrityMismatch,
    KeysProvisioned,
    KeysRotated,
    KeysDestroyed,
    SignatureIssued,
    SignatureRejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub election_id: Option<ElectionId>,
    /// The user the event is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Id>,
    pub kind: AuditKind,
    pub message: String,
    pub severity: Severity,
}

impl AuditEntry {
    pub fn new(kind: AuditKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            created_at: Utc::now(),
            election_id: None,
            subject: None,
            kind,
            message: message.into(),
            severity,
        }
    }

    pub fn election(mut self, election_id: ElectionId) -> Self {
        self.election_id = Some(election_id);
        self
    }

    pub fn subject(mut self, subject: Id) -> Self {
        self.subject = Some(subject);
        self
    }
}

/// Durable storage for audit entries.
#[rocket::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<()>;

    /// Number of stored entries of `kind` about `subject` in this election.
    async fn count_matching(
        &self,
        election_id: ElectionId,
        subject: Id,
        kind: AuditKind,
    ) -> Result<u64>;

    /// Every entry about this election, oldest first.
    async fn for_election(&self, election_id: ElectionId) -> Result<Vec<AuditEntry>>;
}

/// Audit entries stored in the `audit_log` collection.
pub struct MongoAuditSink {
    entries: Coll<AuditEntry>,
}

impl MongoAuditSink {
    pub fn new(db: &Database) -> Self {
        Self {
            entries: Coll::from_db(db),
        }
    }
}

#[rocket::async_trait]
impl AuditSink for MongoAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        self.entries.insert_one(entry, None).await?;
        Ok(())
    }

    async fn count_matching(
        &self,
        election_id: ElectionId,
        subject: Id,
        kind: AuditKind,
    ) -> Result<u64> {
        let kind = mongodb::bson::to_bson(&kind).map_err(mongodb::error::Error::from)?;
        let filter = doc! {
            "election_id": election_id,
            "subject": subject,
            "kind": kind,
        };
        Ok(self.entries.count_documents(filter, None).await?)
    }

    async fn for_election(&self, election_id: ElectionId) -> Result<Vec<AuditEntry>> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": 1 })
            .build();
        let entries = self
            .entries
            .find(doc! { "election_id": election_id }, options)
            .await?;
        Ok(entries.try_collect().await?)
    }
}

/// Handle used by the rest of the application to record security events.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Log and persist an entry.
    ///
    /// A failure to persist is itself logged, but never fails the caller:
    /// the decision being audited has already been made.
    pub async fn record(&self, entry: AuditEntry) {
        log!(
            target: "audit",
            entry.severity.level(),
            "[{}] {:?}: {}",
            entry.severity,
            entry.kind,
            entry.message
        );
        if let Err(e) = self.sink.record(&entry).await {
            error!("Failed to persist audit entry ({:?}): {e}", entry.kind);
        }
    }

    /// How many times `subject` has already triggered `kind` in this election.
    pub async fn previous_offences(
        &self,
        election_id: ElectionId,
        subject: Id,
        kind: AuditKind,
    ) -> u64 {
        match self.sink.count_matching(election_id, subject, kind).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Could not count earlier {kind:?} events, assuming none: {e}");
                0
            }
        }
    }

    /// The audit trail of an election, oldest first.
    pub async fn election_trail(&self, election_id: ElectionId) -> Result<Vec<AuditEntry>> {
        self.sink.for_election(election_id).await
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::sync::Mutex;

    use super::*;

    /// Audit sink that keeps everything in memory, for inspection by tests.
    #[derive(Default)]
    pub struct MemoryAuditSink {
        entries: Mutex<Vec<AuditEntry>>,
    }

    impl MemoryAuditSink {
        pub fn entries(&self) -> Vec<AuditEntry> {
            self.entries.lock().unwrap().clone()
        }

        pub fn of_kind(&self, kind: AuditKind) -> Vec<AuditEntry> {
            self.entries()
                .into_iter()
                .filter(|entry| entry.kind == kind)
                .collect()
        }
    }

    #[rocket::async_trait]
    impl AuditSink for MemoryAuditSink {
        async fn record(&self, entry: &AuditEntry) -> Result<()> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn count_matching(
            &self,
            election_id: ElectionId,
            subject: Id,
            kind: AuditKind,
        ) -> Result<u64> {
            let count = self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|entry| {
                    entry.election_id == Some(election_id)
                        && entry.subject == Some(subject)
                        && entry.kind == kind
                })
                .count();
            Ok(count as u64)
        }

        async fn for_election(&self, election_id: ElectionId) -> Result<Vec<AuditEntry>> {
            let mut entries: Vec<_> = self
                .entries()
                .into_iter()
                .filter(|entry| entry.election_id == Some(election_id))
                .collect();
            entries.sort_by_key(|entry| entry.created_at);
            Ok(entries)
        }
    }
}
