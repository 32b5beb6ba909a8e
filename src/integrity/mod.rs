//! Detection of ballot-box tampering after voting closes.
//!
//! Once an election ends its ballots must never change. The monitor hashes
//! them on every run and compares against the previous hash in a ledger
//! that lives outside the main database.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::time::Duration as StdDuration,
    Build, Orbit, Rocket,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::audit::{AuditEntry, AuditKind, AuditLog, Severity};
use crate::config::AppStore;
use crate::error::Result;
use crate::model::{
    ballot::Ballot,
    election::{Election, ElectionId},
};
use crate::periodic_task::PeriodicTask;
use crate::store::{BallotBox, ElectionStore};

mod ledger;

pub use ledger::{IntegrityLedger, IntegritySnapshot, SqliteLedger};

/// Deterministic hash of a set of ballots, independent of storage order.
pub fn ballot_set_hash(ballots: &[Ballot]) -> String {
    let mut sorted: Vec<&Ballot> = ballots.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut hasher = Sha256::new();
    for ballot in sorted {
        hasher.update((ballot.id.len() as u64).to_be_bytes());
        hasher.update(ballot.id.as_bytes());
        hasher.update((ballot.encrypted_choice.len() as u64).to_be_bytes());
        hasher.update(&ballot.encrypted_choice);
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// First snapshot of this election.
    Baseline,
    Unchanged,
    /// The ballots differ from the last snapshot.
    Tampered { previous: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub election_id: ElectionId,
    pub hash: String,
    pub status: IntegrityStatus,
}

pub struct IntegrityMonitor {
    elections: Arc<dyn ElectionStore>,
    ballots: Arc<dyn BallotBox>,
    ledger: Arc<dyn IntegrityLedger>,
    audit: AuditLog,
    window: Duration,
}

impl IntegrityMonitor {
    /// Watch elections for `window` after they end.
    pub fn new(
        elections: Arc<dyn ElectionStore>,
        ballots: Arc<dyn BallotBox>,
        ledger: Arc<dyn IntegrityLedger>,
        audit: AuditLog,
        window: Duration,
    ) -> Self {
        Self {
            elections,
            ballots,
            ledger,
            audit,
            window,
        }
    }

    /// Hash one election's ballots, compare with the last snapshot, and
    /// append a new one. A mismatch is flagged before the snapshot is written,
    /// so a crash in between is caught again on the next run.
    pub async fn check_election(
        &self,
        election: &Election,
        now: DateTime<Utc>,
    ) -> Result<IntegrityReport> {
        let ballots = self.ballots.ballots(election.id).await?;
        let hash = ballot_set_hash(&ballots);

        let status = match self.ledger.last_hash(election.id).await? {
            None => IntegrityStatus::Baseline,
            Some(previous) if previous == hash => IntegrityStatus::Unchanged,
            Some(previous) => IntegrityStatus::Tampered { previous },
        };

        if let IntegrityStatus::Tampered { ref previous } = status {
            self.audit
                .record(
                    AuditEntry::new(
                        AuditKind::IntegrityMismatch,
                        Severity::High,
                        format!(
                            "Ballots changed after voting closed: hash was {previous}, now {hash}"
                        ),
                    )
                    .election(election.id),
                )
                .await;
            self.elections.flag_fraud(election.id).await?;
        }

        self.ledger
            .append(&IntegritySnapshot::new(election.id, hash.clone(), now))
            .await?;

        Ok(IntegrityReport {
            election_id: election.id,
            hash,
            status,
        })
    }

    /// Check every election that ended within the window before `now`.
    /// One election failing does not stop the others.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Vec<IntegrityReport>> {
        let elections = self
            .elections
            .elections_ended_between(now - self.window, now)
            .await?;
        debug!("Integrity check of {} closed elections", elections.len());

        let mut reports = Vec::with_capacity(elections.len());
        for election in &elections {
            match self.check_election(election, now).await {
                Ok(report) => reports.push(report),
                Err(e) => error!("Integrity check of election {} failed: {e}", election.id),
            }
        }
        Ok(reports)
    }
}

/// Configuration for the integrity monitor.
#[derive(Deserialize)]
struct IntegrityConfig {
    integrity_ledger: String,
    #[serde(default = "default_interval")]
    integrity_interval: u64,
    #[serde(default = "default_window")]
    integrity_window: i64,
}

fn default_interval() -> u64 {
    60
}

fn default_window() -> i64 {
    24 * 60 * 60
}

/// Handle on the running monitor.
pub struct IntegrityTask(pub(crate) PeriodicTask);

impl IntegrityTask {
    /// Check every recently closed election now.
    pub fn trigger_now(&self) {
        self.0.trigger_now();
    }
}

/// A fairing that opens the integrity ledger and starts the monitor.
/// Depends on the store and audit log being in managed state, so must be
/// attached after the fairings providing them.
pub struct IntegrityFairing;

#[rocket::async_trait]
impl Fairing for IntegrityFairing {
    fn info(&self) -> Info {
        Info {
            name: "Integrity monitor",
            kind: Kind::Ignite | Kind::Shutdown,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<IntegrityConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load integrity monitor config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let ledger = match SqliteLedger::open(&config.integrity_ledger).await {
            Ok(ledger) => ledger,
            Err(e) => {
                error!("Failed to open integrity ledger {}: {e}", config.integrity_ledger);
                return Err(rocket);
            }
        };
        let (Some(store), Some(audit)) = (rocket.state::<AppStore>(), rocket.state::<AuditLog>())
        else {
            error!("Database was not available when starting the integrity monitor");
            return Err(rocket);
        };

        let store = Arc::new(store.clone());
        let monitor = Arc::new(IntegrityMonitor::new(
            store.clone(),
            store,
            Arc::new(ledger),
            audit.clone(),
            Duration::seconds(config.integrity_window),
        ));
        let task = PeriodicTask::spawn(StdDuration::from_secs(config.integrity_interval), move || {
            let monitor = monitor.clone();
            async move {
                if let Err(e) = monitor.run_once(Utc::now()).await {
                    error!("Integrity monitor run failed: {e}");
                }
            }
        });
        info!(
            "Integrity monitor running every {}s, ledger at {}",
            config.integrity_interval, config.integrity_ledger
        );

        rocket = rocket.manage(IntegrityTask(task));
        Ok(rocket)
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        if let Some(task) = rocket.state::<IntegrityTask>() {
            task.0.cancel();
            info!("Integrity monitor stopped");
        }
    }
}
