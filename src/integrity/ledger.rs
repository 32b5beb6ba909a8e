use std::path::Path;

use chrono::{DateTime, Utc};
use rocket::tokio::fs;
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    ConnectOptions, FromRow, SqlitePool,
};

use crate::error::Result;
use crate::model::election::ElectionId;

/// Statements run on every open. Updates and deletes are refused by the
/// database itself, so the ledger can only grow.
const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        election_id TEXT NOT NULL,
        hash TEXT NOT NULL,
        taken_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS snapshots_by_election ON snapshots (election_id)",
    r#"
    CREATE TRIGGER IF NOT EXISTS snapshots_no_update BEFORE UPDATE ON snapshots
    BEGIN
        SELECT RAISE(ABORT, 'integrity snapshots are append-only');
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS snapshots_no_delete BEFORE DELETE ON snapshots
    BEGIN
        SELECT RAISE(ABORT, 'integrity snapshots are append-only');
    END
    "#,
];

/// The hash of an election's ballots at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IntegritySnapshot {
    /// Hex object ID.
    pub election_id: String,
    pub hash: String,
    pub taken_at: DateTime<Utc>,
}

impl IntegritySnapshot {
    pub fn new(election_id: ElectionId, hash: String, taken_at: DateTime<Utc>) -> Self {
        Self {
            election_id: election_id.to_hex(),
            hash,
            taken_at,
        }
    }
}

/// Append-only history of snapshots, kept apart from the main database.
#[rocket::async_trait]
pub trait IntegrityLedger: Send + Sync {
    async fn last_hash(&self, election_id: ElectionId) -> Result<Option<String>>;

    async fn append(&self, snapshot: &IntegritySnapshot) -> Result<()>;
}

/// A local SQLite database of [`IntegritySnapshot`]s.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open the ledger at `path`, creating it and its directory if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        // Every append must be on disk before the monitor moves on.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .disable_statement_logging();
        // Only the monitor writes, one election at a time.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Every snapshot of an election, oldest first.
    pub async fn history(&self, election_id: ElectionId) -> Result<Vec<IntegritySnapshot>> {
        let snapshots = sqlx::query_as(
            r#"
            SELECT election_id, hash, taken_at
            FROM snapshots
            WHERE election_id = ?
            ORDER BY id
            "#,
        )
        .bind(election_id.to_hex())
        .fetch_all(&self.pool)
        .await?;
        Ok(snapshots)
    }
}

#[rocket::async_trait]
impl IntegrityLedger for SqliteLedger {
    async fn last_hash(&self, election_id: ElectionId) -> Result<Option<String>> {
        let hash = sqlx::query_scalar(
            r#"
            SELECT hash
            FROM snapshots
            WHERE election_id = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(election_id.to_hex())
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    async fn append(&self, snapshot: &IntegritySnapshot) -> Result<()> {
        sqlx::query("INSERT INTO snapshots (election_id, hash, taken_at) VALUES (?1, ?2, ?3)")
            .bind(&snapshot.election_id)
            .bind(&snapshot.hash)
            .bind(snapshot.taken_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
