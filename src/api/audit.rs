use chrono::{DateTime, Utc};
use log::info;
use rocket::{http::Status, serde::json::Json, Route, State};
use serde::Serialize;

use crate::audit::{AuditEntry, AuditKind, AuditLog, Severity};
use crate::error::Result;
use crate::integrity::IntegrityTask;
use crate::model::{
    auth::{AuthToken, Manager},
    election::ElectionId,
};

pub fn routes() -> Vec<Route> {
    routes![election_log, check_integrity]
}

/// An audit entry as shown to managers.
#[derive(Debug, Serialize)]
pub struct LogEntry {
    pub created_at: DateTime<Utc>,
    /// Hex ID of the user the entry is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub kind: AuditKind,
    pub message: String,
    pub severity: Severity,
}

impl From<AuditEntry> for LogEntry {
    fn from(entry: AuditEntry) -> Self {
        Self {
            created_at: entry.created_at,
            subject: entry.subject.map(|id| id.to_hex()),
            kind: entry.kind,
            message: entry.message,
            severity: entry.severity,
        }
    }
}

#[get("/elections/<election_id>/log")]
async fn election_log(
    _token: AuthToken<Manager>,
    election_id: ElectionId,
    audit: &State<AuditLog>,
) -> Result<Json<Vec<LogEntry>>> {
    let entries = audit.election_trail(election_id).await?;
    Ok(Json(entries.into_iter().map(LogEntry::from).collect()))
}

/// Run the integrity monitor now rather than at its next period.
#[post("/integrity/check")]
async fn check_integrity(token: AuthToken<Manager>, monitor: &State<IntegrityTask>) -> Status {
    info!("Manager {} requested an integrity check", token.id);
    monitor.trigger_now();
    Status::Accepted
}
