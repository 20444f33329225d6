//! The job state machine shared across every DB-backed job table.
//!
//! `pending -> processing -> completed | failed -> pending`. A job leaves `pending` only
//! via an atomic claim that sets `processing` in the same statement (see
//! [`crate::job_claimer`]); it leaves `processing` only to `completed`/`failed` by the
//! worker that claimed it, except for the janitor moving stuck rows back to `pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload_ref::PayloadRef;

/// Bound on the persisted error string -- keeps the job table from growing unbounded on
/// a handler that panics with a giant backtrace-style message.
pub const MAX_ERROR_LEN: usize = 2000;

pub fn truncate_error(err: &str) -> String {
    if err.len() <= MAX_ERROR_LEN {
        err.to_string()
    } else {
        let mut truncated = err.chars().take(MAX_ERROR_LEN).collect::<String>();
        truncated.push_str("...(truncated)");
        truncated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "text", rename_all = "lowercase"))]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A unit of work claimed by exactly one worker at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload_ref: PayloadRef,
    pub status: JobStatus,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(payload_ref: PayloadRef) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload_ref,
            status: JobStatus::Pending,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            last_attempt_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_errors() {
        let long = "x".repeat(MAX_ERROR_LEN + 500);
        let truncated = truncate_error(&long);
        assert!(truncated.len() <= MAX_ERROR_LEN + "...(truncated)".len());
        assert!(truncated.ends_with("...(truncated)"));
    }

    #[test]
    fn short_errors_pass_through() {
        assert_eq!(truncate_error("boom"), "boom");
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed, JobStatus::Failed] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
