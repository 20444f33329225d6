//! Transactional row-claiming protocol for DB-backed job tables.
//!
//! Several stages (the generic embedding-jobs table, the pattern-grievance link table)
//! don't go through a true queue; they share a job table with many workers. The claim is
//! a single statement: select `pending` rows ordered by `created_at`, lock them with
//! `SKIP LOCKED`, flip them to `processing`, and return the claimed rows -- two workers
//! racing never end up with the same row.

use uuid::Uuid;

use crate::error::PipelineError;
use crate::job::{truncate_error, JobStatus};

#[cfg(feature = "database")]
use sqlx::PgPool;

/// Table/column identifiers come from configuration (env vars), not request input, but we
/// still refuse to interpolate anything that doesn't look like an identifier.
pub fn safe_ident(name: &str) -> Result<&str, PipelineError> {
    let valid = !name.is_empty()
        && name.chars().next().map(|c| c.is_ascii_alphabetic() || c == '_').unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(name)
    } else {
        Err(PipelineError::UnsafeIdentifier(name.to_string()))
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
#[cfg(feature = "database")]
pub struct ClaimedJobRow {
    pub id: Uuid,
    pub table_name: String,
    pub row_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
}

#[cfg(feature = "database")]
pub struct JobClaimer {
    pool: PgPool,
    job_table: String,
}

#[cfg(feature = "database")]
impl JobClaimer {
    pub fn new(pool: PgPool, job_table: impl Into<String>) -> Self {
        Self { pool, job_table: job_table.into() }
    }

    /// Atomically claim up to `limit` pending rows, oldest first. `SKIP LOCKED` means the
    /// `created_at` ordering is advisory -- concurrent claimers interleave freely.
    pub async fn claim_pending(&self, limit: i64) -> Result<Vec<ClaimedJobRow>, PipelineError> {
        let table = safe_ident(&self.job_table)?;
        let sql = format!(
            r#"
            WITH cte AS (
                SELECT id
                FROM {table}
                WHERE status = 'pending'
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE {table} t
            SET status = 'processing', last_attempt_at = now(), updated_at = now()
            FROM cte
            WHERE t.id = cte.id
            RETURNING t.id, t.table_name, t.row_id, t.status
            "#
        );
        let rows = sqlx::query_as::<_, ClaimedJobRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn mark_completed(&self, job_id: Uuid) -> Result<(), PipelineError> {
        let table = safe_ident(&self.job_table)?;
        let sql = format!(
            "UPDATE {table} SET status = 'completed', updated_at = now() WHERE id = $1"
        );
        sqlx::query(&sql).bind(job_id).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), PipelineError> {
        let table = safe_ident(&self.job_table)?;
        let sql = format!(
            r#"
            UPDATE {table}
            SET status = 'failed',
                error = $2,
                updated_at = now()
            WHERE id = $1
            "#
        );
        sqlx::query(&sql)
            .bind(job_id)
            .bind(truncate_error(error))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Lock-free janitor pass: move rows stuck in `processing` back to `pending`, and rows
    /// that have been `failed` for longer than the (longer) failed-retry window back to
    /// `pending` too. Intentionally idempotent -- safe to call at the start of every
    /// worker's loop.
    pub async fn requeue_stuck(&self, stuck_after_sec: i64) -> Result<u64, PipelineError> {
        let table = safe_ident(&self.job_table)?;
        let sql = format!(
            r#"
            UPDATE {table}
            SET status = 'pending', updated_at = now()
            WHERE status = 'processing'
              AND last_attempt_at < now() - ($1 || ' seconds')::interval
            "#
        );
        let result = sqlx::query(&sql).bind(stuck_after_sec.to_string()).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn requeue_failed(&self, failed_after_sec: i64) -> Result<u64, PipelineError> {
        let table = safe_ident(&self.job_table)?;
        let sql = format!(
            r#"
            UPDATE {table}
            SET status = 'pending', updated_at = now()
            WHERE status = 'failed'
              AND updated_at < now() - ($1 || ' seconds')::interval
            "#
        );
        let result = sqlx::query(&sql).bind(failed_after_sec.to_string()).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsafe_identifiers() {
        assert!(safe_ident("public.embedding_jobs").is_ok());
        assert!(safe_ident("embedding_jobs; DROP TABLE x;--").is_err());
        assert!(safe_ident("").is_err());
    }
}
