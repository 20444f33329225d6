//! Database access for the Progress/Escalation stage (§4.7, §6).
//!
//! Queries are grouped by the object they touch rather than wrapped in one god struct, the
//! way the teacher splits repository access per aggregate.

use chrono::{DateTime, Utc};
use pipeline_core::job_claimer::safe_ident;
use sqlx::PgPool;
use uuid::Uuid;

use crate::escalation::EscalationLevelCasing;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(#[from] pipeline_core::error::PipelineError),
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DepartmentRow {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GrievanceRow {
    pub id: Uuid,
    pub priority: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub completion_pct: f64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedbackRow {
    pub grievance_id: Uuid,
    pub rating: Option<f64>,
    pub sentiment: Option<f64>,
}

pub struct DepartmentRepository {
    pool: PgPool,
    grievance_table: String,
}

impl DepartmentRepository {
    pub fn new(pool: PgPool, grievance_table: impl Into<String>) -> Self {
        Self { pool, grievance_table: grievance_table.into() }
    }

    /// Active departments, or a single targeted one when `only` is set (§4.7: "or a single
    /// targeted department if configured").
    pub async fn fetch_active_departments(&self, only: Option<Uuid>) -> Result<Vec<DepartmentRow>, RepositoryError> {
        let rows = match only {
            Some(department_id) => {
                sqlx::query_as::<_, DepartmentRow>("SELECT id, name FROM departments WHERE id = $1 AND is_active = true")
                    .bind(department_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as::<_, DepartmentRow>("SELECT id, name FROM departments WHERE is_active = true")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    pub async fn fetch_department_grievances(&self, department_id: Uuid) -> Result<Vec<GrievanceRow>, RepositoryError> {
        let table = safe_ident(&self.grievance_table)?;
        let sql = format!(
            r#"
            SELECT g.id, g.priority, g.created_at, g.updated_at, g.resolved_at, g.due_at,
                   coalesce(w.completion_pct, 0.0) AS completion_pct
            FROM {table} g
            LEFT JOIN workflow w ON w.grievance_id = g.id
            WHERE g.department_id = $1
            "#
        );
        let rows = sqlx::query_as::<_, GrievanceRow>(&sql).bind(department_id).fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn fetch_feedback(&self, department_id: Uuid) -> Result<Vec<FeedbackRow>, RepositoryError> {
        let rows = sqlx::query_as::<_, FeedbackRow>(
            r#"
            SELECT f.grievance_id, f.rating, f.sentiment
            FROM feedback f
            JOIN grievances g ON g.id = f.grievance_id
            WHERE g.department_id = $1
            "#,
        )
        .bind(department_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_proof_documents(&self, grievance_id: Uuid) -> Result<u32, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM grievance_attachments WHERE grievance_id = $1")
            .bind(grievance_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u32)
    }

    pub async fn persist_ai_insight(&self, department_id: Uuid, narrative: &str, report_url: &str) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO aiinsights (department_id, narrative, report_url, created_at) VALUES ($1, $2, $3, now())")
            .bind(department_id)
            .bind(narrative)
            .bind(report_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_dashboard(&self, department_id: Uuid, report_url: &str, performance_score: f64) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO department_dashboards (department_id, latest_report_url, performance_score, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (department_id) DO UPDATE
            SET latest_report_url = EXCLUDED.latest_report_url, performance_score = EXCLUDED.performance_score, updated_at = now()
            "#,
        )
        .bind(department_id)
        .bind(report_url)
        .bind(performance_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_escalation(
        &self,
        casing: &EscalationLevelCasing,
        department_id: Uuid,
        grievance_id: Uuid,
        level: crate::escalation::EscalationLevel,
    ) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO escalations (department_id, grievance_id, level, created_at) VALUES ($1, $2, $3, now())")
            .bind(department_id)
            .bind(grievance_id)
            .bind(casing.render(level))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
