//! Access to the pattern table and the grievance/pattern mapping table (§4.6).
//!
//! Reads and writes here are deliberately narrow: this stage only ever touches the
//! grievance row's `embedding`/`metadata` columns, the pattern table, and the mapping
//! table -- it never re-derives anything QueryAnalyst already computed.

use pipeline_core::job_claimer::safe_ident;
use sqlx::PgPool;
use uuid::Uuid;

use crate::research::ResearchReport;

#[derive(Debug, thiserror::Error)]
pub enum PatternStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(#[from] pipeline_core::error::PipelineError),
}

#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern_id: Uuid,
    pub similarity: f64,
    pub research_report: serde_json::Value,
    pub research_sources: serde_json::Value,
}

pub struct PatternStore {
    pool: PgPool,
    grievance_table: String,
}

impl PatternStore {
    pub fn new(pool: PgPool, grievance_table: impl Into<String>) -> Self {
        Self { pool, grievance_table: grievance_table.into() }
    }

    /// `None` means the grievance hasn't been through QueryAnalyst yet (embedding column
    /// still null); the caller should skip this notification rather than treat it as an
    /// error, since NOTIFY fires on insert, before QueryAnalyst has run.
    pub async fn fetch_grievance_embedding(&self, grievance_id: Uuid) -> Result<Option<Vec<f32>>, PatternStoreError> {
        let table = safe_ident(&self.grievance_table)?;
        let sql = format!("SELECT embedding FROM {table} WHERE id = $1");
        let row: Option<(Option<pgvector::Vector>,)> = sqlx::query_as(&sql).bind(grievance_id).fetch_optional(&self.pool).await?;
        Ok(row.and_then(|(v,)| v).map(|v| v.to_vec()))
    }

    /// Nearest pattern by cosine similarity (`1 - cosine_distance`); `None` if the pattern
    /// table is empty.
    pub async fn nearest_pattern(&self, embedding: &[f32]) -> Result<Option<PatternMatch>, PatternStoreError> {
        let vector = pgvector::Vector::from(embedding.to_vec());
        let row: Option<(Uuid, f64, serde_json::Value, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT pattern_id, 1 - (pattern_embedding <=> $1) AS similarity, research_report, research_sources
            FROM grievance_patterns
            ORDER BY pattern_embedding <=> $1
            LIMIT 1
            "#,
        )
        .bind(vector)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(pattern_id, similarity, research_report, research_sources)| PatternMatch {
            pattern_id,
            similarity,
            research_report,
            research_sources,
        }))
    }

    /// Idempotent upsert: re-linking the same grievance to the same pattern with a new
    /// similarity just updates the observed value, it never duplicates the row.
    pub async fn link_grievance_to_pattern(&self, grievance_id: Uuid, pattern_id: Uuid, similarity: f64) -> Result<(), PatternStoreError> {
        sqlx::query(
            r#"
            INSERT INTO grievance_pattern_map (grievance_id, pattern_id, similarity)
            VALUES ($1, $2, $3)
            ON CONFLICT (grievance_id, pattern_id) DO UPDATE SET similarity = EXCLUDED.similarity
            "#,
        )
        .bind(grievance_id)
        .bind(pattern_id)
        .bind(similarity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn write_cached_research_to_metadata(&self, grievance_id: Uuid, report: &serde_json::Value, sources: &serde_json::Value) -> Result<(), PatternStoreError> {
        let table = safe_ident(&self.grievance_table)?;
        let sql = format!(
            r#"UPDATE {table} SET metadata = coalesce(metadata, '{{}}'::jsonb) || jsonb_build_object('research_report', $2::jsonb, 'research_sources', $3::jsonb) WHERE id = $1"#
        );
        sqlx::query(&sql).bind(grievance_id).bind(report).bind(sources).execute(&self.pool).await?;
        Ok(())
    }

    /// Creates a new pattern row; on a unique-index race (two workers miss on
    /// near-identical embeddings concurrently) the losing writer's insert is discarded and
    /// it refetches the winner's row instead (§5, pattern-table shared-resource note).
    pub async fn create_or_fetch_pattern(
        &self,
        embedding: &[f32],
        category: &str,
        location: &str,
        report: &ResearchReport,
    ) -> Result<PatternMatch, PatternStoreError> {
        let vector = pgvector::Vector::from(embedding.to_vec());
        let name = format!("{category}-{location}").to_lowercase().replace(' ', "-");
        let report_json = serde_json::json!({ "summary": report.summary });
        let sources_json = serde_json::json!(report.sources);

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO grievance_patterns (pattern_name, pattern_embedding, research_report, research_sources, grievance_count, keywords)
            VALUES ($1, $2, $3, $4, 1, $5)
            ON CONFLICT (pattern_name) DO NOTHING
            RETURNING pattern_id
            "#,
        )
        .bind(&name)
        .bind(vector)
        .bind(&report_json)
        .bind(&sources_json)
        .bind(&[category.to_string()])
        .fetch_optional(&self.pool)
        .await?;

        if let Some((pattern_id,)) = inserted {
            return Ok(PatternMatch { pattern_id, similarity: 1.0, research_report: report_json, research_sources: sources_json });
        }

        let existing: (Uuid, serde_json::Value, serde_json::Value) =
            sqlx::query_as("SELECT pattern_id, research_report, research_sources FROM grievance_patterns WHERE pattern_name = $1")
                .bind(&name)
                .fetch_one(&self.pool)
                .await?;
        Ok(PatternMatch { pattern_id: existing.0, similarity: 1.0, research_report: existing.1, research_sources: existing.2 })
    }
}
