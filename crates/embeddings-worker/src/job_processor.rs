//! Generic DB-row embedding jobs (§4.2, §6 `embedding_jobs`).
//!
//! A second, independent path into the same embedding capability: instead of a blob-folder
//! queue message, a row in `embedding_jobs` names `(table_name, row_id)` and this loop claims
//! it, builds a text representation of that row, embeds it, and writes the vector back onto
//! the row itself (not the external vector index -- that's the queue-driven path in
//! `handler.rs`). Runs as a background task alongside the `WorkerRuntime` queue loop.

use std::sync::Arc;
use std::time::Duration;

use pipeline_core::external::Embedder;
use pipeline_core::job_claimer::{safe_ident, JobClaimer};
use sqlx::{Column, PgPool, Row, TypeInfo};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct JobProcessor {
    pub claimer: JobClaimer,
    pub pool: PgPool,
    pub embedder: Arc<dyn Embedder>,
    pub grievance_table: String,
    pub batch_size: i64,
    pub requeue_stuck_after_sec: i64,
    pub requeue_failed_after_sec: i64,
}

impl JobProcessor {
    /// One janitor pass plus one claim-and-process batch, then returns (`--once`).
    pub async fn run_once(&self) {
        match self.claimer.requeue_stuck(self.requeue_stuck_after_sec).await {
            Ok(0) => {}
            Ok(n) => info!(requeued = n, "requeued stuck embedding jobs"),
            Err(err) => warn!(%err, "requeue_stuck failed"),
        }
        match self.claimer.requeue_failed(self.requeue_failed_after_sec).await {
            Ok(0) => {}
            Ok(n) => info!(requeued = n, "requeued failed embedding jobs"),
            Err(err) => warn!(%err, "requeue_failed failed"),
        }

        let claimed = match self.claimer.claim_pending(self.batch_size).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(%err, "claim_pending failed");
                return;
            }
        };
        for job in claimed {
            self.process_one(job.id, &job.table_name, job.row_id).await;
        }
    }

    /// Runs until `shutdown` flips to `true`. Every tick: janitor pass (requeue stuck/failed
    /// rows), then claim and process a batch.
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("embedding-jobs processor starting");
        loop {
            if *shutdown.borrow() {
                info!("embedding-jobs processor shutting down");
                return;
            }

            match self.claimer.requeue_stuck(self.requeue_stuck_after_sec).await {
                Ok(0) => {}
                Ok(n) => info!(requeued = n, "requeued stuck embedding jobs"),
                Err(err) => warn!(%err, "requeue_stuck failed"),
            }
            match self.claimer.requeue_failed(self.requeue_failed_after_sec).await {
                Ok(0) => {}
                Ok(n) => info!(requeued = n, "requeued failed embedding jobs"),
                Err(err) => warn!(%err, "requeue_failed failed"),
            }

            let claimed = match self.claimer.claim_pending(self.batch_size).await {
                Ok(rows) => rows,
                Err(err) => {
                    error!(%err, "claim_pending failed");
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            };

            if claimed.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for job in claimed {
                self.process_one(job.id, &job.table_name, job.row_id).await;
            }
        }
    }

    async fn process_one(&self, job_id: Uuid, table_name: &str, row_id: Uuid) {
        let text = match self.load_text(table_name, row_id).await {
            Ok(Some(text)) if !text.is_empty() => text,
            Ok(Some(_)) | Ok(None) => {
                let _ = self.claimer.mark_failed(job_id, "row not found or had no embeddable text").await;
                return;
            }
            Err(err) => {
                warn!(%job_id, %table_name, %err, "failed to load row for embedding job");
                let _ = self.claimer.mark_failed(job_id, &err.to_string()).await;
                return;
            }
        };

        let embedding = match self.embedder.embed(&text).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(%job_id, %table_name, %err, "embedder failed for job");
                let _ = self.claimer.mark_failed(job_id, &err.to_string()).await;
                return;
            }
        };

        if let Err(err) = self.write_embedding(table_name, row_id, &embedding).await {
            warn!(%job_id, %table_name, %err, "failed to write embedding back to row");
            let _ = self.claimer.mark_failed(job_id, &err.to_string()).await;
            return;
        }

        if let Err(err) = self.claimer.mark_completed(job_id).await {
            error!(%job_id, %err, "failed to mark embedding job completed after a successful write");
        }
    }

    /// Builds the text to embed for one row. The grievance table gets its own field
    /// priority (matching the dedicated QueryAnalyst pipeline); every other table falls
    /// back to concatenating all non-empty text columns.
    async fn load_text(&self, table_name: &str, row_id: Uuid) -> Result<Option<String>, sqlx::Error> {
        let table = safe_ident(table_name).map_err(|e| sqlx::Error::Configuration(e.to_string().into()))?;
        let sql = format!("SELECT * FROM {table} WHERE id = $1");
        let row = match sqlx::query(&sql).bind(row_id).fetch_optional(&self.pool).await? {
            Some(row) => row,
            None => return Ok(None),
        };

        let base_name = table_name.rsplit('.').next().unwrap_or(table_name);
        if base_name == self.grievance_table {
            for column in ["enhanced_query", "grievance_text", "image_description"] {
                if let Ok(Some(value)) = row.try_get::<Option<String>, _>(column) {
                    let trimmed = value.trim();
                    if !trimmed.is_empty() {
                        return Ok(Some(trimmed.to_string()));
                    }
                }
            }
            return Ok(Some(String::new()));
        }

        let mut pieces = Vec::new();
        for column in row.columns() {
            if column.type_info().name() != "TEXT" && column.type_info().name() != "VARCHAR" {
                continue;
            }
            if let Ok(Some(value)) = row.try_get::<Option<String>, _>(column.ordinal()) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    pieces.push(trimmed.to_string());
                }
            }
        }
        Ok(Some(pieces.join(" ")))
    }

    async fn write_embedding(&self, table_name: &str, row_id: Uuid, embedding: &[f32]) -> Result<(), sqlx::Error> {
        let table = safe_ident(table_name).map_err(|e| sqlx::Error::Configuration(e.to_string().into()))?;
        let sql = format!("UPDATE {table} SET embedding = $1::vector WHERE id = $2");
        sqlx::query(&sql).bind(pgvector::Vector::from(embedding.to_vec())).bind(row_id).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grievance_table_priority_is_enhanced_query_first() {
        // Documented via `load_text`'s column order; exercised at the integration level
        // since it needs a live row. This test just locks in the constant ordering.
        let priority = ["enhanced_query", "grievance_text", "image_description"];
        assert_eq!(priority[0], "enhanced_query");
    }
}
