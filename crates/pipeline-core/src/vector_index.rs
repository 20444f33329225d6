//! Vector index abstraction over the `pgvector`-backed embeddings table.
//!
//! Both the Embeddings stage (writing chunks) and the QueryAnalyst/Research stages (reading
//! nearest neighbors) go through this trait so the `<=>` distance operator and id
//! sanitization convention live in exactly one place.

use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum VectorIndexError {
    #[error("database error: {0}")]
    #[cfg(feature = "database")]
    Database(#[from] sqlx::Error),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// `<job_id>_<file_name>_<chunk_index>` with path separators and dots folded to `_` so the
/// id is safe to use as a single index key regardless of the source file's original name.
pub fn sanitize_vector_id(job_id: Uuid, file_name: &str, chunk_index: usize) -> String {
    let sanitized_file_name = file_name.replace(['/', '.'], "_");
    format!("{job_id}_{sanitized_file_name}_{chunk_index}")
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub content: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub distance: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorIndexError>;

    async fn nearest(&self, embedding: &[f32], limit: i64) -> Result<Vec<VectorMatch>, VectorIndexError>;

    async fn delete_by_prefix(&self, id_prefix: &str) -> Result<u64, VectorIndexError>;
}

#[cfg(feature = "database")]
pub struct PgVectorIndex {
    pool: sqlx::PgPool,
    table: String,
}

#[cfg(feature = "database")]
impl PgVectorIndex {
    pub fn new(pool: sqlx::PgPool, table: impl Into<String>) -> Self {
        Self { pool, table: table.into() }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorIndexError> {
        let sql = format!(
            r#"
            INSERT INTO {table} (id, embedding, content, metadata)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET embedding = EXCLUDED.embedding, content = EXCLUDED.content, metadata = EXCLUDED.metadata
            "#,
            table = self.table
        );
        for record in records {
            let vector = pgvector::Vector::from(record.embedding);
            sqlx::query(&sql)
                .bind(&record.id)
                .bind(vector)
                .bind(&record.content)
                .bind(&record.metadata)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn nearest(&self, embedding: &[f32], limit: i64) -> Result<Vec<VectorMatch>, VectorIndexError> {
        let vector = pgvector::Vector::from(embedding.to_vec());
        let sql = format!(
            r#"
            SELECT id, content, metadata, embedding <=> $1 AS distance
            FROM {table}
            ORDER BY embedding <=> $1
            LIMIT $2
            "#,
            table = self.table
        );
        let rows: Vec<(String, String, serde_json::Value, f64)> =
            sqlx::query_as(&sql).bind(vector).bind(limit).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(id, content, metadata, distance)| VectorMatch { id, content, metadata, distance })
            .collect())
    }

    async fn delete_by_prefix(&self, id_prefix: &str) -> Result<u64, VectorIndexError> {
        let sql = format!("DELETE FROM {table} WHERE id LIKE $1", table = self.table);
        let result = sqlx::query(&sql).bind(format!("{id_prefix}%")).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

/// In-memory index for handler unit tests: exact cosine distance over a small `Vec`, no
/// approximate-nearest-neighbor behavior, since tests only ever hold a handful of records.
pub struct InMemoryVectorIndex {
    records: tokio::sync::Mutex<Vec<VectorRecord>>,
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self { records: tokio::sync::Mutex::new(Vec::new()) }
    }
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b)) as f64
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorIndexError> {
        let mut guard = self.records.lock().await;
        for record in records {
            guard.retain(|r| r.id != record.id);
            guard.push(record);
        }
        Ok(())
    }

    async fn nearest(&self, embedding: &[f32], limit: i64) -> Result<Vec<VectorMatch>, VectorIndexError> {
        let guard = self.records.lock().await;
        let mut matches: Vec<VectorMatch> = guard
            .iter()
            .map(|r| VectorMatch {
                id: r.id.clone(),
                content: r.content.clone(),
                metadata: r.metadata.clone(),
                distance: cosine_distance(embedding, &r.embedding),
            })
            .collect();
        matches.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }

    async fn delete_by_prefix(&self, id_prefix: &str) -> Result<u64, VectorIndexError> {
        let mut guard = self.records.lock().await;
        let before = guard.len();
        guard.retain(|r| !r.id.starts_with(id_prefix));
        Ok((before - guard.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_slashes_and_dots() {
        let job_id = Uuid::nil();
        let id = sanitize_vector_id(job_id, "folder/sub.page.html", 3);
        assert!(!id.contains('/'));
        assert!(!id.contains('.'));
        assert!(id.ends_with("_3"));
    }

    #[tokio::test]
    async fn in_memory_nearest_orders_by_distance() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(vec![
                VectorRecord { id: "a".into(), embedding: vec![1.0, 0.0], content: "a".into(), metadata: serde_json::json!({}) },
                VectorRecord { id: "b".into(), embedding: vec![0.0, 1.0], content: "b".into(), metadata: serde_json::json!({}) },
            ])
            .await
            .unwrap();

        let matches = index.nearest(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(matches[0].id, "a");
        assert!(matches[0].distance < matches[1].distance);
    }

    #[tokio::test]
    async fn delete_by_prefix_removes_matching_records() {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(vec![
                VectorRecord { id: "job1_a_0".into(), embedding: vec![1.0], content: "x".into(), metadata: serde_json::json!({}) },
                VectorRecord { id: "job2_b_0".into(), embedding: vec![1.0], content: "y".into(), metadata: serde_json::json!({}) },
            ])
            .await
            .unwrap();

        let deleted = index.delete_by_prefix("job1_").await.unwrap();
        assert_eq!(deleted, 1);
    }
}
