//! Durable queue abstraction.
//!
//! `PgQueue` backs every logical queue (`grievances`, `webcrawler`, `embeddings`, ...) with
//! one Postgres table, claimed with `FOR UPDATE SKIP LOCKED` the same way the job claimer
//! claims job rows -- a leased message is invisible to other receivers until its
//! `visible_at` elapses or the worker deletes it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::envelope::Envelope;
use crate::message::QueueMessage;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    #[cfg(feature = "database")]
    Database(#[from] sqlx::Error),
}

/// One leased message: an opaque handle for ack/nack plus the raw (still base64-encoded)
/// body. The caller decodes it through [`Envelope`] so poison payloads are handled
/// uniformly across every stage.
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    pub handle: i64,
    pub raw_body: String,
    pub attempts: i32,
}

#[async_trait]
pub trait Queue: Send + Sync {
    async fn send(&self, queue_name: &str, message: &QueueMessage) -> Result<(), QueueError>;

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<LeasedMessage>, QueueError>;

    async fn delete(&self, queue_name: &str, handle: i64) -> Result<(), QueueError>;

    /// Extend the lease on a message that is taking longer than the original visibility
    /// timeout to process (used by handlers that split long-running work into sub-jobs
    /// instead).
    async fn extend_visibility(
        &self,
        queue_name: &str,
        handle: i64,
        extra: Duration,
    ) -> Result<(), QueueError>;
}

#[cfg(feature = "database")]
pub struct PgQueue {
    pool: sqlx::PgPool,
}

#[cfg(feature = "database")]
impl PgQueue {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl Queue for PgQueue {
    async fn send(&self, queue_name: &str, message: &QueueMessage) -> Result<(), QueueError> {
        let body = Envelope::new(message.clone()).encode();
        sqlx::query(
            r#"
            INSERT INTO pipeline_queue_messages (queue_name, body, visible_at, created_at)
            VALUES ($1, $2, now(), now())
            "#,
        )
        .bind(queue_name)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<LeasedMessage>, QueueError> {
        let rows = sqlx::query_as::<_, (i64, String, i32)>(
            r#"
            WITH next AS (
                SELECT id
                FROM pipeline_queue_messages
                WHERE queue_name = $1 AND visible_at <= now()
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT $2
            )
            UPDATE pipeline_queue_messages q
            SET visible_at = now() + ($3 || ' seconds')::interval,
                attempts = attempts + 1
            FROM next
            WHERE q.id = next.id
            RETURNING q.id, q.body, q.attempts
            "#,
        )
        .bind(queue_name)
        .bind(max_messages as i64)
        .bind(visibility_timeout.as_secs().to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, body, attempts)| LeasedMessage { handle: id, raw_body: body, attempts })
            .collect())
    }

    async fn delete(&self, queue_name: &str, handle: i64) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM pipeline_queue_messages WHERE id = $1 AND queue_name = $2")
            .bind(handle)
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        handle: i64,
        extra: Duration,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE pipeline_queue_messages
            SET visible_at = now() + ($3 || ' seconds')::interval
            WHERE id = $1 AND queue_name = $2
            "#,
        )
        .bind(handle)
        .bind(queue_name)
        .bind(extra.as_secs().to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory queue used by worker-runtime tests (mirrors [`PgQueue`]'s at-least-once
/// semantics without a database).
pub struct InMemoryQueue {
    rows: tokio::sync::Mutex<Vec<InMemoryRow>>,
    next_id: std::sync::atomic::AtomicI64,
}

struct InMemoryRow {
    id: i64,
    queue_name: String,
    body: String,
    visible_at: chrono::DateTime<Utc>,
    attempts: i32,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self { rows: tokio::sync::Mutex::new(Vec::new()), next_id: std::sync::atomic::AtomicI64::new(1) }
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn send(&self, queue_name: &str, message: &QueueMessage) -> Result<(), QueueError> {
        let body = Envelope::new(message.clone()).encode();
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.rows.lock().await.push(InMemoryRow {
            id,
            queue_name: queue_name.to_string(),
            body,
            visible_at: Utc::now(),
            attempts: 0,
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<LeasedMessage>, QueueError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let mut leased = Vec::new();
        for row in rows.iter_mut() {
            if leased.len() as u32 >= max_messages {
                break;
            }
            if row.queue_name == queue_name && row.visible_at <= now {
                row.attempts += 1;
                row.visible_at = now + chrono::Duration::from_std(visibility_timeout).unwrap();
                leased.push(LeasedMessage { handle: row.id, raw_body: row.body.clone(), attempts: row.attempts });
            }
        }
        Ok(leased)
    }

    async fn delete(&self, queue_name: &str, handle: i64) -> Result<(), QueueError> {
        let mut rows = self.rows.lock().await;
        rows.retain(|r| !(r.id == handle && r.queue_name == queue_name));
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        handle: i64,
        extra: Duration,
    ) -> Result<(), QueueError> {
        let mut rows = self.rows.lock().await;
        for row in rows.iter_mut() {
            if row.id == handle && row.queue_name == queue_name {
                row.visible_at += chrono::Duration::from_std(extra).unwrap();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_queue_leases_become_invisible() {
        let queue = InMemoryQueue::new();
        let msg = QueueMessage::new(uuid::Uuid::new_v4(), "WebCrawling");
        queue.send("webcrawler", &msg).await.unwrap();

        let leased = queue.receive("webcrawler", 10, Duration::from_secs(60)).await.unwrap();
        assert_eq!(leased.len(), 1);

        // Still invisible to a second receiver until the lease elapses.
        let leased_again = queue.receive("webcrawler", 10, Duration::from_secs(60)).await.unwrap();
        assert!(leased_again.is_empty());

        queue.delete("webcrawler", leased[0].handle).await.unwrap();
        let leased_after_delete = queue.receive("webcrawler", 10, Duration::from_secs(60)).await.unwrap();
        assert!(leased_after_delete.is_empty());
    }
}
