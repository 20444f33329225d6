//! Generic queue-worker runtime shared by every stage binary.
//!
//! Drives the lease -> decode -> status-gate -> dispatch -> outcome -> backoff loop. A
//! stage only has to implement [`StageHandler`]; everything about claiming a message,
//! quarantining poison payloads, retrying transient failures, and forwarding successful
//! output downstream is handled once, here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backoff::sleep_with_jitter;
use crate::envelope::Envelope;
use crate::message::QueueMessage;
use crate::metrics::StageMetrics;
use crate::queue::{Queue, QueueError};

/// Bounded attempts for a transient failure before the runtime gives up and treats the
/// message like a business failure: ack it, log at error level, and move on. Retrying
/// happens implicitly by leaving the message in place so its lease expires and a later
/// `receive` (on this worker or another) picks it back up with the queue's attempt counter
/// already incremented.
pub const MAX_RETRIES: u32 = 5;

/// Outcome of a single stage handler invocation.
pub use crate::error::HandlerOutcome;

/// A single pipeline stage: decode a message, do the stage's work, report what happened.
/// The handler never sees the raw envelope or touches the queue directly -- that keeps
/// stage code free of queue/backoff/retry plumbing.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// The stage tag this handler processes (e.g. `StageTag::WEB_CRAWLING`). Messages whose
    /// `current_status` doesn't match are deleted without retry -- routing noise, not a
    /// failure worth keeping around.
    fn stage_tag(&self) -> &str;

    async fn handle(&self, message: QueueMessage) -> HandlerOutcome;
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Drives one queue against one handler until told to stop.
pub struct WorkerRuntime<Q: Queue> {
    queue: Arc<Q>,
    queue_name: String,
    visibility_timeout: Duration,
    poll_interval: Duration,
    max_messages: u32,
    pub metrics: StageMetrics,
}

impl<Q: Queue + 'static> WorkerRuntime<Q> {
    pub fn new(queue: Arc<Q>, queue_name: impl Into<String>, visibility_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            visibility_timeout,
            poll_interval,
            max_messages: 10,
            metrics: StageMetrics::new(),
        }
    }

    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages;
        self
    }

    /// Run until `shutdown` flips to `true`. Every iteration leases a batch, processes each
    /// message to completion, then sleeps a jittered interval if the batch was empty --
    /// mirrors the poll/select loop every stage in the original system hand-rolled
    /// independently.
    pub async fn run(&self, handler: Arc<dyn StageHandler>, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(queue = %self.queue_name, "worker runtime starting");
        loop {
            if *shutdown.borrow() {
                info!(queue = %self.queue_name, "worker runtime shutting down");
                return Ok(());
            }

            let leased = self.queue.receive(&self.queue_name, self.max_messages, self.visibility_timeout).await?;

            if leased.is_empty() {
                tokio::select! {
                    _ = sleep_with_jitter(self.poll_interval, 0.25) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for leased_message in leased {
                self.process_one(handler.as_ref(), leased_message.handle, &leased_message.raw_body, leased_message.attempts, None).await;
            }
        }
    }

    /// Drains the queue's currently-available backlog once and returns, instead of polling
    /// forever (`--once`, §6 "CLI surface"). When `target_job_id` is set, messages for other
    /// jobs are left untouched for their lease to expire rather than deleted.
    pub async fn run_once(&self, handler: Arc<dyn StageHandler>, target_job_id: Option<Uuid>) -> Result<(), WorkerError> {
        info!(queue = %self.queue_name, ?target_job_id, "worker runtime running a single pass");
        loop {
            let leased = self.queue.receive(&self.queue_name, self.max_messages, self.visibility_timeout).await?;
            if leased.is_empty() {
                info!(queue = %self.queue_name, "single pass complete, queue drained");
                return Ok(());
            }
            for leased_message in leased {
                self.process_one(handler.as_ref(), leased_message.handle, &leased_message.raw_body, leased_message.attempts, target_job_id)
                    .await;
            }
        }
    }

    async fn process_one(&self, handler: &dyn StageHandler, handle: i64, raw_body: &str, attempts: i32, target_job_id: Option<Uuid>) {
        let envelope = match Envelope::<QueueMessage>::decode(raw_body) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(queue = %self.queue_name, handle, %err, "quarantining poison message");
                self.metrics.record_quarantine();
                let _ = self.queue.delete(&self.queue_name, handle).await;
                return;
            }
        };
        let message = envelope.payload;

        if !message.is_for_stage(handler.stage_tag()) {
            warn!(
                queue = %self.queue_name,
                handle,
                expected = handler.stage_tag(),
                actual = %message.current_status,
                "message misrouted, deleting without retry"
            );
            let _ = self.queue.delete(&self.queue_name, handle).await;
            return;
        }

        let job_id = message.job_id;
        if let Some(target) = target_job_id {
            if job_id != target {
                return;
            }
        }

        match handler.handle(message).await {
            HandlerOutcome::Success { forward } => {
                for (queue_name, forward_message) in forward {
                    if let Err(err) = self.queue.send(&queue_name, &forward_message).await {
                        error!(%job_id, %queue_name, %err, "failed to forward message downstream");
                    }
                }
                self.metrics.record_success();
                let _ = self.queue.delete(&self.queue_name, handle).await;
            }
            HandlerOutcome::BusinessFailure(reason) => {
                warn!(%job_id, %reason, "business failure, not retrying");
                self.metrics.record_business_failure();
                let _ = self.queue.delete(&self.queue_name, handle).await;
            }
            HandlerOutcome::Transient(err) => {
                if attempts as u32 >= MAX_RETRIES {
                    error!(%job_id, %err, attempts, "transient failure exhausted retries, acking to stop the poison loop");
                    self.metrics.record_transient_exhausted();
                    let _ = self.queue.delete(&self.queue_name, handle).await;
                } else {
                    warn!(%job_id, %err, attempts, "transient failure, message will be retried on lease expiry");
                    self.metrics.record_transient_retry();
                    // Leaving the message in place is the retry: its lease expires and the
                    // next `receive` (here or on a peer) picks it back up.
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingHandler {
        stage: &'static str,
        calls: AtomicUsize,
        outcome: fn() -> HandlerOutcome,
    }

    #[async_trait]
    impl StageHandler for CountingHandler {
        fn stage_tag(&self) -> &str {
            self.stage
        }

        async fn handle(&self, _message: QueueMessage) -> HandlerOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    #[tokio::test]
    async fn successful_message_is_deleted_and_not_reprocessed() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.send("stage-in", &QueueMessage::new(Uuid::new_v4(), "scraped")).await.unwrap();

        let handler = Arc::new(CountingHandler { stage: "scraped", calls: AtomicUsize::new(0), outcome: HandlerOutcome::success });
        let runtime = WorkerRuntime::new(queue.clone(), "stage-in", Duration::from_secs(30), Duration::from_millis(10));

        let (tx, rx) = watch::channel(false);
        let leased = queue.receive("stage-in", 10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(leased.len(), 1);
        runtime.process_one(handler.as_ref(), leased[0].handle, &leased[0].raw_body, leased[0].attempts, None).await;

        let remaining = queue.receive("stage-in", 10, Duration::from_secs(0)).await.unwrap();
        assert!(remaining.is_empty());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        drop(tx);
        drop(rx);
    }

    #[tokio::test]
    async fn misrouted_message_is_deleted_without_dispatch() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.send("stage-in", &QueueMessage::new(Uuid::new_v4(), "WebCrawling")).await.unwrap();

        let handler = Arc::new(CountingHandler { stage: "scraped", calls: AtomicUsize::new(0), outcome: HandlerOutcome::success });
        let runtime = WorkerRuntime::new(queue.clone(), "stage-in", Duration::from_secs(30), Duration::from_millis(10));

        let leased = queue.receive("stage-in", 10, Duration::from_secs(30)).await.unwrap();
        runtime.process_one(handler.as_ref(), leased[0].handle, &leased[0].raw_body, leased[0].attempts, None).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_failure_leaves_message_for_retry() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.send("stage-in", &QueueMessage::new(Uuid::new_v4(), "scraped")).await.unwrap();

        let handler = Arc::new(CountingHandler {
            stage: "scraped",
            calls: AtomicUsize::new(0),
            outcome: || HandlerOutcome::Transient(anyhow::anyhow!("boom")),
        });
        let runtime = WorkerRuntime::new(queue.clone(), "stage-in", Duration::from_secs(30), Duration::from_millis(10));

        let leased = queue.receive("stage-in", 10, Duration::from_secs(30)).await.unwrap();
        runtime.process_one(handler.as_ref(), leased[0].handle, &leased[0].raw_body, leased[0].attempts, None).await;

        // Message is still present (leased again once the original lease is released by a
        // zero-length visibility timeout).
        let remaining = queue.receive("stage-in", 10, Duration::from_secs(0)).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
