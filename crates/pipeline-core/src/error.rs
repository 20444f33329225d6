//! Error taxonomy for the pipeline.
//!
//! Handlers never throw and let the runtime guess what happened; every stage handler
//! returns a [`HandlerOutcome`] so the worker loop logs and acks/retries deterministically
//! (see the propagation policy in the pipeline design notes).

use crate::blob_store::BlobStoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("database error: {0}")]
    #[cfg(feature = "database")]
    Database(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("blob store error: {0}")]
    Blob(#[from] BlobStoreError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unknown identifier rejected as unsafe: {0}")]
    UnsafeIdentifier(String),
}

/// Outcome of a single stage handler invocation. The runtime never inspects the handler's
/// internals -- it only needs to know what to do with the input message next.
pub enum HandlerOutcome {
    /// Handler succeeded; forward these `(queue_name, message)` pairs downstream, then
    /// delete the input message.
    Success { forward: Vec<(String, crate::message::QueueMessage)> },

    /// Handler made a business decision to reject the input (e.g. validation failed).
    /// The input message is deleted; nothing is forwarded; no retry is attempted.
    BusinessFailure(String),

    /// A transient failure (I/O, timeout, 5xx). The runtime retries up to the configured
    /// bound and escalates to a human via metrics once attempts are exhausted.
    Transient(anyhow::Error),
}

impl HandlerOutcome {
    pub fn success() -> Self {
        Self::Success { forward: Vec::new() }
    }

    pub fn success_with(forward: Vec<(String, crate::message::QueueMessage)>) -> Self {
        Self::Success { forward }
    }
}
