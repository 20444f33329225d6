//! Shared runtime for the grievance pipeline workers.
//!
//! Every stage worker (QueryAnalyst, Crawler, Embeddings, Research, Progress) is built
//! from the same small set of primitives: a durable [`queue::Queue`], a [`worker::WorkerRuntime`]
//! that drives the lease/decode/dispatch/ack loop, and a [`job_claimer::JobClaimer`] for the
//! stages that share a DB-backed job table instead of a true queue. Nothing here talks to an
//! LLM, a vision service, or a crawl engine directly -- those are opaque traits in
//! [`external`] that callers inject at startup.

pub mod backoff;
pub mod blob_store;
pub mod config;
pub mod envelope;
pub mod error;
pub mod external;
pub mod job;
pub mod job_claimer;
pub mod message;
pub mod metrics;
pub mod payload_ref;
pub mod queue;
pub mod vector_index;
pub mod worker;

pub use envelope::Envelope;
pub use error::{HandlerOutcome, PipelineError};
pub use job::{Job, JobStatus};
pub use message::QueueMessage;
pub use payload_ref::PayloadRef;
pub use queue::{LeasedMessage, PgQueue, Queue};
pub use vector_index::{sanitize_vector_id, VectorIndex};
pub use worker::{StageHandler, WorkerRuntime};
