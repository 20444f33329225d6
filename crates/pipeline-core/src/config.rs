//! Environment-sourced configuration.
//!
//! Every worker binary reads its configuration from the environment and fails fast at
//! startup if a required key is missing -- there is no synchronous API to surface a
//! config error later, so there is no point starting the poll loop.

use std::time::Duration;

use crate::error::PipelineError;

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn required(key: &str) -> Result<String, PipelineError> {
    env_var(key).ok_or_else(|| PipelineError::Config(format!("missing required env var {key}")))
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_var(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Shared settings every worker binary loads regardless of which stage it runs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,

    pub poll_interval_sec: f64,
    pub visibility_timeout_sec: u64,

    pub chunk_size: usize,
    pub chunk_overlap: usize,

    pub requeue_stuck_after_sec: i64,
    pub requeue_failed_after_sec: i64,

    pub max_pages_per_job: usize,
    pub batch_size: usize,
    pub page_timeout_sec: u64,

    pub pattern_similarity_threshold: f64,

    pub embedding_model: String,
    pub embedding_batch_size: usize,

    pub blob_base_dir: String,
}

impl PipelineConfig {
    /// Load from the environment, applying the documented defaults for anything optional.
    /// `DATABASE_URL` is the only setting every worker needs; missing it is an
    /// infrastructure misconfiguration and must fail fast.
    pub fn from_env() -> Result<Self, PipelineError> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,

            poll_interval_sec: parse_or("POLL_INTERVAL_SEC", 3.0),
            visibility_timeout_sec: parse_or("VISIBILITY_TIMEOUT", 300),

            chunk_size: parse_or("CHUNK_SIZE", 1000),
            chunk_overlap: parse_or("CHUNK_OVERLAP", 200),

            requeue_stuck_after_sec: parse_or("REQUEUE_STUCK_AFTER_SEC", 900),
            requeue_failed_after_sec: parse_or("REQUEUE_FAILED_AFTER_SEC", 3600),

            max_pages_per_job: parse_or("MAX_PAGES_PER_JOB", 50),
            batch_size: parse_or("BATCH_SIZE", 3),
            page_timeout_sec: parse_or("PAGE_TIMEOUT", 300),

            pattern_similarity_threshold: parse_or("PATTERN_SIMILARITY_THRESHOLD", 0.85),

            embedding_model: env_var("EMBEDDING_MODEL").unwrap_or_else(|| "default-embedder".to_string()),
            embedding_batch_size: parse_or("EMBEDDING_BATCH_SIZE", 16),

            blob_base_dir: env_var("BLOB_BASE_DIR").unwrap_or_else(|| "./blob-store".to_string()),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_sec.max(0.1))
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_sec)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_sec)
    }
}

/// A single opaque service credential (LLM, vision, search, ...). Stored as a plain string;
/// the pipeline core never inspects or logs the value.
#[derive(Clone)]
pub struct ServiceApiKey(String);

impl ServiceApiKey {
    pub fn from_env(key: &str) -> Result<Self, PipelineError> {
        required(key).map(ServiceApiKey)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ServiceApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ServiceApiKey(***)")
    }
}
