//! The queue payload exchanged between stages.
//!
//! Shape: `{ job_id, current_status, grievance_id, url?, blob_folder?, metadata?, error? }`,
//! base64(utf8(json)) on the wire via [`crate::envelope::Envelope`]. `current_status` mirrors
//! the job state machine and lets a receiver short-circuit a misrouted message: if the tag
//! doesn't name a status this worker owns, the message is deleted, not retried.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known status tags used to route messages between stages. Kept as a thin wrapper
/// around a string (not a closed enum) because fields beyond the ones the pipeline reads
/// are opaque and preserved verbatim on re-emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTag(pub String);

impl StageTag {
    pub const GRIEVANCE_INTAKE: &'static str = "intake";
    pub const WEB_CRAWLING: &'static str = "WebCrawling";
    pub const SCRAPED: &'static str = "scraped";
    pub const PDF_UPLOAD: &'static str = "pdf_upload";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn matches(&self, expected: &str) -> bool {
        self.0 == expected
    }
}

impl std::fmt::Display for StageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: Uuid,
    pub current_status: StageTag,
    #[serde(default)]
    pub grievance_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub blob_folder: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl QueueMessage {
    pub fn new(job_id: Uuid, current_status: impl Into<String>) -> Self {
        Self {
            job_id,
            current_status: StageTag::new(current_status),
            grievance_id: None,
            url: None,
            blob_folder: None,
            metadata: None,
            error: None,
        }
    }

    pub fn with_grievance_id(mut self, grievance_id: impl Into<String>) -> Self {
        self.grievance_id = Some(grievance_id.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_blob_folder(mut self, blob_folder: impl Into<String>) -> Self {
        self.blob_folder = Some(blob_folder.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// A message whose `current_status` does not name a stage this worker owns is routed
    /// wrong and must be deleted, never retried.
    pub fn is_for_stage(&self, expected_status: &str) -> bool {
        self.current_status.matches(expected_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    #[test]
    fn status_gate_rejects_misrouted_message() {
        let msg = QueueMessage::new(Uuid::new_v4(), "scraped");
        assert!(!msg.is_for_stage(StageTag::WEB_CRAWLING));
        assert!(msg.is_for_stage(StageTag::SCRAPED));
    }

    #[test]
    fn envelope_round_trip_preserves_opaque_fields() {
        let msg = QueueMessage::new(Uuid::new_v4(), StageTag::WEB_CRAWLING)
            .with_grievance_id("G-1")
            .with_url("https://example.gov/notice")
            .with_metadata(serde_json::json!({"custom": "value"}));
        let encoded = Envelope::new(msg.clone()).encode();
        let decoded: Envelope<QueueMessage> = Envelope::decode(&encoded).unwrap();
        assert_eq!(decoded.payload.grievance_id, msg.grievance_id);
        assert_eq!(decoded.payload.metadata, msg.metadata);
    }
}
