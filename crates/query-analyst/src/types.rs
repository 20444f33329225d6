//! Structured outputs for the QueryAnalyst pipeline (§4.3). Every analyzer call is
//! best-effort: parsing falls back to a raw-text field rather than failing the step, per
//! spec's "Any service error in steps 2-10 -> degraded output, pipeline continues."

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub score: f64,
    pub reasoning: String,
    pub confidence: f64,
}

impl ValidationResult {
    pub fn no_image() -> Self {
        Self { is_valid: true, score: 1.0, reasoning: "no image attached".to_string(), confidence: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationConfidence {
    High,
    Medium,
    Low,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationData {
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub landmarks: Vec<String>,
    pub area_type: Option<String>,
    pub confidence: LocationConfidence,
}

impl LocationData {
    pub fn none() -> Self {
        Self { address: None, lat: None, lon: None, landmarks: Vec::new(), area_type: None, confidence: LocationConfidence::None }
    }

    pub fn summary(&self) -> String {
        match &self.address {
            Some(addr) => addr.clone(),
            None if !self.landmarks.is_empty() => self.landmarks.join(", "),
            None => String::new(),
        }
    }
}

/// Best-effort parse of a classifier's JSON response; on parse failure the raw text is
/// preserved in `raw` so downstream persistence never silently drops information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedOrRaw {
    pub parsed: Option<serde_json::Value>,
    pub raw: String,
}

impl ParsedOrRaw {
    pub fn from_text(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => Self { parsed: Some(value), raw: text },
            Err(_) => Self { parsed: None, raw: text },
        }
    }
}

/// The ten independent classifier outputs (§4.3 step 7), kept as a catch-all map rather than
/// ten separate typed fields -- each analyzer's schema is owned by the analyzer, not the
/// pipeline, matching the "dynamically typed nested JSON" redesign note's guidance to use a
/// schemaless map for forward-compatible audit payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierOutputs {
    pub query_type: Option<ParsedOrRaw>,
    pub location_normalization: Option<ParsedOrRaw>,
    pub emotion: Option<ParsedOrRaw>,
    pub severity: Option<ParsedOrRaw>,
    pub patterns: Option<ParsedOrRaw>,
    pub fraud: Option<ParsedOrRaw>,
    pub category: Option<ParsedOrRaw>,
    pub similar_cases_summary: Option<ParsedOrRaw>,
    pub department_recommendation: Option<ParsedOrRaw>,
    pub sentiment_priority: Option<ParsedOrRaw>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentMatch {
    pub department_id: uuid::Uuid,
    pub name: String,
    pub combined_score: f64,
}

/// The complete analysis persisted to the grievance row's audit column (§4.3 step 12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrievanceAnalysis {
    pub validation: ValidationResult,
    pub location: LocationData,
    pub image_description: String,
    pub enhanced_query: String,
    pub embedding: Vec<f32>,
    pub classifiers: ClassifierOutputs,
    pub policy_search_queries: Vec<String>,
    pub department: Option<DepartmentMatch>,
}
