//! The QueryAnalyst stage handler (§4.3): validate -> locate -> embed -> classify ->
//! allocate -> persist, emitting one crawler-queue message on success.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::external::{Embedder, ReportRenderer, TextAnalyzer, VisionService, WebSearchService};
use pipeline_core::message::{QueueMessage, StageTag};
use pipeline_core::worker::{HandlerOutcome, StageHandler};
use pipeline_core::blob_store::{BlobPath, BlobStore};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::department::{self, DepartmentCandidate};
use crate::types::{ClassifierOutputs, GrievanceAnalysis, LocationConfidence, LocationData, ParsedOrRaw, ValidationResult};

const CRAWLER_QUEUE: &str = "webcrawler";

pub struct QueryAnalystHandler {
    pub pool: PgPool,
    pub grievance_table: String,
    pub vision: Arc<dyn VisionService>,
    pub embedder: Arc<dyn Embedder>,
    pub text_analyzer: Arc<dyn TextAnalyzer>,
    pub web_search: Arc<dyn WebSearchService>,
    pub report_renderer: Arc<dyn ReportRenderer>,
    pub blob_store: Arc<dyn BlobStore>,
}

/// Input shape for the `grievances` queue (§6): `{ grievance_id, citizen_id?,
/// grievance_text, image_path? }`. These fields don't belong on the generic
/// [`QueueMessage`] envelope -- per-queue payload shapes travel in `metadata`.
struct GrievanceIntake {
    grievance_text: String,
    image_path: Option<String>,
}

fn parse_intake(message: &QueueMessage) -> Option<GrievanceIntake> {
    let metadata = message.metadata.as_ref()?;
    let grievance_text = metadata.get("grievance_text")?.as_str()?.to_string();
    let image_path = metadata.get("image_path").and_then(|v| v.as_str()).map(str::to_string);
    Some(GrievanceIntake { grievance_text, image_path })
}

#[async_trait]
impl StageHandler for QueryAnalystHandler {
    fn stage_tag(&self) -> &str {
        StageTag::GRIEVANCE_INTAKE
    }

    async fn handle(&self, message: QueueMessage) -> HandlerOutcome {
        let Some(intake) = parse_intake(&message) else {
            return HandlerOutcome::BusinessFailure("grievances message missing grievance_text".to_string());
        };
        let grievance_id = match message.grievance_id.clone() {
            Some(id) => id,
            None => return HandlerOutcome::BusinessFailure("grievances message missing grievance_id".to_string()),
        };

        match self.analyze(&grievance_id, &intake).await {
            Ok(Some(analysis)) => {
                if let Err(err) = self.persist(&grievance_id, &analysis).await {
                    return HandlerOutcome::Transient(err);
                }
                let forward = QueueMessage::new(Uuid::new_v4(), StageTag::WEB_CRAWLING)
                    .with_grievance_id(grievance_id)
                    .with_metadata(serde_json::json!({
                        "policy_search_queries": analysis.policy_search_queries,
                        "validation_result": analysis.validation,
                        "location_data": analysis.location,
                        "analysis_completed_at": chrono::Utc::now(),
                    }));
                HandlerOutcome::success_with(vec![(CRAWLER_QUEUE.to_string(), forward)])
            }
            Ok(None) => {
                // Validation rejected the grievance: terminal, no downstream emit (§4.3).
                HandlerOutcome::BusinessFailure(format!("image validation rejected grievance {grievance_id}"))
            }
            Err(err) => HandlerOutcome::Transient(err),
        }
    }
}

impl QueryAnalystHandler {
    /// Runs steps 1-11. Returns `Ok(None)` for a terminal validation rejection (step 1),
    /// `Ok(Some(analysis))` once ready to allocate + persist.
    async fn analyze(&self, grievance_id: &str, intake: &GrievanceIntake) -> anyhow::Result<Option<GrievanceAnalysis>> {
        // Step 1: image validation.
        let validation = match &intake.image_path {
            Some(path) => self.validate_image(path, &intake.grievance_text).await,
            None => ValidationResult::no_image(),
        };
        if !validation.is_valid {
            return Ok(None);
        }

        // Step 2-3: location + image description, non-fatal on service error.
        let (location, image_description) = match &intake.image_path {
            Some(path) => (self.extract_location(path).await, self.describe_image(path).await),
            None => (LocationData::none(), String::new()),
        };

        // Step 4: deterministic enhanced-query concatenation.
        let enhanced_query = build_enhanced_query(&intake.grievance_text, &image_description, &location);

        // Step 5: embedding.
        let embedding = self.embedder.embed(&enhanced_query).await.unwrap_or_default();

        // Step 7: classifier fan-out (best-effort; a failed analyzer call degrades to an
        // empty slot rather than failing the whole stage).
        let classifiers = self.run_classifiers(&enhanced_query, &validation).await;

        // Step 8: policy search-query synthesis (deterministic, no DB).
        let policy_search_queries = synthesize_policy_queries(&classifiers, &location);

        // Step 9: real-time enrichment; results are folded into the audit payload only.
        let mut search_hits = Vec::new();
        for query in &policy_search_queries {
            if let Ok(results) = self.web_search.search(query, 5).await {
                search_hits.extend(results);
            }
        }

        // Step 10: department allocation.
        let candidates = self.fetch_department_candidates().await.unwrap_or_default();
        let department = department::allocate(&embedding, location.lat, location.lon, &candidates);

        // Step 11: report generation (best-effort; a render failure shouldn't fail the
        // stage, matching "degraded output, pipeline continues").
        if let Ok(report_md) = self
            .report_renderer
            .render(
                &format!("Grievance {grievance_id} Analysis"),
                &[
                    ("Summary".to_string(), enhanced_query.clone()),
                    ("Location".to_string(), location.summary()),
                    ("Department".to_string(), department.as_ref().map(|d| d.name.clone()).unwrap_or_default()),
                ],
            )
            .await
        {
            let key = BlobPath::grievance_artifact(grievance_id, "grievance_report.md");
            if let Err(err) = self.blob_store.store(&key, report_md.as_bytes(), "text/markdown").await {
                warn!(%grievance_id, %err, "failed to upload grievance report, continuing");
            }
        }

        Ok(Some(GrievanceAnalysis {
            validation,
            location,
            image_description,
            enhanced_query,
            embedding,
            classifiers,
            policy_search_queries,
            department,
        }))
    }

    async fn validate_image(&self, image_path: &str, grievance_text: &str) -> ValidationResult {
        let prompt = format!("Is this image consistent with the complaint: {grievance_text}?");
        match self.vision.describe_image(image_path.as_bytes(), &prompt).await {
            Ok(description) => ValidationResult {
                is_valid: !description.is_empty(),
                score: if description.is_empty() { 0.0 } else { 0.8 },
                reasoning: description,
                confidence: 0.5,
            },
            Err(err) => {
                warn!(%image_path, %err, "vision validation degraded to neutral pass");
                ValidationResult { is_valid: true, score: 0.5, reasoning: "vision service unavailable".to_string(), confidence: 0.0 }
            }
        }
    }

    async fn extract_location(&self, image_path: &str) -> LocationData {
        match self.vision.describe_image(image_path.as_bytes(), "Extract any address, landmark, or area type visible.").await {
            Ok(text) if !text.is_empty() => LocationData {
                address: Some(text.clone()),
                lat: None,
                lon: None,
                landmarks: vec![text],
                area_type: None,
                confidence: LocationConfidence::Low,
            },
            _ => LocationData::none(),
        }
    }

    async fn describe_image(&self, image_path: &str) -> String {
        self.vision.describe_image(image_path.as_bytes(), "Describe this image briefly.").await.unwrap_or_default()
    }

    async fn run_classifiers(&self, enhanced_query: &str, validation: &ValidationResult) -> ClassifierOutputs {
        async fn ask(analyzer: &dyn TextAnalyzer, prompt: &str, text: &str) -> Option<ParsedOrRaw> {
            analyzer.analyze(prompt, text).await.ok().map(ParsedOrRaw::from_text)
        }

        // Fraud consumes only the validation verdict, never the raw text, to avoid
        // keyword-driven false positives (§4.3 step 7).
        let validation_json = serde_json::to_string(validation).unwrap_or_default();

        ClassifierOutputs {
            query_type: ask(self.text_analyzer.as_ref(), "Classify the query type.", enhanced_query).await,
            location_normalization: ask(self.text_analyzer.as_ref(), "Normalize the location mentioned.", enhanced_query).await,
            emotion: ask(self.text_analyzer.as_ref(), "Identify the dominant emotion.", enhanced_query).await,
            severity: ask(self.text_analyzer.as_ref(), "Rate severity: low, medium, high, critical.", enhanced_query).await,
            patterns: ask(self.text_analyzer.as_ref(), "Identify recurring patterns.", enhanced_query).await,
            fraud: ask(self.text_analyzer.as_ref(), "Assess fraud/spam risk from this validation verdict.", &validation_json).await,
            category: ask(self.text_analyzer.as_ref(), "Classify category and sub-category.", enhanced_query).await,
            similar_cases_summary: ask(self.text_analyzer.as_ref(), "Summarize similar known cases.", enhanced_query).await,
            department_recommendation: ask(self.text_analyzer.as_ref(), "Recommend a department.", enhanced_query).await,
            sentiment_priority: ask(self.text_analyzer.as_ref(), "Assess sentiment and priority.", enhanced_query).await,
        }
    }

    async fn fetch_department_candidates(&self) -> Result<Vec<DepartmentCandidate>, sqlx::Error> {
        let rows: Vec<(Uuid, String, Option<String>, Option<pgvector::Vector>, Option<f64>, Option<f64>)> = sqlx::query_as(
            "SELECT id, name, jurisdiction, embedding, latitude, longitude FROM departments WHERE is_active = true",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(department_id, name, jurisdiction, embedding, latitude, longitude)| DepartmentCandidate {
                department_id,
                name,
                jurisdiction,
                embedding: embedding.map(|v| v.to_vec()).unwrap_or_default(),
                latitude,
                longitude,
            })
            .collect())
    }

    /// Step 12: single `UPDATE` on the grievance row. A zero-rowcount result is logged as a
    /// warning, not an error (§4.3, and the Open Question in §9 leaves this as the default
    /// policy pending an operator decision).
    async fn persist(&self, grievance_id: &str, analysis: &GrievanceAnalysis) -> anyhow::Result<()> {
        let embedding = pgvector::Vector::from(analysis.embedding.clone());
        let audit = serde_json::to_value(analysis)?;
        let table = pipeline_core::job_claimer::safe_ident(&self.grievance_table)?;
        let sql = format!(
            r#"
            UPDATE {table}
            SET enhanced_query = $2,
                embedding = $3,
                department_id = $4,
                location_address = $5,
                location_confidence = $6,
                latitude = $7,
                longitude = $8,
                validation_status = $9,
                full_result = $10,
                updated_at = now()
            WHERE grievance_id = $1
            "#
        );
        let result = sqlx::query(&sql)
            .bind(grievance_id)
            .bind(&analysis.enhanced_query)
            .bind(embedding)
            .bind(analysis.department.as_ref().map(|d| d.department_id))
            .bind(analysis.location.address.as_deref())
            .bind(format!("{:?}", analysis.location.confidence).to_lowercase())
            .bind(analysis.location.lat)
            .bind(analysis.location.lon)
            .bind(if analysis.validation.is_valid { "accepted" } else { "rejected" })
            .bind(&audit)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            warn!(%grievance_id, "grievance update matched zero rows");
        }
        Ok(())
    }
}

fn build_enhanced_query(raw_text: &str, image_description: &str, location: &LocationData) -> String {
    let mut parts = vec![raw_text.to_string()];
    if !image_description.is_empty() {
        parts.push(image_description.to_string());
    }
    let summary = location.summary();
    if !summary.is_empty() {
        parts.push(summary);
    }
    parts.join(". ")
}

fn synthesize_policy_queries(classifiers: &ClassifierOutputs, location: &LocationData) -> Vec<String> {
    let category = classifiers
        .category
        .as_ref()
        .and_then(|c| c.parsed.as_ref())
        .and_then(|v| v.get("main_category"))
        .and_then(|v| v.as_str())
        .unwrap_or("civic issue");
    let area = location.area_type.as_deref().unwrap_or("urban area");

    vec![
        format!("{category} policy India"),
        format!("{category} grievance redressal scheme"),
        format!("{category} in {area} government response time"),
        format!("{category} department jurisdiction rules"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enhanced_query_concatenates_available_parts() {
        let location = LocationData { address: Some("MG Road".to_string()), ..LocationData::none() };
        let query = build_enhanced_query("Garbage pile", "Photo shows overflowing bin", &location);
        assert!(query.contains("Garbage pile"));
        assert!(query.contains("overflowing bin"));
        assert!(query.contains("MG Road"));
    }

    #[test]
    fn enhanced_query_skips_empty_parts() {
        let query = build_enhanced_query("Broken streetlight", "", &LocationData::none());
        assert_eq!(query, "Broken streetlight");
    }

    #[test]
    fn policy_queries_default_without_classified_category() {
        let queries = synthesize_policy_queries(&ClassifierOutputs::default(), &LocationData::none());
        assert!(queries.len() >= 3);
        assert!(queries[0].contains("civic issue"));
    }
}
