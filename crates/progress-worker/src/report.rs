//! Narrative report generation and upload (§4.7: "Generate a narrative report via text
//! analyzer; persist as an AI-insight row and upload a Markdown artifact to blob").

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pipeline_core::blob_store::{BlobPath, BlobStore};
use pipeline_core::external::{ExternalServiceError, ReportRenderer, TextAnalyzer};

pub struct DepartmentSummary {
    pub department_name: String,
    pub total_grievances: usize,
    pub resolution_rate: f64,
    pub avg_rating: f64,
    pub avg_resolution_days: f64,
    pub performance_score: f64,
    pub overdue_count: usize,
    pub stalled_count: usize,
    pub critical_count: usize,
}

pub async fn build_and_upload_report(
    summary: &DepartmentSummary,
    department_id: &str,
    text_analyzer: &dyn TextAnalyzer,
    renderer: &dyn ReportRenderer,
    blob_store: &dyn BlobStore,
    now: DateTime<Utc>,
) -> Result<(String, String), ExternalServiceError> {
    let prompt = "Write a brief, operator-facing progress narrative for a municipal grievance department given these metrics. Note any concerning trends.";
    let metrics_text = format!(
        "department={}, total_grievances={}, resolution_rate={:.1}%, avg_rating={:.1}/5, avg_resolution_days={:.1}, performance_score={:.1}, overdue={}, stalled={}, critical={}",
        summary.department_name,
        summary.total_grievances,
        summary.resolution_rate,
        summary.avg_rating,
        summary.avg_resolution_days,
        summary.performance_score,
        summary.overdue_count,
        summary.stalled_count,
        summary.critical_count,
    );
    let narrative = text_analyzer.analyze(prompt, &metrics_text).await?;

    let sections = vec![
        ("Summary".to_string(), narrative.clone()),
        (
            "Metrics".to_string(),
            format!(
                "- Resolution rate: {:.1}%\n- Average rating: {:.1}/5\n- Average resolution time: {:.1} days\n- Performance score: {:.1}\n- Overdue: {}\n- Stalled: {}\n- Critical: {}",
                summary.resolution_rate, summary.avg_rating, summary.avg_resolution_days, summary.performance_score, summary.overdue_count, summary.stalled_count, summary.critical_count
            ),
        ),
    ];

    let title = format!("{} Progress Report", summary.department_name);
    let rendered = renderer.render(&title, &sections).await?;

    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let key = BlobPath::progress_report(department_id, &timestamp);
    let report_url = blob_store.store(&key, rendered.as_bytes(), "text/markdown").await.map_err(|e| ExternalServiceError::Service(e.to_string()))?;

    Ok((narrative, report_url))
}

pub fn markdown_renderer() -> Arc<dyn ReportRenderer> {
    Arc::new(pipeline_core::external::MarkdownReportRenderer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pipeline_core::blob_store::InMemoryBlobStore;

    struct FixedAnalyzer;

    #[async_trait]
    impl TextAnalyzer for FixedAnalyzer {
        async fn analyze(&self, _prompt: &str, _text: &str) -> Result<String, ExternalServiceError> {
            Ok("Things are stable this period.".to_string())
        }
    }

    #[tokio::test]
    async fn builds_and_uploads_report() {
        let summary = DepartmentSummary {
            department_name: "Sanitation".to_string(),
            total_grievances: 42,
            resolution_rate: 75.0,
            avg_rating: 4.1,
            avg_resolution_days: 6.0,
            performance_score: 80.0,
            overdue_count: 2,
            stalled_count: 1,
            critical_count: 0,
        };
        let blob_store = InMemoryBlobStore::new();
        let renderer = pipeline_core::external::MarkdownReportRenderer;

        let (narrative, report_url) =
            build_and_upload_report(&summary, "dept-1", &FixedAnalyzer, &renderer, &blob_store, Utc::now()).await.unwrap();

        assert!(narrative.contains("stable"));
        assert!(report_url.starts_with("memory://progress-reports/dept-1/"));
    }
}
