//! Per-department orchestration for one Progress/Escalation run (§4.7).

use std::sync::Arc;

use chrono::Utc;
use pipeline_core::blob_store::BlobStore;
use pipeline_core::external::{ReportRenderer, TextAnalyzer};
use tracing::{error, info};

use crate::analysis::{analyze_grievance_progress, performance_score, Health};
use crate::escalation::{EscalationLevel, EscalationLevelCasing};
use crate::report::{build_and_upload_report, DepartmentSummary};
use crate::repository::DepartmentRepository;

pub struct ProgressHandler {
    pub repository: DepartmentRepository,
    pub text_analyzer: Arc<dyn TextAnalyzer>,
    pub report_renderer: Arc<dyn ReportRenderer>,
    pub blob_store: Arc<dyn BlobStore>,
    pub escalation_casing: EscalationLevelCasing,
}

impl ProgressHandler {
    /// Runs one pass over every active department (or just `only_department`, for one-shot
    /// on-demand invocations).
    pub async fn run(&self, only_department: Option<uuid::Uuid>) -> anyhow::Result<()> {
        let departments = self.repository.fetch_active_departments(only_department).await?;
        info!(count = departments.len(), "progress run starting");

        for department in departments {
            if let Err(err) = self.run_department(department.id, &department.name).await {
                error!(department_id = %department.id, %err, "progress run failed for department");
            }
        }

        Ok(())
    }

    async fn run_department(&self, department_id: uuid::Uuid, department_name: &str) -> anyhow::Result<()> {
        let now = Utc::now();
        let grievances = self.repository.fetch_department_grievances(department_id).await?;
        let feedback = self.repository.fetch_feedback(department_id).await?;

        let total = grievances.len();
        let mut resolved_count = 0usize;
        let mut resolution_days_sum = 0i64;
        let mut overdue_count = 0usize;
        let mut stalled_count = 0usize;
        let mut critical_count = 0usize;
        let mut escalation_candidates: Vec<(uuid::Uuid, bool)> = Vec::new();

        for grievance in &grievances {
            let progress = analyze_grievance_progress(
                grievance.created_at,
                grievance.updated_at,
                grievance.resolved_at,
                grievance.due_at,
                grievance.completion_pct,
                now,
            );

            if grievance.resolved_at.is_some() {
                resolved_count += 1;
                resolution_days_sum += progress.days_open;
            }

            let is_critical = grievance.priority.as_deref() == Some("critical");
            if is_critical {
                critical_count += 1;
            }

            match progress.health {
                Health::Overdue => overdue_count += 1,
                Health::Stalled => stalled_count += 1,
                _ => {}
            }

            let needs_escalation = matches!(progress.health, Health::Overdue | Health::Stalled) || is_critical;
            if needs_escalation {
                escalation_candidates.push((grievance.id, is_critical));
            }
        }

        let resolution_rate = if total == 0 { 0.0 } else { resolved_count as f64 / total as f64 * 100.0 };
        let avg_resolution_days = if resolved_count == 0 { 0.0 } else { resolution_days_sum as f64 / resolved_count as f64 };
        let ratings: Vec<f64> = feedback.iter().filter_map(|f| f.rating).collect();
        let avg_rating = if ratings.is_empty() { 0.0 } else { ratings.iter().sum::<f64>() / ratings.len() as f64 };

        let score = performance_score(resolution_rate, avg_rating, avg_resolution_days);

        let summary = DepartmentSummary {
            department_name: department_name.to_string(),
            total_grievances: total,
            resolution_rate,
            avg_rating,
            avg_resolution_days,
            performance_score: score,
            overdue_count,
            stalled_count,
            critical_count,
        };

        let (_narrative, report_url) = build_and_upload_report(
            &summary,
            &department_id.to_string(),
            self.text_analyzer.as_ref(),
            self.report_renderer.as_ref(),
            self.blob_store.as_ref(),
            now,
        )
        .await?;

        self.repository.persist_ai_insight(department_id, &_narrative, &report_url).await?;
        self.repository.update_dashboard(department_id, &report_url, score).await?;

        let (has_critical, high_count) =
            EscalationLevel::evaluate_triggers(overdue_count, stalled_count, critical_count, score, resolution_rate);
        let level = EscalationLevel::from_trigger_counts(has_critical, high_count);
        for (grievance_id, _is_critical) in escalation_candidates {
            self.repository.insert_escalation(&self.escalation_casing, department_id, grievance_id, level).await?;
        }

        info!(department_id = %department_id, resolution_rate, performance_score = score, "progress run complete for department");
        Ok(())
    }
}
