//! Per-grievance and per-department progress analysis (§4.7).

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaStatus {
    Within,
    Breached,
    Met,
    NoSla,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Stalled,
    Overdue,
    AtRisk,
    Completed,
}

#[derive(Debug, Clone)]
pub struct GrievanceProgress {
    pub days_open: i64,
    pub days_since_update: i64,
    pub completion_pct: f64,
    pub sla_status: SlaStatus,
    pub health: Health,
}

#[derive(Debug, Clone, Copy)]
pub struct FeedbackAnalysis {
    pub sentiment: f64,
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProofAnalysis {
    pub document_count: u32,
}

const STALLED_AFTER_DAYS: i64 = 7;
const AT_RISK_COMPLETION_PCT: f64 = 50.0;

fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    (later - earlier).num_days().max(0)
}

pub fn sla_status(due_at: Option<DateTime<Utc>>, resolved_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> SlaStatus {
    match (due_at, resolved_at) {
        (None, _) => SlaStatus::NoSla,
        (Some(due), Some(resolved)) if resolved <= due => SlaStatus::Met,
        (Some(_), Some(_)) => SlaStatus::Breached,
        (Some(due), None) if now > due => SlaStatus::Breached,
        (Some(_), None) => SlaStatus::Within,
    }
}

pub fn health(resolved: bool, days_since_update: i64, completion_pct: f64, sla: SlaStatus) -> Health {
    if resolved {
        return Health::Completed;
    }
    if sla == SlaStatus::Breached {
        return Health::Overdue;
    }
    if days_since_update >= STALLED_AFTER_DAYS {
        return Health::Stalled;
    }
    if completion_pct < AT_RISK_COMPLETION_PCT {
        return Health::AtRisk;
    }
    Health::Healthy
}

pub fn analyze_grievance_progress(
    created_at: DateTime<Utc>,
    last_update_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    due_at: Option<DateTime<Utc>>,
    completion_pct: f64,
    now: DateTime<Utc>,
) -> GrievanceProgress {
    let days_open = days_between(created_at, resolved_at.unwrap_or(now));
    let days_since_update = days_between(last_update_at, now);
    let sla = sla_status(due_at, resolved_at, now);
    let grievance_health = health(resolved_at.is_some(), days_since_update, completion_pct, sla);

    GrievanceProgress { days_open, days_since_update, completion_pct, sla_status: sla, health: grievance_health }
}

/// `0.4·resolution_rate + 0.3·(rating·20) + 0.3·max(0,100−2·avg_days)` (§4.7). All three
/// inputs and the result are on a 0-100 scale; `resolution_rate` and `rating` are expected
/// pre-normalized to that scale by the caller (rate as a percentage, rating out of 5).
pub fn performance_score(resolution_rate_pct: f64, avg_rating_out_of_5: f64, avg_resolution_days: f64) -> f64 {
    let rating_component = avg_rating_out_of_5 * 20.0;
    let speed_component = (100.0 - 2.0 * avg_resolution_days).max(0.0);
    0.4 * resolution_rate_pct + 0.3 * rating_component + 0.3 * speed_component
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - Duration::days(days)
    }

    #[test]
    fn sla_within_when_due_date_not_yet_reached() {
        let now = Utc::now();
        assert_eq!(sla_status(Some(now + Duration::days(3)), None, now), SlaStatus::Within);
    }

    #[test]
    fn sla_breached_when_overdue_unresolved() {
        let now = Utc::now();
        assert_eq!(sla_status(Some(now - Duration::days(1)), None, now), SlaStatus::Breached);
    }

    #[test]
    fn sla_met_when_resolved_before_due() {
        let now = Utc::now();
        assert_eq!(sla_status(Some(now), Some(now - Duration::days(1)), now), SlaStatus::Met);
    }

    #[test]
    fn sla_no_sla_without_due_date() {
        assert_eq!(sla_status(None, None, Utc::now()), SlaStatus::NoSla);
    }

    #[test]
    fn resolved_grievance_is_completed_regardless_of_other_signals() {
        assert_eq!(health(true, 30, 10.0, SlaStatus::Breached), Health::Completed);
    }

    #[test]
    fn breached_sla_takes_priority_over_stalled() {
        assert_eq!(health(false, 10, 90.0, SlaStatus::Breached), Health::Overdue);
    }

    #[test]
    fn stale_update_without_breach_is_stalled() {
        assert_eq!(health(false, 10, 90.0, SlaStatus::Within), Health::Stalled);
    }

    #[test]
    fn low_completion_with_recent_update_is_at_risk() {
        assert_eq!(health(false, 1, 20.0, SlaStatus::Within), Health::AtRisk);
    }

    #[test]
    fn otherwise_healthy() {
        assert_eq!(health(false, 1, 90.0, SlaStatus::Within), Health::Healthy);
    }

    #[test]
    fn analyze_grievance_progress_computes_days_open_from_creation() {
        let progress = analyze_grievance_progress(days_ago(10), days_ago(10), None, None, 30.0, Utc::now());
        assert_eq!(progress.days_open, 10);
        assert_eq!(progress.health, Health::Stalled);
    }

    #[test]
    fn performance_score_combines_weighted_components() {
        let score = performance_score(80.0, 4.0, 10.0);
        // 0.4*80 + 0.3*(4*20) + 0.3*max(0,100-20) = 32 + 24 + 24 = 80
        assert!((score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn performance_score_clamps_negative_speed_component() {
        let score = performance_score(50.0, 3.0, 80.0);
        // speed component would be 100-160=-60, clamped to 0
        assert!((score - (0.4 * 50.0 + 0.3 * 60.0)).abs() < 1e-9);
    }
}
