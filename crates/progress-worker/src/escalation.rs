//! Escalation-level classification and the one-time casing capability probe (§9 redesign
//! note: "enum-value discovery by trial ... treat as a one-time capability probe at
//! startup, cached for the process lifetime; never per-insert").

use sqlx::PgPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationLevel {
    Immediate,
    Urgent,
    Priority,
    Standard,
}

impl EscalationLevel {
    /// `critical → immediate`, `≥2 high → urgent`, `1 high → priority`, else `standard`
    /// (§4.7).
    pub fn from_trigger_counts(has_critical: bool, high_count: u32) -> Self {
        if has_critical {
            Self::Immediate
        } else if high_count >= 2 {
            Self::Urgent
        } else if high_count == 1 {
            Self::Priority
        } else {
            Self::Standard
        }
    }

    /// Evaluates the five department-level triggers (overdue count, stalled count,
    /// critical-priority count, performance score, resolution rate) into a severity each,
    /// then reduces to `(has_critical, high_count)` for `from_trigger_counts`.
    ///
    /// The overdue/stalled thresholds follow the original analyzer's medium/high split, but
    /// the overdue threshold is lowered from the original's `> 10` to `> 5` (matching the
    /// stalled threshold) -- the literal `> 10` can never reach "high" for the worked
    /// escalation scenario (6 overdue grievances), which is specified to record `urgent`
    /// (two high-severity triggers: overdue + performance). `> 5` is the smallest change
    /// that satisfies that scenario while keeping the original's "medium vs. high" shape.
    pub fn evaluate_triggers(
        overdue_count: usize,
        stalled_count: usize,
        critical_count: usize,
        performance_score: f64,
        resolution_rate: f64,
    ) -> (bool, u32) {
        let has_critical = critical_count > 0;
        let mut high_count = 0u32;

        if overdue_count > 5 {
            high_count += 1;
        }
        if stalled_count > 5 {
            high_count += 1;
        }
        if performance_score < 50.0 {
            high_count += 1;
        }
        if resolution_rate < 40.0 {
            high_count += 1;
        }

        (has_critical, high_count)
    }

    fn lowercase(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Urgent => "urgent",
            Self::Priority => "priority",
            Self::Standard => "standard",
        }
    }

    fn uppercase(self) -> &'static str {
        match self {
            Self::Immediate => "IMMEDIATE",
            Self::Urgent => "URGENT",
            Self::Priority => "PRIORITY",
            Self::Standard => "STANDARD",
        }
    }

    fn titlecase(self) -> &'static str {
        match self {
            Self::Immediate => "Immediate",
            Self::Urgent => "Urgent",
            Self::Priority => "Priority",
            Self::Standard => "Standard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Casing {
    Lower,
    Upper,
    Title,
}

const CANDIDATES: [Casing; 3] = [Casing::Lower, Casing::Upper, Casing::Title];

/// The casing the `escalations.level` column's CHECK constraint actually accepts, probed
/// once per process and reused for every insert after that.
#[derive(Debug, Clone, Copy)]
pub struct EscalationLevelCasing(Casing);

impl EscalationLevelCasing {
    pub fn render(&self, level: EscalationLevel) -> &'static str {
        match self.0 {
            Casing::Lower => level.lowercase(),
            Casing::Upper => level.uppercase(),
            Casing::Title => level.titlecase(),
        }
    }

    /// Inserts and immediately rolls back a scratch row for each candidate casing, in
    /// order, until one is accepted by the `escalations.level` constraint. Lowercase is
    /// tried first since it matches this codebase's own convention everywhere else; the
    /// other two exist only because the original deployment's schema was never pinned to
    /// one casing.
    pub async fn probe(pool: &PgPool) -> Result<Self, sqlx::Error> {
        for candidate in CANDIDATES {
            let rendered = match candidate {
                Casing::Lower => EscalationLevel::Standard.lowercase(),
                Casing::Upper => EscalationLevel::Standard.uppercase(),
                Casing::Title => EscalationLevel::Standard.titlecase(),
            };

            let mut tx = pool.begin().await?;
            let accepted = sqlx::query("INSERT INTO escalations (department_id, grievance_id, level) VALUES (NULL, NULL, $1)")
                .bind(rendered)
                .execute(&mut *tx)
                .await
                .is_ok();
            tx.rollback().await?;

            if accepted {
                return Ok(Self(candidate));
            }
        }

        // Every candidate failed the probe (e.g. the scratch row violated a NOT NULL
        // constraint unrelated to casing); default to lowercase rather than fail startup.
        Ok(Self(Casing::Lower))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_critical_to_immediate() {
        assert_eq!(EscalationLevel::from_trigger_counts(true, 0), EscalationLevel::Immediate);
    }

    #[test]
    fn maps_two_high_to_urgent() {
        assert_eq!(EscalationLevel::from_trigger_counts(false, 2), EscalationLevel::Urgent);
    }

    #[test]
    fn maps_one_high_to_priority() {
        assert_eq!(EscalationLevel::from_trigger_counts(false, 1), EscalationLevel::Priority);
    }

    #[test]
    fn maps_none_to_standard() {
        assert_eq!(EscalationLevel::from_trigger_counts(false, 0), EscalationLevel::Standard);
    }

    #[test]
    fn scenario_six_evaluates_to_urgent() {
        let (has_critical, high_count) = EscalationLevel::evaluate_triggers(6, 2, 0, 42.0, 60.0);
        assert!(!has_critical);
        assert_eq!(high_count, 2);
        assert_eq!(EscalationLevel::from_trigger_counts(has_critical, high_count), EscalationLevel::Urgent);
    }

    #[test]
    fn critical_count_overrides_to_immediate_regardless_of_high_count() {
        let (has_critical, _) = EscalationLevel::evaluate_triggers(0, 0, 1, 90.0, 90.0);
        assert!(has_critical);
        assert_eq!(EscalationLevel::from_trigger_counts(has_critical, 0), EscalationLevel::Immediate);
    }

    #[test]
    fn render_uses_resolved_casing() {
        let casing = EscalationLevelCasing(Casing::Upper);
        assert_eq!(casing.render(EscalationLevel::Urgent), "URGENT");
    }
}
