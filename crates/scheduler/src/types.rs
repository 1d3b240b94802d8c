use std::time::Duration;

use chrono::NaiveDate;
use finsync_core::config::SyncConfig;
use finsync_core::EntityKind;
use serde::Serialize;

/// Inclusive date range of transactions fetched in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The `days` days ending on `end`.
    pub fn ending(end: NaiveDate, days: u32) -> Self {
        let back = chrono::Duration::days(i64::from(days.max(1)) - 1);
        Self {
            start: end - back,
            end,
        }
    }
}

/// Totals reported by a successful sync routine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub accounts: usize,
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
}

impl std::fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} accounts, {} fetched, {} inserted, {} skipped",
            self.accounts, self.fetched, self.inserted, self.skipped
        )
    }
}

/// What one call of the execution routine did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed(SyncSummary),
    /// Another execution of the same entity holds the running guard.
    AlreadyRunning,
    AlreadyCompleted,
    Skipped { reason: String },
    RetryScheduled { next_attempt: u32, error: String },
    Failed { error: String },
}

/// Hard wall-clock budget for one sync of `kind`.
pub fn routine_timeout(config: &SyncConfig, kind: EntityKind) -> Duration {
    let secs = match kind {
        EntityKind::Bank => config.bank_timeout_secs,
        EntityKind::Card => config.card_timeout_secs,
        EntityKind::Tax => config.tax_timeout_secs,
    };
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_is_inclusive() {
        let end = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let r = DateRange::ending(end, 7);
        assert_eq!(r.start, NaiveDate::from_ymd_opt(2026, 3, 4).unwrap());
        assert_eq!(DateRange::ending(end, 0).start, end);
    }

    #[test]
    fn tax_gets_longer_timeout() {
        let config = SyncConfig::default();
        assert_eq!(routine_timeout(&config, EntityKind::Card), Duration::from_secs(600));
        assert_eq!(routine_timeout(&config, EntityKind::Bank), Duration::from_secs(600));
        assert_eq!(routine_timeout(&config, EntityKind::Tax), Duration::from_secs(900));
    }
}
