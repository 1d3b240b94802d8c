use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-entity execution statistics, keyed by entity key string.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncMetrics {
    /// Finished executions (any outcome) by entity.
    pub executions: HashMap<String, u64>,
    /// Executions that ended in an error by entity.
    pub failures: HashMap<String, u64>,
    /// Average execution duration by entity.
    pub avg_duration: HashMap<String, Duration>,
    /// Last finished execution by entity.
    pub last_run: HashMap<String, DateTime<Utc>>,
}

impl SyncMetrics {
    pub fn record_execution(&mut self, entity: &str, duration: Duration, success: bool) {
        let count = {
            let c = self.executions.entry(entity.to_string()).or_default();
            *c += 1;
            *c
        };
        if !success {
            *self.failures.entry(entity.to_string()).or_default() += 1;
        }
        self.last_run.insert(entity.to_string(), Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let prev = self.avg_duration.get(entity).copied().unwrap_or_default();
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            Duration::from_nanos((prev_nanos + (cur_nanos - prev_nanos) / count as f64) as u64)
        };
        self.avg_duration.insert(entity.to_string(), new_avg);
    }

    pub fn failure_count(&self, entity: &str) -> u64 {
        self.failures.get(entity).copied().unwrap_or(0)
    }
}
