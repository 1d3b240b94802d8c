//! `schedules.json`: entity key to daily schedule, e.g.
//! `{"card:shinhan": {"enabled": true, "time": "04:00"}}`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use finsync_core::{EntityKey, EntitySchedule};
use tracing::{debug, warn};

pub type ScheduleMap = BTreeMap<EntityKey, EntitySchedule>;

/// Load schedules from `path`. A missing file means no entities.
pub fn load(path: &Path) -> Result<ScheduleMap> {
    if !path.exists() {
        warn!(path = %path.display(), "No schedules file, nothing is scheduled");
        return Ok(ScheduleMap::new());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let schedules: ScheduleMap = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    debug!(path = %path.display(), entities = schedules.len(), "Schedules loaded");
    Ok(schedules)
}
