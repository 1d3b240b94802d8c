//! Intent ledger backends.
//!
//! Both keep the rows in memory behind a std mutex and never hold it across
//! an await. [`JsonIntentLedger`] rewrites its file after every change on the
//! blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use finsync_core::{EntityKey, EntityKind, ExecutionIntent, IntentLedger, IntentTransition, LedgerError};
use tracing::{debug, info};

/// Insert `intent` unless its (type, task, date) exists. A non-terminal
/// existing row takes the new time and window.
fn upsert(rows: &mut Vec<ExecutionIntent>, intent: &ExecutionIntent) -> bool {
    let existing = rows
        .iter_mut()
        .find(|r| r.matches(intent.scheduler_type, &intent.task_id, intent.intended_date));

    match existing {
        Some(row) => {
            if !row.status.is_terminal() {
                row.intended_time = intent.intended_time;
                row.execution_window_start = intent.execution_window_start;
                row.execution_window_end = intent.execution_window_end;
                row.task_name = intent.task_name.clone();
            }
            false
        }
        None => {
            rows.push(intent.clone());
            true
        }
    }
}

fn apply_transition(
    rows: &mut [ExecutionIntent],
    kind: EntityKind,
    task_id: &EntityKey,
    date: NaiveDate,
    transition: &IntentTransition,
) -> Result<(), LedgerError> {
    let row = rows
        .iter_mut()
        .find(|r| r.matches(kind, task_id, date))
        .ok_or_else(|| LedgerError::NotFound {
            task_id: task_id.clone(),
            date,
        })?;
    row.apply(transition);
    debug!(entity = %task_id, %date, status = %row.status, "intent updated");
    Ok(())
}

fn select(rows: &[ExecutionIntent], date: Option<NaiveDate>) -> Vec<ExecutionIntent> {
    let mut out: Vec<ExecutionIntent> = rows
        .iter()
        .filter(|r| date.map_or(true, |d| r.intended_date == d))
        .cloned()
        .collect();
    out.sort_by_key(|r| (r.intended_date, r.task_id.to_string()));
    out
}

fn lock(rows: &Mutex<Vec<ExecutionIntent>>) -> MutexGuard<'_, Vec<ExecutionIntent>> {
    rows.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct InMemoryIntentLedger {
    rows: Mutex<Vec<ExecutionIntent>>,
}

impl InMemoryIntentLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentLedger for InMemoryIntentLedger {
    async fn create_intent(&self, intent: &ExecutionIntent) -> Result<bool, LedgerError> {
        Ok(upsert(&mut lock(&self.rows), intent))
    }

    async fn transition(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
        transition: IntentTransition,
    ) -> Result<(), LedgerError> {
        apply_transition(&mut lock(&self.rows), kind, task_id, date, &transition)
    }

    async fn get_intent(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
    ) -> Result<Option<ExecutionIntent>, LedgerError> {
        Ok(lock(&self.rows)
            .iter()
            .find(|r| r.matches(kind, task_id, date))
            .cloned())
    }

    async fn list_intents(&self, date: Option<NaiveDate>) -> Result<Vec<ExecutionIntent>, LedgerError> {
        Ok(select(&lock(&self.rows), date))
    }
}

fn write_atomic(path: &Path, data: &str) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// File-backed ledger: a JSON array of intents, rewritten on every change.
///
/// `write_lock` orders the file writes; snapshots are taken under it so a
/// later change never lands on disk before an earlier one.
pub struct JsonIntentLedger {
    path: PathBuf,
    rows: Mutex<Vec<ExecutionIntent>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonIntentLedger {
    pub fn open(path: PathBuf) -> Result<Self, LedgerError> {
        let rows = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            if data.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&data)?
            }
        } else {
            Vec::new()
        };
        info!(path = %path.display(), intents = rows.len(), "Intent ledger opened");
        Ok(Self {
            path,
            rows: Mutex::new(rows),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn persist(&self, snapshot: String) -> Result<(), LedgerError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &snapshot))
            .await
            .map_err(|e| LedgerError::Backend(format!("ledger write task failed: {e}")))?
    }
}

#[async_trait]
impl IntentLedger for JsonIntentLedger {
    async fn create_intent(&self, intent: &ExecutionIntent) -> Result<bool, LedgerError> {
        let _write = self.write_lock.lock().await;
        let (inserted, snapshot) = {
            let mut rows = lock(&self.rows);
            let inserted = upsert(&mut rows, intent);
            (inserted, serde_json::to_string_pretty(&*rows)?)
        };
        self.persist(snapshot).await?;
        Ok(inserted)
    }

    async fn transition(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
        transition: IntentTransition,
    ) -> Result<(), LedgerError> {
        let _write = self.write_lock.lock().await;
        let snapshot = {
            let mut rows = lock(&self.rows);
            apply_transition(&mut rows, kind, task_id, date, &transition)?;
            serde_json::to_string_pretty(&*rows)?
        };
        self.persist(snapshot).await
    }

    async fn get_intent(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
    ) -> Result<Option<ExecutionIntent>, LedgerError> {
        Ok(lock(&self.rows)
            .iter()
            .find(|r| r.matches(kind, task_id, date))
            .cloned())
    }

    async fn list_intents(&self, date: Option<NaiveDate>) -> Result<Vec<ExecutionIntent>, LedgerError> {
        Ok(select(&lock(&self.rows), date))
    }
}
