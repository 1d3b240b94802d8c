//! Execution intents: the durable "this entity should run in this window" record.
//!
//! The ledger itself is an external transactional store. This module only
//! defines the record, its status machine, and the [`IntentLedger`] contract
//! the scheduler consumes.

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{EntityKey, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Running,
    /// Failed, with a retry already scheduled.
    Retrying,
    Completed,
    Failed,
    Skipped,
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Completed | IntentStatus::Failed | IntentStatus::Skipped)
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Running => "running",
            IntentStatus::Retrying => "retrying",
            IntentStatus::Completed => "completed",
            IntentStatus::Failed => "failed",
            IntentStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// One intended run of one entity on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionIntent {
    pub scheduler_type: EntityKind,
    pub task_id: EntityKey,
    pub task_name: String,
    pub intended_date: NaiveDate,
    pub intended_time: NaiveTime,
    pub execution_window_start: NaiveDateTime,
    pub execution_window_end: NaiveDateTime,
    pub status: IntentStatus,
    pub execution_id: Option<Uuid>,
    /// Number of times execution has started for this intent.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub updated_at: NaiveDateTime,
}

impl ExecutionIntent {
    /// Build a pending intent whose window opens at `date` + `time`.
    pub fn pending(
        key: &EntityKey,
        task_name: impl Into<String>,
        date: NaiveDate,
        time: NaiveTime,
        window: Duration,
    ) -> Self {
        let start = date.and_time(time);
        Self {
            scheduler_type: key.kind,
            task_id: key.clone(),
            task_name: task_name.into(),
            intended_date: date,
            intended_time: time,
            execution_window_start: start,
            execution_window_end: start + window,
            status: IntentStatus::Pending,
            execution_id: None,
            attempts: 0,
            error_message: None,
            summary: None,
            updated_at: Local::now().naive_local(),
        }
    }

    pub fn matches(&self, kind: EntityKind, task_id: &EntityKey, date: NaiveDate) -> bool {
        self.scheduler_type == kind && &self.task_id == task_id && self.intended_date == date
    }

    /// Apply a status transition in place.
    pub fn apply(&mut self, transition: &IntentTransition) {
        match transition {
            IntentTransition::Running { execution_id } => {
                self.status = IntentStatus::Running;
                self.execution_id = Some(*execution_id);
                self.attempts += 1;
                self.error_message = None;
            }
            IntentTransition::Completed { summary } => {
                self.status = IntentStatus::Completed;
                self.summary = summary.clone();
                self.error_message = None;
            }
            IntentTransition::Retrying { error } => {
                self.status = IntentStatus::Retrying;
                self.error_message = Some(error.clone());
            }
            IntentTransition::Failed { error } => {
                self.status = IntentStatus::Failed;
                self.error_message = Some(error.clone());
            }
            IntentTransition::Skipped { reason } => {
                self.status = IntentStatus::Skipped;
                self.error_message = Some(reason.clone());
            }
        }
        self.updated_at = Local::now().naive_local();
    }
}

/// A status change requested by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentTransition {
    Running { execution_id: Uuid },
    Completed { summary: Option<String> },
    Retrying { error: String },
    Failed { error: String },
    Skipped { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("no intent for {task_id} on {date}")]
    NotFound { task_id: EntityKey, date: NaiveDate },

    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("ledger backend error: {0}")]
    Backend(String),
}

/// Durable intent storage. Every call is a single-row operation; callers
/// never hold an in-process lock across one.
#[async_trait]
pub trait IntentLedger: Send + Sync {
    /// Insert an intent unless one already exists for the same
    /// (type, task, date). An existing non-terminal intent gets the new
    /// time and window. Returns `true` when a row was inserted.
    async fn create_intent(&self, intent: &ExecutionIntent) -> Result<bool, LedgerError>;

    /// Insert each intent with [`create_intent`](Self::create_intent)
    /// semantics. Returns the number of rows inserted.
    async fn bulk_create_intents(&self, intents: &[ExecutionIntent]) -> Result<usize, LedgerError> {
        let mut created = 0;
        for intent in intents {
            if self.create_intent(intent).await? {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Apply a transition to the intent for (type, task, date).
    async fn transition(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
        transition: IntentTransition,
    ) -> Result<(), LedgerError>;

    async fn get_intent(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
    ) -> Result<Option<ExecutionIntent>, LedgerError>;

    /// All intents, optionally restricted to one date.
    async fn list_intents(&self, date: Option<NaiveDate>) -> Result<Vec<ExecutionIntent>, LedgerError>;

    async fn intent_exists_for_date(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
    ) -> Result<bool, LedgerError> {
        Ok(self.get_intent(kind, task_id, date).await?.is_some())
    }

    /// Whether the entity's intent for `date` is already completed.
    async fn has_completed_on(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .get_intent(kind, task_id, date)
            .await?
            .is_some_and(|i| i.status == IntentStatus::Completed))
    }

    /// [`has_completed_on`](Self::has_completed_on) for the local date.
    async fn has_run_today(&self, kind: EntityKind, task_id: &EntityKey) -> Result<bool, LedgerError> {
        self.has_completed_on(kind, task_id, Local::now().date_naive()).await
    }

    async fn mark_running(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
        execution_id: Uuid,
    ) -> Result<(), LedgerError> {
        self.transition(kind, task_id, date, IntentTransition::Running { execution_id })
            .await
    }

    async fn mark_completed(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
        summary: Option<String>,
    ) -> Result<(), LedgerError> {
        self.transition(kind, task_id, date, IntentTransition::Completed { summary })
            .await
    }

    async fn mark_retrying(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
        error: &str,
    ) -> Result<(), LedgerError> {
        self.transition(kind, task_id, date, IntentTransition::Retrying { error: error.to_string() })
            .await
    }

    async fn mark_failed(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
        error: &str,
    ) -> Result<(), LedgerError> {
        self.transition(kind, task_id, date, IntentTransition::Failed { error: error.to_string() })
            .await
    }

    async fn mark_skipped(
        &self,
        kind: EntityKind,
        task_id: &EntityKey,
        date: NaiveDate,
        reason: &str,
    ) -> Result<(), LedgerError> {
        self.transition(kind, task_id, date, IntentTransition::Skipped { reason: reason.to_string() })
            .await
    }
}
