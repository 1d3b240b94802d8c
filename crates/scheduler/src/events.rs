use chrono::NaiveDate;
use finsync_core::EntityKey;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Lifecycle notifications published by the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Scheduled { entity: EntityKey, fire_at: chrono::NaiveDateTime },
    Started { entity: EntityKey, attempt: u32, execution_id: Uuid },
    Completed { entity: EntityKey, summary: String },
    Failed { entity: EntityKey, error: String, will_retry: bool },
    Skipped { entity: EntityKey, reason: String },
    RetryScheduled { entity: EntityKey, attempt: u32, date: NaiveDate },
    Backfilled { created: usize },
}

/// Fan-out channel for [`SyncEvent`]s. Slow subscribers lag, they never
/// block the controller.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
