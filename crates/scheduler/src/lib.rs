//! Per-entity daily sync scheduling with intent-based crash recovery.
//!
//! The [`SyncController`] owns one timer per enabled entity, guards against
//! duplicate runs, enforces per-kind timeouts around browser sessions, and
//! classifies failures into retryable and permanent ones.

pub mod classify;
pub mod collaborators;
pub mod controller;
pub mod error;
pub mod events;
pub mod keep_awake;
pub mod metrics;
pub mod routine;
pub mod sessions;
pub mod timing;
pub mod types;

#[cfg(test)]
mod test_support;

pub use classify::{classify, ErrorClass};
pub use collaborators::{
    AccountInfo, DownloadArtifacts, ExportResult, ExportService, ImportResult, SyncMetadata,
    TransactionRow, TransactionStore,
};
pub use controller::{backfill_intents, SyncController, SyncControllerBuilder};
pub use error::SyncError;
pub use events::{EventBus, SyncEvent};
pub use keep_awake::{KeepAwake, NoopKeepAwake, ProcessKeepAwake};
pub use metrics::SyncMetrics;
pub use routine::{InstitutionAutomator, InstitutionSyncRoutine, LoginForm, SyncRoutine};
pub use timing::{Clock, SystemClock};
pub use types::{DateRange, ExecutionOutcome, SyncSummary};
