use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use finsync_core::{EntityKey, IntentTransition};
use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classify::{classify, ErrorClass};
use crate::error::SyncError;
use crate::events::SyncEvent;
use crate::routine::{RoutineContext, SyncRoutine};
use crate::sessions::close_session;
use crate::types::{routine_timeout, DateRange, ExecutionOutcome, SyncSummary};

use super::core::lock;
use super::SyncController;

/// Membership in the running set, released on drop.
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<EntityKey>>,
    key: EntityKey,
}

impl<'a> RunningGuard<'a> {
    fn claim(running: &'a Mutex<HashSet<EntityKey>>, key: &EntityKey) -> Option<Self> {
        if !lock(running).insert(key.clone()) {
            return None;
        }
        Some(Self {
            running,
            key: key.clone(),
        })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        lock(self.running).remove(&self.key);
    }
}

impl SyncController {
    /// Sync one entity now for today's date.
    pub async fn sync_now(self: &Arc<Self>, key: &EntityKey) -> ExecutionOutcome {
        info!(entity = %key, "Manual sync requested");
        self.execute_entity(key, self.clock.today(), 1).await
    }

    /// Sync every enabled entity concurrently.
    pub async fn sync_all(self: &Arc<Self>) -> Vec<(EntityKey, ExecutionOutcome)> {
        let today = self.clock.today();
        let keys: Vec<EntityKey> = self.enabled_entities().into_iter().map(|(k, _)| k).collect();
        info!(entities = keys.len(), "Syncing all enabled entities");

        let outcomes = join_all(keys.iter().map(|key| self.execute_entity(key, today, 1))).await;
        keys.into_iter().zip(outcomes).collect()
    }

    /// One guarded execution of `key` for `date`. `attempt` counts from 1.
    pub async fn execute_entity(
        self: &Arc<Self>,
        key: &EntityKey,
        date: NaiveDate,
        attempt: u32,
    ) -> ExecutionOutcome {
        let Some(guard) = RunningGuard::claim(&self.running, key) else {
            info!(entity = %key, attempt, "Sync already running, skipping");
            return ExecutionOutcome::AlreadyRunning;
        };

        match self.ledger.has_completed_on(key.kind, key, date).await {
            Ok(true) => {
                info!(entity = %key, %date, "Already completed for this date, skipping");
                return ExecutionOutcome::AlreadyCompleted;
            }
            Ok(false) => {}
            Err(e) => warn!(entity = %key, %date, error = %e, "Could not check the date's intent"),
        }

        if let Err(e) = self.ensure_intent_exists(key, date).await {
            warn!(entity = %key, %date, error = %e, "Failed to record intent");
        }

        let execution_id = Uuid::new_v4();
        lock(&self.in_flight).insert(key.clone(), date);
        self.record(key, date, IntentTransition::Running { execution_id }).await;
        self.events.publish(SyncEvent::Started {
            entity: key.clone(),
            attempt,
            execution_id,
        });
        info!(entity = %key, %date, attempt, %execution_id, "Sync started");

        let Some(routine) = self.routines.get(&key.kind).cloned() else {
            let reason = format!("No sync routine registered for {} entities", key.kind);
            warn!(entity = %key, "{reason}");
            let outcome = self.skip(key, date, reason).await;
            lock(&self.in_flight).remove(key);
            return outcome;
        };

        let started = tokio::time::Instant::now();
        let range = DateRange::ending(date, self.config.sync_range_days);
        let result = self
            .run_in_session(key, routine.as_ref(), range, attempt, execution_id)
            .await;

        self.metrics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .record_execution(&key.to_string(), started.elapsed(), result.is_ok());

        let outcome = match result {
            Ok(summary) => self.complete(key, date, summary).await,
            Err(e) => self.fail(key, date, attempt, e).await,
        };
        lock(&self.in_flight).remove(key);

        // The retry must not find its own entity still marked running.
        drop(guard);
        if let ExecutionOutcome::RetryScheduled { next_attempt, error } = &outcome {
            if !self.schedule_retry(key.clone(), date, *next_attempt) {
                warn!(entity = %key, attempt, "Controller stopped, retry dropped");
                return self.give_up(key, date, error.clone()).await;
            }
        }
        outcome
    }

    /// Launch a session, run the routine under the per-kind budget, and
    /// always close the session afterwards.
    async fn run_in_session(
        &self,
        key: &EntityKey,
        routine: &dyn SyncRoutine,
        range: DateRange,
        attempt: u32,
        execution_id: Uuid,
    ) -> Result<SyncSummary, SyncError> {
        let budget = routine_timeout(&self.config, key.kind);
        let profile_dir = self.profile_root.join(key.kind.as_str()).join(&key.id);

        let work = async {
            let session = self.driver.launch(&profile_dir).await?;
            self.sessions.register(key, Arc::clone(&session));
            debug!(entity = %key, session = session.id(), "Browser session launched");
            routine
                .run(RoutineContext {
                    entity: key,
                    session: session.as_ref(),
                    range,
                    attempt,
                    execution_id,
                })
                .await
        };

        let result = match tokio::time::timeout(budget, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(entity = %key, attempt, ?budget, "Sync routine timed out");
                Err(SyncError::Timeout(budget))
            }
        };

        if let Some(session) = self.sessions.remove(key) {
            close_session(session.as_ref(), self.config.session_close_timeout()).await;
        }
        result
    }

    async fn complete(&self, key: &EntityKey, date: NaiveDate, summary: SyncSummary) -> ExecutionOutcome {
        let text = summary.to_string();
        self.record(key, date, IntentTransition::Completed { summary: Some(text.clone()) })
            .await;
        info!(entity = %key, %date, %summary, "Sync completed");

        if let Some(export) = &self.export {
            match export.export_snapshot().await {
                Ok(result) if result.success => {
                    info!(entity = %key, url = ?result.url, "Snapshot exported");
                }
                Ok(_) => warn!(entity = %key, "Snapshot export reported failure"),
                Err(e) => warn!(entity = %key, error = %e, "Snapshot export failed"),
            }
        }

        if let Some(artifacts) = &self.artifacts {
            match artifacts.cleanup(key).await {
                Ok(removed) => debug!(entity = %key, removed, "Downloaded artifacts removed"),
                Err(e) => warn!(entity = %key, error = %e, "Artifact cleanup failed"),
            }
        }

        self.events.publish(SyncEvent::Completed {
            entity: key.clone(),
            summary: text,
        });
        ExecutionOutcome::Completed(summary)
    }

    async fn fail(&self, key: &EntityKey, date: NaiveDate, attempt: u32, e: SyncError) -> ExecutionOutcome {
        let message = e.to_string();

        if classify(&e) == ErrorClass::Permanent {
            warn!(entity = %key, attempt, error = %message, "Permanent sync failure, not retrying");
            return self.skip(key, date, message).await;
        }

        let stopped = self.stopped.load(Ordering::SeqCst);
        if attempt <= self.config.retry_count && !stopped {
            let next_attempt = attempt + 1;
            warn!(
                entity = %key,
                attempt,
                next_attempt,
                delay_minutes = self.config.retry_delay_minutes,
                error = %message,
                "Sync failed, retry scheduled"
            );
            self.record(key, date, IntentTransition::Retrying { error: message.clone() })
                .await;
            self.events.publish(SyncEvent::Failed {
                entity: key.clone(),
                error: message.clone(),
                will_retry: true,
            });
            self.events.publish(SyncEvent::RetryScheduled {
                entity: key.clone(),
                attempt: next_attempt,
                date,
            });
            return ExecutionOutcome::RetryScheduled {
                next_attempt,
                error: message,
            };
        }

        if stopped {
            warn!(entity = %key, attempt, error = %message, "Sync failed after controller stop, not retrying");
        } else {
            error!(entity = %key, attempt, error = %message, "Sync failed, retries exhausted");
        }
        self.give_up(key, date, message).await
    }

    async fn give_up(&self, key: &EntityKey, date: NaiveDate, error: String) -> ExecutionOutcome {
        self.record(key, date, IntentTransition::Failed { error: error.clone() })
            .await;
        self.events.publish(SyncEvent::Failed {
            entity: key.clone(),
            error: error.clone(),
            will_retry: false,
        });
        ExecutionOutcome::Failed { error }
    }

    async fn skip(&self, key: &EntityKey, date: NaiveDate, reason: String) -> ExecutionOutcome {
        self.record(key, date, IntentTransition::Skipped { reason: reason.clone() })
            .await;
        self.events.publish(SyncEvent::Skipped {
            entity: key.clone(),
            reason: reason.clone(),
        });
        ExecutionOutcome::Skipped { reason }
    }

    /// Plain fn so the retry task does not make `execute_entity` recursive.
    /// Returns `false` once the controller is stopped.
    fn schedule_retry(self: &Arc<Self>, key: EntityKey, date: NaiveDate, attempt: u32) -> bool {
        // Checked under the lock `stop` drains, so a retry is either refused
        // here or aborted there.
        let mut retries = lock(&self.retries);
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }

        let this = Arc::clone(self);
        let delay = self.config.retry_delay();
        let entity = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.execute_entity(&entity, date, attempt).await;
        });
        retries.retain(|_, h| !h.is_finished());
        // The replaced handle may belong to the task calling us; let it finish.
        retries.insert(key, handle);
        true
    }

    pub(super) fn spawn_execution(self: &Arc<Self>, key: EntityKey, date: NaiveDate, attempt: u32) {
        let mut executions = lock(&self.executions);
        if self.stopped.load(Ordering::SeqCst) {
            debug!(entity = %key, %date, "Controller stopped, execution not spawned");
            return;
        }

        let this = Arc::clone(self);
        while executions.try_join_next().is_some() {}
        executions.spawn(async move {
            this.execute_entity(&key, date, attempt).await;
        });
    }

    async fn ensure_intent_exists(&self, key: &EntityKey, date: NaiveDate) -> Result<(), SyncError> {
        if self.ledger.intent_exists_for_date(key.kind, key, date).await? {
            return Ok(());
        }
        let time_of_day = self
            .schedule_for(key)
            .map(|s| s.time_of_day)
            .unwrap_or_else(|| self.clock.now().time());
        self.ensure_intent(key, date, time_of_day).await?;
        Ok(())
    }

    /// Ledger writes never abort an execution; a failed write is logged.
    pub(super) async fn record(&self, key: &EntityKey, date: NaiveDate, transition: IntentTransition) {
        if let Err(e) = self.ledger.transition(key.kind, key, date, transition).await {
            warn!(entity = %key, %date, error = %e, "Failed to update intent");
        }
    }
}
