use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use finsync_core::{EntityKey, EntitySchedule, ExecutionIntent, IntentLedger, IntentStatus, IntentTransition};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::events::SyncEvent;
use crate::timing::{next_fire, until};

use super::core::lock;
use super::SyncController;

const STOPPED: &str = "controller stopped";

/// For each enabled entity and each of the `days` days before `today`,
/// insert a pending intent where none exists. Returns the number created.
pub async fn backfill_intents(
    ledger: &dyn IntentLedger,
    schedules: &BTreeMap<EntityKey, EntitySchedule>,
    today: NaiveDate,
    days: u32,
    window: chrono::Duration,
) -> Result<usize, SyncError> {
    let mut missing = Vec::new();
    for (key, schedule) in schedules.iter().filter(|(_, s)| s.enabled) {
        for back in 1..=i64::from(days) {
            let date = today - chrono::Duration::days(back);
            if ledger.intent_exists_for_date(key.kind, key, date).await? {
                continue;
            }
            missing.push(ExecutionIntent::pending(
                key,
                key.id.clone(),
                date,
                schedule.time_of_day,
                window,
            ));
        }
    }

    let created = if missing.is_empty() {
        0
    } else {
        ledger.bulk_create_intents(&missing).await?
    };
    info!(days, candidates = missing.len(), created, "Intent backfill finished");
    Ok(created)
}

impl SyncController {
    /// Take over `schedules`, backfill missed intents when built with
    /// startup backfill, and arm one timer per enabled entity. Disabled
    /// entities get neither a timer nor an intent.
    pub async fn start(self: &Arc<Self>, schedules: BTreeMap<EntityKey, EntitySchedule>) -> Result<(), SyncError> {
        if self.config.keep_awake {
            if let Err(e) = self.keep_awake.acquire() {
                warn!(error = %e, "Could not inhibit system sleep");
            }
        }
        self.stopped.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        *lock(&self.schedules) = schedules;

        if self.startup_backfill {
            self.backfill(self.config.backfill_days).await?;
        }

        for (key, schedule) in self.schedules() {
            if schedule.enabled {
                self.arm_timer(key, schedule.time_of_day);
            } else {
                debug!(entity = %key, "schedule disabled, no timer");
            }
        }

        info!(timers = lock(&self.timers).len(), "Sync controller started");
        Ok(())
    }

    /// Replace the schedule of one entity. Disabling removes its timer.
    pub fn reschedule(self: &Arc<Self>, key: EntityKey, schedule: EntitySchedule) {
        if let Some(old) = lock(&self.timers).remove(&key) {
            old.abort();
        }
        lock(&self.schedules).insert(key.clone(), schedule.clone());

        if schedule.enabled && self.active.load(Ordering::SeqCst) {
            info!(entity = %key, time = %schedule.time_of_day.format("%H:%M"), "Rescheduled");
            self.arm_timer(key, schedule.time_of_day);
        } else {
            info!(entity = %key, "Schedule cleared");
        }
    }

    /// Create pending intents for the last `days` days for every enabled
    /// entity that has none. Returns the number created.
    pub async fn backfill(&self, days: u32) -> Result<usize, SyncError> {
        let schedules = self.schedules();
        let created = backfill_intents(
            self.ledger.as_ref(),
            &schedules,
            self.clock.today(),
            days,
            self.config.execution_window(),
        )
        .await?;
        self.events.publish(SyncEvent::Backfilled { created });
        Ok(created)
    }

    /// Abort every timer, retry and timer-spawned execution, force-close all
    /// browser sessions in parallel, mark aborted intents failed, and release
    /// keep-awake. Returns once sessions are gone.
    ///
    /// A manual run still in progress keeps its entity running until it
    /// returns, and records its failure without scheduling a retry.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);

        let timers: Vec<_> = lock(&self.timers).drain().collect();
        for (_, handle) in &timers {
            handle.abort();
        }
        let retries: Vec<_> = lock(&self.retries).drain().collect();
        for (_, handle) in &retries {
            handle.abort();
        }
        let retry_count = retries.len();
        for (_, handle) in retries {
            let _ = handle.await;
        }

        let mut executions = std::mem::replace(&mut *lock(&self.executions), JoinSet::new());
        executions.abort_all();
        while executions.join_next().await.is_some() {}
        info!(timers = timers.len(), retries = retry_count, "Timers cleared");

        let closed = self
            .sessions
            .close_all(self.config.shutdown_close_timeout())
            .await;
        self.fail_aborted().await;

        if self.config.keep_awake {
            self.keep_awake.release();
        }
        info!(sessions = closed.len(), "Sync controller stopped");
    }

    /// Executions aborted mid-run leave their `in_flight` entry behind with
    /// no running guard. Their intents go from running to failed.
    async fn fail_aborted(&self) {
        let aborted: Vec<(EntityKey, NaiveDate)> = {
            let running = lock(&self.running);
            let mut in_flight = lock(&self.in_flight);
            let keys: Vec<EntityKey> = in_flight.keys().filter(|k| !running.contains(*k)).cloned().collect();
            keys.iter().filter_map(|k| in_flight.remove_entry(k)).collect()
        };

        for (key, date) in aborted {
            match self.ledger.get_intent(key.kind, &key, date).await {
                Ok(Some(intent)) if intent.status == IntentStatus::Running => {
                    warn!(entity = %key, %date, "Execution aborted by stop");
                    self.record(&key, date, IntentTransition::Failed { error: STOPPED.to_string() })
                        .await;
                    self.events.publish(SyncEvent::Failed {
                        entity: key.clone(),
                        error: STOPPED.to_string(),
                        will_retry: false,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!(entity = %key, %date, error = %e, "Could not read aborted intent"),
            }
        }
    }

    pub(super) fn arm_timer(self: &Arc<Self>, key: EntityKey, time_of_day: NaiveTime) {
        let this = Arc::clone(self);
        let entity = key.clone();
        let handle = tokio::spawn(async move { this.timer_loop(entity, time_of_day).await });
        if let Some(old) = lock(&self.timers).insert(key, handle) {
            old.abort();
        }
    }

    /// Sleep until each fire time. The following day's intent is written
    /// before the due execution starts.
    async fn timer_loop(self: Arc<Self>, key: EntityKey, time_of_day: NaiveTime) {
        let mut fire_at = next_fire(self.clock.now(), time_of_day);
        self.announce(&key, fire_at, time_of_day).await;

        loop {
            tokio::time::sleep(until(self.clock.now(), fire_at)).await;

            let due = fire_at.date();
            fire_at = next_fire(self.clock.now().max(fire_at), time_of_day);
            self.announce(&key, fire_at, time_of_day).await;

            info!(entity = %key, date = %due, "Scheduled sync firing");
            self.spawn_execution(key.clone(), due, 1);
        }
    }

    async fn announce(&self, key: &EntityKey, fire_at: NaiveDateTime, time_of_day: NaiveTime) {
        if let Err(e) = self.ensure_intent(key, fire_at.date(), time_of_day).await {
            warn!(entity = %key, error = %e, "Failed to record intent");
        }
        debug!(entity = %key, %fire_at, "Next sync scheduled");
        self.events.publish(SyncEvent::Scheduled {
            entity: key.clone(),
            fire_at,
        });
    }

    /// Create the intent for (`key`, `date`) with the configured window.
    pub(super) async fn ensure_intent(
        &self,
        key: &EntityKey,
        date: NaiveDate,
        time_of_day: NaiveTime,
    ) -> Result<bool, SyncError> {
        let intent = ExecutionIntent::pending(
            key,
            key.id.clone(),
            date,
            time_of_day,
            self.config.execution_window(),
        );
        Ok(self.ledger.create_intent(&intent).await?)
    }
}
