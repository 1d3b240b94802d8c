use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime};
use finsync_core::config::{Config, SyncConfig};
use finsync_core::{EntityKey, EntityKind, EntitySchedule, IntentLedger, IntentStatus};
use finsync_keypad::TypingEngine;
use finsync_store::{CredentialStore, InMemoryCredentialStore, InMemoryIntentLedger, SavedCredentials};
use tokio::sync::{broadcast, Notify};

use crate::collaborators::DownloadArtifacts;
use crate::events::SyncEvent;
use crate::routine::{InstitutionSyncRoutine, SyncRoutine};
use crate::test_support::{
    account, row, MockAutomator, MockDriver, MockExport, MockTransactions, PausedClock, RecordingKeepAwake,
    ScriptedRoutine, Step,
};
use crate::types::{ExecutionOutcome, SyncSummary};

use super::core::lock;
use super::{SyncController, SyncControllerBuilder};

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn today_at(h: u32, m: u32) -> NaiveDateTime {
    today().and_hms_opt(h, m, 0).unwrap()
}

fn config() -> SyncConfig {
    SyncConfig {
        keep_awake: false,
        ..SyncConfig::default()
    }
}

fn summary(inserted: usize) -> SyncSummary {
    SyncSummary {
        accounts: 1,
        fetched: inserted,
        inserted,
        skipped: 0,
    }
}

struct Harness {
    controller: Arc<SyncController>,
    ledger: Arc<InMemoryIntentLedger>,
    driver: Arc<MockDriver>,
}

fn harness(kind: EntityKind, routine: Arc<dyn SyncRoutine>) -> Harness {
    harness_with(config(), MockDriver::default(), kind, routine)
}

fn harness_with(config: SyncConfig, driver: MockDriver, kind: EntityKind, routine: Arc<dyn SyncRoutine>) -> Harness {
    harness_built(config, driver, |b| b.routine(kind, routine))
}

/// Harness whose builder gets a final touch from `customize`.
fn harness_built(
    config: SyncConfig,
    driver: MockDriver,
    customize: impl FnOnce(SyncControllerBuilder) -> SyncControllerBuilder,
) -> Harness {
    let ledger = Arc::new(InMemoryIntentLedger::new());
    let driver = Arc::new(driver);
    let builder = SyncController::builder(config, ledger.clone(), driver.clone())
        .clock(PausedClock::starting_at(today_at(3, 0)))
        .profile_root("/tmp/finsync-profiles".into());
    let controller = customize(builder).build();
    Harness {
        controller,
        ledger,
        driver,
    }
}

fn daily(time: &str) -> EntitySchedule {
    EntitySchedule::daily_at(time).unwrap()
}

async fn status_of(ledger: &InMemoryIntentLedger, key: &EntityKey, date: NaiveDate) -> IntentStatus {
    ledger
        .get_intent(key.kind, key, date)
        .await
        .unwrap()
        .expect("intent exists")
        .status
}

/// Wait for the first event `pred` accepts.
async fn wait_for(rx: &mut broadcast::Receiver<SyncEvent>, pred: impl Fn(&SyncEvent) -> bool) -> SyncEvent {
    loop {
        let event = rx.recv().await.unwrap();
        if pred(&event) {
            return event;
        }
    }
}

// ── Scheduling ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn disabled_entity_gets_no_timer_or_intent() {
    let routine = ScriptedRoutine::new(vec![Step::Succeed(summary(0))]);
    let h = harness(EntityKind::Card, routine);
    let shinhan = EntityKey::card("shinhan");
    let hyundai = EntityKey::card("hyundai");

    let schedules = BTreeMap::from([
        (shinhan.clone(), daily("04:00").disabled()),
        (hyundai.clone(), daily("05:00")),
    ]);
    let mut rx = h.controller.subscribe();
    h.controller.start(schedules).await.unwrap();
    wait_for(&mut rx, |e| matches!(e, SyncEvent::Scheduled { .. })).await;

    assert_eq!(h.controller.scheduled_entities(), vec![hyundai.clone()]);
    let intents = h.ledger.list_intents(None).await.unwrap();
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].task_id, hyundai);
    assert!(!h.ledger.intent_exists_for_date(EntityKind::Card, &shinhan, today()).await.unwrap());

    h.controller.stop().await;
    assert!(h.controller.scheduled_entities().is_empty());
}

#[tokio::test(start_paused = true)]
async fn intent_is_created_when_scheduled_not_when_fired() {
    let routine = ScriptedRoutine::new(vec![Step::Succeed(summary(0))]);
    let h = harness(EntityKind::Card, routine.clone());
    let key = EntityKey::card("shinhan");

    let mut rx = h.controller.subscribe();
    h.controller
        .start(BTreeMap::from([(key.clone(), daily("04:00"))]))
        .await
        .unwrap();
    let event = wait_for(&mut rx, |e| matches!(e, SyncEvent::Scheduled { .. })).await;

    assert_eq!(
        event,
        SyncEvent::Scheduled {
            entity: key.clone(),
            fire_at: today_at(4, 0)
        }
    );
    assert_eq!(status_of(&h.ledger, &key, today()).await, IntentStatus::Pending);
    assert_eq!(routine.call_count(), 0);
    h.controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reschedule_to_disabled_removes_timer() {
    let routine = ScriptedRoutine::new(vec![Step::Succeed(summary(0))]);
    let h = harness(EntityKind::Bank, routine);
    let key = EntityKey::bank("kookmin");

    h.controller
        .start(BTreeMap::from([(key.clone(), daily("04:00"))]))
        .await
        .unwrap();
    assert_eq!(h.controller.scheduled_entities(), vec![key.clone()]);

    h.controller.reschedule(key.clone(), daily("04:00").disabled());
    assert!(h.controller.scheduled_entities().is_empty());
    assert!(!h.controller.schedules()[&key].enabled);

    h.controller.reschedule(key.clone(), daily("06:30"));
    assert_eq!(h.controller.scheduled_entities(), vec![key]);
    h.controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn backfill_twice_creates_no_duplicates() {
    let routine = ScriptedRoutine::new(vec![Step::Succeed(summary(0))]);
    let h = harness_built(config(), MockDriver::default(), |b| {
        b.routine(EntityKind::Card, routine).startup_backfill(true)
    });
    let schedules = BTreeMap::from([
        (EntityKey::card("shinhan"), daily("04:00")),
        (EntityKey::card("hyundai"), daily("04:10")),
        (EntityKey::card("lotte"), daily("04:20").disabled()),
    ]);

    let mut rx = h.controller.subscribe();
    h.controller.start(schedules).await.unwrap();
    assert_eq!(
        wait_for(&mut rx, |e| matches!(e, SyncEvent::Backfilled { .. })).await,
        SyncEvent::Backfilled { created: 6 }
    );

    assert_eq!(h.controller.backfill(3).await.unwrap(), 0);

    let yesterday = today() - chrono::Duration::days(1);
    let rows = h.ledger.list_intents(Some(yesterday)).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == IntentStatus::Pending));
    assert!(rows.iter().all(|r| r.task_id != EntityKey::card("lotte")));
    h.controller.stop().await;
}

// ── Execution guards ─────────────────────────────────────────────

#[tokio::test]
async fn concurrent_execution_of_same_entity_is_a_noop() {
    let gate = Arc::new(Notify::new());
    let routine = ScriptedRoutine::new(vec![Step::Gate(gate.clone())]);
    let h = harness(EntityKind::Card, routine.clone());
    let key = EntityKey::card("shinhan");

    let controller = h.controller.clone();
    let first_key = key.clone();
    let first = tokio::spawn(async move { controller.sync_now(&first_key).await });
    routine.started.notified().await;
    assert!(h.controller.is_running(&key));

    assert_eq!(h.controller.sync_now(&key).await, ExecutionOutcome::AlreadyRunning);
    assert_eq!(h.driver.launch_count(), 1);

    gate.notify_one();
    assert!(matches!(first.await.unwrap(), ExecutionOutcome::Completed(_)));
    assert!(!h.controller.is_running(&key));
}

#[tokio::test]
async fn completed_today_performs_no_work() {
    let routine = ScriptedRoutine::new(vec![Step::Succeed(summary(1))]);
    let h = harness(EntityKind::Card, routine.clone());
    let key = EntityKey::card("shinhan");

    assert_eq!(h.controller.sync_now(&key).await, ExecutionOutcome::Completed(summary(1)));
    assert_eq!(h.controller.sync_now(&key).await, ExecutionOutcome::AlreadyCompleted);

    assert_eq!(routine.call_count(), 1);
    assert_eq!(h.driver.launch_count(), 1);
    assert_eq!(status_of(&h.ledger, &key, today()).await, IntentStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn completion_check_follows_the_execution_date() {
    let routine = ScriptedRoutine::new(vec![Step::Succeed(summary(1))]);
    let ledger = Arc::new(InMemoryIntentLedger::new());
    let driver = Arc::new(MockDriver::default());
    let controller = SyncController::builder(config(), ledger.clone(), driver.clone())
        .routine(EntityKind::Card, routine.clone())
        .clock(PausedClock::starting_at(today_at(23, 50)))
        .build();
    let key = EntityKey::card("shinhan");

    assert!(matches!(controller.sync_now(&key).await, ExecutionOutcome::Completed(_)));
    tokio::time::sleep(Duration::from_secs(20 * 60)).await;
    assert!(matches!(controller.sync_now(&key).await, ExecutionOutcome::Completed(_)));

    assert_eq!(routine.call_count(), 2);
    let tomorrow = today() + chrono::Duration::days(1);
    assert_eq!(status_of(&ledger, &key, today()).await, IntentStatus::Completed);
    assert_eq!(status_of(&ledger, &key, tomorrow).await, IntentStatus::Completed);
    assert_eq!(controller.sync_now(&key).await, ExecutionOutcome::AlreadyCompleted);
}

#[tokio::test]
async fn missing_routine_skips_entity() {
    let routine = ScriptedRoutine::new(vec![Step::Succeed(summary(1))]);
    let h = harness(EntityKind::Card, routine);
    let key = EntityKey::tax("1234567890");

    let outcome = h.controller.sync_now(&key).await;
    assert!(matches!(outcome, ExecutionOutcome::Skipped { .. }));
    assert_eq!(h.driver.launch_count(), 0);
    assert_eq!(status_of(&h.ledger, &key, today()).await, IntentStatus::Skipped);
}

// ── Failures and retries ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn transient_failure_retries_exactly_retry_count_times() {
    let routine = ScriptedRoutine::new(vec![Step::Fail("connection reset by peer")]);
    let h = harness(EntityKind::Card, routine.clone());
    let key = EntityKey::card("shinhan");
    let mut rx = h.controller.subscribe();
    let start = tokio::time::Instant::now();

    let first = h.controller.sync_now(&key).await;
    assert_eq!(
        first,
        ExecutionOutcome::RetryScheduled {
            next_attempt: 2,
            error: "connection reset by peer".into()
        }
    );
    assert_eq!(status_of(&h.ledger, &key, today()).await, IntentStatus::Retrying);
    assert!(!h.controller.is_running(&key));

    let mut retries = 0;
    loop {
        match rx.recv().await.unwrap() {
            SyncEvent::RetryScheduled { .. } => retries += 1,
            SyncEvent::Failed { will_retry: false, .. } => break,
            _ => {}
        }
    }

    assert_eq!(retries, 3);
    assert_eq!(routine.call_count(), 4);
    assert!(start.elapsed() >= Duration::from_secs(3 * 5 * 60));

    let intent = h.ledger.get_intent(EntityKind::Card, &key, today()).await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Failed);
    assert_eq!(intent.attempts, 4);
    assert_eq!(intent.error_message.as_deref(), Some("connection reset by peer"));
    assert_eq!(h.controller.metrics().failure_count(&key.to_string()), 4);
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_skips_without_retry() {
    let routine = ScriptedRoutine::new(vec![Step::Fail("Certificate not found for user")]);
    let h = harness(EntityKind::Card, routine.clone());
    let key = EntityKey::card("shinhan");

    let outcome = h.controller.sync_now(&key).await;
    assert_eq!(
        outcome,
        ExecutionOutcome::Skipped {
            reason: "Certificate not found for user".into()
        }
    );
    assert!(lock(&h.controller.retries).is_empty());

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(routine.call_count(), 1);
    assert_eq!(status_of(&h.ledger, &key, today()).await, IntentStatus::Skipped);
}

#[tokio::test(start_paused = true)]
async fn timeout_closes_session_then_retries() {
    let routine = ScriptedRoutine::new(vec![Step::Hang, Step::Succeed(summary(3))]);
    let h = harness(EntityKind::Card, routine.clone());
    let key = EntityKey::card("samsung");
    let mut rx = h.controller.subscribe();
    let start = tokio::time::Instant::now();

    let first = h.controller.sync_now(&key).await;
    assert!(matches!(first, ExecutionOutcome::RetryScheduled { next_attempt: 2, .. }));
    assert!(start.elapsed() >= Duration::from_secs(600));

    let sessions = h.driver.sessions();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].closed.load(Ordering::SeqCst));
    assert_eq!(h.controller.active_sessions(), 0);

    wait_for(&mut rx, |e| matches!(e, SyncEvent::Completed { .. })).await;
    assert_eq!(routine.call_count(), 2);
    assert_eq!(h.driver.launch_count(), 2);
    assert_eq!(status_of(&h.ledger, &key, today()).await, IntentStatus::Completed);
}

// ── Scenarios ────────────────────────────────────────────────────

fn saved(store: &InMemoryCredentialStore, key: &EntityKey) {
    store
        .set(
            key.kind.as_str(),
            &key.id,
            &SavedCredentials {
                user_id: "owner01".into(),
                password: "pw12".into(),
                certificate_password: None,
            },
        )
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn shinhan_card_daily_run() {
    let key = EntityKey::card("shinhan");
    let credentials = Arc::new(InMemoryCredentialStore::new());
    saved(&credentials, &key);
    let transactions = Arc::new(MockTransactions::default());
    let automator = Arc::new(MockAutomator {
        accounts: vec![account("4518")],
        rows: vec![row(1, -15_000), row(2, -3_200)],
        ..Default::default()
    });
    let routine = InstitutionSyncRoutine::new(
        credentials,
        transactions.clone(),
        TypingEngine::new(Duration::from_millis(100), Duration::from_millis(100)),
    )
    .with_automator("shinhan", automator);

    let downloads = tempfile::tempdir().unwrap();
    let artifacts = DownloadArtifacts::new(downloads.path().to_path_buf());
    std::fs::create_dir_all(artifacts.dir_for(&key)).unwrap();
    std::fs::write(artifacts.dir_for(&key).join("statement.xls"), b"rows").unwrap();

    let export = Arc::new(MockExport::default());
    let ledger = Arc::new(InMemoryIntentLedger::new());
    let driver = Arc::new(MockDriver::default());
    let controller = SyncController::builder(config(), ledger.clone(), driver.clone())
        .routine(EntityKind::Card, Arc::new(routine))
        .export(export.clone())
        .artifacts(artifacts.clone())
        .clock(PausedClock::starting_at(today_at(3, 59)))
        .build();

    let mut rx = controller.subscribe();
    controller
        .start(BTreeMap::from([(key.clone(), daily("04:00"))]))
        .await
        .unwrap();
    let done = wait_for(&mut rx, |e| matches!(e, SyncEvent::Completed { .. })).await;
    assert_eq!(
        done,
        SyncEvent::Completed {
            entity: key.clone(),
            summary: "1 accounts, 2 fetched, 2 inserted, 0 skipped".into()
        }
    );

    let intent = ledger.get_intent(EntityKind::Card, &key, today()).await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Completed);
    assert_eq!(intent.execution_window_start, today_at(4, 0));
    assert_eq!(intent.execution_window_end, today_at(4, 30));

    // Tomorrow was scheduled before today's run started.
    let tomorrow = today() + chrono::Duration::days(1);
    assert_eq!(status_of(&ledger, &key, tomorrow).await, IntentStatus::Pending);

    assert_eq!(*transactions.imports.lock().unwrap(), vec![(key.clone(), "4518".to_string(), 2)]);
    assert_eq!(export.calls.load(Ordering::SeqCst), 1);
    assert!(!artifacts.dir_for(&key).join("statement.xls").exists());
    assert!(driver.sessions()[0].closed.load(Ordering::SeqCst));
    assert_eq!(
        *driver.profile_dirs.lock().unwrap(),
        vec![std::path::PathBuf::from("profiles/card/shinhan")]
    );

    controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn kookmin_without_accounts_is_skipped() {
    let key = EntityKey::bank("kookmin");
    let credentials = Arc::new(InMemoryCredentialStore::new());
    saved(&credentials, &key);
    let routine = InstitutionSyncRoutine::new(
        credentials,
        Arc::new(MockTransactions::default()),
        TypingEngine::new(Duration::from_millis(100), Duration::from_millis(100)),
    )
    .with_automator("kookmin", Arc::new(MockAutomator::default()));
    let export = Arc::new(MockExport::default());

    let ledger = Arc::new(InMemoryIntentLedger::new());
    let controller = SyncController::builder(config(), ledger.clone(), Arc::new(MockDriver::default()))
        .routine(EntityKind::Bank, Arc::new(routine))
        .export(export.clone())
        .build();

    let outcome = controller.sync_now(&key).await;
    assert_eq!(
        outcome,
        ExecutionOutcome::Skipped {
            reason: "No accounts found for bank:kookmin".into()
        }
    );
    assert!(lock(&controller.retries).is_empty());
    assert_eq!(status_of(&ledger, &key, today()).await, IntentStatus::Skipped);
    assert_eq!(export.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_export_does_not_change_completion() {
    let routine = ScriptedRoutine::new(vec![Step::Succeed(summary(2))]);
    let ledger = Arc::new(InMemoryIntentLedger::new());
    let export = Arc::new(MockExport {
        fail: true,
        ..Default::default()
    });
    let controller = SyncController::builder(config(), ledger.clone(), Arc::new(MockDriver::default()))
        .routine(EntityKind::Card, routine)
        .export(export.clone())
        .build();
    let key = EntityKey::card("lotte");

    assert!(matches!(controller.sync_now(&key).await, ExecutionOutcome::Completed(_)));
    assert_eq!(export.calls.load(Ordering::SeqCst), 1);
    assert_eq!(status_of(&ledger, &key, today()).await, IntentStatus::Completed);
}

// ── Fan-out and shutdown ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn sync_all_runs_enabled_entities_concurrently() {
    let routine = ScriptedRoutine::new(vec![Step::Succeed(summary(1))]);
    let h = harness(EntityKind::Card, routine);
    let schedules = BTreeMap::from([
        (EntityKey::card("hyundai"), daily("04:00")),
        (EntityKey::card("shinhan"), daily("04:00")),
        (EntityKey::card("lotte"), daily("04:00").disabled()),
    ]);
    h.controller.start(schedules).await.unwrap();

    let results = h.controller.sync_all().await;

    let keys: Vec<String> = results.iter().map(|(k, _)| k.to_string()).collect();
    assert_eq!(keys, vec!["card:hyundai", "card:shinhan"]);
    assert!(results
        .iter()
        .all(|(_, o)| matches!(o, ExecutionOutcome::Completed(_))));
    assert_eq!(h.driver.launch_count(), 2);

    let mut dirs = h.driver.profile_dirs.lock().unwrap().clone();
    dirs.sort();
    assert_eq!(
        dirs,
        vec![
            std::path::PathBuf::from("/tmp/finsync-profiles/card/hyundai"),
            std::path::PathBuf::from("/tmp/finsync-profiles/card/shinhan"),
        ]
    );
    assert_eq!(h.controller.metrics().executions.len(), 2);
    h.controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_force_closes_hanging_sessions() {
    let routine = ScriptedRoutine::new(vec![Step::Hang]);
    let driver = MockDriver {
        hang_on_close: true,
        ..Default::default()
    };
    let h = harness_with(config(), driver, EntityKind::Tax, routine.clone());
    let key = EntityKey::tax("1234567890");

    let controller = h.controller.clone();
    let run_key = key.clone();
    let running = tokio::spawn(async move { controller.sync_now(&run_key).await });
    routine.started.notified().await;
    assert_eq!(h.controller.active_sessions(), 1);

    let start = tokio::time::Instant::now();
    h.controller.stop().await;

    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(h.controller.active_sessions(), 0);
    let sessions = h.driver.sessions();
    let session = &sessions[0];
    assert!(session.killed.load(Ordering::SeqCst));
    assert!(!session.closed.load(Ordering::SeqCst));

    // The manual run owns its entity until its task ends.
    assert!(h.controller.is_running(&key));
    running.abort();
    assert!(running.await.unwrap_err().is_cancelled());
    assert!(!h.controller.is_running(&key));
}

#[tokio::test(start_paused = true)]
async fn manual_run_failing_after_stop_is_not_retried() {
    let gate = Arc::new(Notify::new());
    let routine = ScriptedRoutine::new(vec![Step::GateThenFail(gate.clone(), "connection reset by peer")]);
    let h = harness(EntityKind::Card, routine.clone());
    let key = EntityKey::card("shinhan");
    h.controller
        .start(BTreeMap::from([(key.clone(), daily("04:00"))]))
        .await
        .unwrap();

    let controller = h.controller.clone();
    let run_key = key.clone();
    let manual = tokio::spawn(async move { controller.sync_now(&run_key).await });
    routine.started.notified().await;

    h.controller.stop().await;
    assert!(h.controller.is_running(&key));

    gate.notify_one();
    assert_eq!(
        manual.await.unwrap(),
        ExecutionOutcome::Failed {
            error: "connection reset by peer".into()
        }
    );
    assert!(!h.controller.is_running(&key));
    assert!(lock(&h.controller.retries).is_empty());

    tokio::time::sleep(Duration::from_secs(6 * 60)).await;
    assert_eq!(routine.call_count(), 1);
    assert_eq!(h.driver.launch_count(), 1);
    assert_eq!(status_of(&h.ledger, &key, today()).await, IntentStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_retry() {
    let routine = ScriptedRoutine::new(vec![Step::Fail("connection reset by peer")]);
    let h = harness(EntityKind::Card, routine.clone());
    let key = EntityKey::card("hyundai");

    let first = h.controller.sync_now(&key).await;
    assert!(matches!(first, ExecutionOutcome::RetryScheduled { next_attempt: 2, .. }));
    assert_eq!(lock(&h.controller.retries).len(), 1);

    h.controller.stop().await;
    assert!(lock(&h.controller.retries).is_empty());

    tokio::time::sleep(Duration::from_secs(6 * 60)).await;
    assert_eq!(routine.call_count(), 1);
    assert_eq!(h.driver.launch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_marks_aborted_scheduled_run_failed() {
    let routine = ScriptedRoutine::new(vec![Step::Hang]);
    let h = harness(EntityKind::Card, routine.clone());
    let key = EntityKey::card("shinhan");
    let mut rx = h.controller.subscribe();

    h.controller
        .start(BTreeMap::from([(key.clone(), daily("03:01"))]))
        .await
        .unwrap();
    routine.started.notified().await;
    assert!(h.controller.is_running(&key));

    h.controller.stop().await;

    assert!(!h.controller.is_running(&key));
    let intent = h.ledger.get_intent(EntityKind::Card, &key, today()).await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Failed);
    assert_eq!(intent.error_message.as_deref(), Some("controller stopped"));
    assert!(h.driver.sessions()[0].closed.load(Ordering::SeqCst));
    assert_eq!(
        wait_for(&mut rx, |e| matches!(e, SyncEvent::Failed { .. })).await,
        SyncEvent::Failed {
            entity: key.clone(),
            error: "controller stopped".into(),
            will_retry: false
        }
    );
}

// ── Host integration ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn keep_awake_is_held_from_start_to_stop() {
    let keep_awake = Arc::new(RecordingKeepAwake::default());
    let enabled = SyncConfig {
        keep_awake: true,
        ..SyncConfig::default()
    };
    let routine = ScriptedRoutine::new(vec![Step::Succeed(summary(0))]);
    let h = harness_built(enabled, MockDriver::default(), |b| {
        b.routine(EntityKind::Card, routine).keep_awake(keep_awake.clone())
    });

    h.controller.start(BTreeMap::new()).await.unwrap();
    assert_eq!(keep_awake.counts(), (1, 0));
    h.controller.stop().await;
    assert_eq!(keep_awake.counts(), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn keep_awake_untouched_when_disabled() {
    let keep_awake = Arc::new(RecordingKeepAwake::default());
    let routine = ScriptedRoutine::new(vec![Step::Succeed(summary(0))]);
    let h = harness_built(config(), MockDriver::default(), |b| {
        b.routine(EntityKind::Card, routine).keep_awake(keep_awake.clone())
    });

    h.controller.start(BTreeMap::new()).await.unwrap();
    h.controller.stop().await;
    assert_eq!(keep_awake.counts(), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn production_config_backfills_on_start() {
    let downloads = tempfile::tempdir().unwrap();
    let key = EntityKey::card("shinhan");
    let yesterday = today() - chrono::Duration::days(1);

    let mut cfg = Config::for_profile("");
    cfg.sync = config();
    cfg.storage.profile_dir = "/tmp/finsync-prod-profiles".into();
    cfg.storage.download_dir = downloads.path().to_path_buf();
    let artifacts = DownloadArtifacts::new(downloads.path().to_path_buf());
    std::fs::create_dir_all(artifacts.dir_for(&key)).unwrap();
    std::fs::write(artifacts.dir_for(&key).join("statement.xls"), b"rows").unwrap();

    for production in [false, true] {
        cfg.production = production;
        let ledger = Arc::new(InMemoryIntentLedger::new());
        let driver = Arc::new(MockDriver::default());
        let controller = SyncControllerBuilder::from_config(&cfg, ledger.clone(), driver.clone())
            .routine(EntityKind::Card, ScriptedRoutine::new(vec![Step::Succeed(summary(1))]))
            .clock(PausedClock::starting_at(today_at(3, 0)))
            .build();

        controller
            .start(BTreeMap::from([(key.clone(), daily("04:00"))]))
            .await
            .unwrap();
        let backfilled = ledger.list_intents(Some(yesterday)).await.unwrap().len();
        assert_eq!(backfilled, usize::from(production));

        if production {
            assert!(matches!(controller.sync_now(&key).await, ExecutionOutcome::Completed(_)));
            assert_eq!(
                *driver.profile_dirs.lock().unwrap(),
                vec![std::path::PathBuf::from("/tmp/finsync-prod-profiles/card/shinhan")]
            );
            assert!(!artifacts.dir_for(&key).join("statement.xls").exists());
        }
        controller.stop().await;
    }
}
