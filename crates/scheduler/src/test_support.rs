//! Hand-written collaborator doubles shared by the routine and controller tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use finsync_core::{BrowserDriver, BrowserError, BrowserSession, Bounds, ClickStrategy, EntityKey, Point};
use tokio::sync::Notify;

use crate::collaborators::{
    AccountInfo, ExportResult, ExportService, ImportResult, SyncMetadata, TransactionRow,
    TransactionStore,
};
use crate::error::SyncError;
use crate::keep_awake::KeepAwake;
use crate::routine::{InstitutionAutomator, LoginForm, RoutineContext, SyncRoutine};
use crate::timing::Clock;
use crate::types::{DateRange, SyncSummary};

// ── Browser ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockSession {
    pub id: String,
    pub hang_on_close: bool,
    pub closed: AtomicBool,
    pub killed: AtomicBool,
    pub keys: Mutex<String>,
    pub clicks: Mutex<Vec<Point>>,
}

#[async_trait]
impl BrowserSession for MockSession {
    fn id(&self) -> &str {
        &self.id
    }
    async fn goto(&self, _url: &str) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn wait_for(&self, _s: &str, _t: Duration) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn click(&self, _s: &str, _c: ClickStrategy) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn fill(&self, _s: &str, _v: &str) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn element_bounds(&self, _s: &str) -> Result<Bounds, BrowserError> {
        Ok(Bounds::new(0.0, 0.0, 100.0, 100.0))
    }
    async fn mouse_move(&self, _p: Point) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn mouse_click(&self, at: Point) -> Result<(), BrowserError> {
        self.clicks.lock().unwrap().push(at);
        Ok(())
    }
    async fn press_key(&self, ch: char) -> Result<(), BrowserError> {
        self.keys.lock().unwrap().push(ch);
        Ok(())
    }
    async fn screenshot_region(&self, _r: Bounds) -> Result<Vec<u8>, BrowserError> {
        Ok(b"png".to_vec())
    }
    async fn close(&self) -> Result<(), BrowserError> {
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
    fn kill(&self) -> Result<(), BrowserError> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDriver {
    pub hang_on_close: bool,
    pub launches: AtomicUsize,
    pub profile_dirs: Mutex<Vec<PathBuf>>,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockDriver {
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn launch(&self, profile_dir: &Path) -> Result<Arc<dyn BrowserSession>, BrowserError> {
        let n = self.launches.fetch_add(1, Ordering::SeqCst);
        self.profile_dirs.lock().unwrap().push(profile_dir.to_path_buf());
        let session = Arc::new(MockSession {
            id: format!("session-{n}"),
            hang_on_close: self.hang_on_close,
            ..Default::default()
        });
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

// ── Routines ─────────────────────────────────────────────────────

pub enum Step {
    Succeed(SyncSummary),
    Fail(&'static str),
    /// Never finishes; only a timeout or abort ends it.
    Hang,
    /// Waits for the notify, then succeeds.
    Gate(Arc<Notify>),
    /// Waits for the notify, then fails with a transient error.
    GateThenFail(Arc<Notify>, &'static str),
}

/// Plays back one step per call; the last step repeats.
pub struct ScriptedRoutine {
    steps: Mutex<VecDeque<Step>>,
    pub calls: AtomicUsize,
    pub started: Notify,
}

impl ScriptedRoutine {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            started: Notify::new(),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 {
            return steps.pop_front().unwrap();
        }
        match steps.front() {
            Some(Step::Succeed(s)) => Step::Succeed(s.clone()),
            Some(Step::Fail(m)) => Step::Fail(*m),
            Some(Step::Gate(n)) => Step::Gate(n.clone()),
            Some(Step::GateThenFail(n, m)) => Step::GateThenFail(n.clone(), *m),
            Some(Step::Hang) | None => Step::Hang,
        }
    }
}

#[async_trait]
impl SyncRoutine for ScriptedRoutine {
    async fn run(&self, _ctx: RoutineContext<'_>) -> Result<SyncSummary, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        match self.next_step() {
            Step::Succeed(summary) => Ok(summary),
            Step::Fail(message) => Err(SyncError::Automation(message.to_string())),
            Step::Hang => std::future::pending().await,
            Step::Gate(notify) => {
                notify.notified().await;
                Ok(SyncSummary::default())
            }
            Step::GateThenFail(notify, message) => {
                notify.notified().await;
                Err(SyncError::Automation(message.to_string()))
            }
        }
    }
}

// ── Keep-awake ───────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingKeepAwake {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl RecordingKeepAwake {
    pub fn counts(&self) -> (usize, usize) {
        (self.acquired.load(Ordering::SeqCst), self.released.load(Ordering::SeqCst))
    }
}

impl KeepAwake for RecordingKeepAwake {
    fn acquire(&self) -> std::io::Result<()> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Institution automation ───────────────────────────────────────

#[derive(Default)]
pub struct MockAutomator {
    pub keypad: Option<Bounds>,
    pub accounts: Vec<AccountInfo>,
    pub rows: Vec<TransactionRow>,
    pub submitted: AtomicBool,
    pub user_ids: Mutex<Vec<String>>,
}

#[async_trait]
impl InstitutionAutomator for MockAutomator {
    async fn prepare_login(
        &self,
        _session: &dyn BrowserSession,
        user_id: &str,
        _certificate_password: Option<&str>,
    ) -> Result<LoginForm, SyncError> {
        self.user_ids.lock().unwrap().push(user_id.to_string());
        Ok(LoginForm { keypad: self.keypad })
    }

    async fn submit_login(&self, _session: &dyn BrowserSession) -> Result<(), SyncError> {
        self.submitted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_accounts(&self, _session: &dyn BrowserSession) -> Result<Vec<AccountInfo>, SyncError> {
        Ok(self.accounts.clone())
    }

    async fn fetch_transactions(
        &self,
        _session: &dyn BrowserSession,
        _account: &AccountInfo,
        _range: DateRange,
    ) -> Result<Vec<TransactionRow>, SyncError> {
        Ok(self.rows.clone())
    }
}

pub fn account(id: &str) -> AccountInfo {
    AccountInfo {
        account_id: id.to_string(),
        name: format!("Account {id}"),
        number_masked: None,
    }
}

pub fn row(day: u32, amount: i64) -> TransactionRow {
    TransactionRow {
        date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
        description: format!("purchase {day}"),
        amount,
        balance: None,
        merchant: None,
    }
}

#[derive(Default)]
pub struct MockTransactions {
    pub imports: Mutex<Vec<(EntityKey, String, usize)>>,
}

#[async_trait]
impl TransactionStore for MockTransactions {
    async fn import_transactions(
        &self,
        entity: &EntityKey,
        account: &AccountInfo,
        rows: &[TransactionRow],
        _meta: &SyncMetadata,
    ) -> Result<ImportResult, SyncError> {
        self.imports
            .lock()
            .unwrap()
            .push((entity.clone(), account.account_id.clone(), rows.len()));
        Ok(ImportResult {
            inserted: rows.len(),
            skipped: 0,
        })
    }
}

#[derive(Default)]
pub struct MockExport {
    pub calls: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl ExportService for MockExport {
    async fn export_snapshot(&self) -> Result<ExportResult, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SyncError::Automation("sheet quota exceeded".into()));
        }
        Ok(ExportResult {
            success: true,
            url: Some("https://sheets.example/snapshot".into()),
        })
    }
}

// ── Time ─────────────────────────────────────────────────────────

/// Wall clock that advances with tokio's (paused) clock from a fixed base.
pub struct PausedClock {
    base: NaiveDateTime,
    start: tokio::time::Instant,
}

impl PausedClock {
    pub fn starting_at(base: NaiveDateTime) -> Arc<Self> {
        Arc::new(Self {
            base,
            start: tokio::time::Instant::now(),
        })
    }
}

impl Clock for PausedClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.start.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.base + elapsed
    }
}
