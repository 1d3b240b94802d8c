use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::NaiveDate;
use finsync_core::config::{Config, SyncConfig};
use finsync_core::{BrowserDriver, EntityKey, EntityKind, EntitySchedule, IntentLedger};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::info;

use crate::collaborators::{DownloadArtifacts, ExportService};
use crate::events::{EventBus, SyncEvent};
use crate::keep_awake::{KeepAwake, NoopKeepAwake, ProcessKeepAwake};
use crate::metrics::SyncMetrics;
use crate::routine::SyncRoutine;
use crate::sessions::SessionRegistry;
use crate::timing::{Clock, SystemClock};

/// Std mutexes in the controller guard plain maps and are never held across
/// an await, so a poisoned lock is still consistent.
pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Orchestrates daily syncs for every configured entity.
///
/// Always used behind an `Arc`: timers and retries hold a clone.
pub struct SyncController {
    pub(super) config: SyncConfig,
    pub(super) ledger: Arc<dyn IntentLedger>,
    pub(super) driver: Arc<dyn BrowserDriver>,
    /// Routine per entity kind.
    pub(super) routines: HashMap<EntityKind, Arc<dyn SyncRoutine>>,
    pub(super) export: Option<Arc<dyn ExportService>>,
    pub(super) artifacts: Option<DownloadArtifacts>,
    pub(super) keep_awake: Arc<dyn KeepAwake>,
    pub(super) clock: Arc<dyn Clock>,
    /// Browser profiles live under `<profile_root>/<kind>/<id>`.
    pub(super) profile_root: PathBuf,
    pub(super) startup_backfill: bool,
    pub(super) schedules: Mutex<BTreeMap<EntityKey, EntitySchedule>>,
    /// Entities with an execution in flight.
    pub(super) running: Mutex<HashSet<EntityKey>>,
    /// Date each execution past its intent check is working on. An entry
    /// whose key is no longer in `running` belongs to an aborted task.
    pub(super) in_flight: Mutex<HashMap<EntityKey, NaiveDate>>,
    pub(super) sessions: SessionRegistry,
    pub(super) timers: Mutex<HashMap<EntityKey, JoinHandle<()>>>,
    pub(super) retries: Mutex<HashMap<EntityKey, JoinHandle<()>>>,
    /// Executions spawned by timers.
    pub(super) executions: Mutex<JoinSet<()>>,
    pub(super) events: EventBus,
    pub(super) metrics: Arc<RwLock<SyncMetrics>>,
    pub(super) active: AtomicBool,
    /// Set by `stop`, cleared by `start`. No retry or timer execution is
    /// spawned while set.
    pub(super) stopped: AtomicBool,
}

impl SyncController {
    pub fn builder(
        config: SyncConfig,
        ledger: Arc<dyn IntentLedger>,
        driver: Arc<dyn BrowserDriver>,
    ) -> SyncControllerBuilder {
        SyncControllerBuilder::new(config, ledger, driver)
    }

    /// Receive lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Snapshot of execution metrics.
    pub fn metrics(&self) -> SyncMetrics {
        self.metrics.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn schedules(&self) -> BTreeMap<EntityKey, EntitySchedule> {
        lock(&self.schedules).clone()
    }

    /// Entities that currently own a daily timer.
    pub fn scheduled_entities(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = lock(&self.timers).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_running(&self, key: &EntityKey) -> bool {
        lock(&self.running).contains(key)
    }

    /// Number of browser sessions still tracked.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub(super) fn enabled_entities(&self) -> Vec<(EntityKey, EntitySchedule)> {
        lock(&self.schedules)
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect()
    }

    pub(super) fn schedule_for(&self, key: &EntityKey) -> Option<EntitySchedule> {
        lock(&self.schedules).get(key).cloned()
    }
}

pub struct SyncControllerBuilder {
    config: SyncConfig,
    ledger: Arc<dyn IntentLedger>,
    driver: Arc<dyn BrowserDriver>,
    routines: HashMap<EntityKind, Arc<dyn SyncRoutine>>,
    export: Option<Arc<dyn ExportService>>,
    artifacts: Option<DownloadArtifacts>,
    keep_awake: Option<Arc<dyn KeepAwake>>,
    clock: Option<Arc<dyn Clock>>,
    profile_root: PathBuf,
    startup_backfill: bool,
    events: Option<EventBus>,
}

/// The host inhibitor when keep-awake is enabled and the OS has one.
fn host_keep_awake(enabled: bool) -> Arc<dyn KeepAwake> {
    match ProcessKeepAwake::for_host() {
        Some(inhibitor) if enabled => Arc::new(inhibitor),
        _ => Arc::new(NoopKeepAwake),
    }
}

impl SyncControllerBuilder {
    pub fn new(config: SyncConfig, ledger: Arc<dyn IntentLedger>, driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            config,
            ledger,
            driver,
            routines: HashMap::new(),
            export: None,
            artifacts: None,
            keep_awake: None,
            clock: None,
            profile_root: PathBuf::from("profiles"),
            startup_backfill: false,
            events: None,
        }
    }

    /// Builder wired from the loaded configuration: sync settings, profile
    /// and download directories, and startup backfill in production.
    pub fn from_config(config: &Config, ledger: Arc<dyn IntentLedger>, driver: Arc<dyn BrowserDriver>) -> Self {
        Self::new(config.sync.clone(), ledger, driver)
            .profile_root(config.storage.profile_dir.clone())
            .artifacts(DownloadArtifacts::new(config.storage.download_dir.clone()))
            .startup_backfill(config.production)
    }

    /// Register the routine that syncs every entity of `kind`.
    pub fn routine(mut self, kind: EntityKind, routine: Arc<dyn SyncRoutine>) -> Self {
        self.routines.insert(kind, routine);
        self
    }

    pub fn export(mut self, export: Arc<dyn ExportService>) -> Self {
        self.export = Some(export);
        self
    }

    pub fn artifacts(mut self, artifacts: DownloadArtifacts) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn keep_awake(mut self, keep_awake: Arc<dyn KeepAwake>) -> Self {
        self.keep_awake = Some(keep_awake);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn profile_root(mut self, root: PathBuf) -> Self {
        self.profile_root = root;
        self
    }

    /// Backfill missed intents in `start` before arming timers.
    pub fn startup_backfill(mut self, enabled: bool) -> Self {
        self.startup_backfill = enabled;
        self
    }

    /// Publish on an existing bus instead of a private one.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Arc<SyncController> {
        let kinds: Vec<&str> = self.routines.keys().map(|k| k.as_str()).collect();
        info!(
            routines = ?kinds,
            profile_root = %self.profile_root.display(),
            startup_backfill = self.startup_backfill,
            "Sync controller built"
        );
        let keep_awake = match self.keep_awake {
            Some(keep_awake) => keep_awake,
            None => host_keep_awake(self.config.keep_awake),
        };

        Arc::new(SyncController {
            config: self.config,
            ledger: self.ledger,
            driver: self.driver,
            routines: self.routines,
            export: self.export,
            artifacts: self.artifacts,
            keep_awake,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            profile_root: self.profile_root,
            startup_backfill: self.startup_backfill,
            schedules: Mutex::new(BTreeMap::new()),
            running: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(HashMap::new()),
            sessions: SessionRegistry::default(),
            timers: Mutex::new(HashMap::new()),
            retries: Mutex::new(HashMap::new()),
            executions: Mutex::new(JoinSet::new()),
            events: self.events.unwrap_or_default(),
            metrics: Arc::new(RwLock::new(SyncMetrics::default())),
            active: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }
}
