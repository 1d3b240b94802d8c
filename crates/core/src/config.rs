use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Production mode runs the intent backfill when the sync controller starts.
    pub production: bool,
    pub storage: StorageConfig,
    pub vision: VisionConfig,
    pub sync: SyncConfig,
    pub keypad: KeypadConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `FINSYNC_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("FINSYNC_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            production: profiled_env_bool(p, "FINSYNC_PRODUCTION", false),
            storage: StorageConfig::from_env_profiled(p),
            vision: VisionConfig::from_env_profiled(p),
            sync: SyncConfig::from_env_profiled(p),
            keypad: KeypadConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  production:  {}", self.production);
        tracing::info!("  storage:     data_dir={}", self.storage.data_dir.display());
        tracing::info!(
            "  vision:      provider={}, model={}, configured={}",
            self.vision.provider,
            self.vision.gemini_model,
            self.vision.is_configured()
        );
        tracing::info!(
            "  sync:        retries={}, retry_delay={}m, window={}m, backfill={}d",
            self.sync.retry_count,
            self.sync.retry_delay_minutes,
            self.sync.execution_window_minutes,
            self.sync.backfill_days
        );
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Per-entity download folders live under here.
    pub download_dir: PathBuf,
    /// Per-entity browser profiles live under here.
    pub profile_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let data_dir = PathBuf::from(profiled_env_or(p, "FINSYNC_DATA_DIR", "data"));
        let download_dir = profiled_env_opt(p, "FINSYNC_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("downloads"));
        let profile_dir = profiled_env_opt(p, "FINSYNC_PROFILE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("profiles"));
        Self {
            data_dir,
            download_dir,
            profile_dir,
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("intents.json")
    }

    pub fn schedules_path(&self) -> PathBuf {
        self.data_dir.join("schedules.json")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }
}

// ── Vision model ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Only "gemini" is supported today.
    pub provider: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl VisionConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "VISION_PROVIDER", "gemini"),
            gemini_api_key: profiled_env_opt(p, "GEMINI_API_KEY"),
            gemini_model: profiled_env_or(p, "GEMINI_MODEL", "gemini-2.5-flash"),
            gemini_base_url: profiled_env_or(
                p,
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            temperature: profiled_env_or(p, "VISION_TEMPERATURE", "0.0")
                .parse()
                .unwrap_or(0.0),
            max_tokens: profiled_env_u32(p, "VISION_MAX_TOKENS", 8192),
        }
    }

    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "gemini" => self.gemini_api_key.is_some(),
            _ => false,
        }
    }
}

// ── Scheduling and recovery ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Retries after the first failed attempt.
    pub retry_count: u32,
    pub retry_delay_minutes: u64,
    pub execution_window_minutes: i64,
    /// How many past days the startup backfill covers.
    pub backfill_days: u32,
    /// Days of transactions fetched per run.
    pub sync_range_days: u32,
    pub bank_timeout_secs: u64,
    pub card_timeout_secs: u64,
    pub tax_timeout_secs: u64,
    pub session_close_timeout_secs: u64,
    pub shutdown_close_timeout_secs: u64,
    pub keep_awake: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay_minutes: 5,
            execution_window_minutes: 30,
            backfill_days: 3,
            sync_range_days: 7,
            bank_timeout_secs: 600,
            card_timeout_secs: 600,
            tax_timeout_secs: 900,
            session_close_timeout_secs: 30,
            shutdown_close_timeout_secs: 10,
            keep_awake: true,
        }
    }
}

impl SyncConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            retry_count: profiled_env_u32(p, "SYNC_RETRY_COUNT", d.retry_count),
            retry_delay_minutes: profiled_env_u64(p, "SYNC_RETRY_DELAY_MINUTES", d.retry_delay_minutes),
            execution_window_minutes: profiled_env_u64(
                p,
                "SYNC_WINDOW_MINUTES",
                d.execution_window_minutes as u64,
            ) as i64,
            backfill_days: profiled_env_u32(p, "SYNC_BACKFILL_DAYS", d.backfill_days),
            sync_range_days: profiled_env_u32(p, "SYNC_RANGE_DAYS", d.sync_range_days),
            bank_timeout_secs: profiled_env_u64(p, "SYNC_BANK_TIMEOUT_SECS", d.bank_timeout_secs),
            card_timeout_secs: profiled_env_u64(p, "SYNC_CARD_TIMEOUT_SECS", d.card_timeout_secs),
            tax_timeout_secs: profiled_env_u64(p, "SYNC_TAX_TIMEOUT_SECS", d.tax_timeout_secs),
            session_close_timeout_secs: profiled_env_u64(
                p,
                "SYNC_SESSION_CLOSE_TIMEOUT_SECS",
                d.session_close_timeout_secs,
            ),
            shutdown_close_timeout_secs: profiled_env_u64(
                p,
                "SYNC_SHUTDOWN_CLOSE_TIMEOUT_SECS",
                d.shutdown_close_timeout_secs,
            ),
            keep_awake: profiled_env_bool(p, "SYNC_KEEP_AWAKE", d.keep_awake),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_minutes * 60)
    }

    pub fn execution_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.execution_window_minutes)
    }

    pub fn session_close_timeout(&self) -> Duration {
        Duration::from_secs(self.session_close_timeout_secs)
    }

    pub fn shutdown_close_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_close_timeout_secs)
    }
}

// ── Virtual keypad ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeypadConfig {
    /// Wait after toggling shift before re-capturing the keypad.
    pub shift_settle_ms: u64,
    /// Wait between moving the pointer and clicking.
    pub move_settle_ms: u64,
    pub post_click_ms: u64,
    /// Repair passes over malformed vision output before giving up.
    pub repair_attempts: u32,
}

impl Default for KeypadConfig {
    fn default() -> Self {
        Self {
            shift_settle_ms: 500,
            move_settle_ms: 100,
            post_click_ms: 200,
            repair_attempts: 2,
        }
    }
}

impl KeypadConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            shift_settle_ms: profiled_env_u64(p, "KEYPAD_SHIFT_SETTLE_MS", d.shift_settle_ms),
            move_settle_ms: profiled_env_u64(p, "KEYPAD_MOVE_SETTLE_MS", d.move_settle_ms),
            post_click_ms: profiled_env_u64(p, "KEYPAD_POST_CLICK_MS", d.post_click_ms),
            repair_attempts: profiled_env_u32(p, "KEYPAD_REPAIR_ATTEMPTS", d.repair_attempts),
        }
    }

    pub fn shift_settle(&self) -> Duration {
        Duration::from_millis(self.shift_settle_ms)
    }

    pub fn move_settle(&self) -> Duration {
        Duration::from_millis(self.move_settle_ms)
    }

    pub fn post_click(&self) -> Duration {
        Duration::from_millis(self.post_click_ms)
    }
}
