//! Headless-browser driver contract.
//!
//! The driver itself is an external service. The scheduler launches one
//! [`BrowserSession`] per entity run and tracks it for forced cleanup; the
//! keypad engine only needs pointer, keyboard and screenshot access.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::geometry::{Bounds, Point};

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("interaction failed: {0}")]
    Interaction(String),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("browser operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("browser session closed")]
    Closed,
}

/// Ways of clicking an element, from least to most intrusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickStrategy {
    /// Regular click with actionability checks.
    Standard,
    /// Click ignoring overlays and visibility checks.
    Forced,
    /// `element.click()` dispatched from page script.
    Script,
}

impl ClickStrategy {
    pub const FALLBACK_ORDER: [ClickStrategy; 3] =
        [ClickStrategy::Standard, ClickStrategy::Forced, ClickStrategy::Script];
}

/// One live browser (one process, one page).
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Stable identifier for logging.
    fn id(&self) -> &str;

    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn click(&self, selector: &str, strategy: ClickStrategy) -> Result<(), BrowserError>;

    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError>;

    async fn element_bounds(&self, selector: &str) -> Result<Bounds, BrowserError>;

    async fn mouse_move(&self, to: Point) -> Result<(), BrowserError>;

    async fn mouse_click(&self, at: Point) -> Result<(), BrowserError>;

    /// Type a single character through the page keyboard.
    async fn press_key(&self, ch: char) -> Result<(), BrowserError>;

    /// PNG screenshot of a page region.
    async fn screenshot_region(&self, region: Bounds) -> Result<Vec<u8>, BrowserError>;

    /// Graceful close.
    async fn close(&self) -> Result<(), BrowserError>;

    /// Kill the underlying browser process. Used when `close` hangs.
    fn kill(&self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Start a browser using `profile_dir` as its working profile.
    async fn launch(&self, profile_dir: &Path) -> Result<Arc<dyn BrowserSession>, BrowserError>;
}

/// Click `selector` trying each strategy in order, all sharing one budget.
///
/// Returns the strategy that worked.
pub async fn click_with_fallback(
    session: &dyn BrowserSession,
    selector: &str,
    strategies: &[ClickStrategy],
    budget: Duration,
) -> Result<ClickStrategy, BrowserError> {
    let deadline = Instant::now() + budget;
    let mut last_err = None;

    for &strategy in strategies {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, session.click(selector, strategy)).await {
            Ok(Ok(())) => return Ok(strategy),
            Ok(Err(e)) => {
                debug!(selector, ?strategy, error = %e, "click strategy failed");
                last_err = Some(e);
            }
            Err(_) => {
                last_err = Some(BrowserError::Timeout(budget));
                break;
            }
        }
    }

    Err(last_err.unwrap_or(BrowserError::Timeout(budget)))
}
