use std::time::Duration;

use finsync_core::config::KeypadConfig;
use finsync_core::{BrowserError, BrowserSession, Point};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::charclass::CharacterClass;
use crate::mapper::KeypadMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NotFound,
    ShiftUnavailable,
    ClickFailed,
    /// Keyboard input rejected by the page (direct typing).
    KeyRejected,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NotFound => "not_found",
            FailureReason::ShiftUnavailable => "shift_unavailable",
            FailureReason::ClickFailed => "click_failed",
            FailureReason::KeyRejected => "key_rejected",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A character that could not be entered. The character itself is not kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedChar {
    pub index: usize,
    pub reason: FailureReason,
    pub class: CharacterClass,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterDetail {
    pub index: usize,
    /// Key id (`base:*`/`shift:*`) for keypad input, `keyboard` otherwise.
    pub key_id: String,
    pub position: Option<Point>,
    pub used_shift: bool,
    pub class: CharacterClass,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TypingResult {
    pub success: bool,
    pub total_chars: usize,
    pub typed_chars: usize,
    pub failed_chars: Vec<FailedChar>,
    pub shift_clicks: u32,
    pub details: Vec<CharacterDetail>,
}

impl TypingResult {
    pub(crate) fn new(total_chars: usize) -> Self {
        Self {
            total_chars,
            ..Default::default()
        }
    }

    pub(crate) fn record_typed(&mut self, detail: CharacterDetail) {
        self.typed_chars += 1;
        self.details.push(detail);
    }

    pub(crate) fn record_failed(&mut self, index: usize, reason: FailureReason, c: char) {
        self.failed_chars.push(FailedChar {
            index,
            reason,
            class: CharacterClass::of(c),
        });
    }

    pub(crate) fn finish(mut self) -> Self {
        self.success = self.failed_chars.is_empty();
        debug_assert_eq!(self.typed_chars + self.failed_chars.len(), self.total_chars);
        self
    }
}

/// Clicks a secret into a mapped virtual keypad, tracking shift state.
pub struct TypingEngine {
    move_settle: Duration,
    post_click: Duration,
}

impl TypingEngine {
    pub fn new(move_settle: Duration, post_click: Duration) -> Self {
        Self {
            move_settle,
            post_click,
        }
    }

    pub fn from_config(config: &KeypadConfig) -> Self {
        Self::new(config.move_settle(), config.post_click())
    }

    async fn press(&self, session: &dyn BrowserSession, at: Point) -> Result<(), BrowserError> {
        session.mouse_move(at).await?;
        tokio::time::sleep(self.move_settle).await;
        session.mouse_click(at).await?;
        tokio::time::sleep(self.post_click).await;
        Ok(())
    }

    /// Enter `secret` one key at a time. Never aborts on a single bad
    /// character; failures are reported in the result.
    pub async fn type_secret(
        &self,
        session: &dyn BrowserSession,
        mapping: &KeypadMapping,
        secret: &str,
    ) -> TypingResult {
        let total = secret.chars().count();
        let mut result = TypingResult::new(total);
        let mut shift_active = false;
        let shift_at = mapping.shift_key.as_ref().map(|k| k.click_position);

        for (index, c) in secret.chars().enumerate() {
            let Some(entry) = mapping.get(c) else {
                debug!(index, "character not on keypad");
                result.record_failed(index, FailureReason::NotFound, c);
                continue;
            };

            if entry.requires_shift != shift_active {
                let Some(shift_at) = shift_at else {
                    result.record_failed(index, FailureReason::ShiftUnavailable, c);
                    continue;
                };
                if let Err(e) = self.press(session, shift_at).await {
                    warn!(index, error = %e, "shift click failed");
                    result.record_failed(index, FailureReason::ShiftUnavailable, c);
                    continue;
                }
                shift_active = !shift_active;
                result.shift_clicks += 1;
            }

            match self.press(session, entry.click_position).await {
                Ok(()) => result.record_typed(CharacterDetail {
                    index,
                    key_id: entry.key_id.clone(),
                    position: Some(entry.click_position),
                    used_shift: shift_active,
                    class: entry.class,
                }),
                Err(e) => {
                    warn!(index, error = %e, "key click failed");
                    result.record_failed(index, FailureReason::ClickFailed, c);
                }
            }
        }

        if shift_active {
            if let Some(shift_at) = shift_at {
                match self.press(session, shift_at).await {
                    Ok(()) => result.shift_clicks += 1,
                    Err(e) => warn!(error = %e, "failed to release shift after typing"),
                }
            }
        }

        let result = result.finish();
        info!(
            total = result.total_chars,
            typed = result.typed_chars,
            failed = result.failed_chars.len(),
            shift_clicks = result.shift_clicks,
            "Keypad typing finished"
        );
        result
    }
}
