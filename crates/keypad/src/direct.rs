use std::time::Duration;

use finsync_core::BrowserSession;
use tracing::{debug, info, warn};

use crate::charclass::{us_requires_shift, CharacterClass};
use crate::typing::{CharacterDetail, FailureReason, TypingResult};

const PROGRESS_EVERY: usize = 10;

/// Types through the browser keyboard for fields without a virtual keypad.
pub struct DirectTyper {
    pre_delay: Duration,
    char_delay: Duration,
}

impl Default for DirectTyper {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(100))
    }
}

impl DirectTyper {
    pub fn new(pre_delay: Duration, char_delay: Duration) -> Self {
        Self {
            pre_delay,
            char_delay,
        }
    }

    /// Type `text` into the focused field. A rejected key is recorded and
    /// typing moves on to the next character.
    pub async fn type_text(&self, session: &dyn BrowserSession, text: &str) -> TypingResult {
        let total = text.chars().count();
        let mut result = TypingResult::new(total);

        tokio::time::sleep(self.pre_delay).await;

        for (index, c) in text.chars().enumerate() {
            match session.press_key(c).await {
                Ok(()) => result.record_typed(CharacterDetail {
                    index,
                    key_id: "keyboard".to_string(),
                    position: None,
                    used_shift: us_requires_shift(c),
                    class: CharacterClass::of(c),
                }),
                Err(e) => {
                    warn!(index, error = %e, "key press failed");
                    result.record_failed(index, FailureReason::KeyRejected, c);
                }
            }

            let done = index + 1;
            if done % PROGRESS_EVERY == 0 {
                debug!(done, total, "direct typing progress");
            }
            if done < total {
                tokio::time::sleep(self.char_delay).await;
            }
        }

        let result = result.finish();
        info!(
            total = result.total_chars,
            typed = result.typed_chars,
            failed = result.failed_chars.len(),
            "Direct typing finished"
        );
        result
    }
}
