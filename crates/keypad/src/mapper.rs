use std::collections::BTreeMap;
use std::time::Duration;

use finsync_core::{BrowserSession, Bounds, Point};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::charclass::CharacterClass;
use crate::error::KeypadError;
use crate::layout::{KeyboardKey, KeyboardLayout, KeyboardLayoutAnalyzer};

/// Lower-case label fragments that identify a shift key.
pub const SHIFT_PATTERNS: [&str; 5] = ["shift", "⇧", "caps", "쉬프트", "대문자"];

pub fn is_shift_label(label: &str) -> bool {
    let lower = label.to_lowercase();
    SHIFT_PATTERNS.iter().any(|p| lower.contains(p))
}

pub fn find_shift_key(layout: &KeyboardLayout) -> Option<&KeyboardKey> {
    layout.keys().find(|k| is_shift_label(&k.label))
}

#[derive(Debug, Clone, Serialize)]
pub struct CharacterMapEntry {
    pub character: char,
    pub key_id: String,
    pub label: String,
    pub click_position: Point,
    pub requires_shift: bool,
    pub class: CharacterClass,
}

/// Merged unshifted and shifted character lookup for one keypad.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KeypadMapping {
    pub characters: BTreeMap<char, CharacterMapEntry>,
    pub shift_key: Option<KeyboardKey>,
    /// Whether a shifted layout was captured and merged.
    pub shifted_pass: bool,
}

impl KeypadMapping {
    /// Merge the default layout with an optional shifted layout. A character
    /// found in `base` never requires shift; one found only in `shifted` does.
    pub fn merge(base: &KeyboardLayout, shifted: Option<&KeyboardLayout>) -> Self {
        let shift_key = find_shift_key(base).cloned();
        let mut characters = BTreeMap::new();

        let passes = [(base, false, "base")]
            .into_iter()
            .chain(shifted.map(|l| (l, true, "shift")));
        for (layout, requires_shift, prefix) in passes {
            for key in layout.keys().filter(|k| !is_shift_label(&k.label)) {
                let Some(character) = key.character() else {
                    continue;
                };
                characters.entry(character).or_insert_with(|| CharacterMapEntry {
                    character,
                    key_id: format!("{prefix}:{}", key.label),
                    label: key.label.clone(),
                    click_position: key.click_position,
                    requires_shift,
                    class: CharacterClass::of(character),
                });
            }
        }

        Self {
            characters,
            shift_key,
            shifted_pass: shifted.is_some(),
        }
    }

    pub fn get(&self, c: char) -> Option<&CharacterMapEntry> {
        self.characters.get(&c)
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn shifted_count(&self) -> usize {
        self.characters.values().filter(|e| e.requires_shift).count()
    }
}

/// Two-pass keypad scan: default state, then with shift engaged.
pub struct BilingualKeyMapper {
    analyzer: KeyboardLayoutAnalyzer,
    shift_settle: Duration,
}

impl BilingualKeyMapper {
    pub fn new(analyzer: KeyboardLayoutAnalyzer, shift_settle: Duration) -> Self {
        Self {
            analyzer,
            shift_settle,
        }
    }

    pub async fn map_keypad(
        &self,
        session: &dyn BrowserSession,
        keypad_bounds: Bounds,
    ) -> Result<KeypadMapping, KeypadError> {
        let base = self.analyzer.capture(session, keypad_bounds).await?;

        let Some(shift) = find_shift_key(&base) else {
            warn!(keys = base.len(), "no shift key found, shifted characters unreachable");
            return Ok(KeypadMapping::merge(&base, None));
        };
        let shift_at = shift.click_position;

        if let Err(e) = session.mouse_click(shift_at).await {
            warn!(error = %e, "shift click failed, mapping unshifted layout only");
            return Ok(KeypadMapping::merge(&base, None));
        }
        tokio::time::sleep(self.shift_settle).await;

        let shifted = self.analyzer.capture(session, keypad_bounds).await;

        // Restore the default state even when the shifted pass failed.
        if let Err(e) = session.mouse_click(shift_at).await {
            warn!(error = %e, "failed to release shift after shifted pass");
        }

        let shifted = shifted?;
        let mapping = KeypadMapping::merge(&base, Some(&shifted));
        info!(
            characters = mapping.len(),
            shifted_only = mapping.shifted_count(),
            "Keypad mapped"
        );
        debug!(base_keys = base.len(), shifted_keys = shifted.len(), "pass sizes");
        Ok(mapping)
    }
}
