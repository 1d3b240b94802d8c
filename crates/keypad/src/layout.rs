use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use finsync_core::{BrowserSession, Bounds, Point};
use finsync_vision::{parse_segments, SegmentRecord, VisionProvider};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::KeypadError;
use crate::mask::mask_centroid;

/// Instruction sent with every keypad screenshot.
pub const KEYPAD_PROMPT: &str = "\
This image is an on-screen virtual keypad used for password entry. \
Detect every clickable key. For each key return one JSON object with: \
\"label\" (the character printed on the key, or a word such as \"shift\", \"space\", \"delete\" for function keys), \
\"box_2d\" ([ymin, xmin, ymax, xmax] normalized to 0-1000), \
and \"mask\" (base64 PNG segmentation mask of the key cropped to box_2d). \
Do not include decorative elements, logos, text banners, or empty padding cells. \
Return a JSON array only.";

/// One detected key, scoped to a single analyzer pass.
#[derive(Debug, Clone, Serialize)]
pub struct KeyboardKey {
    pub label: String,
    /// 0-1 relative to the keypad image.
    pub normalized_bounds: Bounds,
    /// Page pixels.
    pub absolute_bounds: Bounds,
    pub click_position: Point,
    #[serde(skip)]
    pub raw_mask: Option<Vec<u8>>,
    /// Whether `click_position` came from the mask rather than the box center.
    pub centroid_from_mask: bool,
}

impl KeyboardKey {
    fn from_record(record: SegmentRecord, keypad_bounds: &Bounds) -> Self {
        let absolute_bounds = keypad_bounds.project(&record.normalized_box);
        let centroid = record
            .mask
            .as_deref()
            .and_then(|m| mask_centroid(m, &absolute_bounds));

        Self {
            label: record.label,
            normalized_bounds: record.normalized_box,
            absolute_bounds,
            click_position: centroid.unwrap_or_else(|| absolute_bounds.center()),
            raw_mask: record.mask,
            centroid_from_mask: centroid.is_some(),
        }
    }

    /// The character this key types, if it types exactly one.
    pub fn character(&self) -> Option<char> {
        let mut chars = self.label.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ if self.label.eq_ignore_ascii_case("space") => Some(' '),
            _ => None,
        }
    }
}

/// Key label to key, ordered by label.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KeyboardLayout {
    keys: BTreeMap<String, KeyboardKey>,
}

impl KeyboardLayout {
    pub fn from_keys(keys: impl IntoIterator<Item = KeyboardKey>) -> Self {
        let mut map = BTreeMap::new();
        for key in keys {
            if map.contains_key(&key.label) {
                debug!(label = %key.label, "duplicate key label, keeping first");
                continue;
            }
            map.insert(key.label.clone(), key);
        }
        Self { keys: map }
    }

    pub fn get(&self, label: &str) -> Option<&KeyboardKey> {
        self.keys.get(label)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &KeyboardKey> {
        self.keys.values()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

/// Turns a keypad screenshot into a [`KeyboardLayout`] via the vision service.
pub struct KeyboardLayoutAnalyzer {
    provider: Arc<dyn VisionProvider>,
    repair_attempts: u32,
}

impl KeyboardLayoutAnalyzer {
    pub fn new(provider: Arc<dyn VisionProvider>, repair_attempts: u32) -> Self {
        Self {
            provider,
            repair_attempts,
        }
    }

    /// Analyze an already captured keypad image whose on-page box is
    /// `keypad_bounds`.
    pub async fn analyze(
        &self,
        image_png: &[u8],
        keypad_bounds: Bounds,
    ) -> Result<KeyboardLayout, KeypadError> {
        let start = Instant::now();
        let text = self.provider.analyze(image_png, KEYPAD_PROMPT).await?;
        let records = parse_segments(&text, self.repair_attempts)?;

        let keys = records
            .into_iter()
            .filter(|r| !r.label.trim().is_empty())
            .map(|r| KeyboardKey::from_record(r, &keypad_bounds));
        let layout = KeyboardLayout::from_keys(keys);

        if layout.is_empty() {
            warn!(provider = self.provider.name(), "vision service returned no keys");
            return Err(KeypadError::NoKeysDetected);
        }

        let from_mask = layout.keys().filter(|k| k.centroid_from_mask).count();
        info!(
            keys = layout.len(),
            from_mask,
            duration_ms = start.elapsed().as_millis() as u64,
            "Keypad layout analyzed"
        );
        Ok(layout)
    }

    /// Screenshot `keypad_bounds` from the live page and analyze it.
    pub async fn capture(
        &self,
        session: &dyn BrowserSession,
        keypad_bounds: Bounds,
    ) -> Result<KeyboardLayout, KeypadError> {
        let image = session.screenshot_region(keypad_bounds).await?;
        self.analyze(&image, keypad_bounds).await
    }
}
