//! Parsing of segmentation responses: one record per detected object.
//!
//! Models are asked for a JSON array of `{label, box_2d, mask}` objects, with
//! `box_2d` as `[ymin, xmin, ymax, xmax]` on a 0-1000 grid and `mask` as a
//! base64 payload (optionally a `data:` URL). Output is frequently wrapped in
//! code fences, carries trailing commas, or is cut off at the token limit, so
//! parsing runs a bounded number of repair passes before giving up.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use finsync_core::Bounds;
use serde_json::Value;
use tracing::{debug, warn};

use crate::provider::VisionError;

/// One detected object.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub label: String,
    /// Box as fractions (0-1) of the analyzed image.
    pub normalized_box: Bounds,
    /// Decoded mask payload, if the model sent one.
    pub mask: Option<Vec<u8>>,
}

/// Parse model text into segment records.
///
/// `repair_attempts` bounds how many repair passes run after the first
/// parse fails. The first pass fixes syntax (trailing commas, bare keys,
/// single quotes); the second additionally closes a truncated array.
pub fn parse_segments(text: &str, repair_attempts: u32) -> Result<Vec<SegmentRecord>, VisionError> {
    let mut candidate = strip_code_fences(text).to_string();
    let mut attempt = 0;

    loop {
        match serde_json::from_str::<Value>(&candidate) {
            Ok(value) => return Ok(records_from_value(&value)),
            Err(e) => {
                if attempt >= repair_attempts {
                    return Err(VisionError::ParseError(format!(
                        "invalid segmentation JSON after {attempt} repair passes: {e}"
                    )));
                }
                debug!(attempt, error = %e, "segmentation JSON invalid, repairing");
                candidate = match attempt {
                    0 => repair_syntax(&candidate),
                    _ => repair_syntax(&close_truncated(&candidate)),
                };
                attempt += 1;
            }
        }
    }
}

fn records_from_value(value: &Value) -> Vec<SegmentRecord> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            match ["keys", "segments", "items"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array))
            {
                Some(items) => items.iter().collect(),
                None => vec![value],
            }
        }
        _ => Vec::new(),
    };

    items.into_iter().filter_map(record_from_item).collect()
}

fn record_from_item(item: &Value) -> Option<SegmentRecord> {
    let label = match &item["label"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    if label.is_empty() {
        debug!("skipping segment without label");
        return None;
    }

    let raw_box = ["box_2d", "box", "bbox"]
        .iter()
        .find_map(|k| item.get(*k).and_then(Value::as_array));
    let coords: Vec<f64> = raw_box?.iter().filter_map(Value::as_f64).collect();
    if coords.len() != 4 {
        warn!(label = %label, "segment box does not have 4 coordinates");
        return None;
    }

    let mask = item["mask"].as_str().and_then(decode_mask_payload);

    Some(SegmentRecord {
        label,
        normalized_box: normalize_box([coords[0], coords[1], coords[2], coords[3]]),
        mask,
    })
}

/// `[ymin, xmin, ymax, xmax]` on the 0-1000 grid into a normalized `Bounds`.
/// Coordinates are always read on that grid, so a small key near the origin
/// keeps its size.
pub fn normalize_box(b: [f64; 4]) -> Bounds {
    const GRID: f64 = 1000.0;
    let clamp = |v: f64| (v / GRID).clamp(0.0, 1.0);
    let (y0, x0, y1, x1) = (clamp(b[0]), clamp(b[1]), clamp(b[2]), clamp(b[3]));
    let (top, bottom) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
    let (left, right) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
    Bounds::new(left, top, right - left, bottom - top)
}

fn decode_mask_payload(raw: &str) -> Option<Vec<u8>> {
    let payload = match raw.find("base64,") {
        Some(idx) => &raw[idx + "base64,".len()..],
        None => raw,
    };
    match BASE64.decode(payload.trim()) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "mask payload is not valid base64");
            None
        }
    }
}

// ── Repair passes ─────────────────────────────────────────────

pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => "",
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Remove trailing commas, quote bare object keys, and turn single-quoted
/// strings into double-quoted ones. String contents are left untouched.
pub(crate) fn repair_syntax(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut last_significant: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                let end = scan_string(&chars, i, '"');
                out.extend(&chars[i..end]);
                last_significant = Some('"');
                i = end;
            }
            '\'' => {
                let end = scan_string(&chars, i, '\'');
                out.push('"');
                let mut j = i + 1;
                while j < end.saturating_sub(1) {
                    match chars[j] {
                        '\\' if j + 1 < end - 1 && chars[j + 1] == '\'' => {
                            out.push('\'');
                            j += 2;
                            continue;
                        }
                        '"' => out.push_str("\\\""),
                        other => out.push(other),
                    }
                    j += 1;
                }
                out.push('"');
                last_significant = Some('"');
                i = end;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some(']') | Some('}')) {
                    out.push(',');
                    last_significant = Some(',');
                }
                i += 1;
            }
            c if (c.is_ascii_alphabetic() || c == '_')
                && matches!(last_significant, Some('{') | Some(',')) =>
            {
                let mut end = i;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let ident: String = chars[i..end].iter().collect();
                let next = chars[end..].iter().find(|c| !c.is_whitespace());
                if next == Some(&':') {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else {
                    out.push_str(&ident);
                }
                last_significant = Some(chars[end - 1]);
                i = end;
            }
            c => {
                out.push(c);
                if !c.is_whitespace() {
                    last_significant = Some(c);
                }
                i += 1;
            }
        }
    }

    out
}

/// Index one past the closing quote of the string starting at `start`
/// (or the end of input if it never closes).
fn scan_string(chars: &[char], start: usize, quote: char) -> usize {
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            c if c == quote => return j + 1,
            _ => j += 1,
        }
    }
    chars.len()
}

/// Cut output back to the last complete object and close any brackets
/// still open.
pub(crate) fn close_truncated(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut last_close = None;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '"' => {
                i = scan_string(&chars, i, '"');
                continue;
            }
            '}' => last_close = Some(i),
            _ => {}
        }
        i += 1;
    }

    let kept: Vec<char> = match last_close {
        Some(idx) => chars[..=idx].to_vec(),
        None => chars,
    };

    let mut stack = Vec::new();
    let mut i = 0;
    while i < kept.len() {
        match kept[i] {
            '"' => {
                i = scan_string(&kept, i, '"');
                continue;
            }
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ']' | '}' => {
                stack.pop();
            }
            _ => {}
        }
        i += 1;
    }

    let mut out: String = kept.into_iter().collect();
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}
