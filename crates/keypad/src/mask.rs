//! Segmentation-mask decoding and centroid computation.
//!
//! A mask covers exactly the key's pixel bounds. Two encodings arrive from the
//! vision service: run-length pairs `(value, run)` where a non-zero value is
//! foreground, and grayscale PNG images which are resized to the bounds and
//! thresholded.

use finsync_core::{Bounds, Point};
use image::imageops::FilterType;
use tracing::debug;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const PNG_THRESHOLD: u8 = 127;

/// Flat foreground bitmap, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<bool>,
}

impl Bitmap {
    pub fn foreground_count(&self) -> usize {
        self.pixels.iter().filter(|p| **p).count()
    }
}

/// Pixel grid size for a bounds (at least 1x1).
fn grid_size(bounds: &Bounds) -> (usize, usize) {
    let w = bounds.width.round().max(1.0) as usize;
    let h = bounds.height.round().max(1.0) as usize;
    (w, h)
}

/// Decode `(value, run)` pairs into a `width * height` bitmap. Runs past the
/// end are truncated; a short buffer leaves the rest as background. A
/// dangling value byte without a run length is ignored.
pub fn decode_rle(data: &[u8], width: usize, height: usize) -> Bitmap {
    let total = width * height;
    let mut pixels = Vec::with_capacity(total);

    for pair in data.chunks_exact(2) {
        if pixels.len() >= total {
            break;
        }
        let (value, run) = (pair[0], pair[1] as usize);
        let run = run.min(total - pixels.len());
        pixels.extend(std::iter::repeat(value != 0).take(run));
    }
    pixels.resize(total, false);

    Bitmap { width, height, pixels }
}

/// Decode a PNG mask, resized to `width * height`.
pub fn decode_png(data: &[u8], width: usize, height: usize) -> Option<Bitmap> {
    let img = match image::load_from_memory(data) {
        Ok(img) => img,
        Err(e) => {
            debug!(error = %e, "mask PNG decode failed");
            return None;
        }
    };
    let luma = image::imageops::resize(
        &img.to_luma8(),
        width as u32,
        height as u32,
        FilterType::Nearest,
    );
    let pixels = luma.pixels().map(|p| p.0[0] > PNG_THRESHOLD).collect();
    Some(Bitmap { width, height, pixels })
}

/// Mean of foreground pixel centers, or `None` when nothing is foreground.
pub fn centroid(bitmap: &Bitmap) -> Option<(f64, f64)> {
    let (mut sum_x, mut sum_y, mut count) = (0.0, 0.0, 0usize);
    for (i, _) in bitmap.pixels.iter().enumerate().filter(|(_, p)| **p) {
        sum_x += (i % bitmap.width) as f64 + 0.5;
        sum_y += (i / bitmap.width) as f64 + 0.5;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some((sum_x / count as f64, sum_y / count as f64))
}

/// Decode a raw mask cropped from `bounds` and return its centroid in page
/// pixels. `None` for an empty or undecodable mask; callers fall back to the
/// bounds center. A returned point always lies within `bounds`.
pub fn mask_centroid(raw: &[u8], bounds: &Bounds) -> Option<Point> {
    if raw.is_empty() || bounds.is_empty() {
        return None;
    }
    let (w, h) = grid_size(bounds);
    let bitmap = if raw.starts_with(&PNG_SIGNATURE) {
        decode_png(raw, w, h)?
    } else {
        decode_rle(raw, w, h)
    };

    let (cx, cy) = centroid(&bitmap)?;
    // Grid cells are rounded up from fractional bounds; scale back so the
    // point stays inside.
    let x = bounds.x + cx * bounds.width / w as f64;
    let y = bounds.y + cy * bounds.height / h as f64;
    Some(Point::new(
        x.clamp(bounds.x, bounds.x + bounds.width),
        y.clamp(bounds.y, bounds.y + bounds.height),
    ))
}
