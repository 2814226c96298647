//! Face crops and crop sharpness.

use crate::types::BoundingBox;
use image::{DynamicImage, GenericImageView};

/// Margin used when cropping faces for inspection.
pub const DEFAULT_EMBED_MARGIN: f32 = 0.30;

/// Pixel rectangle `[x1, x2) × [y1, y2)` inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropRegion {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// Expand `bbox` by `margin` of its size on every side and clamp to the image.
///
/// Margins are truncated to whole pixels. Returns `None` when nothing of the
/// box remains inside the image.
pub fn margin_region(
    img_width: u32,
    img_height: u32,
    bbox: &BoundingBox,
    margin: f32,
) -> Option<CropRegion> {
    let mx = (margin * bbox.width as f32) as i64;
    let my = (margin * bbox.height as f32) as i64;

    let (x, y) = (bbox.x as i64, bbox.y as i64);
    let x1 = (x - mx).max(0);
    let y1 = (y - my).max(0);
    let x2 = (x + bbox.width as i64 + mx).min(img_width as i64);
    let y2 = (y + bbox.height as i64 + my).min(img_height as i64);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(CropRegion {
        x1: x1 as u32,
        y1: y1 as u32,
        x2: x2 as u32,
        y2: y2 as u32,
    })
}

/// Crop `bbox` (plus `margin`) out of `image`.
pub fn crop_with_margin(
    image: &DynamicImage,
    bbox: &BoundingBox,
    margin: f32,
) -> Option<DynamicImage> {
    let (w, h) = image.dimensions();
    let region = margin_region(w, h, bbox, margin)?;
    Some(image.crop_imm(region.x1, region.y1, region.width(), region.height()))
}

/// Variance of the 3×3 Laplacian over the grayscale image.
///
/// Low values mean a blurry crop. Images smaller than 3×3 score 0.
pub fn sharpness(image: &DynamicImage) -> f64 {
    let gray = image.to_luma8();
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0.0;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
            n += 1.0;
        }
    }

    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}
