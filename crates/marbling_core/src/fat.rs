//! Fat-area estimation by HSV thresholding.
//!
//! Hue uses the 8-bit convention (0..=180, degrees halved) so thresholds
//! entered by operators match common imaging tools.

use anyhow::{Context, Result};
use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Half-width of the square structuring element used for opening/closing.
pub const KERNEL_RADIUS: u8 = 2;
pub const HUE_MAX: u8 = 180;

const ON: u8 = 255;
const OFF: u8 = 0;

/// Inclusive HSV bounds of the fat color range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HsvThresholds {
    pub h_low: u8,
    pub h_high: u8,
    pub s_low: u8,
    pub s_high: u8,
    pub v_low: u8,
    pub v_high: u8,
}

impl Default for HsvThresholds {
    fn default() -> Self {
        Self {
            h_low: 0,
            h_high: HUE_MAX,
            s_low: 0,
            s_high: 60,
            v_low: 200,
            v_high: 255,
        }
    }
}

impl HsvThresholds {
    pub fn contains(&self, [h, s, v]: [u8; 3]) -> bool {
        (self.h_low..=self.h_high).contains(&h)
            && (self.s_low..=self.s_high).contains(&s)
            && (self.v_low..=self.v_high).contains(&v)
    }
}

/// Fat share of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatMeasurement {
    pub file: PathBuf,
    /// Percentage of mask pixels that are fat, in [0, 100].
    pub fat_percent: f64,
}

pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = f32::from(max - min);
    let v = max;
    let s = if max == 0 {
        0
    } else {
        (diff * 255.0 / f32::from(max)).round() as u8
    };
    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let mut h = if diff == 0.0 {
        0.0
    } else if max == r {
        60.0 * (gf - bf) / diff
    } else if max == g {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }
    let h = ((h / 2.0).round() as u8).min(HUE_MAX);
    [h, s, v]
}

/// 255 where the pixel falls inside `thresholds`, 0 elsewhere.
pub fn threshold_mask(img: &RgbImage, thresholds: &HsvThresholds) -> GrayImage {
    let (w, h) = img.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let hsv = rgb_to_hsv(img.get_pixel(x, y).0);
        Luma([if thresholds.contains(hsv) { ON } else { OFF }])
    })
}

/// Threshold, then open and close with a 5×5 square ([`KERNEL_RADIUS`]
/// under the chessboard norm).
pub fn fat_mask(img: &RgbImage, thresholds: &HsvThresholds) -> GrayImage {
    let mask = threshold_mask(img, thresholds);
    if mask.width() == 0 || mask.height() == 0 {
        return mask;
    }
    let opened = morphology::open(&mask, Norm::LInf, KERNEL_RADIUS);
    morphology::close(&opened, Norm::LInf, KERNEL_RADIUS)
}

pub fn fat_percentage(mask: &GrayImage) -> f64 {
    let total = mask.width() as usize * mask.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let fat = mask.pixels().filter(|p| p[0] != OFF).count();
    fat as f64 / total as f64 * 100.0
}

pub fn mask_for_file(path: impl AsRef<Path>, thresholds: &HsvThresholds) -> Result<GrayImage> {
    let path = path.as_ref();
    let img = image::open(path)
        .with_context(|| format!("cannot open image: {}", path.display()))?
        .to_rgb8();
    Ok(fat_mask(&img, thresholds))
}

/// Fat percentage of an image file; unreadable files count as 0%.
pub fn measure_file(path: impl AsRef<Path>, thresholds: &HsvThresholds) -> f64 {
    let path = path.as_ref();
    match mask_for_file(path, thresholds) {
        Ok(mask) => fat_percentage(&mask),
        Err(e) => {
            tracing::warn!("{e:#}");
            0.0
        }
    }
}

/// Measure many files in parallel; output order follows `paths`.
pub fn measure_batch(paths: &[PathBuf], thresholds: &HsvThresholds) -> Vec<FatMeasurement> {
    paths
        .par_iter()
        .map(|path| FatMeasurement {
            file: path.clone(),
            fat_percent: measure_file(path, thresholds),
        })
        .collect()
}
