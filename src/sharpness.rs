//! # Image Quality Score for Keyframe Curation
//!
//! Measures how sharp each keyframe image is so that blurred keyframes
//! (motion blur during mapping, defocus) rank below crisp ones.
//!
//! ## Laplacian Variance (Sharpness)
//! - Detects blur by measuring high-frequency content (edges)
//! - Unbounded: magnitude depends on resolution, lens and scene content
//!
//! ## Batch-Relative Normalization
//!
//! Because the raw variance has no fixed scale, it is only comparable within
//! one mapping session. Scoring therefore runs in two stages:
//!
//! 1. **Raw statistic** per image ([`laplacian_variance`]), independent and
//!    parallel across keyframes.
//! 2. **Reduction + map**: a [`VarianceRange`] is reduced over the batch and
//!    every raw value is mapped into `[0, 1]` with [`normalize`].
//!
//! The range is an explicit value. Large maps can be scored in chunks and the
//! per-chunk ranges combined with [`VarianceRange::merge`] before the final
//! mapping.

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Below this spread every image in the batch scores 1.0.
const DEGENERATE_SPREAD: f64 = 1e-6;

/// Raw Laplacian variance of a keyframe image.
///
/// Fails with `InvalidInput` for an image with zero width or height.
pub fn calculate_sharpness(keyframe_id: u64, img: &DynamicImage) -> Result<f64> {
    if img.width() == 0 || img.height() == 0 {
        return Err(Error::input(keyframe_id, "image is empty"));
    }
    let gray_img = img.to_luma8();
    Ok(laplacian_variance(&gray_img))
}

/// Variance of the 4-neighbour Laplacian response over the interior pixels
/// of a keyframe image.
///
/// Motion blur and defocus during mapping flatten the response, so a blurred
/// keyframe lands near zero while a crisp view of a textured scene scores
/// high. Images narrower or shorter than 3 pixels have no interior and score
/// 0.0.
pub fn laplacian_variance(img: &GrayImage) -> f64 {
    let (width, height) = img.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let at = |x: u32, y: u32| f64::from(img.get_pixel(x, y)[0]);

    // Welford accumulation, no per-pixel buffer.
    let mut count = 0.0;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let response =
                at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
            count += 1.0;
            let delta = response - mean;
            mean += delta / count;
            m2 += delta * (response - mean);
        }
    }
    m2 / count
}

/// Min/max of raw variances over the batch being normalized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceRange {
    pub min: f64,
    pub max: f64,
}

impl VarianceRange {
    /// Range of a single value.
    pub fn of(value: f64) -> Self {
        Self { min: value, max: value }
    }

    /// Range of a slice, `None` when it is empty.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        values.iter().copied().map(Self::of).reduce(Self::merge)
    }

    /// Combines two partial ranges. Associative and commutative, so chunk
    /// ranges can be merged in any order.
    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn spread(&self) -> f64 {
        self.max - self.min
    }
}

/// Min-max normalized score of `raw` within `range`, clipped to `[0, 1]`.
///
/// A degenerate range (all variances equal) yields 1.0.
pub fn normalize(raw: f64, range: &VarianceRange) -> f64 {
    let spread = range.spread();
    if spread < DEGENERATE_SPREAD {
        return 1.0;
    }
    ((raw - range.min) / spread).clamp(0.0, 1.0)
}

/// Normalizes a whole batch against its own range.
pub fn normalize_batch(raw: &[f64]) -> Vec<f64> {
    match VarianceRange::from_values(raw) {
        Some(range) => raw.iter().map(|&v| normalize(v, &range)).collect(),
        None => Vec::new(),
    }
}

/// Coarse sharpness label for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharpnessGrade {
    VerySharp,
    Sharp,
    Moderate,
    Blurry,
    VeryBlurry,
}

impl SharpnessGrade {
    pub fn from_variance(variance: f64) -> Self {
        if variance > 500.0 {
            SharpnessGrade::VerySharp
        } else if variance > 200.0 {
            SharpnessGrade::Sharp
        } else if variance > 100.0 {
            SharpnessGrade::Moderate
        } else if variance > 50.0 {
            SharpnessGrade::Blurry
        } else {
            SharpnessGrade::VeryBlurry
        }
    }
}
