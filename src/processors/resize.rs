//! Geometry processors: aspect-preserving fit, anchored fill crop,
//! entropy-guided smart crop, and uniform-border trim.
//!
//! The dimension planners (`fit_dimensions`, `fill_dimensions`) are pure
//! and unit-testable on their own; the processor types wrap them with the
//! resample/crop calls.

use image::GrayImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::raster::{ColorMode, RasterError, RasterImage};

/// Where the kept region sits after a fill-resize, on a 9-point grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl Anchor {
    /// Fractional (x, y) position of the cut: 0 keeps the leading edge,
    /// 0.5 splits the excess evenly, 1 keeps the trailing edge.
    pub fn fractions(self) -> (f64, f64) {
        match self {
            Anchor::TopLeft => (0.0, 0.0),
            Anchor::Top => (0.5, 0.0),
            Anchor::TopRight => (1.0, 0.0),
            Anchor::Left => (0.0, 0.5),
            Anchor::Center => (0.5, 0.5),
            Anchor::Right => (1.0, 0.5),
            Anchor::BottomLeft => (0.0, 1.0),
            Anchor::Bottom => (0.5, 1.0),
            Anchor::BottomRight => (1.0, 1.0),
        }
    }
}

/// Dimensions for fitting `current` inside the given target extents while
/// preserving aspect ratio. With both extents set the smaller ratio wins;
/// with one, that axis dictates the scale. Scaled axes round half-up.
///
/// # Examples
///
/// ```
/// use rendition::processors::resize::fit_dimensions;
///
/// assert_eq!(fit_dimensions((800, 600), Some(100), None), (100, 75));
/// assert_eq!(fit_dimensions((800, 600), None, Some(100)), (133, 100));
/// assert_eq!(fit_dimensions((800, 600), Some(100), Some(100)), (100, 75));
/// ```
pub fn fit_dimensions(current: (u32, u32), width: Option<u32>, height: Option<u32>) -> (u32, u32) {
    let (cur_w, cur_h) = (f64::from(current.0), f64::from(current.1));
    let ratio = match (width, height) {
        (Some(w), Some(h)) => f64::min(f64::from(w) / cur_w, f64::from(h) / cur_h),
        (Some(w), None) => f64::from(w) / cur_w,
        (None, Some(h)) => f64::from(h) / cur_h,
        (None, None) => 1.0,
    };
    let new_w = ((cur_w * ratio).round() as u32).max(1);
    let new_h = ((cur_h * ratio).round() as u32).max(1);
    (new_w, new_h)
}

/// Dimensions for covering the `target` box: the larger axis ratio wins, so
/// the scaled image is at least as large as the target on both axes. The
/// scaled axes truncate, then clamp up to the target so the excess is never
/// negative.
///
/// # Examples
///
/// ```
/// use rendition::processors::resize::fill_dimensions;
///
/// assert_eq!(fill_dimensions((800, 600), (100, 100)), (133, 100));
/// assert_eq!(fill_dimensions((600, 800), (100, 100)), (100, 133));
/// ```
pub fn fill_dimensions(current: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (cur_w, cur_h) = (f64::from(current.0), f64::from(current.1));
    let ratio = f64::max(f64::from(target.0) / cur_w, f64::from(target.1) / cur_h);
    let new_w = ((cur_w * ratio) as u32).max(target.0);
    let new_h = ((cur_h * ratio) as u32).max(target.1);
    (new_w, new_h)
}

/// Offset of the kept window within `excess` spare pixels for an anchor
/// fraction.
///
/// # Examples
///
/// ```
/// use rendition::processors::resize::anchor_offset;
///
/// assert_eq!(anchor_offset(33, 0.0), 0);
/// assert_eq!(anchor_offset(33, 0.5), 16);
/// assert_eq!(anchor_offset(33, 1.0), 33);
/// ```
pub fn anchor_offset(excess: u32, fraction: f64) -> u32 {
    if fraction <= 0.0 {
        0
    } else if fraction >= 1.0 {
        excess
    } else {
        excess / 2
    }
}

/// Ratio-preserving resize into a bounding box. With `upscale` off, an
/// image already inside the box is returned unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fit {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub upscale: bool,
}

impl Fit {
    pub fn to_width(width: u32) -> Self {
        Self {
            width: Some(width),
            ..Self::default()
        }
    }

    pub fn to_height(height: u32) -> Self {
        Self {
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn within(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            upscale: false,
        }
    }

    pub fn apply(&self, image: RasterImage) -> RasterImage {
        if self.width.is_none() && self.height.is_none() {
            return image;
        }
        let (cur_w, cur_h) = image.dimensions();
        let (new_w, new_h) = fit_dimensions((cur_w, cur_h), self.width, self.height);
        if (new_w > cur_w || new_h > cur_h) && !self.upscale {
            return image;
        }
        if (new_w, new_h) == (cur_w, cur_h) {
            return image;
        }
        image.resize_exact(new_w, new_h, FilterType::Lanczos3)
    }
}

/// Fill-resize to cover the target box, then cut the excess according to
/// the anchor. Output dimensions are exactly (width, height).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub width: u32,
    pub height: u32,
    pub anchor: Anchor,
}

impl Crop {
    pub fn new(width: u32, height: u32) -> Self {
        Self::anchored(width, height, Anchor::Center)
    }

    pub fn anchored(width: u32, height: u32, anchor: Anchor) -> Self {
        Self {
            width,
            height,
            anchor,
        }
    }

    pub fn apply(&self, image: &RasterImage) -> Result<RasterImage, RasterError> {
        let current = image.dimensions();
        let (scaled_w, scaled_h) = fill_dimensions(current, (self.width, self.height));
        let scaled = if (scaled_w, scaled_h) == current {
            image.clone()
        } else {
            image.resize_exact(scaled_w, scaled_h, FilterType::Lanczos3)
        };
        let (x_fraction, y_fraction) = self.anchor.fractions();
        let left = anchor_offset(scaled_w - self.width, x_fraction);
        let top = anchor_offset(scaled_h - self.height, y_fraction);
        scaled.crop(left, top, self.width, self.height)
    }
}

/// Fill-resize, then repeatedly shave slices off the lower-entropy side of
/// each axis until the target dimensions remain.
///
/// The per-iteration slice is `min(excess, max(excess / 5, min_slice))`.
/// Sides whose entropies are within `entropy_tie_break` of each other
/// (including two featureless sides) are cut evenly to avoid drifting
/// toward one edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmartCrop {
    pub width: u32,
    pub height: u32,
    pub entropy_tie_break: f64,
    pub min_slice: u32,
}

impl SmartCrop {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            entropy_tie_break: 0.01,
            min_slice: 10,
        }
    }

    pub fn apply(&self, image: &RasterImage) -> Result<RasterImage, RasterError> {
        let current = image.dimensions();
        let (scaled_w, scaled_h) = fill_dimensions(current, (self.width, self.height));
        let scaled = if (scaled_w, scaled_h) == current {
            image.clone()
        } else {
            image.resize_exact(scaled_w, scaled_h, FilterType::Lanczos3)
        };

        let (mut left, mut right) = (0u32, scaled_w);
        while right - left > self.width {
            let excess = right - left - self.width;
            let slice = excess.min((excess / 5).max(self.min_slice));
            let start = scaled.crop(left, 0, slice, scaled_h)?;
            let end = scaled.crop(right - slice, 0, slice, scaled_h)?;
            let (cut_start, cut_end) = self.split_cut(&start, &end, slice);
            left += cut_start;
            right -= cut_end;
        }

        let (mut top, mut bottom) = (0u32, scaled_h);
        while bottom - top > self.height {
            let excess = bottom - top - self.height;
            let slice = excess.min((excess / 5).max(self.min_slice));
            let start = scaled.crop(0, top, scaled_w, slice)?;
            let end = scaled.crop(0, bottom - slice, scaled_w, slice)?;
            let (cut_start, cut_end) = self.split_cut(&start, &end, slice);
            top += cut_start;
            bottom -= cut_end;
        }

        scaled.crop(left, top, right - left, bottom - top)
    }

    /// Decide how much of `slice` to cut from each side. Ties split the
    /// cut evenly (remainder to the trailing side); otherwise the whole
    /// slice comes off the lower-entropy side.
    fn split_cut(&self, start: &RasterImage, end: &RasterImage, slice: u32) -> (u32, u32) {
        let start_entropy = histogram_entropy(&start.histogram());
        let end_entropy = histogram_entropy(&end.histogram());
        let tied = if end_entropy == 0.0 {
            start_entropy == 0.0
        } else {
            (start_entropy / end_entropy - 1.0).abs() < self.entropy_tie_break
        };
        if tied {
            (slice / 2, slice - slice / 2)
        } else if start_entropy > end_entropy {
            (0, slice)
        } else {
            (slice, 0)
        }
    }
}

/// Shannon entropy (in bits) of a pixel-value histogram.
///
/// # Examples
///
/// ```
/// use rendition::processors::resize::histogram_entropy;
///
/// // A single occupied bin carries no information.
/// assert_eq!(histogram_entropy(&[16, 0, 0]), 0.0);
/// // Two equally likely values carry one bit.
/// assert!((histogram_entropy(&[8, 8]) - 1.0).abs() < 1e-12);
/// ```
pub fn histogram_entropy(histogram: &[u32]) -> f64 {
    let total: u64 = histogram.iter().map(|&count| u64::from(count)).sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    histogram
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = f64::from(count) / total;
            -(p * p.log2())
        })
        .sum()
}

/// Crop away a uniform border: binarize, median-filter to suppress lone
/// noise pixels, and keep the bounding box of everything that differs from
/// the configured background luma. No difference leaves the image
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trim {
    pub background_luma: u8,
}

impl Default for Trim {
    fn default() -> Self {
        Self {
            background_luma: 255,
        }
    }
}

impl Trim {
    pub fn apply(&self, image: &RasterImage) -> Result<RasterImage, RasterError> {
        let bilevel = image.convert(ColorMode::Bilevel);
        let filtered = median_filter_3x3(&bilevel.buffer().to_luma8());
        let background = if self.background_luma >= 128 { 255u8 } else { 0 };

        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, px) in filtered.enumerate_pixels() {
            if px.0[0] != background {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }

        match bounds {
            Some((x0, y0, x1, y1)) => image.crop(x0, y0, x1 - x0 + 1, y1 - y0 + 1),
            None => Ok(image.clone()),
        }
    }
}

/// 3x3 median with edge-replicating sampling, so the output keeps the
/// input dimensions.
fn median_filter_3x3(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let mut window = [0u8; 9];
        let mut slot = 0;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let sx = (i64::from(x) + dx).clamp(0, i64::from(width) - 1) as u32;
                let sy = (i64::from(y) + dy).clamp(0, i64::from(height) - 1) as u32;
                window[slot] = image.get_pixel(sx, sy).0[0];
                slot += 1;
            }
        }
        window.sort_unstable();
        image::Luma([window[4]])
    })
}
