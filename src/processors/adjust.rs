//! Color, brightness, contrast, and sharpness adjustment.
//!
//! Each channel works the same way: build a fully degenerate version of
//! the image (grayscale, black, flat mean gray, smoothed) and blend the
//! original against it. Factor 1.0 is the identity, 0.0 is the degenerate
//! image, and values above 1.0 push past the original.

use image::{DynamicImage, Rgb, RgbImage};

use crate::raster::RasterImage;

/// 3x3 smoothing kernel used as the sharpness degenerate, normalized by 13.
const SMOOTH_KERNEL: [[u32; 3]; 3] = [[1, 1, 1], [1, 5, 1], [1, 1, 1]];

/// Combined enhancement pass over all four channels.
///
/// Factors run in a fixed order (color, brightness, contrast, sharpness)
/// and factors at exactly 1.0 are skipped. The image is converted to RGB
/// up front, so the output mode is always RGB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    pub color: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub sharpness: f32,
}

impl Default for Adjustment {
    fn default() -> Self {
        Self {
            color: 1.0,
            brightness: 1.0,
            contrast: 1.0,
            sharpness: 1.0,
        }
    }
}

impl Adjustment {
    pub fn apply(&self, image: &RasterImage) -> RasterImage {
        let mut rgb = image.buffer().to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return image.clone();
        }
        if self.color != 1.0 {
            rgb = blend(&grayscale_degenerate(&rgb), &rgb, self.color);
        }
        if self.brightness != 1.0 {
            rgb = blend(&RgbImage::new(rgb.width(), rgb.height()), &rgb, self.brightness);
        }
        if self.contrast != 1.0 {
            rgb = blend(&mean_gray_degenerate(&rgb), &rgb, self.contrast);
        }
        if self.sharpness != 1.0 {
            rgb = blend(&smooth_degenerate(&rgb), &rgb, self.sharpness);
        }
        image.with_buffer(DynamicImage::ImageRgb8(rgb))
    }
}

/// Per-channel interpolation `degenerate + factor * (original - degenerate)`,
/// rounded half-up and clamped to the byte range.
fn blend(degenerate: &RgbImage, original: &RgbImage, factor: f32) -> RgbImage {
    RgbImage::from_fn(original.width(), original.height(), |x, y| {
        let deg = degenerate.get_pixel(x, y).0;
        let orig = original.get_pixel(x, y).0;
        let mut out = [0u8; 3];
        for channel in 0..3 {
            let deg = f32::from(deg[channel]);
            let orig = f32::from(orig[channel]);
            let value = (deg + factor * (orig - deg) + 0.5) as i32;
            out[channel] = value.clamp(0, 255) as u8;
        }
        Rgb(out)
    })
}

/// Luma of every pixel replicated across the channels.
fn grayscale_degenerate(rgb: &RgbImage) -> RgbImage {
    let luma = DynamicImage::ImageRgb8(rgb.clone()).into_luma8();
    RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let l = luma.get_pixel(x, y).0[0];
        Rgb([l, l, l])
    })
}

/// Flat image at the mean luma, rounded half-up.
fn mean_gray_degenerate(rgb: &RgbImage) -> RgbImage {
    let luma = DynamicImage::ImageRgb8(rgb.clone()).into_luma8();
    let sum: u64 = luma.pixels().map(|px| u64::from(px.0[0])).sum();
    let count = u64::from(luma.width()) * u64::from(luma.height());
    let mean = (sum as f64 / count as f64 + 0.5) as u8;
    RgbImage::from_pixel(rgb.width(), rgb.height(), Rgb([mean, mean, mean]))
}

/// Smoothed copy: interior pixels take the kernel average, the one-pixel
/// border keeps the original values.
fn smooth_degenerate(rgb: &RgbImage) -> RgbImage {
    let (width, height) = rgb.dimensions();
    let mut out = rgb.clone();
    if width < 3 || height < 3 {
        return out;
    }
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut acc = [0u32; 3];
            for (dy, row) in SMOOTH_KERNEL.iter().enumerate() {
                for (dx, &weight) in row.iter().enumerate() {
                    let px = rgb.get_pixel(x - 1 + dx as u32, y - 1 + dy as u32);
                    for channel in 0..3 {
                        acc[channel] += u32::from(px.0[channel]) * weight;
                    }
                }
            }
            // (acc + 6) / 13 rounds half-up for a divisor of 13.
            out.put_pixel(
                x,
                y,
                Rgb([
                    ((acc[0] + 6) / 13) as u8,
                    ((acc[1] + 6) / 13) as u8,
                    ((acc[2] + 6) / 13) as u8,
                ]),
            );
        }
    }
    out
}
