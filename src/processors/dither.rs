//! Atkinson error-diffusion dithering.
//!
//! Thresholds the grayscale image to pure black and white and diffuses an
//! eighth of each quantization error to six forward neighbors, discarding
//! the remaining quarter. The loss is what gives Atkinson output its
//! characteristic light, crisp texture.

use image::{GrayImage, Luma};

use crate::raster::RasterImage;

/// (dx, dy) offsets that each receive an eighth of the error.
const DIFFUSION: [(i64, i64); 6] = [(1, 0), (2, 0), (-1, 1), (0, 1), (1, 1), (0, 2)];

/// Dither to a bilevel image. Values strictly above `threshold` quantize
/// white; the threshold value itself goes black. Forces PNG output, since
/// JPEG would smear the dot pattern apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atkinsonify {
    pub threshold: u8,
}

impl Default for Atkinsonify {
    fn default() -> Self {
        Self { threshold: 128 }
    }
}

impl Atkinsonify {
    pub fn apply(&self, image: &RasterImage) -> RasterImage {
        let gray = image.buffer().to_luma8();
        let (width, height) = gray.dimensions();
        let stride = width as usize;
        // Errors push working values outside 0..=255, so diffuse in i16.
        let mut work: Vec<i16> = gray.as_raw().iter().map(|&v| i16::from(v)).collect();
        let threshold = i16::from(self.threshold);

        for y in 0..i64::from(height) {
            for x in 0..i64::from(width) {
                let idx = y as usize * stride + x as usize;
                let old = work[idx];
                let new = if old > threshold { 255i16 } else { 0 };
                work[idx] = new;
                let err = (old - new) >> 3;
                if err != 0 {
                    for (dx, dy) in DIFFUSION {
                        let nx = x + dx;
                        let ny = y + dy;
                        if nx >= 0 && nx < i64::from(width) && ny < i64::from(height) {
                            work[ny as usize * stride + nx as usize] += err;
                        }
                    }
                }
            }
        }

        let buffer = GrayImage::from_fn(width, height, |x, y| {
            Luma([work[y as usize * stride + x as usize] as u8])
        });
        image.with_bilevel(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ColorMode;
    use crate::test_helpers::{gradient_image, solid_image};

    #[test]
    fn output_is_strictly_bilevel() {
        let out = Atkinsonify::default().apply(&gradient_image(40, 40));
        assert_eq!(out.mode(), ColorMode::Bilevel);
        assert!(
            out.buffer()
                .to_luma8()
                .pixels()
                .all(|px| px.0[0] == 0 || px.0[0] == 255)
        );
    }

    #[test]
    fn dimensions_are_preserved() {
        let out = Atkinsonify::default().apply(&gradient_image(33, 17));
        assert_eq!(out.dimensions(), (33, 17));
    }

    #[test]
    fn pure_black_stays_black() {
        let out = Atkinsonify::default().apply(&solid_image(10, 10, [0, 0, 0]));
        assert!(out.buffer().to_luma8().pixels().all(|px| px.0[0] == 0));
    }

    #[test]
    fn pure_white_stays_white() {
        let out = Atkinsonify::default().apply(&solid_image(10, 10, [255, 255, 255]));
        assert!(out.buffer().to_luma8().pixels().all(|px| px.0[0] == 255));
    }

    #[test]
    fn luma_at_the_threshold_goes_black() {
        let buffer = GrayImage::from_pixel(1, 1, Luma([128]));
        let input = RasterImage::from_buffer(image::DynamicImage::ImageLuma8(buffer));
        let out = Atkinsonify::default().apply(&input);
        assert_eq!(out.buffer().to_luma8().get_pixel(0, 0).0, [0]);
    }

    #[test]
    fn luma_just_above_the_threshold_goes_white() {
        let buffer = GrayImage::from_pixel(1, 1, Luma([129]));
        let input = RasterImage::from_buffer(image::DynamicImage::ImageLuma8(buffer));
        let out = Atkinsonify::default().apply(&input);
        assert_eq!(out.buffer().to_luma8().get_pixel(0, 0).0, [255]);
    }

    #[test]
    fn mid_gray_dithers_into_both_values() {
        let out = Atkinsonify::default().apply(&solid_image(16, 16, [128, 128, 128]));
        let luma = out.buffer().to_luma8();
        assert!(luma.pixels().any(|px| px.0[0] == 0));
        assert!(luma.pixels().any(|px| px.0[0] == 255));
    }

    #[test]
    fn lower_thresholds_produce_more_white() {
        let input = gradient_image(64, 64);
        let white_at = |threshold: u8| {
            Atkinsonify { threshold }
                .apply(&input)
                .buffer()
                .to_luma8()
                .pixels()
                .filter(|px| px.0[0] == 255)
                .count()
        };
        assert!(white_at(64) > white_at(192));
    }
}
