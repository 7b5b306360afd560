//! NeuQuant palette learning.
//!
//! Trains a 256-color neural palette on the image and emits it as a 16x16
//! RGBA swatch sheet, one palette entry per pixel. The raw palette is also
//! available through [`NeuQuantize::palette`] for callers that want the
//! colors without the swatch.

use color_quant::NeuQuant;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::raster::RasterImage;

/// Learn a 256-color palette. `sample_factor` trades quality for speed:
/// 1 scans every pixel, 30 samples sparsely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeuQuantize {
    pub sample_factor: i32,
}

impl Default for NeuQuantize {
    fn default() -> Self {
        Self { sample_factor: 10 }
    }
}

impl NeuQuantize {
    pub fn apply(&self, image: &RasterImage) -> RasterImage {
        if image.width() == 0 || image.height() == 0 {
            return image.clone();
        }
        let palette = self.palette(image);
        let mut swatch = RgbaImage::new(16, 16);
        for (slot, px) in swatch.pixels_mut().enumerate() {
            *px = Rgba(palette[slot]);
        }
        image.with_buffer(DynamicImage::ImageRgba8(swatch))
    }

    /// The learned palette, 256 RGBA entries.
    pub fn palette(&self, image: &RasterImage) -> Vec<[u8; 4]> {
        let rgba = image.buffer().to_rgba8();
        let quantizer = NeuQuant::new(self.sample_factor, 256, rgba.as_raw());
        quantizer
            .color_map_rgba()
            .chunks_exact(4)
            .map(|entry| [entry[0], entry[1], entry[2], entry[3]])
            .collect()
    }
}
