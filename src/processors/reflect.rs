//! Gradient reflection below the image, composited onto a background
//! color.
//!
//! The canvas grows by `size * height` rows. Those rows hold a vertically
//! flipped copy of the image blended toward the background through a
//! 255-entry alpha ramp: the ramp starts at `255 - 255 * opacity`, climbs
//! to fully opaque over `255 * size` entries, and is nearest-sampled as if
//! stretched over the full image height.

use image::{DynamicImage, Rgb, RgbImage, imageops};

use crate::raster::RasterImage;

/// Parse a `#rrggbb` or `#rgb` hex color.
///
/// # Examples
///
/// ```
/// use rendition::processors::reflect::parse_hex_color;
///
/// assert_eq!(parse_hex_color("#ff8000"), Ok([255, 128, 0]));
/// assert_eq!(parse_hex_color("#fff"), Ok([255, 255, 255]));
/// assert!(parse_hex_color("fff").is_err());
/// ```
pub fn parse_hex_color(value: &str) -> Result<[u8; 3], String> {
    let digits = value
        .strip_prefix('#')
        .ok_or_else(|| format!("color {value:?} must start with '#'"))?;
    let parse =
        |s: &str| u8::from_str_radix(s, 16).map_err(|_| format!("color {value:?} is not hex"));
    match digits.len() {
        6 => Ok([
            parse(&digits[0..2])?,
            parse(&digits[2..4])?,
            parse(&digits[4..6])?,
        ]),
        3 => {
            let mut out = [0u8; 3];
            for (slot, ch) in out.iter_mut().zip(digits.chars()) {
                let digit = parse(&ch.to_string())?;
                *slot = digit * 16 + digit;
            }
            Ok(out)
        }
        _ => Err(format!("color {value:?} must have 3 or 6 hex digits")),
    }
}

/// Mirror-below-the-fold effect. `size` is the reflection height as a
/// fraction of the image height; `opacity` is how strongly the reflection
/// shows through at the fold. Forces JPEG output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reflection {
    pub background: [u8; 3],
    pub size: f32,
    pub opacity: f32,
}

impl Default for Reflection {
    fn default() -> Self {
        Self {
            background: [255, 255, 255],
            size: 0.0,
            opacity: 0.6,
        }
    }
}

impl Reflection {
    pub fn apply(&self, image: &RasterImage) -> RasterImage {
        let rgb = image.buffer().to_rgb8();
        let (width, height) = rgb.dimensions();
        let reflection_height = (height as f32 * self.size) as u32;
        if width == 0 || height == 0 || reflection_height == 0 {
            return image.with_buffer(DynamicImage::ImageRgb8(rgb));
        }

        let flipped = imageops::flip_vertical(&rgb);
        let mut canvas = RgbImage::from_pixel(width, height + reflection_height, Rgb(self.background));
        for (x, y, px) in rgb.enumerate_pixels() {
            canvas.put_pixel(x, y, *px);
        }
        for y in 0..reflection_height {
            let alpha = u32::from(self.row_alpha(y, height));
            for x in 0..width {
                let source = flipped.get_pixel(x, y).0;
                let mut blended = [0u8; 3];
                for channel in 0..3 {
                    let value = u32::from(self.background[channel]) * alpha
                        + u32::from(source[channel]) * (255 - alpha);
                    blended[channel] = ((value + 127) / 255) as u8;
                }
                canvas.put_pixel(x, height + y, Rgb(blended));
            }
        }
        image.with_buffer(DynamicImage::ImageRgb8(canvas))
    }

    /// Background alpha for reflection row `y`. 0 shows the reflection,
    /// 255 shows pure background.
    fn row_alpha(&self, y: u32, height: u32) -> u8 {
        // Nearest sample of the 255-entry ramp stretched over the image
        // height.
        let ramp_row = (((f64::from(y) + 0.5) * 255.0 / f64::from(height)) as u32).min(254);
        let start = (255.0 - 255.0 * f64::from(self.opacity)) as u32;
        let steps = (255.0 * f64::from(self.size)) as u32;
        if ramp_row < steps {
            let increment = (255.0 - start as f64) / steps as f64;
            (f64::from(ramp_row) * increment + start as f64) as u8
        } else {
            255
        }
    }
}
