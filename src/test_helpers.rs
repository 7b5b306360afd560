//! Shared test fixtures.
//!
//! Small synthetic images with known pixel content, pre-encoded byte
//! fixtures for decoder tests, and freshly built ICC profiles so no binary
//! blobs need to live in the repository.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let img = gradient_image(64, 48);
//! assert_eq!(img.dimensions(), (64, 48));
//!
//! let decoded = RasterImage::decode(&encoded_jpeg(64, 48)).unwrap();
//! ```

use std::io::Cursor;
use std::sync::OnceLock;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lcms2::{CIExyY, CIExyYTRIPLE, Profile, ToneCurve};

use crate::raster::RasterImage;

// =========================================================================
// Synthetic images
// =========================================================================

fn gradient_rgb(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
}

/// RGB image whose red channel follows x, green follows y. Entropy-rich
/// and deterministic, so resampled copies stay comparable.
pub fn gradient_image(width: u32, height: u32) -> RasterImage {
    RasterImage::from_buffer(DynamicImage::ImageRgb8(gradient_rgb(width, height)))
}

/// Single-color RGB image.
pub fn solid_image(width: u32, height: u32, color: [u8; 3]) -> RasterImage {
    let buffer = RgbImage::from_pixel(width, height, Rgb(color));
    RasterImage::from_buffer(DynamicImage::ImageRgb8(buffer))
}

/// Black and white checkerboard with `cell`-pixel squares, starting white
/// at the origin.
pub fn checkerboard_image(width: u32, height: u32, cell: u32) -> RasterImage {
    let buffer = RgbImage::from_fn(width, height, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    });
    RasterImage::from_buffer(DynamicImage::ImageRgb8(buffer))
}

// =========================================================================
// Encoded byte fixtures
// =========================================================================

fn encode(buffer: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(buffer)
        .write_to(&mut out, format)
        .unwrap();
    out.into_inner()
}

/// A gradient encoded as JPEG.
pub fn encoded_jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(gradient_rgb(width, height), ImageFormat::Jpeg)
}

/// A gradient encoded as PNG.
pub fn encoded_png(width: u32, height: u32) -> Vec<u8> {
    encode(gradient_rgb(width, height), ImageFormat::Png)
}

// =========================================================================
// ICC profiles
// =========================================================================

/// Serialized stock sRGB profile. Memoized: lcms2 stamps a creation time
/// into the profile header, so repeated construction is not byte-stable.
pub fn srgb_profile_bytes() -> Vec<u8> {
    static BYTES: OnceLock<Vec<u8>> = OnceLock::new();
    BYTES
        .get_or_init(|| Profile::new_srgb().icc().unwrap())
        .clone()
}

/// Serialized wide-gamut RGB profile (ProPhoto primaries, gamma 1.8).
/// Distinct from sRGB, so transforms between the two actually move pixel
/// values. Memoized like [`srgb_profile_bytes`].
pub fn wide_rgb_profile_bytes() -> Vec<u8> {
    static BYTES: OnceLock<Vec<u8>> = OnceLock::new();
    BYTES
        .get_or_init(|| {
            let white = CIExyY {
                x: 0.3457,
                y: 0.3585,
                Y: 1.0,
            };
            let primaries = CIExyYTRIPLE {
                Red: CIExyY {
                    x: 0.7347,
                    y: 0.2653,
                    Y: 1.0,
                },
                Green: CIExyY {
                    x: 0.1596,
                    y: 0.8404,
                    Y: 1.0,
                },
                Blue: CIExyY {
                    x: 0.0366,
                    y: 0.0001,
                    Y: 1.0,
                },
            };
            let gamma = ToneCurve::new(1.8);
            let profile = Profile::new_rgb(&white, &primaries, &[&gamma, &gamma, &gamma]).unwrap();
            profile.icc().unwrap()
        })
        .clone()
}
