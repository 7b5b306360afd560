//! Backend adapter over the `image` crate.
//!
//! `RasterImage` is the unit of work the processor chain passes along: a
//! decoded pixel buffer plus the metadata captured at decode time (embedded
//! ICC profile bytes, EXIF orientation, detected container format). The
//! chain owns its image exclusively; nothing here is shared across
//! concurrent executions.
//!
//! Decode and encode are the only places the crate touches container
//! formats. Everything else works on the in-memory buffer.

use std::collections::HashMap;
use std::io::Cursor;

use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageReader};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Decode error: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Encode error: {0}")]
    Encode(#[source] image::ImageError),
    #[error("Crop box ({x}, {y}, {width}x{height}) exceeds image extent {image_width}x{image_height}")]
    Bounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Color modes a `RasterImage` can be in.
///
/// `Bilevel` is stored as 8-bit grayscale restricted to the values 0 and
/// 255; it is produced by thresholding (`convert`) or dithering, never
/// derived from a decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Bilevel,
    Luma,
    LumaAlpha,
    Rgb,
    Rgba,
}

/// Output container formats the encoder supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
    WebP,
    Tiff,
}

impl OutputFormat {
    /// The canonical file extension for this format.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Gif => "gif",
            OutputFormat::Bmp => "bmp",
            OutputFormat::WebP => "webp",
            OutputFormat::Tiff => "tiff",
        }
    }

    /// Parse a file extension (without the dot, any case).
    ///
    /// # Examples
    ///
    /// ```
    /// use rendition::raster::OutputFormat;
    ///
    /// assert_eq!(OutputFormat::from_extension("JPG"), Some(OutputFormat::Jpeg));
    /// assert_eq!(OutputFormat::from_extension("tif"), Some(OutputFormat::Tiff));
    /// assert_eq!(OutputFormat::from_extension("svg"), None);
    /// ```
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "gif" => Some(OutputFormat::Gif),
            "bmp" => Some(OutputFormat::Bmp),
            "webp" => Some(OutputFormat::WebP),
            "tif" | "tiff" => Some(OutputFormat::Tiff),
            _ => None,
        }
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Gif => image::ImageFormat::Gif,
            OutputFormat::Bmp => image::ImageFormat::Bmp,
            OutputFormat::WebP => image::ImageFormat::WebP,
            OutputFormat::Tiff => image::ImageFormat::Tiff,
        }
    }

    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
            image::ImageFormat::Png => Some(OutputFormat::Png),
            image::ImageFormat::Gif => Some(OutputFormat::Gif),
            image::ImageFormat::Bmp => Some(OutputFormat::Bmp),
            image::ImageFormat::WebP => Some(OutputFormat::WebP),
            image::ImageFormat::Tiff => Some(OutputFormat::Tiff),
            _ => None,
        }
    }
}

/// JPEG encode quality, clamped to 1-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeOptions {
    pub quality: Quality,
}

/// A decoded image plus the metadata captured while decoding it.
#[derive(Clone)]
pub struct RasterImage {
    pub(crate) buffer: DynamicImage,
    pub(crate) mode: ColorMode,
    pub(crate) icc: Option<Vec<u8>>,
    pub(crate) orientation: u8,
    pub(crate) source_format: Option<OutputFormat>,
}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("mode", &self.mode)
            .field("icc", &self.icc.as_ref().map(Vec::len))
            .field("orientation", &self.orientation)
            .field("source_format", &self.source_format)
            .finish()
    }
}

impl RasterImage {
    /// Wrap an already-decoded buffer. Carries no embedded profile, no
    /// orientation, and no source format.
    pub fn from_buffer(buffer: DynamicImage) -> Self {
        let mode = derive_mode(&buffer);
        Self {
            buffer,
            mode,
            icc: None,
            orientation: 1,
            source_format: None,
        }
    }

    /// Decode encoded image bytes, capturing the embedded ICC profile and
    /// EXIF orientation when present. Absence of either is normal.
    pub fn decode(bytes: &[u8]) -> Result<Self, RasterError> {
        let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        let source_format = reader.format().and_then(OutputFormat::from_image_format);
        let mut decoder = reader.into_decoder().map_err(RasterError::Decode)?;
        let icc = decoder.icc_profile().ok().flatten();
        let buffer = DynamicImage::from_decoder(decoder).map_err(RasterError::Decode)?;
        let mode = derive_mode(&buffer);
        Ok(Self {
            buffer,
            mode,
            icc,
            orientation: read_orientation(bytes),
            source_format,
        })
    }

    /// Encode to the given container format.
    ///
    /// JPEG drops alpha (the buffer is narrowed to RGB first); palette
    /// formats derive their color table, including any transparency entry,
    /// from the pixels themselves. Mode/format pairs the codec cannot
    /// express fail with an encode error.
    pub fn encode(&self, format: OutputFormat, options: &EncodeOptions) -> Result<Vec<u8>, RasterError> {
        let mut out = Cursor::new(Vec::new());
        match format {
            OutputFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut out, options.quality.value() as u8);
                match self.mode {
                    ColorMode::Rgba | ColorMode::LumaAlpha => self
                        .buffer
                        .to_rgb8()
                        .write_with_encoder(encoder)
                        .map_err(RasterError::Encode)?,
                    _ => self
                        .buffer
                        .write_with_encoder(encoder)
                        .map_err(RasterError::Encode)?,
                }
            }
            OutputFormat::Gif => {
                let frame = image::Frame::new(self.buffer.to_rgba8());
                let mut encoder = GifEncoder::new(&mut out);
                encoder.encode_frame(frame).map_err(RasterError::Encode)?;
            }
            _ => self
                .buffer
                .write_to(&mut out, format.image_format())
                .map_err(RasterError::Encode)?,
        }
        Ok(out.into_inner())
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    /// Embedded ICC profile bytes captured at decode time, if any.
    pub fn icc_profile(&self) -> Option<&[u8]> {
        self.icc.as_deref()
    }

    /// EXIF orientation value (1-8) captured at decode time; 1 when the
    /// source carried no usable EXIF data.
    pub fn orientation(&self) -> u8 {
        self.orientation
    }

    /// Container format the source bytes were decoded from, if recognized.
    pub fn source_format(&self) -> Option<OutputFormat> {
        self.source_format
    }

    pub fn buffer(&self) -> &DynamicImage {
        &self.buffer
    }

    /// Convert to another color mode. Narrowing conversions (dropping
    /// alpha, collapsing to grayscale) are lossy. `Bilevel` thresholds the
    /// grayscale value at mid-gray (no dithering).
    pub fn convert(&self, mode: ColorMode) -> RasterImage {
        if mode == self.mode {
            return self.clone();
        }
        let buffer = match mode {
            ColorMode::Bilevel => {
                let mut gray = self.buffer.to_luma8();
                for px in gray.pixels_mut() {
                    px.0[0] = if px.0[0] >= 128 { 255 } else { 0 };
                }
                return self.carry(DynamicImage::ImageLuma8(gray), ColorMode::Bilevel);
            }
            ColorMode::Luma => DynamicImage::ImageLuma8(self.buffer.to_luma8()),
            ColorMode::LumaAlpha => DynamicImage::ImageLumaA8(self.buffer.to_luma_alpha8()),
            ColorMode::Rgb => DynamicImage::ImageRgb8(self.buffer.to_rgb8()),
            ColorMode::Rgba => DynamicImage::ImageRgba8(self.buffer.to_rgba8()),
        };
        self.carry(buffer, mode)
    }

    /// Resize to exactly the given dimensions. Scaling policy (whether to
    /// upscale at all) is the caller's decision.
    pub fn resize_exact(&self, width: u32, height: u32, filter: FilterType) -> RasterImage {
        let buffer = self.buffer.resize_exact(width, height, filter);
        let mode = self.mode;
        self.carry(buffer, mode)
    }

    /// Crop to the given box. Fails when the box reaches outside the image.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<RasterImage, RasterError> {
        let (image_width, image_height) = self.dimensions();
        if u64::from(x) + u64::from(width) > u64::from(image_width)
            || u64::from(y) + u64::from(height) > u64::from(image_height)
        {
            return Err(RasterError::Bounds {
                x,
                y,
                width,
                height,
                image_width,
                image_height,
            });
        }
        let buffer = self.buffer.crop_imm(x, y, width, height);
        Ok(self.carry(buffer, self.mode))
    }

    /// Per-band histogram: 256 bins per channel, concatenated in channel
    /// order. Buffers deeper than 8 bits per channel are folded to 8-bit
    /// RGB first.
    pub fn histogram(&self) -> Vec<u32> {
        let color = self.buffer.color();
        let channels = usize::from(color.channel_count());
        let per_channel = usize::from(color.bytes_per_pixel()) / channels;
        if per_channel == 1 {
            let mut hist = vec![0u32; channels * 256];
            for px in self.buffer.as_bytes().chunks_exact(channels) {
                for (band, &value) in px.iter().enumerate() {
                    hist[band * 256 + usize::from(value)] += 1;
                }
            }
            hist
        } else {
            let rgb = self.buffer.to_rgb8();
            let mut hist = vec![0u32; 3 * 256];
            for px in rgb.pixels() {
                for (band, &value) in px.0.iter().enumerate() {
                    hist[band * 256 + usize::from(value)] += 1;
                }
            }
            hist
        }
    }

    /// Arithmetic per-channel mean over every pixel, rounded to the nearest
    /// channel value.
    pub fn mean_rgb(&self) -> [u8; 3] {
        let rgb = self.buffer.to_rgb8();
        let count = u64::from(rgb.width()) * u64::from(rgb.height());
        if count == 0 {
            return [0, 0, 0];
        }
        let mut sums = [0u64; 3];
        for px in rgb.pixels() {
            for (band, &value) in px.0.iter().enumerate() {
                sums[band] += u64::from(value);
            }
        }
        sums.map(|sum| ((sum + count / 2) / count) as u8)
    }

    /// The most frequent exact RGB value. Ties break toward the
    /// numerically smallest (r, g, b) triple for determinism.
    pub fn dominant_rgb(&self) -> [u8; 3] {
        let rgb = self.buffer.to_rgb8();
        let mut counts: HashMap<[u8; 3], u64> = HashMap::new();
        for px in rgb.pixels() {
            *counts.entry(px.0).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .max_by(|(color_a, count_a), (color_b, count_b)| {
                count_a.cmp(count_b).then_with(|| color_b.cmp(color_a))
            })
            .map(|(color, _)| color)
            .unwrap_or([0, 0, 0])
    }

    /// Replace the buffer, deriving the mode from its pixel type and
    /// carrying decode metadata forward.
    pub(crate) fn with_buffer(&self, buffer: DynamicImage) -> RasterImage {
        let mode = derive_mode(&buffer);
        self.carry(buffer, mode)
    }

    /// Replace the buffer with a bilevel grayscale result (values 0/255).
    pub(crate) fn with_bilevel(&self, buffer: GrayImage) -> RasterImage {
        self.carry(DynamicImage::ImageLuma8(buffer), ColorMode::Bilevel)
    }

    fn carry(&self, buffer: DynamicImage, mode: ColorMode) -> RasterImage {
        RasterImage {
            buffer,
            mode,
            icc: self.icc.clone(),
            orientation: self.orientation,
            source_format: self.source_format,
        }
    }
}

fn derive_mode(buffer: &DynamicImage) -> ColorMode {
    match buffer {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => ColorMode::Luma,
        DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => ColorMode::LumaAlpha,
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => {
            ColorMode::Rgb
        }
        _ => ColorMode::Rgba,
    }
}

/// EXIF orientation from the raw container bytes. Missing EXIF data or a
/// missing tag is orientation 1; unreadable EXIF is logged and treated the
/// same way.
fn read_orientation(bytes: &[u8]) -> u8 {
    let mut cursor = Cursor::new(bytes);
    match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(meta) => meta
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .filter(|value| (1..=8).contains(value))
            .map(|value| value as u8)
            .unwrap_or(1),
        Err(exif::Error::NotFound(_)) => 1,
        Err(err) => {
            warn!("EXIF metadata unreadable: {err}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{encoded_jpeg, encoded_png, gradient_image, solid_image};

    // =========================================================================
    // Decode
    // =========================================================================

    #[test]
    fn decode_jpeg_reports_dimensions_and_format() {
        let img = RasterImage::decode(&encoded_jpeg(64, 48)).unwrap();
        assert_eq!(img.dimensions(), (64, 48));
        assert_eq!(img.source_format(), Some(OutputFormat::Jpeg));
        assert_eq!(img.mode(), ColorMode::Rgb);
    }

    #[test]
    fn decode_without_exif_defaults_to_orientation_one() {
        let img = RasterImage::decode(&encoded_png(8, 8)).unwrap();
        assert_eq!(img.orientation(), 1);
        assert!(img.icc_profile().is_none());
    }

    #[test]
    fn decode_garbage_is_a_decode_error() {
        let result = RasterImage::decode(b"not an image at all");
        assert!(matches!(result, Err(RasterError::Decode(_))));
    }

    // =========================================================================
    // Encode
    // =========================================================================

    #[test]
    fn png_round_trip_is_lossless() {
        let img = gradient_image(32, 20);
        let bytes = img.encode(OutputFormat::Png, &EncodeOptions::default()).unwrap();
        let back = RasterImage::decode(&bytes).unwrap();
        assert_eq!(back.dimensions(), (32, 20));
        assert_eq!(back.buffer().to_rgb8(), img.buffer().to_rgb8());
    }

    #[test]
    fn jpeg_encode_narrows_alpha_to_rgb() {
        let img = gradient_image(16, 16).convert(ColorMode::Rgba);
        let bytes = img.encode(OutputFormat::Jpeg, &EncodeOptions::default()).unwrap();
        let back = RasterImage::decode(&bytes).unwrap();
        assert_eq!(back.mode(), ColorMode::Rgb);
        assert_eq!(back.dimensions(), (16, 16));
    }

    #[test]
    fn gif_encode_round_trips_dimensions() {
        let img = solid_image(10, 6, [200, 10, 10]);
        let bytes = img.encode(OutputFormat::Gif, &EncodeOptions::default()).unwrap();
        let back = RasterImage::decode(&bytes).unwrap();
        assert_eq!(back.dimensions(), (10, 6));
    }

    #[test]
    fn bmp_round_trip_is_lossless() {
        let img = gradient_image(9, 7);
        let bytes = img.encode(OutputFormat::Bmp, &EncodeOptions::default()).unwrap();
        let back = RasterImage::decode(&bytes).unwrap();
        assert_eq!(back.buffer().to_rgb8(), img.buffer().to_rgb8());
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    #[test]
    fn crop_inside_extent_succeeds() {
        let img = gradient_image(40, 30);
        let cropped = img.crop(5, 5, 20, 10).unwrap();
        assert_eq!(cropped.dimensions(), (20, 10));
    }

    #[test]
    fn crop_touching_the_edge_is_allowed() {
        let img = gradient_image(40, 30);
        let cropped = img.crop(20, 20, 20, 10).unwrap();
        assert_eq!(cropped.dimensions(), (20, 10));
    }

    #[test]
    fn crop_outside_extent_is_a_bounds_error() {
        let img = gradient_image(40, 30);
        let result = img.crop(30, 0, 20, 10);
        assert!(matches!(result, Err(RasterError::Bounds { .. })));
    }

    #[test]
    fn resize_exact_hits_requested_dimensions() {
        let img = gradient_image(100, 50);
        let resized = img.resize_exact(25, 10, FilterType::Lanczos3);
        assert_eq!(resized.dimensions(), (25, 10));
    }

    // =========================================================================
    // Color modes
    // =========================================================================

    #[test]
    fn convert_to_luma_changes_mode() {
        let img = gradient_image(8, 8);
        assert_eq!(img.mode(), ColorMode::Rgb);
        assert_eq!(img.convert(ColorMode::Luma).mode(), ColorMode::Luma);
    }

    #[test]
    fn convert_to_bilevel_yields_only_black_and_white() {
        let img = gradient_image(16, 16);
        let bilevel = img.convert(ColorMode::Bilevel);
        assert_eq!(bilevel.mode(), ColorMode::Bilevel);
        for px in bilevel.buffer().to_luma8().pixels() {
            assert!(px.0[0] == 0 || px.0[0] == 255);
        }
    }

    #[test]
    fn convert_to_same_mode_is_identity() {
        let img = gradient_image(8, 8);
        let same = img.convert(ColorMode::Rgb);
        assert_eq!(same.buffer().to_rgb8(), img.buffer().to_rgb8());
    }

    // =========================================================================
    // Histogram and color summaries
    // =========================================================================

    #[test]
    fn histogram_has_one_block_per_channel() {
        let img = gradient_image(10, 10);
        assert_eq!(img.histogram().len(), 3 * 256);
        let luma = img.convert(ColorMode::Luma);
        assert_eq!(luma.histogram().len(), 256);
    }

    #[test]
    fn histogram_of_solid_image_is_a_single_spike_per_band() {
        let img = solid_image(4, 4, [7, 9, 11]);
        let hist = img.histogram();
        assert_eq!(hist[7], 16);
        assert_eq!(hist[256 + 9], 16);
        assert_eq!(hist[512 + 11], 16);
        assert_eq!(hist.iter().map(|&c| u64::from(c)).sum::<u64>(), 3 * 16);
    }

    #[test]
    fn mean_rgb_of_solid_image_is_that_color() {
        let img = solid_image(6, 6, [10, 20, 30]);
        assert_eq!(img.mean_rgb(), [10, 20, 30]);
    }

    #[test]
    fn dominant_rgb_picks_the_most_frequent_color() {
        let mut buffer = image::RgbImage::from_pixel(5, 5, image::Rgb([1, 2, 3]));
        buffer.put_pixel(0, 0, image::Rgb([250, 0, 0]));
        let img = RasterImage::from_buffer(DynamicImage::ImageRgb8(buffer));
        assert_eq!(img.dominant_rgb(), [1, 2, 3]);
    }

    // =========================================================================
    // Formats
    // =========================================================================

    #[test]
    fn extension_round_trips_through_from_extension() {
        for format in [
            OutputFormat::Jpeg,
            OutputFormat::Png,
            OutputFormat::Gif,
            OutputFormat::Bmp,
            OutputFormat::WebP,
            OutputFormat::Tiff,
        ] {
            assert_eq!(OutputFormat::from_extension(format.extension()), Some(format));
        }
    }

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(250).value(), 100);
        assert_eq!(Quality::default().value(), 90);
    }
}
