//! Flips and quarter-turn rotations, either explicit or driven by the
//! source's EXIF orientation tag.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::raster::RasterImage;

/// A named transposition, or `Auto` to undo the camera rotation recorded
/// in the EXIF orientation tag. Rotations are clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransposeMode {
    #[default]
    Auto,
    FlipHorizontal,
    FlipVertical,
    Rotate90,
    Rotate180,
    Rotate270,
}

/// Correction steps per EXIF orientation value. Unknown values (and the
/// upright 1) need no work.
fn exif_steps(orientation: u8) -> &'static [TransposeMode] {
    match orientation {
        2 => &[TransposeMode::FlipHorizontal],
        3 => &[TransposeMode::Rotate180],
        4 => &[TransposeMode::FlipVertical],
        5 => &[TransposeMode::Rotate90, TransposeMode::FlipHorizontal],
        6 => &[TransposeMode::Rotate90],
        7 => &[TransposeMode::Rotate270, TransposeMode::FlipHorizontal],
        8 => &[TransposeMode::Rotate270],
        _ => &[],
    }
}

fn operate(mode: TransposeMode, buffer: &DynamicImage) -> DynamicImage {
    match mode {
        TransposeMode::Auto => buffer.clone(),
        TransposeMode::FlipHorizontal => buffer.fliph(),
        TransposeMode::FlipVertical => buffer.flipv(),
        TransposeMode::Rotate90 => buffer.rotate90(),
        TransposeMode::Rotate180 => buffer.rotate180(),
        TransposeMode::Rotate270 => buffer.rotate270(),
    }
}

/// Applies a transposition. `Auto` consumes the orientation tag: once the
/// correction has run, the output reports orientation 1. Explicit modes
/// leave the tag as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transpose {
    pub mode: TransposeMode,
}

impl Transpose {
    pub fn auto() -> Self {
        Self::default()
    }

    pub fn new(mode: TransposeMode) -> Self {
        Self { mode }
    }

    pub fn apply(&self, image: &RasterImage) -> RasterImage {
        match self.mode {
            TransposeMode::Auto => {
                let mut buffer = image.buffer().clone();
                for &step in exif_steps(image.orientation()) {
                    buffer = operate(step, &buffer);
                }
                let mut out = image.with_buffer(buffer);
                out.orientation = 1;
                out
            }
            mode => image.with_buffer(operate(mode, image.buffer())),
        }
    }
}
