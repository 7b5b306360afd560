//! Image processors and the chain that runs them.
//!
//! | Module | Processors |
//! |---|---|
//! | `resize` | fit, anchored crop, entropy smart crop, border trim |
//! | `adjust` | color / brightness / contrast / sharpness factors |
//! | `transpose` | EXIF orientation and explicit flips/rotations |
//! | `reflect` | gradient reflection compositing |
//! | `icc` | profile-to-profile transforms with a shared transform cache |
//! | `quantize` | NeuQuant 256-color palette learning |
//! | `dither` | Atkinson error diffusion |
//!
//! A [`Processor`] is an immutable configuration record; applying one is a
//! pure transformation `(image, format) -> (image, format)` with any shared
//! state (the ICC transform cache, an optional saliency model) supplied
//! through [`ProcessContext`]. A [`ProcessorChain`] folds its steps in
//! declared order and aborts on the first failure, so a failed chain never
//! leaves a partial result behind.

pub mod adjust;
pub mod dither;
pub mod icc;
pub mod quantize;
pub mod reflect;
pub mod resize;
pub mod transpose;

use thiserror::Error;

use crate::raster::{OutputFormat, RasterError, RasterImage};

pub use adjust::Adjustment;
pub use dither::Atkinsonify;
pub use icc::{IccProofTransform, IccTransform, RenderingIntent, TransformCache};
pub use quantize::NeuQuantize;
pub use reflect::Reflection;
pub use resize::{Anchor, Crop, Fit, SmartCrop, Trim};
pub use transpose::{Transpose, TransposeMode};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),
    #[error("Color transform failed: {0}")]
    Transform(#[from] lcms2::Error),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Saliency model failed: {0}")]
    Saliency(String),
}

/// External feature-saliency cropping model. Opaque to this crate; wired in
/// through [`ProcessContext`] and invoked by the `stentifordize` processor.
pub trait SaliencyModel: Send + Sync {
    /// Crop `image` to its most salient region, spending at most
    /// `max_checks` model evaluations.
    fn crop(&self, image: &RasterImage, max_checks: u32) -> Result<RasterImage, ProcessorError>;
}

/// Shared state handed to every processor in one chain execution.
#[derive(Clone, Copy)]
pub struct ProcessContext<'a> {
    pub transforms: &'a TransformCache,
    pub saliency: Option<&'a dyn SaliencyModel>,
}

impl<'a> ProcessContext<'a> {
    pub fn new(transforms: &'a TransformCache) -> Self {
        Self {
            transforms,
            saliency: None,
        }
    }

    pub fn with_saliency(mut self, model: &'a dyn SaliencyModel) -> Self {
        self.saliency = Some(model);
        self
    }
}

/// Feature-based crop delegated to an external [`SaliencyModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stentifordize {
    pub max_checks: u32,
}

impl Default for Stentifordize {
    fn default() -> Self {
        Self { max_checks: 55 }
    }
}

impl Stentifordize {
    fn apply(&self, image: &RasterImage, ctx: &ProcessContext<'_>) -> Result<RasterImage, ProcessorError> {
        let model = ctx.saliency.ok_or_else(|| {
            ProcessorError::Configuration("stentifordize requires a saliency model in the context".into())
        })?;
        model.crop(image, self.max_checks)
    }
}

/// One transformation step, as declared configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Processor {
    /// Force the chain's running output format; pixels are untouched.
    Format(OutputFormat),
    Adjustment(Adjustment),
    Fit(Fit),
    Crop(Crop),
    SmartCrop(SmartCrop),
    Trim(Trim),
    Transpose(Transpose),
    Reflection(Reflection),
    IccTransform(IccTransform),
    IccProofTransform(IccProofTransform),
    NeuQuantize(NeuQuantize),
    Atkinsonify(Atkinsonify),
    Stentifordize(Stentifordize),
}

impl Processor {
    /// Stable kind tag, matching the `kind` field in declarative chain
    /// configuration.
    pub fn kind(&self) -> &'static str {
        match self {
            Processor::Format(_) => "format",
            Processor::Adjustment(_) => "adjustment",
            Processor::Fit(_) => "fit",
            Processor::Crop(_) => "crop",
            Processor::SmartCrop(_) => "smart_crop",
            Processor::Trim(_) => "trim",
            Processor::Transpose(_) => "transpose",
            Processor::Reflection(_) => "reflection",
            Processor::IccTransform(_) => "icc_transform",
            Processor::IccProofTransform(_) => "icc_proof_transform",
            Processor::NeuQuantize(_) => "neu_quantize",
            Processor::Atkinsonify(_) => "atkinsonify",
            Processor::Stentifordize(_) => "stentifordize",
        }
    }

    /// The output format this step forces, independent of its input.
    pub fn forced_format(&self) -> Option<OutputFormat> {
        match self {
            Processor::Format(format) => Some(*format),
            Processor::Reflection(_) => Some(OutputFormat::Jpeg),
            Processor::Atkinsonify(_) => Some(OutputFormat::Png),
            _ => None,
        }
    }

    /// Check declared options. Called once at registration time so bad
    /// chains fail before first use.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Processor::Fit(fit) => {
                if fit.width.is_none() && fit.height.is_none() {
                    return Err("fit requires a width or a height".into());
                }
                if fit.width == Some(0) || fit.height == Some(0) {
                    return Err("fit dimensions must be nonzero".into());
                }
            }
            Processor::Crop(crop) => {
                if crop.width == 0 || crop.height == 0 {
                    return Err("crop dimensions must be nonzero".into());
                }
            }
            Processor::SmartCrop(crop) => {
                if crop.width == 0 || crop.height == 0 {
                    return Err("smart crop dimensions must be nonzero".into());
                }
                if crop.min_slice == 0 {
                    return Err("smart crop minimum slice must be nonzero".into());
                }
                if !(crop.entropy_tie_break >= 0.0) {
                    return Err("smart crop entropy tie break must be >= 0".into());
                }
            }
            Processor::Adjustment(adjustment) => {
                for factor in [
                    adjustment.color,
                    adjustment.brightness,
                    adjustment.contrast,
                    adjustment.sharpness,
                ] {
                    if !(factor >= 0.0) {
                        return Err("adjustment factors must be >= 0".into());
                    }
                }
            }
            Processor::Reflection(reflection) => {
                if !(0.0..=1.0).contains(&reflection.size) {
                    return Err("reflection size must be within 0..=1".into());
                }
                if !(0.0..=1.0).contains(&reflection.opacity) {
                    return Err("reflection opacity must be within 0..=1".into());
                }
            }
            Processor::NeuQuantize(quantize) => {
                if !(1..=30).contains(&quantize.sample_factor) {
                    return Err("neu quantize sample factor must be within 1..=30".into());
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Apply this step. `format` is the chain's running output format; the
    /// returned format replaces it.
    pub fn apply(
        &self,
        image: RasterImage,
        format: OutputFormat,
        ctx: &ProcessContext<'_>,
    ) -> Result<(RasterImage, OutputFormat), ProcessorError> {
        let out = match self {
            Processor::Format(_) => image,
            Processor::Adjustment(step) => step.apply(&image),
            Processor::Fit(step) => step.apply(image),
            Processor::Crop(step) => step.apply(&image)?,
            Processor::SmartCrop(step) => step.apply(&image)?,
            Processor::Trim(step) => step.apply(&image)?,
            Processor::Transpose(step) => step.apply(&image),
            Processor::Reflection(step) => step.apply(&image),
            Processor::IccTransform(step) => step.apply(&image, ctx.transforms)?,
            Processor::IccProofTransform(step) => step.apply(&image, ctx.transforms)?,
            Processor::NeuQuantize(step) => step.apply(&image),
            Processor::Atkinsonify(step) => step.apply(&image),
            Processor::Stentifordize(step) => step.apply(&image, ctx)?,
        };
        Ok((out, self.forced_format().unwrap_or(format)))
    }
}

/// A chain step failure, carrying which step broke.
#[derive(Debug, Error)]
#[error("Step {index} ({kind}) failed: {source}")]
pub struct ChainError {
    pub index: usize,
    pub kind: &'static str,
    #[source]
    pub source: ProcessorError,
}

/// Ordered sequence of processors. Immutable once built.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessorChain {
    steps: Vec<Processor>,
}

impl ProcessorChain {
    pub fn new(steps: Vec<Processor>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Processor] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Validate every step, reporting the first offender.
    pub fn validate(&self) -> Result<(), String> {
        for (index, step) in self.steps.iter().enumerate() {
            step.validate()
                .map_err(|message| format!("step {index} ({}): {message}", step.kind()))?;
        }
        Ok(())
    }

    /// The output format this chain will force regardless of its input
    /// format, if any step does so. The last forcing step wins, matching
    /// execution order.
    pub fn forced_format(&self) -> Option<OutputFormat> {
        self.steps.iter().rev().find_map(Processor::forced_format)
    }

    /// Fold every step in declared order. The first failing step aborts
    /// the whole run.
    pub fn run(
        &self,
        mut image: RasterImage,
        mut format: OutputFormat,
        ctx: &ProcessContext<'_>,
    ) -> Result<(RasterImage, OutputFormat), ChainError> {
        for (index, step) in self.steps.iter().enumerate() {
            (image, format) = step.apply(image, format, ctx).map_err(|source| ChainError {
                index,
                kind: step.kind(),
                source,
            })?;
        }
        Ok((image, format))
    }
}

impl From<Vec<Processor>> for ProcessorChain {
    fn from(steps: Vec<Processor>) -> Self {
        Self::new(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::gradient_image;
    use std::sync::Mutex;

    // =========================================================================
    // Chain execution
    // =========================================================================

    #[test]
    fn chain_applies_steps_in_declared_order() {
        let chain = ProcessorChain::new(vec![
            Processor::Fit(Fit::to_width(100)),
            Processor::Crop(Crop::new(40, 40)),
        ]);
        let cache = TransformCache::new();
        let ctx = ProcessContext::new(&cache);
        let (out, format) = chain
            .run(gradient_image(800, 600), OutputFormat::Jpeg, &ctx)
            .unwrap();
        assert_eq!(out.dimensions(), (40, 40));
        assert_eq!(format, OutputFormat::Jpeg);
    }

    #[test]
    fn empty_chain_returns_input_unchanged() {
        let chain = ProcessorChain::default();
        let cache = TransformCache::new();
        let ctx = ProcessContext::new(&cache);
        let (out, format) = chain
            .run(gradient_image(20, 10), OutputFormat::Png, &ctx)
            .unwrap();
        assert_eq!(out.dimensions(), (20, 10));
        assert_eq!(format, OutputFormat::Png);
    }

    #[test]
    fn failing_step_aborts_with_index_and_kind() {
        let chain = ProcessorChain::new(vec![
            Processor::Fit(Fit::to_width(50)),
            Processor::Stentifordize(Stentifordize::default()),
        ]);
        let cache = TransformCache::new();
        let ctx = ProcessContext::new(&cache);
        let err = chain
            .run(gradient_image(100, 100), OutputFormat::Jpeg, &ctx)
            .unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.kind, "stentifordize");
        assert!(matches!(err.source, ProcessorError::Configuration(_)));
    }

    #[test]
    fn format_step_changes_format_without_touching_pixels() {
        let chain = ProcessorChain::new(vec![Processor::Format(OutputFormat::Png)]);
        let cache = TransformCache::new();
        let ctx = ProcessContext::new(&cache);
        let input = gradient_image(12, 12);
        let (out, format) = chain.run(input.clone(), OutputFormat::Jpeg, &ctx).unwrap();
        assert_eq!(format, OutputFormat::Png);
        assert_eq!(out.buffer().to_rgb8(), input.buffer().to_rgb8());
    }

    // =========================================================================
    // Forced formats
    // =========================================================================

    #[test]
    fn atkinsonify_forces_png() {
        let chain = ProcessorChain::new(vec![Processor::Atkinsonify(Atkinsonify::default())]);
        assert_eq!(chain.forced_format(), Some(OutputFormat::Png));
    }

    #[test]
    fn last_format_forcing_step_wins() {
        let chain = ProcessorChain::new(vec![
            Processor::Format(OutputFormat::Tiff),
            Processor::Reflection(Reflection::default()),
        ]);
        assert_eq!(chain.forced_format(), Some(OutputFormat::Jpeg));
    }

    #[test]
    fn plain_geometry_chain_forces_nothing() {
        let chain = ProcessorChain::new(vec![Processor::Fit(Fit::to_width(10))]);
        assert_eq!(chain.forced_format(), None);
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn fit_without_any_axis_is_invalid() {
        let chain = ProcessorChain::new(vec![Processor::Fit(Fit::default())]);
        let message = chain.validate().unwrap_err();
        assert!(message.contains("fit requires"), "{message}");
    }

    #[test]
    fn out_of_range_reflection_options_are_invalid() {
        let step = Processor::Reflection(Reflection {
            size: 1.5,
            ..Reflection::default()
        });
        assert!(step.validate().is_err());
    }

    #[test]
    fn zero_crop_dimensions_are_invalid() {
        assert!(Processor::Crop(Crop::new(0, 10)).validate().is_err());
        assert!(Processor::SmartCrop(SmartCrop::new(10, 0)).validate().is_err());
    }

    #[test]
    fn default_configurations_validate() {
        let chain = ProcessorChain::new(vec![
            Processor::Fit(Fit::to_height(80)),
            Processor::Crop(Crop::new(50, 50)),
            Processor::SmartCrop(SmartCrop::new(50, 50)),
            Processor::Trim(Trim::default()),
            Processor::Adjustment(Adjustment::default()),
            Processor::Reflection(Reflection::default()),
            Processor::NeuQuantize(NeuQuantize::default()),
            Processor::Atkinsonify(Atkinsonify::default()),
            Processor::Stentifordize(Stentifordize::default()),
        ]);
        assert!(chain.validate().is_ok());
    }

    // =========================================================================
    // Saliency delegation
    // =========================================================================

    struct RecordingModel {
        calls: Mutex<Vec<u32>>,
    }

    impl SaliencyModel for RecordingModel {
        fn crop(&self, image: &RasterImage, max_checks: u32) -> Result<RasterImage, ProcessorError> {
            self.calls.lock().unwrap().push(max_checks);
            Ok(image.crop(0, 0, image.width() / 2, image.height() / 2)?)
        }
    }

    #[test]
    fn stentifordize_delegates_to_the_context_model() {
        let model = RecordingModel {
            calls: Mutex::new(Vec::new()),
        };
        let cache = TransformCache::new();
        let ctx = ProcessContext::new(&cache).with_saliency(&model);
        let chain = ProcessorChain::new(vec![Processor::Stentifordize(Stentifordize {
            max_checks: 10,
        })]);
        let (out, _) = chain
            .run(gradient_image(80, 60), OutputFormat::Jpeg, &ctx)
            .unwrap();
        assert_eq!(out.dimensions(), (40, 30));
        assert_eq!(*model.calls.lock().unwrap(), vec![10]);
    }
}
