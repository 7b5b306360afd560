//! Declarative spec registry loading.
//!
//! A registry file describes every spec as data, so deployments can add or
//! tune derivative pipelines without a rebuild. Specs are TOML
//! array-of-tables entries; each carries its chain as nested tables:
//!
//! ```toml
//! [[spec]]
//! name = "thumbnail"
//! access_name = "thumb"
//! cache = "eager"
//!
//! [[spec.chain]]
//! kind = "smart_crop"
//! width = 400
//! height = 500
//!
//! [[spec.chain]]
//! kind = "adjustment"
//! sharpness = 1.2
//!
//! [[spec]]
//! name = "print-proof"
//! format = "tiff"
//!
//! [[spec.chain]]
//! kind = "icc_proof_transform"
//! destination_profile = "profiles/srgb.icc"
//! proof_profile = "profiles/us-web-coated.icc"
//! ```
//!
//! Every chain step is a table with a `kind` tag naming the processor;
//! the remaining keys are that processor's options, all optional where the
//! processor has a default. ICC profile paths are resolved relative to the
//! registry file and loaded at parse time, so a bad path fails the load
//! rather than the first resolve.
//!
//! Unknown keys in spec tables are rejected to catch typos early. Chain
//! step tables are read through their `kind` tag and tolerate stray keys.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::processors::reflect::parse_hex_color;
use crate::processors::{
    Adjustment, Anchor, Atkinsonify, Crop, Fit, IccProofTransform, IccTransform, NeuQuantize,
    Processor, Reflection, RenderingIntent, SmartCrop, Stentifordize, Transpose, TransposeMode,
    Trim,
};
use crate::profile::{IccProfile, ProfileError};
use crate::raster::OutputFormat;
use crate::spec::{CachePolicy, Spec, SpecRegistry};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Registry validation error: {0}")]
    Validation(String),
    #[error("ICC profile error: {0}")]
    Profile(#[from] ProfileError),
}

/// Top-level registry document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryDoc {
    pub spec: Vec<SpecDoc>,
}

/// One declared spec.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecDoc {
    pub name: String,
    /// Defaults to `name` when omitted.
    #[serde(default)]
    pub access_name: Option<String>,
    /// Fixed output format; omitted means follow the source.
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default)]
    pub cache: CachePolicy,
    #[serde(default)]
    pub chain: Vec<ProcessorDecl>,
}

/// One declared chain step. Options left out fall back to the processor's
/// own defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessorDecl {
    Format {
        format: OutputFormat,
    },
    Adjustment {
        color: Option<f32>,
        brightness: Option<f32>,
        contrast: Option<f32>,
        sharpness: Option<f32>,
    },
    Fit {
        width: Option<u32>,
        height: Option<u32>,
        #[serde(default)]
        upscale: bool,
    },
    Crop {
        width: u32,
        height: u32,
        #[serde(default)]
        anchor: Anchor,
    },
    SmartCrop {
        width: u32,
        height: u32,
        entropy_tie_break: Option<f64>,
        min_slice: Option<u32>,
    },
    Trim {
        background_luma: Option<u8>,
    },
    Transpose {
        #[serde(default)]
        mode: TransposeMode,
    },
    Reflection {
        background: Option<String>,
        size: Option<f32>,
        opacity: Option<f32>,
    },
    IccTransform {
        source_profile: Option<PathBuf>,
        destination_profile: PathBuf,
        #[serde(default)]
        intent: RenderingIntent,
    },
    IccProofTransform {
        source_profile: Option<PathBuf>,
        destination_profile: PathBuf,
        proof_profile: Option<PathBuf>,
        #[serde(default)]
        intent: RenderingIntent,
        proof_intent: Option<RenderingIntent>,
    },
    NeuQuantize {
        sample_factor: Option<i32>,
    },
    Atkinsonify {
        threshold: Option<u8>,
    },
    Stentifordize {
        max_checks: Option<u32>,
    },
}

impl ProcessorDecl {
    /// Build the runtime processor, resolving profile paths against `base`.
    fn into_processor(self, base: &Path) -> Result<Processor, ConfigError> {
        match self {
            ProcessorDecl::Format { format } => Ok(Processor::Format(format)),
            ProcessorDecl::Adjustment {
                color,
                brightness,
                contrast,
                sharpness,
            } => {
                let mut adjust = Adjustment::default();
                if let Some(color) = color {
                    adjust.color = color;
                }
                if let Some(brightness) = brightness {
                    adjust.brightness = brightness;
                }
                if let Some(contrast) = contrast {
                    adjust.contrast = contrast;
                }
                if let Some(sharpness) = sharpness {
                    adjust.sharpness = sharpness;
                }
                Ok(Processor::Adjustment(adjust))
            }
            ProcessorDecl::Fit {
                width,
                height,
                upscale,
            } => Ok(Processor::Fit(Fit {
                width,
                height,
                upscale,
            })),
            ProcessorDecl::Crop {
                width,
                height,
                anchor,
            } => Ok(Processor::Crop(Crop::anchored(width, height, anchor))),
            ProcessorDecl::SmartCrop {
                width,
                height,
                entropy_tie_break,
                min_slice,
            } => {
                let mut crop = SmartCrop::new(width, height);
                if let Some(tie_break) = entropy_tie_break {
                    crop.entropy_tie_break = tie_break;
                }
                if let Some(min_slice) = min_slice {
                    crop.min_slice = min_slice;
                }
                Ok(Processor::SmartCrop(crop))
            }
            ProcessorDecl::Trim { background_luma } => {
                let mut trim = Trim::default();
                if let Some(luma) = background_luma {
                    trim.background_luma = luma;
                }
                Ok(Processor::Trim(trim))
            }
            ProcessorDecl::Transpose { mode } => Ok(Processor::Transpose(Transpose::new(mode))),
            ProcessorDecl::Reflection {
                background,
                size,
                opacity,
            } => {
                let mut reflection = Reflection::default();
                if let Some(background) = background {
                    reflection.background =
                        parse_hex_color(&background).map_err(ConfigError::Validation)?;
                }
                if let Some(size) = size {
                    reflection.size = size;
                }
                if let Some(opacity) = opacity {
                    reflection.opacity = opacity;
                }
                Ok(Processor::Reflection(reflection))
            }
            ProcessorDecl::IccTransform {
                source_profile,
                destination_profile,
                intent,
            } => {
                let destination = load_profile(base, &destination_profile)?;
                let mut transform = IccTransform::new(destination).with_intent(intent);
                if let Some(path) = source_profile {
                    transform = transform.with_source(load_profile(base, &path)?);
                }
                Ok(Processor::IccTransform(transform))
            }
            ProcessorDecl::IccProofTransform {
                source_profile,
                destination_profile,
                proof_profile,
                intent,
                proof_intent,
            } => {
                let destination = load_profile(base, &destination_profile)?;
                let mut transform = IccProofTransform::new(destination);
                transform.intent = intent;
                if let Some(proof_intent) = proof_intent {
                    transform.proof_intent = proof_intent;
                }
                if let Some(path) = source_profile {
                    transform = transform.with_source(load_profile(base, &path)?);
                }
                if let Some(path) = proof_profile {
                    transform = transform.with_proof(load_profile(base, &path)?);
                }
                Ok(Processor::IccProofTransform(transform))
            }
            ProcessorDecl::NeuQuantize { sample_factor } => {
                let mut quantize = NeuQuantize::default();
                if let Some(sample_factor) = sample_factor {
                    quantize.sample_factor = sample_factor;
                }
                Ok(Processor::NeuQuantize(quantize))
            }
            ProcessorDecl::Atkinsonify { threshold } => {
                let mut dither = Atkinsonify::default();
                if let Some(threshold) = threshold {
                    dither.threshold = threshold;
                }
                Ok(Processor::Atkinsonify(dither))
            }
            ProcessorDecl::Stentifordize { max_checks } => {
                let mut crop = Stentifordize::default();
                if let Some(max_checks) = max_checks {
                    crop.max_checks = max_checks;
                }
                Ok(Processor::Stentifordize(crop))
            }
        }
    }
}

impl SpecDoc {
    fn into_spec(self, base: &Path) -> Result<Spec, ConfigError> {
        let mut steps = Vec::with_capacity(self.chain.len());
        for decl in self.chain {
            steps.push(decl.into_processor(base)?);
        }
        let access_name = self.access_name.unwrap_or_else(|| self.name.clone());
        let mut spec = Spec::new(self.name, access_name, steps);
        if let Some(format) = self.format {
            spec = spec.with_format(format);
        }
        if self.cache == CachePolicy::Eager {
            spec = spec.eager();
        }
        Ok(spec)
    }
}

fn load_profile(base: &Path, path: &Path) -> Result<IccProfile, ConfigError> {
    let full = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let bytes = fs::read(&full)?;
    Ok(IccProfile::from_bytes(bytes)?)
}

/// Parse a registry document. Profile paths resolve against `base`.
pub fn registry_from_toml(source: &str, base: &Path) -> Result<SpecRegistry, ConfigError> {
    let doc: RegistryDoc = toml::from_str(source)?;
    let mut registry = SpecRegistry::new();
    for spec_doc in doc.spec {
        let spec = spec_doc.into_spec(base)?;
        registry
            .register(spec)
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
    }
    Ok(registry)
}

/// Load a registry file. Profile paths resolve against the file's
/// directory.
pub fn load_registry(path: &Path) -> Result<SpecRegistry, ConfigError> {
    let source = fs::read_to_string(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    registry_from_toml(&source, base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::srgb_profile_bytes;
    use tempfile::TempDir;

    fn parse(source: &str) -> SpecRegistry {
        registry_from_toml(source, Path::new(".")).unwrap()
    }

    fn only_step(registry: &SpecRegistry, name: &str) -> Processor {
        let spec = registry.get(name).unwrap();
        assert_eq!(spec.chain.len(), 1);
        spec.chain.steps()[0].clone()
    }

    // =========================================================================
    // Document shape
    // =========================================================================

    #[test]
    fn empty_document_is_an_empty_registry() {
        let registry = parse("");
        assert!(registry.is_empty());
    }

    #[test]
    fn full_document_parses() {
        let registry = parse(
            r#"
[[spec]]
name = "thumbnail"
access_name = "thumb"
cache = "eager"

[[spec.chain]]
kind = "smart_crop"
width = 400
height = 500

[[spec.chain]]
kind = "adjustment"
sharpness = 1.2

[[spec]]
name = "gallery"
format = "webp"

[[spec.chain]]
kind = "fit"
width = 1600
"#,
        );

        assert_eq!(registry.len(), 2);
        let thumbnail = registry.get("thumbnail").unwrap();
        assert_eq!(thumbnail.access_name, "thumb");
        assert_eq!(thumbnail.cache_policy, CachePolicy::Eager);
        assert_eq!(thumbnail.chain.len(), 2);

        let gallery = registry.get("gallery").unwrap();
        assert_eq!(gallery.format, Some(OutputFormat::WebP));
        assert_eq!(gallery.cache_policy, CachePolicy::Lazy);
    }

    #[test]
    fn access_name_defaults_to_the_spec_name() {
        let registry = parse(
            r#"
[[spec]]
name = "hero"
"#,
        );
        assert_eq!(registry.get("hero").unwrap().access_name, "hero");
    }

    #[test]
    fn eager_specs_surface_in_registration_order() {
        let registry = parse(
            r#"
[[spec]]
name = "b"
cache = "eager"

[[spec]]
name = "a"
cache = "eager"

[[spec]]
name = "c"
"#,
        );
        let eager: Vec<&str> = registry.eager().map(|s| s.name.as_str()).collect();
        assert_eq!(eager, ["b", "a"]);
    }

    // =========================================================================
    // Chain steps
    // =========================================================================

    #[test]
    fn fit_and_crop_steps_parse() {
        let registry = parse(
            r#"
[[spec]]
name = "fit"

[[spec.chain]]
kind = "fit"
width = 800
upscale = true

[[spec]]
name = "crop"

[[spec.chain]]
kind = "crop"
width = 100
height = 120
anchor = "top-left"
"#,
        );

        match only_step(&registry, "fit") {
            Processor::Fit(fit) => {
                assert_eq!(fit.width, Some(800));
                assert_eq!(fit.height, None);
                assert!(fit.upscale);
            }
            other => panic!("unexpected step: {other:?}"),
        }
        match only_step(&registry, "crop") {
            Processor::Crop(crop) => {
                assert_eq!((crop.width, crop.height), (100, 120));
                assert_eq!(crop.anchor, Anchor::TopLeft);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn omitted_options_fall_back_to_processor_defaults() {
        let registry = parse(
            r#"
[[spec]]
name = "cover"

[[spec.chain]]
kind = "smart_crop"
width = 400
height = 500

[[spec]]
name = "scan"

[[spec.chain]]
kind = "trim"

[[spec]]
name = "tuned"

[[spec.chain]]
kind = "adjustment"
contrast = 1.3
"#,
        );

        match only_step(&registry, "cover") {
            Processor::SmartCrop(crop) => {
                assert_eq!((crop.width, crop.height), (400, 500));
                assert_eq!(crop.min_slice, SmartCrop::new(1, 1).min_slice);
                assert_eq!(crop.entropy_tie_break, SmartCrop::new(1, 1).entropy_tie_break);
            }
            other => panic!("unexpected step: {other:?}"),
        }
        match only_step(&registry, "scan") {
            Processor::Trim(trim) => assert_eq!(trim.background_luma, 255),
            other => panic!("unexpected step: {other:?}"),
        }
        match only_step(&registry, "tuned") {
            Processor::Adjustment(adjust) => {
                assert_eq!(adjust.contrast, 1.3);
                assert_eq!(adjust.color, 1.0);
                assert_eq!(adjust.brightness, 1.0);
                assert_eq!(adjust.sharpness, 1.0);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn transpose_reflection_and_pixel_steps_parse() {
        let registry = parse(
            r##"
[[spec]]
name = "upright"

[[spec.chain]]
kind = "transpose"

[[spec]]
name = "fancy"

[[spec.chain]]
kind = "reflection"
background = "#336699"
size = 0.4
opacity = 0.8

[[spec]]
name = "mono"

[[spec.chain]]
kind = "atkinsonify"
threshold = 100

[[spec]]
name = "indexed"

[[spec.chain]]
kind = "neu_quantize"

[[spec]]
name = "featured"

[[spec.chain]]
kind = "stentifordize"
max_checks = 20
"##,
        );

        match only_step(&registry, "upright") {
            Processor::Transpose(transpose) => assert_eq!(transpose.mode, TransposeMode::Auto),
            other => panic!("unexpected step: {other:?}"),
        }
        match only_step(&registry, "fancy") {
            Processor::Reflection(reflection) => {
                assert_eq!(reflection.background, [0x33, 0x66, 0x99]);
                assert_eq!(reflection.size, 0.4);
                assert_eq!(reflection.opacity, 0.8);
            }
            other => panic!("unexpected step: {other:?}"),
        }
        match only_step(&registry, "mono") {
            Processor::Atkinsonify(dither) => assert_eq!(dither.threshold, 100),
            other => panic!("unexpected step: {other:?}"),
        }
        match only_step(&registry, "indexed") {
            Processor::NeuQuantize(quantize) => {
                assert_eq!(quantize.sample_factor, NeuQuantize::default().sample_factor);
            }
            other => panic!("unexpected step: {other:?}"),
        }
        match only_step(&registry, "featured") {
            Processor::Stentifordize(crop) => assert_eq!(crop.max_checks, 20),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn format_step_parses() {
        let registry = parse(
            r#"
[[spec]]
name = "forced"

[[spec.chain]]
kind = "format"
format = "png"
"#,
        );
        match only_step(&registry, "forced") {
            Processor::Format(format) => assert_eq!(format, OutputFormat::Png),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    // =========================================================================
    // ICC profile loading
    // =========================================================================

    #[test]
    fn icc_steps_load_profiles_relative_to_base() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("profiles")).unwrap();
        fs::write(tmp.path().join("profiles/srgb.icc"), srgb_profile_bytes()).unwrap();

        let registry = registry_from_toml(
            r#"
[[spec]]
name = "web"

[[spec.chain]]
kind = "icc_transform"
destination_profile = "profiles/srgb.icc"
intent = "perceptual"

[[spec]]
name = "proofed"

[[spec.chain]]
kind = "icc_proof_transform"
destination_profile = "profiles/srgb.icc"
proof_profile = "profiles/srgb.icc"
proof_intent = "relative_colorimetric"
"#,
            tmp.path(),
        )
        .unwrap();

        match only_step(&registry, "web") {
            Processor::IccTransform(transform) => {
                assert!(transform.source.is_none());
                assert_eq!(transform.intent, RenderingIntent::Perceptual);
            }
            other => panic!("unexpected step: {other:?}"),
        }
        match only_step(&registry, "proofed") {
            Processor::IccProofTransform(transform) => {
                assert!(transform.proof.is_some());
                assert_eq!(transform.proof_intent, RenderingIntent::RelativeColorimetric);
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn missing_profile_file_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let result = registry_from_toml(
            r#"
[[spec]]
name = "web"

[[spec.chain]]
kind = "icc_transform"
destination_profile = "nope.icc"
"#,
            tmp.path(),
        );
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn malformed_profile_is_a_profile_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("bad.icc"), b"junk").unwrap();
        let result = registry_from_toml(
            r#"
[[spec]]
name = "web"

[[spec.chain]]
kind = "icc_transform"
destination_profile = "bad.icc"
"#,
            tmp.path(),
        );
        assert!(matches!(result, Err(ConfigError::Profile(_))));
    }

    // =========================================================================
    // Rejection
    // =========================================================================

    #[test]
    fn unknown_spec_key_is_rejected() {
        let result = registry_from_toml(
            r#"
[[spec]]
name = "thumbnail"
acces_name = "thumb"
"#,
            Path::new("."),
        );
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_step_kind_is_rejected() {
        let result = registry_from_toml(
            r#"
[[spec]]
name = "thumbnail"

[[spec.chain]]
kind = "sharpen"
"#,
            Path::new("."),
        );
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = registry_from_toml(
            r#"
[[spec]]
name = "thumbnail"

[[spec]]
name = "thumbnail"
"#,
            Path::new("."),
        );
        match result {
            Err(ConfigError::Validation(message)) => {
                assert!(message.contains("Duplicate spec name"), "{message}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_chains_are_rejected_at_load() {
        let result = registry_from_toml(
            r#"
[[spec]]
name = "thumbnail"

[[spec.chain]]
kind = "crop"
width = 0
height = 100
"#,
            Path::new("."),
        );
        match result {
            Err(ConfigError::Validation(message)) => {
                assert!(message.contains("crop"), "{message}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn bad_hex_color_is_rejected() {
        let result = registry_from_toml(
            r#"
[[spec]]
name = "fancy"

[[spec.chain]]
kind = "reflection"
background = "336699"
"#,
            Path::new("."),
        );
        match result {
            Err(ConfigError::Validation(message)) => {
                assert!(message.contains('#'), "{message}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    // =========================================================================
    // File loading
    // =========================================================================

    #[test]
    fn load_registry_resolves_profile_paths_against_the_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("srgb.icc"), srgb_profile_bytes()).unwrap();
        fs::write(
            tmp.path().join("registry.toml"),
            r#"
[[spec]]
name = "web"
cache = "eager"

[[spec.chain]]
kind = "fit"
width = 1200

[[spec.chain]]
kind = "icc_transform"
destination_profile = "srgb.icc"
"#,
        )
        .unwrap();

        let registry = load_registry(&tmp.path().join("registry.toml")).unwrap();
        let spec = registry.get("web").unwrap();
        assert_eq!(spec.cache_policy, CachePolicy::Eager);
        assert_eq!(spec.chain.len(), 2);
    }

    #[test]
    fn load_registry_missing_file_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let result = load_registry(&tmp.path().join("registry.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn load_registry_invalid_toml_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("registry.toml"), "this is not toml [[[").unwrap();
        let result = load_registry(&tmp.path().join("registry.toml"));
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }
}
