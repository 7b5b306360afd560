//! Derivative specs and their registry.
//!
//! A [`Spec`] names one derivative a source image can have: the processor
//! chain that produces it, the output format, and whether it is computed
//! eagerly on save or lazily on first access. Specs are registered
//! explicitly; registration validates the chain and rejects duplicate
//! names, so a bad spec fails at startup instead of at first resolve.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::processors::ProcessorChain;
use crate::raster::OutputFormat;

/// When a derivative is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Compute as soon as the source entity is saved.
    Eager,
    /// Compute on first access.
    #[default]
    Lazy,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate spec name: {0}")]
    DuplicateName(String),
    #[error("Duplicate access name: {0}")]
    DuplicateAccessName(String),
    #[error("Invalid chain for spec {spec}: {message}")]
    InvalidChain { spec: String, message: String },
}

/// A named derivative definition.
///
/// `name` identifies the spec in configuration and job payloads;
/// `access_name` is the public suffix woven into derivative file names.
#[derive(Debug, Clone)]
pub struct Spec {
    pub name: String,
    pub access_name: String,
    pub chain: ProcessorChain,
    pub format: Option<OutputFormat>,
    pub cache_policy: CachePolicy,
}

impl Spec {
    pub fn new(
        name: impl Into<String>,
        access_name: impl Into<String>,
        chain: impl Into<ProcessorChain>,
    ) -> Self {
        Self {
            name: name.into(),
            access_name: access_name.into(),
            chain: chain.into(),
            format: None,
            cache_policy: CachePolicy::default(),
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn eager(mut self) -> Self {
        self.cache_policy = CachePolicy::Eager;
        self
    }

    /// The format this spec will emit for a source of the given format.
    /// A chain-forced format wins, then the spec's own format, then the
    /// source format, then JPEG.
    pub fn output_format(&self, source: Option<OutputFormat>) -> OutputFormat {
        self.chain
            .forced_format()
            .or(self.format)
            .or(source)
            .unwrap_or(OutputFormat::Jpeg)
    }

    /// [`Spec::output_format`] resolved from a source file name alone.
    /// Resolution seeds chain execution with this, so the emitted bytes
    /// always match the statically derived name, even when a source file
    /// is mislabelled.
    pub fn planned_format(&self, source_name: &str) -> OutputFormat {
        let (_, extension) = split_name(source_name);
        self.output_format(extension.and_then(OutputFormat::from_extension))
    }

    /// Derivative file name for a source file name. Statically derivable:
    /// `photo.jpg` under access name `thumb` becomes `photo_thumb.jpg`
    /// (with the extension following [`Spec::planned_format`]).
    pub fn derivative_name(&self, source_name: &str) -> String {
        let (stem, _) = split_name(source_name);
        let format = self.planned_format(source_name);
        format!("{stem}_{}.{}", self.access_name, format.extension())
    }
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
        _ => (name, None),
    }
}

/// Registered specs, iterated in registration order.
#[derive(Debug, Clone, Default)]
pub struct SpecRegistry {
    specs: Vec<Spec>,
}

impl SpecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a spec. Fails on a name collision or an invalid chain.
    pub fn register(&mut self, spec: Spec) -> Result<(), RegistryError> {
        if self.specs.iter().any(|s| s.name == spec.name) {
            return Err(RegistryError::DuplicateName(spec.name));
        }
        if self.specs.iter().any(|s| s.access_name == spec.access_name) {
            return Err(RegistryError::DuplicateAccessName(spec.access_name));
        }
        spec.chain.validate().map_err(|message| RegistryError::InvalidChain {
            spec: spec.name.clone(),
            message,
        })?;
        self.specs.push(spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Spec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Spec> {
        self.specs.iter()
    }

    /// Specs with the eager cache policy, in registration order.
    pub fn eager(&self) -> impl Iterator<Item = &Spec> {
        self.specs
            .iter()
            .filter(|s| s.cache_policy == CachePolicy::Eager)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
