//! Profile-to-profile color transforms over lcms2, with a process-wide
//! transform cache.
//!
//! Building an lcms2 transform is far more expensive than running one, so
//! built transforms are cached by (source, destination, proof, intents)
//! and shared across chain executions. Transforms are constructed on a
//! `ThreadContext`, which makes them `Send`; a mutex around each one covers
//! the missing `Sync`.
//!
//! Source profile resolution walks a fixed ladder: an explicitly configured
//! profile wins, then a parseable profile embedded in the image, then
//! builtin sRGB.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use image::{DynamicImage, Rgb, RgbImage};
use lcms2::{AllowCache, Flags, Intent, PixelFormat, Profile, ThreadContext, Transform};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::profile::IccProfile;
use crate::raster::RasterImage;

use super::ProcessorError;

/// Cache key for untagged images. Fingerprints are hex digests, so this
/// can never collide with a real profile.
const BUILTIN_SRGB_KEY: &str = "builtin-srgb";

/// ICC rendering intent. Codes follow the ICC header encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderingIntent {
    Perceptual,
    #[default]
    RelativeColorimetric,
    Saturation,
    AbsoluteColorimetric,
}

impl RenderingIntent {
    fn to_lcms(self) -> Intent {
        match self {
            RenderingIntent::Perceptual => Intent::Perceptual,
            RenderingIntent::RelativeColorimetric => Intent::RelativeColorimetric,
            RenderingIntent::Saturation => Intent::Saturation,
            RenderingIntent::AbsoluteColorimetric => Intent::AbsoluteColorimetric,
        }
    }

    fn code(self) -> u32 {
        match self {
            RenderingIntent::Perceptual => 0,
            RenderingIntent::RelativeColorimetric => 1,
            RenderingIntent::Saturation => 2,
            RenderingIntent::AbsoluteColorimetric => 3,
        }
    }
}

/// Identity of one built transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TransformKey {
    source: String,
    destination: String,
    proof: Option<String>,
    intent: u32,
    proof_intent: Option<u32>,
}

/// A built lcms2 transform. `Send` but not `Sync`, hence the mutex.
struct CachedTransform {
    inner: Mutex<Transform<[u8; 3], [u8; 3], ThreadContext, AllowCache>>,
}

impl CachedTransform {
    fn new(transform: Transform<[u8; 3], [u8; 3], ThreadContext, AllowCache>) -> Self {
        Self {
            inner: Mutex::new(transform),
        }
    }

    fn run(&self, src: &[[u8; 3]], dst: &mut [[u8; 3]]) {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.transform_pixels(src, dst);
    }
}

/// Shared cache of built transforms. The first thread to finish building
/// a key wins; racing builds for the same key are dropped.
#[derive(Default)]
pub struct TransformCache {
    transforms: Mutex<HashMap<TransformKey, Arc<CachedTransform>>>,
}

impl fmt::Debug for TransformCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl TransformCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TransformKey, Arc<CachedTransform>>> {
        self.transforms.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fetch the transform for `key`, building it outside the lock on a
    /// miss.
    fn get_or_build(
        &self,
        key: TransformKey,
        build: impl FnOnce() -> Result<CachedTransform, lcms2::Error>,
    ) -> Result<Arc<CachedTransform>, lcms2::Error> {
        if let Some(existing) = self.lock().get(&key) {
            return Ok(Arc::clone(existing));
        }
        debug!(source = %key.source, destination = %key.destination, "building color transform");
        let built = Arc::new(build()?);
        Ok(Arc::clone(self.lock().entry(key).or_insert(built)))
    }
}

/// Source profile for one application: configured, embedded, or assumed.
fn resolve_source(configured: Option<&IccProfile>, image: &RasterImage) -> Option<IccProfile> {
    if let Some(profile) = configured {
        return Some(profile.clone());
    }
    if let Some(bytes) = image.icc_profile() {
        match IccProfile::from_bytes(bytes.to_vec()) {
            Ok(profile) => return Some(profile),
            Err(err) => {
                debug!(error = %err, "embedded profile unusable, assuming sRGB");
            }
        }
    }
    None
}

fn source_key(source: Option<&IccProfile>) -> String {
    source.map_or_else(|| BUILTIN_SRGB_KEY.to_string(), |p| p.fingerprint().to_string())
}

/// Build a plain source-to-destination transform. `None` source means
/// builtin sRGB.
fn build_plain(
    source: Option<&IccProfile>,
    destination: &IccProfile,
    intent: Intent,
) -> Result<CachedTransform, lcms2::Error> {
    let context = ThreadContext::new();
    let input = match source {
        Some(profile) => Profile::new_icc_context(&context, profile.bytes())?,
        None => Profile::new_srgb_context(&context),
    };
    let output = Profile::new_icc_context(&context, destination.bytes())?;
    let transform = Transform::new_context(
        context,
        &input,
        PixelFormat::RGB_8,
        &output,
        PixelFormat::RGB_8,
        intent,
    )?;
    Ok(CachedTransform::new(transform))
}

fn plain_transform(
    source: Option<&IccProfile>,
    destination: &IccProfile,
    intent: RenderingIntent,
    transforms: &TransformCache,
) -> Result<Arc<CachedTransform>, lcms2::Error> {
    let key = TransformKey {
        source: source_key(source),
        destination: destination.fingerprint().to_string(),
        proof: None,
        intent: intent.code(),
        proof_intent: None,
    };
    transforms.get_or_build(key, || build_plain(source, destination, intent.to_lcms()))
}

/// Convert to RGB, push every pixel through the transform, and tag the
/// result with the destination profile.
fn run_transform(
    image: &RasterImage,
    transform: &CachedTransform,
    destination: &IccProfile,
) -> RasterImage {
    let rgb = image.buffer().to_rgb8();
    let (width, height) = rgb.dimensions();
    let src: Vec<[u8; 3]> = rgb.pixels().map(|px| px.0).collect();
    let mut dst = vec![[0u8; 3]; src.len()];
    transform.run(&src, &mut dst);
    let out = RgbImage::from_fn(width, height, |x, y| {
        Rgb(dst[y as usize * width as usize + x as usize])
    });
    let mut result = image.with_buffer(DynamicImage::ImageRgb8(out));
    result.icc = Some(destination.bytes().to_vec());
    result
}

/// Convert pixels from the resolved source profile to `destination`.
#[derive(Debug, Clone, PartialEq)]
pub struct IccTransform {
    pub source: Option<IccProfile>,
    pub destination: IccProfile,
    pub intent: RenderingIntent,
}

impl IccTransform {
    pub fn new(destination: IccProfile) -> Self {
        Self {
            source: None,
            destination,
            intent: RenderingIntent::default(),
        }
    }

    pub fn with_source(mut self, source: IccProfile) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_intent(mut self, intent: RenderingIntent) -> Self {
        self.intent = intent;
        self
    }

    pub fn apply(
        &self,
        image: &RasterImage,
        transforms: &TransformCache,
    ) -> Result<RasterImage, ProcessorError> {
        let source = resolve_source(self.source.as_ref(), image);
        let transform = plain_transform(source.as_ref(), &self.destination, self.intent, transforms)?;
        Ok(run_transform(image, &transform, &self.destination))
    }
}

/// Like [`IccTransform`], but renders through a proof profile to preview
/// another device's reproduction. Without a proof profile it degrades to
/// the plain transform.
#[derive(Debug, Clone, PartialEq)]
pub struct IccProofTransform {
    pub source: Option<IccProfile>,
    pub destination: IccProfile,
    pub proof: Option<IccProfile>,
    pub intent: RenderingIntent,
    pub proof_intent: RenderingIntent,
}

impl IccProofTransform {
    pub fn new(destination: IccProfile) -> Self {
        Self {
            source: None,
            destination,
            proof: None,
            intent: RenderingIntent::RelativeColorimetric,
            proof_intent: RenderingIntent::AbsoluteColorimetric,
        }
    }

    pub fn with_source(mut self, source: IccProfile) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_proof(mut self, proof: IccProfile) -> Self {
        self.proof = Some(proof);
        self
    }

    pub fn apply(
        &self,
        image: &RasterImage,
        transforms: &TransformCache,
    ) -> Result<RasterImage, ProcessorError> {
        let Some(proof) = &self.proof else {
            warn!("proof transform without a proof profile, running the plain transform");
            let source = resolve_source(self.source.as_ref(), image);
            let transform =
                plain_transform(source.as_ref(), &self.destination, self.intent, transforms)?;
            return Ok(run_transform(image, &transform, &self.destination));
        };

        let source = resolve_source(self.source.as_ref(), image);
        let key = TransformKey {
            source: source_key(source.as_ref()),
            destination: self.destination.fingerprint().to_string(),
            proof: Some(proof.fingerprint().to_string()),
            intent: self.intent.code(),
            proof_intent: Some(self.proof_intent.code()),
        };
        let transform = transforms.get_or_build(key, || {
            let context = ThreadContext::new();
            let input = match source.as_ref() {
                Some(profile) => Profile::new_icc_context(&context, profile.bytes())?,
                None => Profile::new_srgb_context(&context),
            };
            let output = Profile::new_icc_context(&context, self.destination.bytes())?;
            let proofing = Profile::new_icc_context(&context, proof.bytes())?;
            let transform = Transform::new_proofing_context(
                context,
                &input,
                PixelFormat::RGB_8,
                &output,
                PixelFormat::RGB_8,
                &proofing,
                self.intent.to_lcms(),
                self.proof_intent.to_lcms(),
                Flags::SOFT_PROOFING,
            )?;
            Ok(CachedTransform::new(transform))
        })?;
        Ok(run_transform(image, &transform, &self.destination))
    }
}
