//! Derivative resolution.
//!
//! The resolver sits between [specs](crate::spec), source entities, and the
//! [blob store](crate::store). Each (entity, spec, source content) triple
//! maps to one [`DerivativeKey`], and the resolver tracks every key through
//! three states:
//!
//! - **unresolved**: never computed, or invalidated. Resolving decodes the
//!   source, runs the spec's chain, encodes, and stores the result.
//! - **computing**: a thread is running the chain right now. Concurrent
//!   resolves of the same key block until it finishes instead of
//!   recomputing.
//! - **cached**: the derivative is in the store. Resolving returns the
//!   recorded descriptor after confirming the blob still exists; a blob
//!   that vanished behind our back sends the key back through compute.
//!
//! Results are made durable before they are announced: the blob is written
//! first and the state entry flips to cached second, so a crash between the
//! two costs a recompute, never a dangling entry. Failures are never
//! cached; a failing key returns to unresolved and the next access retries.
//!
//! Because the key covers a fingerprint of the source bytes, editing a
//! source in place changes the key. The old entry is never served for the
//! new content; it lingers until [`Resolver::source_replaced`] or
//! [`Resolver::clear_entity`] sweeps it.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::processors::{ChainError, ProcessContext, SaliencyModel, TransformCache};
use crate::queue::{PrecomputeJob, TaskQueue};
use crate::raster::{EncodeOptions, OutputFormat, RasterError, RasterImage};
use crate::spec::{Spec, SpecRegistry};
use crate::state::{SnapshotEntry, StateSnapshot, SNAPSHOT_VERSION};
use crate::store::{BlobStore, StoreError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Unknown spec: {0}")]
    UnknownSpec(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Decode failed for entity {entity}: {source}")]
    Decode {
        entity: String,
        #[source]
        source: RasterError,
    },
    #[error("Chain failed for entity {entity}, spec {spec}: {source}")]
    Chain {
        entity: String,
        spec: String,
        #[source]
        source: ChainError,
    },
    #[error("Encode failed for entity {entity}, spec {spec}: {source}")]
    Encode {
        entity: String,
        spec: String,
        #[source]
        source: RasterError,
    },
}

/// A stored object that owns one source image. The application implements
/// this over whatever its records look like; the resolver only needs a
/// stable identity, the source file name, and the bytes.
pub trait SourceEntity {
    /// Stable identifier, unique across entities. Part of every
    /// [`DerivativeKey`].
    fn identity(&self) -> String;

    /// File name of the source blob. Derivative names derive from it, so
    /// it should stay stable for the entity's lifetime.
    fn source_name(&self) -> String;

    /// The source image bytes.
    fn source_bytes(&self) -> Result<Vec<u8>, StoreError>;
}

/// SHA-256 of the source bytes, as a hex string.
pub fn source_fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Cache identity of one derivative: which entity, which spec, and the
/// exact source content it was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DerivativeKey(String);

impl DerivativeKey {
    /// Domain-separated SHA-256 over the three parts. Each part is length
    /// delimited, so no two distinct triples collide by concatenation.
    pub fn compute(entity_id: &str, spec_name: &str, source_fingerprint: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"derivative\0");
        for part in [entity_id, spec_name, source_fingerprint] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DerivativeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A computed derivative. The bytes live in the blob store under `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivative {
    pub key: DerivativeKey,
    pub name: String,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

/// Where a (entity, spec) pair currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Unresolved,
    Computing,
    Cached,
}

#[derive(Debug)]
enum EntryState {
    Computing,
    Cached(Derivative),
}

#[derive(Debug)]
struct Entry {
    entity_id: String,
    spec_name: String,
    source_fingerprint: String,
    state: EntryState,
}

enum Claim {
    Ready(Derivative),
    Compute,
}

/// Orchestrates derivative computation over a [`BlobStore`].
///
/// The resolver is `Sync`; share one instance across threads. Concurrent
/// [`Resolver::resolve`] calls for the same key run the chain exactly once.
pub struct Resolver<S: BlobStore> {
    store: S,
    registry: SpecRegistry,
    transforms: TransformCache,
    encode_options: EncodeOptions,
    saliency: Option<Box<dyn SaliencyModel>>,
    queue: Option<Box<dyn TaskQueue>>,
    states: Mutex<HashMap<DerivativeKey, Entry>>,
    gate: Condvar,
}

impl<S: BlobStore> Resolver<S> {
    pub fn new(store: S, registry: SpecRegistry) -> Self {
        Self {
            store,
            registry,
            transforms: TransformCache::new(),
            encode_options: EncodeOptions::default(),
            saliency: None,
            queue: None,
            states: Mutex::new(HashMap::new()),
            gate: Condvar::new(),
        }
    }

    /// Route eager precomputation through `queue` instead of running it on
    /// the calling thread.
    pub fn with_queue(mut self, queue: impl TaskQueue + 'static) -> Self {
        self.queue = Some(Box::new(queue));
        self
    }

    /// Wire in a saliency model for `stentifordize` steps.
    pub fn with_saliency(mut self, model: impl SaliencyModel + 'static) -> Self {
        self.saliency = Some(Box::new(model));
        self
    }

    pub fn with_encode_options(mut self, options: EncodeOptions) -> Self {
        self.encode_options = options;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &SpecRegistry {
        &self.registry
    }

    pub fn transforms(&self) -> &TransformCache {
        &self.transforms
    }

    /// Return the derivative for `entity` under `spec_name`, computing and
    /// storing it if this is the first access for the current source
    /// content.
    pub fn resolve(
        &self,
        entity: &dyn SourceEntity,
        spec_name: &str,
    ) -> Result<Derivative, ResolveError> {
        let spec = self
            .registry
            .get(spec_name)
            .ok_or_else(|| ResolveError::UnknownSpec(spec_name.to_string()))?;
        let entity_id = entity.identity();
        let bytes = entity.source_bytes()?;
        let fingerprint = source_fingerprint(&bytes);
        let key = DerivativeKey::compute(&entity_id, spec_name, &fingerprint);

        loop {
            match self.claim(&key, &entity_id, spec_name, &fingerprint) {
                Claim::Ready(derivative) => {
                    if self.store.exists(&derivative.name)? {
                        return Ok(derivative);
                    }
                    debug!(
                        key = %key,
                        name = %derivative.name,
                        "cached derivative missing from store, recomputing"
                    );
                    let mut states = self.lock_states();
                    if matches!(
                        states.get(&key),
                        Some(entry) if matches!(entry.state, EntryState::Cached(_))
                    ) {
                        states.remove(&key);
                    }
                }
                Claim::Compute => break,
            }
        }

        let result = self.compute(entity, spec, &bytes, &key);
        let mut states = self.lock_states();
        match result {
            Ok(derivative) => {
                states.insert(
                    key,
                    Entry {
                        entity_id,
                        spec_name: spec_name.to_string(),
                        source_fingerprint: fingerprint,
                        state: EntryState::Cached(derivative.clone()),
                    },
                );
                drop(states);
                self.gate.notify_all();
                Ok(derivative)
            }
            Err(err) => {
                states.remove(&key);
                drop(states);
                self.gate.notify_all();
                Err(err)
            }
        }
    }

    /// Claim the key, waiting out any in-flight computation. Returns either
    /// the cached derivative or the right to compute; in the latter case a
    /// computing entry is already registered under our name.
    fn claim(
        &self,
        key: &DerivativeKey,
        entity_id: &str,
        spec_name: &str,
        fingerprint: &str,
    ) -> Claim {
        let mut states = self.lock_states();
        loop {
            match states.get(key) {
                None => {
                    states.insert(
                        key.clone(),
                        Entry {
                            entity_id: entity_id.to_string(),
                            spec_name: spec_name.to_string(),
                            source_fingerprint: fingerprint.to_string(),
                            state: EntryState::Computing,
                        },
                    );
                    return Claim::Compute;
                }
                Some(entry) => match &entry.state {
                    EntryState::Cached(derivative) => return Claim::Ready(derivative.clone()),
                    EntryState::Computing => {
                        states = self
                            .gate
                            .wait(states)
                            .unwrap_or_else(|e| e.into_inner());
                    }
                },
            }
        }
    }

    /// Decode, run the chain, encode, store. The blob is durable before the
    /// caller marks the key cached.
    fn compute(
        &self,
        entity: &dyn SourceEntity,
        spec: &Spec,
        bytes: &[u8],
        key: &DerivativeKey,
    ) -> Result<Derivative, ResolveError> {
        let entity_id = entity.identity();
        let source_name = entity.source_name();
        let image = RasterImage::decode(bytes).map_err(|source| ResolveError::Decode {
            entity: entity_id.clone(),
            source,
        })?;
        let mut ctx = ProcessContext::new(&self.transforms);
        if let Some(model) = &self.saliency {
            ctx = ctx.with_saliency(model.as_ref());
        }
        let seed = spec.planned_format(&source_name);
        let (image, format) =
            spec.chain
                .run(image, seed, &ctx)
                .map_err(|source| ResolveError::Chain {
                    entity: entity_id.clone(),
                    spec: spec.name.clone(),
                    source,
                })?;
        let encoded =
            image
                .encode(format, &self.encode_options)
                .map_err(|source| ResolveError::Encode {
                    entity: entity_id.clone(),
                    spec: spec.name.clone(),
                    source,
                })?;
        let name = spec.derivative_name(&source_name);
        self.store.put(&name, &encoded)?;
        debug!(
            entity = %entity_id,
            spec = %spec.name,
            name = %name,
            width = image.width(),
            height = image.height(),
            "computed derivative"
        );
        Ok(Derivative {
            key: key.clone(),
            name,
            format,
            width: image.width(),
            height: image.height(),
        })
    }

    /// Drop `entity`'s derivative under one spec: the state entry goes back
    /// to unresolved and the stored blob is deleted. The next resolve
    /// recomputes.
    pub fn invalidate(
        &self,
        entity: &dyn SourceEntity,
        spec_name: &str,
    ) -> Result<(), ResolveError> {
        let spec = self
            .registry
            .get(spec_name)
            .ok_or_else(|| ResolveError::UnknownSpec(spec_name.to_string()))?;
        let entity_id = entity.identity();
        let mut names = BTreeSet::new();
        names.insert(spec.derivative_name(&entity.source_name()));
        {
            let mut states = self.lock_states();
            states.retain(|_, entry| {
                if entry.entity_id == entity_id && entry.spec_name == spec_name {
                    if let EntryState::Cached(derivative) = &entry.state {
                        names.insert(derivative.name.clone());
                    }
                    false
                } else {
                    true
                }
            });
        }
        self.gate.notify_all();
        for name in &names {
            self.store.delete(name)?;
        }
        debug!(entity = %entity_id, spec = %spec_name, "invalidated derivative");
        Ok(())
    }

    /// Drop every derivative of `entity` across all registered specs, both
    /// the statically derived names and any recorded under older source
    /// content.
    pub fn clear_entity(&self, entity: &dyn SourceEntity) -> Result<(), ResolveError> {
        let entity_id = entity.identity();
        let source_name = entity.source_name();
        let mut names: BTreeSet<String> = self
            .registry
            .iter()
            .map(|spec| spec.derivative_name(&source_name))
            .collect();
        {
            let mut states = self.lock_states();
            states.retain(|_, entry| {
                if entry.entity_id == entity_id {
                    if let EntryState::Cached(derivative) = &entry.state {
                        names.insert(derivative.name.clone());
                    }
                    false
                } else {
                    true
                }
            });
        }
        self.gate.notify_all();
        for name in &names {
            self.store.delete(name)?;
        }
        debug!(entity = %entity_id, blobs = names.len(), "cleared entity derivatives");
        Ok(())
    }

    /// Entity saved: schedule every eager spec. With a queue wired in this
    /// is fire-and-forget; without one the derivatives are computed inline
    /// and the first failure propagates.
    pub fn entity_saved(&self, entity: &dyn SourceEntity) -> Result<(), ResolveError> {
        self.precompute_eager(entity)
    }

    /// Entity removed: drop all of its derivatives and state.
    pub fn entity_deleted(&self, entity: &dyn SourceEntity) -> Result<(), ResolveError> {
        self.clear_entity(entity)
    }

    /// Source content replaced in place: drop everything computed from the
    /// old content, then reschedule the eager specs.
    pub fn source_replaced(&self, entity: &dyn SourceEntity) -> Result<(), ResolveError> {
        self.clear_entity(entity)?;
        self.precompute_eager(entity)
    }

    fn precompute_eager(&self, entity: &dyn SourceEntity) -> Result<(), ResolveError> {
        for spec in self.registry.eager() {
            match &self.queue {
                Some(queue) => queue.enqueue(PrecomputeJob {
                    entity_id: entity.identity(),
                    spec_name: spec.name.clone(),
                }),
                None => {
                    self.resolve(entity, &spec.name)?;
                }
            }
        }
        Ok(())
    }

    /// Current state of the (entity, spec) pair. Distinct source contents
    /// keep distinct keys, so this reports the most advanced entry found.
    pub fn state(&self, entity_id: &str, spec_name: &str) -> ResolutionState {
        let states = self.lock_states();
        let mut seen = ResolutionState::Unresolved;
        for entry in states.values() {
            if entry.entity_id == entity_id && entry.spec_name == spec_name {
                match entry.state {
                    EntryState::Cached(_) => return ResolutionState::Cached,
                    EntryState::Computing => seen = ResolutionState::Computing,
                }
            }
        }
        seen
    }

    /// Snapshot every cached entry, sorted by key. Computing entries are
    /// transient and are not captured.
    pub fn snapshot(&self) -> StateSnapshot {
        let states = self.lock_states();
        let mut entries: Vec<SnapshotEntry> = states
            .iter()
            .filter_map(|(key, entry)| match &entry.state {
                EntryState::Cached(derivative) => Some(SnapshotEntry {
                    key: key.clone(),
                    entity_id: entry.entity_id.clone(),
                    spec_name: entry.spec_name.clone(),
                    name: derivative.name.clone(),
                    format: derivative.format,
                    width: derivative.width,
                    height: derivative.height,
                    source_fingerprint: entry.source_fingerprint.clone(),
                }),
                EntryState::Computing => None,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        StateSnapshot {
            version: SNAPSHOT_VERSION,
            entries,
        }
    }

    /// Reload cached entries from a snapshot. Entries for specs no longer
    /// registered are dropped; entries whose blobs have since vanished heal
    /// through the existence check on their next resolve.
    pub fn restore(&self, snapshot: StateSnapshot) {
        let mut states = self.lock_states();
        for entry in snapshot.entries {
            if self.registry.get(&entry.spec_name).is_none() {
                debug!(spec = %entry.spec_name, "dropping snapshot entry for unregistered spec");
                continue;
            }
            states.insert(
                entry.key.clone(),
                Entry {
                    entity_id: entry.entity_id,
                    spec_name: entry.spec_name,
                    source_fingerprint: entry.source_fingerprint,
                    state: EntryState::Cached(Derivative {
                        key: entry.key,
                        name: entry.name,
                        format: entry.format,
                        width: entry.width,
                        height: entry.height,
                    }),
                },
            );
        }
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<DerivativeKey, Entry>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }
}
