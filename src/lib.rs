//! # Rendition
//!
//! A declarative image-derivative pipeline. You declare named specs — an
//! ordered chain of processors plus an output format and a cache policy —
//! and the resolver produces one cached derivative per spec per source
//! image, keyed by content, keeping the cache honest across saves, source
//! replacements, and deletes.
//!
//! # Architecture: Declare, Resolve, Process
//!
//! Three layers, each usable without the one above it:
//!
//! ```text
//! 1. Declare   registry.toml  →  SpecRegistry   (named chains + formats + cache policies)
//! 2. Resolve   entity + spec  →  DerivativeKey  (cache gate, at-most-once computation)
//! 3. Process   source bytes   →  derivative     (decode → chain → encode → store)
//! ```
//!
//! This separation exists for three reasons:
//!
//! - **Declaration is data**: a spec registry is a TOML document you can
//!   inspect and diff; changing a chain never means changing code.
//! - **Resolution is idempotent**: the same (entity, spec, source content)
//!   triple always maps to the same key, so repeated resolves are cache hits
//!   and concurrent resolves compute exactly once.
//! - **Processing is pure**: a chain is a fold over an (image, format) pair.
//!   No processor touches storage, which keeps every algorithm unit-testable
//!   on small synthetic images.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`raster`] | Image backend adapter — decode/encode, pixel access, color summarization |
//! | [`profile`] | ICC profile parsing — identity tags and content fingerprint |
//! | [`processors`] | The transformation steps: fit/crop/smart-crop/trim, adjustment, ICC transforms, reflection, transpose, dithering, quantization |
//! | [`spec`] | [`Spec`] (named chain + format + cache policy) and the [`SpecRegistry`] |
//! | [`config`] | Declarative TOML registry loading and validation |
//! | [`resolver`] | The cache gate — derivative keys, at-most-once computation, lifecycle invalidation |
//! | [`store`] | Blob store trait plus in-memory and filesystem implementations |
//! | [`queue`] | Precompute queue trait plus inline and thread-pool implementations |
//! | [`state`] | Versioned JSON snapshots of resolver state for warm restarts |
//!
//! # Design Decisions
//!
//! ## Tagged Processors, Not Open Subclassing
//!
//! A chain is a `Vec<Processor>` where [`Processor`] is a closed enum of
//! configuration records. The TOML loader deserializes step tables straight
//! into the same type the registry holds, every option is a typed field with
//! a default, and `validate()` rejects bad configurations at registration
//! time rather than mid-chain. Adding a processor means adding a variant —
//! the compiler then points at every match that needs a decision.
//!
//! ## Content-Addressed Cache Keys
//!
//! A [`DerivativeKey`] is a SHA-256 over the entity identity, the spec name,
//! and a fingerprint of the source bytes, so editing a source in place
//! changes the key. A stale derivative can linger, but it can never be
//! served for the new content; the lifecycle calls
//! ([`Resolver::source_replaced`], [`Resolver::entity_deleted`]) sweep the
//! leftovers.
//!
//! ## Durable Before Cached
//!
//! The resolver writes the derivative blob first and flips its state entry
//! to cached second. A crash between the two costs one recompute. The
//! reverse order could announce a derivative that was never stored, and that
//! class of bug surfaces weeks later as a 404 with no error in sight.
//!
//! ## Mostly-Rust Imaging
//!
//! Decoding, encoding, and resampling use the `image` crate; EXIF
//! orientation comes from `kamadak-exif`; palette learning from
//! `color_quant`. The one non-Rust dependency is Little CMS via `lcms2`:
//! ICC transform math is decades of accumulated correctness not worth
//! re-deriving, and built transforms are cached by profile fingerprint so
//! construction cost is paid once per profile pair, not once per image.
//!
//! ## Storage and Dispatch Are Traits
//!
//! The resolver sees storage as [`BlobStore`] and eager precompute dispatch
//! as [`TaskQueue`]. Shipped implementations cover the common cases —
//! [`FsStore`] and [`MemoryStore`], [`queue::InlineQueue`] and
//! [`queue::ThreadPoolQueue`] — and tests swap in recording fakes to assert
//! on the exact operation sequence.
//!
//! # Diagnostics
//!
//! The crate logs through `tracing` (`debug!` for cache traffic, `warn!` for
//! recoverable fallbacks) and never installs a subscriber; the embedding
//! application decides where events go.

pub mod config;
pub mod processors;
pub mod profile;
pub mod queue;
pub mod raster;
pub mod resolver;
pub mod spec;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use config::load_registry;
pub use processors::{ProcessContext, Processor, ProcessorChain, SaliencyModel, TransformCache};
pub use queue::TaskQueue;
pub use raster::{ColorMode, EncodeOptions, OutputFormat, RasterImage};
pub use resolver::{Derivative, DerivativeKey, ResolveError, Resolver, SourceEntity};
pub use spec::{CachePolicy, Spec, SpecRegistry};
pub use store::{BlobStore, FsStore, MemoryStore};
