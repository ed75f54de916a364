//! A bounded, two-tier image-loading cache engine.
//!
//! # Features
//! - **Two tiers**: a weight-accounted in-memory LRU in front of an
//!   on-disk tier whose files are pruned least-recently-used first.
//! - **Deduplicated fetches**: at most one in-flight load per display
//!   target; a newer request for a different key cancels the older fetch
//!   before dispatching its own.
//! - **Cancellation-aware**: tasks stop at well-defined checkpoints, and a
//!   stale delivery is dropped before it can overwrite a newer result.
//! - **Reference-counted residency**: an image buffer is released only
//!   once the cache and every active display let go, and only after the
//!   image has been shown at least once.
//! - **Observability**: atomic counters exposed as a point-in-time
//!   snapshot.
//!
//! Image decoding stays outside the engine: the embedder supplies a loader
//! closure, an [`ImageCodec`] for the storage tier, and a weigher that
//! reports each image's decoded byte footprint.

// Public modules that form the API
pub mod builder;
pub mod codec;
pub mod engine;
pub mod error;
pub mod image;
pub mod listener;
pub mod memory;
pub mod metrics;
pub mod storage;

// Internal, crate-only modules
mod loader;
mod registry;
mod shared;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::EngineBuilder;
pub use codec::{Compression, ImageCodec, ImageFormat};
pub use engine::Engine;
pub use error::{BuildError, LoadError};
pub use image::{CachedImage, ImageHandle};
pub use listener::LoadCallback;
pub use memory::MemoryCache;
pub use metrics::MetricsSnapshot;
pub use registry::TargetId;
pub use storage::StorageCache;
