use crate::codec::{Compression, ImageCodec};
use crate::engine::Engine;
use crate::error::{BuildError, LoadError};
use crate::loader::{LoaderFn, WeigherFn};
use crate::memory::MemoryCache;
use crate::metrics::Metrics;
use crate::registry::FetchRegistry;
use crate::shared::{ControlFlags, EngineShared};
use crate::storage::StorageCache;
use crate::task::delivery::DeliveryQueue;
use crate::task::worker::WorkerPool;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A builder for creating [`Engine`] instances.
///
/// Both cache tiers are optional; an engine with neither tier still
/// deduplicates and delivers loader fetches. Configuration is validated
/// eagerly by [`build`](EngineBuilder::build): an out-of-range capacity
/// fraction is the one class of defect the engine refuses to start with.
pub struct EngineBuilder<I: Send + Sync + 'static> {
  memory_capacity: Option<u64>,
  memory_fraction: Option<(f64, u64)>,
  storage_dir: Option<PathBuf>,
  storage_capacity: Option<u64>,
  storage_fraction: Option<(f64, u64)>,
  compression: Compression,
  codec: Option<Arc<dyn ImageCodec<I>>>,
  loader: Option<LoaderFn<I>>,
  weigher: Option<WeigherFn<I>>,
  workers: usize,
}

impl<I: Send + Sync + 'static> EngineBuilder<I> {
  /// Creates a new `EngineBuilder` with default settings: no cache tiers,
  /// no loader, and one worker per available CPU.
  pub fn new() -> Self {
    Self {
      memory_capacity: None,
      memory_fraction: None,
      storage_dir: None,
      storage_capacity: None,
      storage_fraction: None,
      compression: Compression::default(),
      codec: None,
      loader: None,
      weigher: None,
      workers: num_cpus::get().max(1),
    }
  }

  /// Enables the memory tier, bounded to `bytes` of decoded image weight.
  pub fn memory_capacity(mut self, bytes: u64) -> Self {
    self.memory_capacity = Some(bytes);
    self.memory_fraction = None;
    self
  }

  /// Enables the memory tier, bounded to a fraction of `total_bytes`
  /// (typically the available heap). The fraction must lie in `0.1..=0.8`.
  pub fn memory_capacity_fraction(mut self, fraction: f64, total_bytes: u64) -> Self {
    self.memory_fraction = Some((fraction, total_bytes));
    self.memory_capacity = None;
    self
  }

  /// Enables the storage tier rooted at `dir`. Requires a codec.
  pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.storage_dir = Some(dir.into());
    self
  }

  /// Bounds the storage tier to `bytes` of encoded file size. Without an
  /// explicit bound the tier is limited only by the disk.
  pub fn storage_capacity(mut self, bytes: u64) -> Self {
    self.storage_capacity = Some(bytes);
    self.storage_fraction = None;
    self
  }

  /// Bounds the storage tier to a fraction of `total_bytes` (typically
  /// free disk space). The fraction must lie in `0.01..=1.0`.
  pub fn storage_capacity_fraction(mut self, fraction: f64, total_bytes: u64) -> Self {
    self.storage_fraction = Some((fraction, total_bytes));
    self.storage_capacity = None;
    self
  }

  /// Sets the compression parameters for files written by the storage
  /// tier.
  pub fn compression(mut self, compression: Compression) -> Self {
    self.compression = compression;
    self
  }

  /// Sets the codec that encodes and decodes images for the storage tier.
  pub fn codec(mut self, codec: impl ImageCodec<I> + 'static) -> Self {
    self.codec = Some(Arc::new(codec));
    self
  }

  /// Sets the external loader invoked on a full cache miss. The closure
  /// may block on I/O; it is only ever called from a worker thread, with
  /// no cache lock held.
  pub fn loader(
    mut self,
    loader: impl Fn(&str) -> Result<I, LoadError> + Send + Sync + 'static,
  ) -> Self {
    self.loader = Some(Arc::new(loader));
    self
  }

  /// Sets the function computing an image's decoded byte footprint, used
  /// as its weight in the memory tier. Defaults to a weight of 1 per
  /// entry, which turns the memory capacity into an entry count.
  pub fn weigher(mut self, weigher: impl Fn(&I) -> u64 + Send + Sync + 'static) -> Self {
    self.weigher = Some(Arc::new(weigher));
    self
  }

  /// Sets the number of worker threads executing fetches.
  pub fn workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  /// Validates the configuration and starts the engine.
  pub fn build(mut self) -> Result<Engine<I>, BuildError> {
    let memory_capacity = self.resolve_memory_capacity()?;
    let storage_capacity = self.resolve_storage_capacity()?;
    if self.workers == 0 {
      return Err(BuildError::ZeroWorkers);
    }

    let metrics = Arc::new(Metrics::new());

    let memory = memory_capacity.map(|capacity| MemoryCache::with_metrics(capacity, metrics.clone()));

    let storage = match self.storage_dir.take() {
      Some(dir) => {
        let codec = self.codec.take().ok_or(BuildError::CodecRequired)?;
        let capacity = storage_capacity.unwrap_or(u64::MAX);
        let cache =
          StorageCache::with_metrics(dir, capacity, self.compression, codec, metrics.clone())
            .map_err(|err| BuildError::StorageDir(err.to_string()))?;
        Some(cache)
      }
      None => None,
    };

    let registry = Arc::new(FetchRegistry::new(metrics.clone()));
    let flags = Arc::new(ControlFlags::new());
    let delivery = DeliveryQueue::spawn(registry.clone(), flags.clone(), metrics.clone());
    let pool = WorkerPool::spawn(self.workers);
    let weigher = self.weigher.take().unwrap_or_else(|| Arc::new(|_: &I| 1));

    Ok(Engine {
      shared: Arc::new(EngineShared {
        memory,
        storage,
        registry,
        flags,
        metrics,
        loader: self.loader.take(),
        weigher,
        delivery,
        pool,
      }),
    })
  }

  fn resolve_memory_capacity(&self) -> Result<Option<u64>, BuildError> {
    let capacity = match self.memory_fraction {
      Some((fraction, total)) => {
        if !(0.1..=0.8).contains(&fraction) {
          return Err(BuildError::MemoryFractionOutOfRange(fraction));
        }
        Some((total as f64 * fraction) as u64)
      }
      None => self.memory_capacity,
    };
    if capacity == Some(0) {
      return Err(BuildError::ZeroCapacity);
    }
    Ok(capacity)
  }

  fn resolve_storage_capacity(&self) -> Result<Option<u64>, BuildError> {
    let capacity = match self.storage_fraction {
      Some((fraction, total)) => {
        if !(0.01..=1.0).contains(&fraction) {
          return Err(BuildError::StorageFractionOutOfRange(fraction));
        }
        Some((total as f64 * fraction) as u64)
      }
      None => self.storage_capacity,
    };
    if capacity == Some(0) {
      return Err(BuildError::ZeroCapacity);
    }
    Ok(capacity)
  }
}

impl<I: Send + Sync + 'static> Default for EngineBuilder<I> {
  fn default() -> Self {
    Self::new()
  }
}

impl<I: Send + Sync + 'static> fmt::Debug for EngineBuilder<I> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EngineBuilder")
      .field("memory_capacity", &self.memory_capacity)
      .field("memory_fraction", &self.memory_fraction)
      .field("storage_dir", &self.storage_dir)
      .field("storage_capacity", &self.storage_capacity)
      .field("storage_fraction", &self.storage_fraction)
      .field("compression", &self.compression)
      .field("workers", &self.workers)
      .field("has_codec", &self.codec.is_some())
      .field("has_loader", &self.loader.is_some())
      .finish()
  }
}
