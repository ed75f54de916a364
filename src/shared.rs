use crate::image::{CachedImage, ImageHandle};
use crate::loader::{LoaderFn, WeigherFn};
use crate::memory::MemoryCache;
use crate::metrics::Metrics;
use crate::registry::FetchRegistry;
use crate::storage::StorageCache;
use crate::task::delivery::{Delivery, DeliveryQueue};
use crate::task::load::LoadTask;
use crate::task::worker::WorkerPool;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Engine-wide control state shared with every task: the pause gate, the
/// exit-early switch and the shutdown flag.
///
/// Kept per-engine rather than static so independent engine instances
/// (and tests) cannot interfere with one another.
pub(crate) struct ControlFlags {
  paused: Mutex<bool>,
  unpause: Condvar,
  exit_early: AtomicBool,
  stopped: AtomicBool,
}

impl ControlFlags {
  pub(crate) fn new() -> Self {
    Self {
      paused: Mutex::new(false),
      unpause: Condvar::new(),
      exit_early: AtomicBool::new(false),
      stopped: AtomicBool::new(false),
    }
  }

  pub(crate) fn set_paused(&self, paused: bool) {
    *self.paused.lock() = paused;
    if !paused {
      self.unpause.notify_all();
    }
  }

  pub(crate) fn set_exit_early(&self, exit: bool) {
    self.exit_early.store(exit, Ordering::Release);
  }

  pub(crate) fn exit_early(&self) -> bool {
    self.exit_early.load(Ordering::Acquire)
  }

  pub(crate) fn stop(&self) {
    self.stopped.store(true, Ordering::Release);
    self.notify_waiters();
  }

  pub(crate) fn stopped(&self) -> bool {
    self.stopped.load(Ordering::Acquire)
  }

  /// Wakes every task blocked on the pause gate so it can re-check its
  /// cancellation flag. Takes the pause lock: a waiter is either parked
  /// already (and receives the notification) or has not yet re-checked its
  /// flags (and will see them before parking).
  pub(crate) fn notify_waiters(&self) {
    let _guard = self.paused.lock();
    self.unpause.notify_all();
  }

  /// Blocks while the engine is paused. Returns `false` if the wait ended
  /// because the task was cancelled or the engine shut down.
  pub(crate) fn block_while_paused<I>(&self, task: &LoadTask<I>) -> bool {
    let mut paused = self.paused.lock();
    while *paused {
      if task.is_cancelled() || self.stopped() {
        return false;
      }
      self.unpause.wait(&mut paused);
    }
    !task.is_cancelled() && !self.stopped()
  }
}

impl fmt::Debug for ControlFlags {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ControlFlags")
      .field("paused", &*self.paused.lock())
      .field("exit_early", &self.exit_early())
      .field("stopped", &self.stopped())
      .finish()
  }
}

/// The internal, thread-safe core of the engine.
pub(crate) struct EngineShared<I: Send + Sync + 'static> {
  pub(crate) memory: Option<MemoryCache<I>>,
  pub(crate) storage: Option<StorageCache<I>>,
  pub(crate) registry: Arc<FetchRegistry<I>>,
  pub(crate) flags: Arc<ControlFlags>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) loader: Option<LoaderFn<I>>,
  pub(crate) weigher: WeigherFn<I>,
  pub(crate) delivery: DeliveryQueue<I>,
  pub(crate) pool: WorkerPool<I>,
}

impl<I: Send + Sync + 'static> EngineShared<I> {
  /// Wraps a freshly produced image for reference-counted cache residency.
  pub(crate) fn wrap(&self, image: I) -> ImageHandle<I> {
    let weight = (self.weigher)(&image);
    Arc::new(CachedImage::new(image, weight))
  }

  pub(crate) fn deliver(&self, delivery: Delivery<I>) {
    if self.flags.stopped() {
      return;
    }
    self.delivery.send(delivery);
  }
}

impl<I: Send + Sync + 'static> fmt::Debug for EngineShared<I> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EngineShared")
      .field("memory", &self.memory)
      .field("storage", &self.storage)
      .field("flags", &self.flags)
      .field("in_flight", &self.registry.len())
      .finish_non_exhaustive()
  }
}
