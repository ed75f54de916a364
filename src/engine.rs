use crate::builder::EngineBuilder;
use crate::listener::LoadCallback;
use crate::metrics::MetricsSnapshot;
use crate::registry::TargetId;
use crate::shared::EngineShared;
use crate::task::delivery::Delivery;
use crate::task::load::LoadTask;
use crate::task::worker::Job;

use std::fmt;
use std::sync::Arc;

/// The image-loading engine.
///
/// A request consults the memory tier synchronously; on a miss it
/// deduplicates against the in-flight fetch for the same target and
/// schedules a load on the worker pool, which consults the storage tier
/// and the external loader, populates both tiers, and hands the result to
/// the single delivery context for commit.
pub struct Engine<I: Send + Sync + 'static> {
  pub(crate) shared: Arc<EngineShared<I>>,
}

impl<I: Send + Sync + 'static> Engine<I> {
  /// Starts configuring a new engine.
  pub fn builder() -> EngineBuilder<I> {
    EngineBuilder::new()
  }

  /// Requests the image for `key` on behalf of `target`.
  ///
  /// A memory hit fires `on_loaded` synchronously on the calling thread and
  /// schedules the display commit through the delivery context; no task is
  /// created. On a miss, a request for a key already being fetched for the
  /// same target is dropped as a duplicate, while a request for a
  /// different key cancels the older fetch before dispatching its own.
  pub fn request(&self, key: &str, target: TargetId, callback: Arc<dyn LoadCallback<I>>) {
    if let Some(memory) = &self.shared.memory {
      if let Some(image) = memory.get(key) {
        // The hit supersedes whatever fetch still claims this target.
        self.shared.registry.cancel(target);
        callback.on_loaded(key, &image, true, false);
        self.shared.deliver(Delivery {
          task: None,
          target,
          image: Some(image),
          callback,
        });
        return;
      }
    }

    if !self.shared.registry.claim(target, key) {
      return;
    }

    let task = Arc::new(LoadTask::new(
      key.to_owned(),
      target,
      callback,
      self.shared.flags.clone(),
    ));
    task.submit();
    // Bind the task before dispatch so later claims for this target can
    // discover it.
    self.shared.registry.associate(target, task.clone());
    self.shared.pool.submit(Job {
      task,
      shared: Arc::downgrade(&self.shared),
    });
  }

  /// Cancels any in-flight fetch for `target`.
  pub fn cancel(&self, target: TargetId) {
    self.shared.registry.cancel(target);
  }

  /// Removes `key` from both cache tiers. In-flight fetches for the key
  /// are unaffected.
  pub fn invalidate(&self, key: &str) {
    if let Some(memory) = &self.shared.memory {
      memory.remove(key);
    }
    if let Some(storage) = &self.shared.storage {
      storage.remove(key);
    }
    self
      .shared
      .metrics
      .invalidations
      .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
  }

  /// Evicts every entry from both cache tiers.
  pub fn clear_cache(&self) {
    if let Some(memory) = &self.shared.memory {
      memory.clear();
    }
    if let Some(storage) = &self.shared.storage {
      storage.clear();
    }
  }

  /// While paused, every task blocks at its start until the engine is
  /// resumed or the task is cancelled.
  pub fn pause_work(&self, paused: bool) {
    self.shared.flags.set_paused(paused);
  }

  /// While set, tasks skip fetching and the delivery context skips
  /// applying results. Used to drain the engine without cancelling
  /// individual tasks.
  pub fn exit_tasks_early(&self, exit: bool) {
    self.shared.flags.set_exit_early(exit);
  }

  /// The number of targets with an in-flight fetch.
  pub fn in_flight(&self) -> usize {
    self.shared.registry.len()
  }

  /// A point-in-time snapshot of the engine's metrics.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }
}

impl<I: Send + Sync + 'static> Drop for Engine<I> {
  fn drop(&mut self) {
    // Wake anything parked on the pause gate so queued work drains fast.
    self.shared.flags.stop();
  }
}

impl<I: Send + Sync + 'static> fmt::Debug for Engine<I> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Engine")
      .field("shared", &self.shared)
      .finish()
  }
}
