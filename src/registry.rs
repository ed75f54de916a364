use crate::metrics::Metrics;
use crate::task::load::LoadTask;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

/// Identifies a display slot (a view, a list cell, a tile).
///
/// The embedder assigns one stable id per slot; the engine allows at most
/// one in-flight fetch per id at any time. Holding a `TargetId` never keeps
/// the underlying slot alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

/// Tracks the single in-flight task claiming each display target.
///
/// The table stands in for a back-reference stored on the target itself:
/// entries are removed the moment a target's task completes, is cancelled,
/// or is superseded, so lookup is O(1) and the table is self-cleaning.
pub(crate) struct FetchRegistry<I> {
  slots: Mutex<HashMap<TargetId, Arc<LoadTask<I>>, ahash::RandomState>>,
  metrics: Arc<Metrics>,
}

impl<I> FetchRegistry<I> {
  pub(crate) fn new(metrics: Arc<Metrics>) -> Self {
    Self {
      slots: Mutex::new(HashMap::with_hasher(ahash::RandomState::new())),
      metrics,
    }
  }

  /// Decides whether a new fetch for `target` should be dispatched.
  ///
  /// An association with the same key means an equivalent fetch is already
  /// in flight (or just committed): the caller must not duplicate it. Any
  /// other association is cancelled and cleared before `true` is returned.
  pub(crate) fn claim(&self, target: TargetId, key: &str) -> bool {
    let mut slots = self.slots.lock();
    if let Some(current) = slots.get(&target) {
      if current.key() == key {
        return false;
      }
    }
    if let Some(stale) = slots.remove(&target) {
      stale.cancel();
      self.metrics.cancellations.fetch_add(1, Ordering::Relaxed);
      trace!(
        "superseded fetch of {:?} for target {:?}",
        stale.key(),
        target
      );
    }
    true
  }

  /// Binds `task` as the in-flight fetch for `target`. The caller must have
  /// claimed the target first.
  pub(crate) fn associate(&self, target: TargetId, task: Arc<LoadTask<I>>) {
    self.slots.lock().insert(target, task);
  }

  /// Cancels and clears any association for `target`.
  pub(crate) fn cancel(&self, target: TargetId) {
    let removed = self.slots.lock().remove(&target);
    if let Some(task) = removed {
      task.cancel();
      self.metrics.cancellations.fetch_add(1, Ordering::Relaxed);
    }
  }

  /// Whether `task` is still the fetch associated with `target`.
  pub(crate) fn is_current(&self, target: TargetId, task: &Arc<LoadTask<I>>) -> bool {
    self
      .slots
      .lock()
      .get(&target)
      .map_or(false, |current| Arc::ptr_eq(current, task))
  }

  /// Clears the association for `target` if `task` still owns it. Called
  /// when a delivery commits.
  pub(crate) fn release(&self, target: TargetId, task: &Arc<LoadTask<I>>) {
    let mut slots = self.slots.lock();
    if let Some(current) = slots.get(&target) {
      if Arc::ptr_eq(current, task) {
        slots.remove(&target);
      }
    }
  }

  /// The number of targets with an in-flight fetch.
  pub(crate) fn len(&self) -> usize {
    self.slots.lock().len()
  }
}
