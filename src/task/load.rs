use crate::image::ImageHandle;
use crate::listener::LoadCallback;
use crate::registry::TargetId;
use crate::shared::{ControlFlags, EngineShared};
use crate::task::delivery::Delivery;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::warn;

const CREATED: u8 = 0;
const SUBMITTED: u8 = 1;
const RUNNING: u8 = 2;
const FINISHED: u8 = 3;
const CANCELLED: u8 = 4;

/// Lifecycle states of a [`LoadTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
  Created,
  Submitted,
  Running,
  Finished,
  Cancelled,
}

/// One asynchronous fetch: storage lookup, loader invocation, cache
/// population and delivery scheduling for a single (key, target) pair.
///
/// Cancellation is cooperative: the flag is checked before fetching starts
/// and again when the delivery is applied, and a task blocked on the pause
/// gate is woken so it can observe the flag immediately.
pub(crate) struct LoadTask<I> {
  key: String,
  target: TargetId,
  callback: Arc<dyn LoadCallback<I>>,
  state: AtomicU8,
  flags: Arc<ControlFlags>,
}

impl<I> LoadTask<I> {
  pub(crate) fn new(
    key: String,
    target: TargetId,
    callback: Arc<dyn LoadCallback<I>>,
    flags: Arc<ControlFlags>,
  ) -> Self {
    Self {
      key,
      target,
      callback,
      state: AtomicU8::new(CREATED),
      flags,
    }
  }

  pub(crate) fn key(&self) -> &str {
    &self.key
  }

  pub(crate) fn state(&self) -> TaskState {
    match self.state.load(Ordering::Acquire) {
      CREATED => TaskState::Created,
      SUBMITTED => TaskState::Submitted,
      RUNNING => TaskState::Running,
      FINISHED => TaskState::Finished,
      _ => TaskState::Cancelled,
    }
  }

  /// Marks the task as queued for the worker pool. Only a freshly created
  /// (or reset) task may be submitted.
  pub(crate) fn submit(&self) -> bool {
    self
      .state
      .compare_exchange(CREATED, SUBMITTED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  fn begin(&self) {
    let _ = self
      .state
      .compare_exchange(SUBMITTED, RUNNING, Ordering::AcqRel, Ordering::Acquire);
  }

  // Finishing loses to a concurrent cancellation; a cancelled task stays
  // cancelled.
  fn finish(&self) {
    let _ = self
      .state
      .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire);
  }

  /// Cancels the task unless it already finished, then wakes it if it is
  /// blocked on the pause gate.
  pub(crate) fn cancel(&self) {
    let result = self
      .state
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| match state {
        FINISHED | CANCELLED => None,
        _ => Some(CANCELLED),
      });
    if result.is_ok() {
      self.flags.notify_waiters();
    }
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.state.load(Ordering::Acquire) == CANCELLED
  }

  /// Returns a terminal task to `Created` so it may be submitted again.
  /// Fails for a task that is still queued or running.
  pub(crate) fn reset(&self) -> bool {
    self
      .state
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| match state {
        FINISHED | CANCELLED => Some(CREATED),
        _ => None,
      })
      .is_ok()
  }
}

impl<I: Send + Sync + 'static> LoadTask<I> {
  /// Executes the fetch. The shape mirrors the request pipeline: pause
  /// gate, cancellation checkpoint, storage tier, loader, cache
  /// population, then delivery scheduling. The task counts as finished
  /// once the delivery is scheduled, not once it is applied.
  pub(crate) fn run(self: &Arc<Self>, shared: &Arc<EngineShared<I>>) {
    self.begin();

    if !shared.flags.block_while_paused(self) {
      self.schedule_delivery(shared, None);
      return;
    }

    let fetchable = !self.is_cancelled()
      && shared.registry.is_current(self.target, self)
      && !shared.flags.exit_early();

    let mut handle: Option<ImageHandle<I>> = None;
    let mut from_storage = false;

    if fetchable {
      if let Some(storage) = &shared.storage {
        if let Some(image) = storage.get(&self.key) {
          from_storage = true;
          handle = Some(shared.wrap(image));
        }
      }

      if handle.is_none() {
        if let Some(loader) = &shared.loader {
          shared.metrics.loads.fetch_add(1, Ordering::Relaxed);
          // The loader may block arbitrarily long; no cache lock is held
          // here.
          match loader(&self.key) {
            Ok(image) => handle = Some(shared.wrap(image)),
            Err(err) => {
              shared.metrics.load_failures.fetch_add(1, Ordering::Relaxed);
              warn!("load of {:?} failed: {}", self.key, err);
            }
          }
        }
      }

      if let Some(image) = &handle {
        self
          .callback
          .on_loaded(&self.key, image, false, from_storage);
        if !from_storage {
          if let Some(storage) = &shared.storage {
            image.with_image(|decoded| storage.put(&self.key, decoded));
          }
        }
        if let Some(memory) = &shared.memory {
          memory.put(&self.key, image.clone());
        }
      }
    }

    self.schedule_delivery(shared, handle);
  }

  fn schedule_delivery(self: &Arc<Self>, shared: &Arc<EngineShared<I>>, image: Option<ImageHandle<I>>) {
    shared.deliver(Delivery {
      task: Some(self.clone()),
      target: self.target,
      image,
      callback: self.callback.clone(),
    });
    self.finish();
  }
}

impl<I> std::fmt::Debug for LoadTask<I> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LoadTask")
      .field("key", &self.key)
      .field("target", &self.target)
      .field("state", &self.state())
      .finish()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::registry::TargetId;

  struct NoopCallback;

  impl LoadCallback<u32> for NoopCallback {
    fn on_loaded(&self, _: &str, _: &ImageHandle<u32>, _: bool, _: bool) {}
    fn on_delivered(&self, _: TargetId, _: &ImageHandle<u32>) {}
  }

  fn task() -> LoadTask<u32> {
    LoadTask::new(
      "key".to_owned(),
      TargetId(1),
      Arc::new(NoopCallback),
      Arc::new(ControlFlags::new()),
    )
  }

  #[test]
  fn lifecycle_transitions() {
    let task = task();
    assert_eq!(task.state(), TaskState::Created);
    assert!(task.submit());
    assert_eq!(task.state(), TaskState::Submitted);
    task.begin();
    assert_eq!(task.state(), TaskState::Running);
    task.finish();
    assert_eq!(task.state(), TaskState::Finished);
  }

  #[test]
  fn resubmit_without_reset_is_rejected() {
    let task = task();
    assert!(task.submit());
    task.begin();
    task.finish();
    assert!(!task.submit(), "a finished task cannot be resubmitted");
    assert!(task.reset());
    assert_eq!(task.state(), TaskState::Created);
    assert!(task.submit());
  }

  #[test]
  fn cancel_wins_over_finish() {
    let task = task();
    task.submit();
    task.begin();
    task.cancel();
    task.finish();
    assert_eq!(task.state(), TaskState::Cancelled);
  }

  #[test]
  fn cancel_after_finish_is_ignored() {
    let task = task();
    task.submit();
    task.begin();
    task.finish();
    task.cancel();
    assert_eq!(task.state(), TaskState::Finished);
  }

  #[test]
  fn reset_requires_terminal_state() {
    let task = task();
    assert!(!task.reset(), "a created task has nothing to reset");
    task.submit();
    assert!(!task.reset(), "a queued task cannot be reset");
    task.cancel();
    assert!(task.reset());
  }
}
