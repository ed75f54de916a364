use crate::shared::EngineShared;
use crate::task::load::LoadTask;

use std::sync::{Arc, Weak};
use std::thread;

use fibre::mpmc;
use log::trace;

/// A unit of work queued for the pool: the task plus a weak path back to
/// the engine core. The back-reference is weak so queued work never keeps
/// a dropped engine alive.
pub(crate) struct Job<I: Send + Sync + 'static> {
  pub(crate) task: Arc<LoadTask<I>>,
  pub(crate) shared: Weak<EngineShared<I>>,
}

impl<I: Send + Sync + 'static> Job<I> {
  fn run(self) {
    match self.shared.upgrade() {
      Some(shared) => self.task.run(&shared),
      None => trace!("engine gone, dropping fetch of {:?}", self.task.key()),
    }
  }
}

/// A fixed-size pool of worker threads draining the fetch queue.
///
/// The threads exit on their own once every sender is gone; dropping the
/// pool closes the queue.
pub(crate) struct WorkerPool<I: Send + Sync + 'static> {
  tx: mpmc::Sender<Job<I>>,
}

impl<I: Send + Sync + 'static> WorkerPool<I> {
  pub(crate) fn spawn(workers: usize) -> Self {
    let (tx, rx) = mpmc::unbounded::<Job<I>>();
    for index in 0..workers {
      let rx = rx.clone();
      let _ = thread::Builder::new()
        .name(format!("pictor-worker-{}", index))
        .spawn(move || {
          while let Ok(job) = rx.recv() {
            job.run();
          }
          trace!("worker {} exiting", index);
        });
    }
    Self { tx }
  }

  pub(crate) fn submit(&self, job: Job<I>) {
    let _ = self.tx.send(job);
  }
}

impl<I: Send + Sync + 'static> std::fmt::Debug for WorkerPool<I> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WorkerPool").finish_non_exhaustive()
  }
}
