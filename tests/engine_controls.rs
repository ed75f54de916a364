mod common;

use common::{wait_until, RecordingCallback, TestCodec, TestImage};
use pictor::{Engine, TargetId};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn loader_engine(load_count: Arc<AtomicUsize>) -> Engine<TestImage> {
  Engine::builder()
    .memory_capacity(4096)
    .weigher(common::weigh)
    .loader(move |_: &str| {
      load_count.fetch_add(1, Ordering::SeqCst);
      Ok(TestImage::new(1, 2, 2))
    })
    .build()
    .unwrap()
}

#[test]
fn paused_tasks_block_until_resumed() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let engine = loader_engine(load_count.clone());

  // 1. Pause, then dispatch.
  engine.pause_work(true);
  let callback = RecordingCallback::new();
  engine.request("img", TargetId(1), callback.clone());

  // 2. The task must not make progress while paused.
  thread::sleep(Duration::from_millis(150));
  assert_eq!(load_count.load(Ordering::SeqCst), 0, "paused task ran");
  assert_eq!(callback.delivered_count.load(Ordering::SeqCst), 0);

  // 3. Resuming lets it finish.
  engine.pause_work(false);
  assert!(
    wait_until(WAIT, || callback.delivered_count.load(Ordering::SeqCst) == 1),
    "task must complete after resume"
  );
  assert_eq!(load_count.load(Ordering::SeqCst), 1);
}

#[test]
fn cancelling_a_paused_task_releases_it_without_fetching() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let engine = loader_engine(load_count.clone());

  engine.pause_work(true);
  let callback = RecordingCallback::new();
  engine.request("img", TargetId(5), callback.clone());
  thread::sleep(Duration::from_millis(50));

  // Cancellation wakes the task out of the pause wait.
  engine.cancel(TargetId(5));
  assert!(
    wait_until(WAIT, || engine.in_flight() == 0),
    "cancelled task must release its slot while still paused"
  );
  // Give the worker a moment to run the released task to completion.
  thread::sleep(Duration::from_millis(100));

  assert_eq!(load_count.load(Ordering::SeqCst), 0, "no fetch after cancel");
  assert_eq!(callback.delivered_count.load(Ordering::SeqCst), 0);
  assert_eq!(engine.metrics().cancellations, 1);

  engine.pause_work(false);
}

#[test]
fn exit_tasks_early_drains_without_applying() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let engine = loader_engine(load_count.clone());

  engine.exit_tasks_early(true);
  let callback = RecordingCallback::new();
  engine.request("img", TargetId(2), callback.clone());

  assert!(
    wait_until(WAIT, || engine.in_flight() == 0),
    "draining tasks still tear down their associations"
  );
  assert_eq!(load_count.load(Ordering::SeqCst), 0, "no fetch while draining");
  assert_eq!(callback.delivered_count.load(Ordering::SeqCst), 0);

  // 2. Clearing the flag restores normal behavior.
  engine.exit_tasks_early(false);
  engine.request("img", TargetId(2), callback.clone());
  assert!(wait_until(WAIT, || callback.delivered_count.load(Ordering::SeqCst) == 1));
  assert_eq!(load_count.load(Ordering::SeqCst), 1);
}

#[test]
fn clear_cache_empties_both_tiers() {
  let dir = tempfile::tempdir().unwrap();
  let load_count = Arc::new(AtomicUsize::new(0));

  let engine = Engine::builder()
    .memory_capacity(4096)
    .weigher(common::weigh)
    .storage_dir(dir.path())
    .storage_capacity(4096)
    .codec(TestCodec)
    .loader({
      let load_count = load_count.clone();
      move |_: &str| {
        load_count.fetch_add(1, Ordering::SeqCst);
        Ok(TestImage::new(3, 2, 2))
      }
    })
    .build()
    .unwrap();

  let callback = RecordingCallback::new();
  engine.request("img", TargetId(1), callback.clone());
  assert!(wait_until(WAIT, || callback.delivered_count.load(Ordering::SeqCst) == 1));

  engine.clear_cache();
  assert_eq!(engine.metrics().current_weight, 0);
  assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());

  // Both tiers are cold again.
  engine.request("img", TargetId(2), callback.clone());
  assert!(wait_until(WAIT, || callback.delivered_count.load(Ordering::SeqCst) == 2));
  assert_eq!(load_count.load(Ordering::SeqCst), 2);
}

#[test]
fn independent_engines_do_not_share_pause_state() {
  let first_loads = Arc::new(AtomicUsize::new(0));
  let second_loads = Arc::new(AtomicUsize::new(0));
  let first = loader_engine(first_loads.clone());
  let second = loader_engine(second_loads.clone());

  first.pause_work(true);

  let callback = RecordingCallback::new();
  second.request("img", TargetId(1), callback.clone());
  assert!(
    wait_until(WAIT, || callback.delivered_count.load(Ordering::SeqCst) == 1),
    "pausing one engine must not stall another"
  );
  assert_eq!(first_loads.load(Ordering::SeqCst), 0);
  assert_eq!(second_loads.load(Ordering::SeqCst), 1);

  first.pause_work(false);
}
