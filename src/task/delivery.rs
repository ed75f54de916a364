use crate::image::ImageHandle;
use crate::listener::LoadCallback;
use crate::metrics::Metrics;
use crate::registry::{FetchRegistry, TargetId};
use crate::shared::ControlFlags;
use crate::task::load::LoadTask;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use fibre::mpsc;
use log::trace;

const DELIVERY_CHANNEL_CAPACITY: usize = 1024;

/// A completed fetch travelling to the delivery context.
pub(crate) struct Delivery<I> {
  /// The originating task, used to re-check target ownership at the point
  /// of application. Memory hits carry no task and apply unconditionally.
  pub(crate) task: Option<Arc<LoadTask<I>>>,
  pub(crate) target: TargetId,
  pub(crate) image: Option<ImageHandle<I>>,
  pub(crate) callback: Arc<dyn LoadCallback<I>>,
}

/// The single-consumer completion context: one thread applying deliveries
/// in order, so every display-visible side effect happens on one thread.
///
/// The thread exits once every sender is gone; dropping the queue closes
/// the channel.
pub(crate) struct DeliveryQueue<I: Send + Sync> {
  tx: mpsc::BoundedSender<Delivery<I>>,
}

impl<I: Send + Sync + 'static> DeliveryQueue<I> {
  pub(crate) fn spawn(
    registry: Arc<FetchRegistry<I>>,
    flags: Arc<ControlFlags>,
    metrics: Arc<Metrics>,
  ) -> Self {
    let (tx, rx) = mpsc::bounded::<Delivery<I>>(DELIVERY_CHANNEL_CAPACITY);

    let _ = thread::Builder::new()
      .name("pictor-delivery".to_owned())
      .spawn(move || {
        while let Ok(delivery) = rx.recv() {
          apply(delivery, &registry, &flags, &metrics);
        }
        trace!("delivery context exiting");
      });

    Self { tx }
  }

  pub(crate) fn send(&self, delivery: Delivery<I>) {
    let _ = self.tx.send(delivery);
  }
}

impl<I: Send + Sync> std::fmt::Debug for DeliveryQueue<I> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DeliveryQueue").finish_non_exhaustive()
  }
}

fn apply<I: Send + Sync>(
  delivery: Delivery<I>,
  registry: &FetchRegistry<I>,
  flags: &ControlFlags,
  metrics: &Metrics,
) {
  if flags.exit_early() {
    // Results are not applied while draining, but the association must
    // still be torn down or the target would refuse the same key forever.
    if let Some(task) = &delivery.task {
      registry.release(delivery.target, task);
    }
    metrics.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
    return;
  }

  if let Some(task) = &delivery.task {
    // The task must still own its target: a superseding request or a
    // cancellation between scheduling and application drops the result
    // here, before any display state is touched.
    if task.is_cancelled() || !registry.is_current(delivery.target, task) {
      metrics.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
      trace!(
        "dropped stale delivery of {:?} for target {:?}",
        task.key(),
        delivery.target
      );
      return;
    }
    registry.release(delivery.target, task);
  }

  match &delivery.image {
    Some(image) => {
      image.mark_displayed();
      metrics.deliveries.fetch_add(1, Ordering::Relaxed);
      delivery.callback.on_delivered(delivery.target, image);
    }
    None => {
      // A fetch that produced nothing leaves the target's placeholder in
      // place. The association is gone by now, so a later request for the
      // same key may try again.
      metrics.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
    }
  }
}
