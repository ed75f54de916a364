use crate::image::ImageHandle;
use crate::registry::TargetId;

/// Callbacks delivered while a request progresses through the engine.
///
/// `on_loaded` fires on whichever thread produced the image: the caller's
/// own thread for a memory hit, a worker thread otherwise. `on_delivered`
/// always fires on the engine's single delivery context, after the engine
/// has re-validated that the originating task still owns its target.
///
/// A fetch that produces no image (loader failure, cancellation, draining)
/// fires neither callback; the target keeps whatever placeholder it shows
/// until a new request supersedes it.
pub trait LoadCallback<I>: Send + Sync {
  /// The image became available. `from_memory` and `from_storage` identify
  /// the tier that produced it; both `false` means the external loader ran.
  fn on_loaded(&self, key: &str, image: &ImageHandle<I>, from_memory: bool, from_storage: bool);

  /// The result was committed to `target` on the delivery context.
  fn on_delivered(&self, target: TargetId, image: &ImageHandle<I>);
}
