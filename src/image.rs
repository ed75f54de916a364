use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;

/// A shared handle to a cached, reference-counted image.
pub type ImageHandle<I> = Arc<CachedImage<I>>;

// The two reference counts and the displayed-once flag share a single
// atomic word so the release decision is one state transition rather than
// two counters that could race each other.
//
// Layout: [displayed:1][display refs:31][cache refs:32]
const CACHE_ONE: u64 = 1;
const CACHE_MASK: u64 = 0xFFFF_FFFF;
const DISPLAY_ONE: u64 = 1 << 32;
const DISPLAY_MASK: u64 = 0x7FFF_FFFF << 32;
const DISPLAYED: u64 = 1 << 63;

/// An owned decoded image plus the bookkeeping that decides when its
/// backing buffer may be dropped.
///
/// The buffer is released only once the cache reference count and the
/// display reference count are both zero *and* the image has been displayed
/// at least once. An image evicted from the cache before it was ever shown
/// stays resident; the release fires when a display cycle later completes.
pub struct CachedImage<I> {
  image: Mutex<Option<I>>,
  weight: u64,
  state: AtomicU64,
}

impl<I> CachedImage<I> {
  /// Wraps a decoded image with its byte weight. Both reference counts
  /// start at zero and the image counts as never displayed.
  pub fn new(image: I, weight: u64) -> Self {
    Self {
      image: Mutex::new(Some(image)),
      weight,
      state: AtomicU64::new(0),
    }
  }

  /// The decoded byte footprint used for memory cache accounting.
  #[inline]
  pub fn weight(&self) -> u64 {
    self.weight
  }

  /// Runs `f` against the image, unless the buffer has been released.
  pub fn with_image<R>(&self, f: impl FnOnce(&I) -> R) -> Option<R> {
    self.image.lock().as_ref().map(f)
  }

  /// Whether the backing buffer has been released.
  pub fn is_released(&self) -> bool {
    self.image.lock().is_none()
  }

  /// Current number of cache references.
  pub fn cache_refs(&self) -> u32 {
    (self.state.load(Ordering::Acquire) & CACHE_MASK) as u32
  }

  /// Current number of active display references.
  pub fn display_refs(&self) -> u32 {
    ((self.state.load(Ordering::Acquire) & DISPLAY_MASK) >> 32) as u32
  }

  /// Whether the image has been displayed at least once.
  pub fn was_displayed(&self) -> bool {
    self.state.load(Ordering::Acquire) & DISPLAYED != 0
  }

  /// Records cache residency. Called by a cache tier when it takes a
  /// reference to the image.
  pub(crate) fn retain_cache(&self) {
    self.state.fetch_add(CACHE_ONE, Ordering::AcqRel);
  }

  /// Drops one cache reference, releasing the buffer if this was the last
  /// reference of either kind and the image has been shown.
  pub(crate) fn release_cache(&self) {
    self.release(CACHE_ONE, CACHE_MASK);
  }

  /// Records an active display of the image.
  pub fn retain_display(&self) {
    self.state.fetch_add(DISPLAY_ONE, Ordering::AcqRel);
  }

  /// Drops one display reference, releasing the buffer if this was the last
  /// reference of either kind and the image has been shown.
  pub fn release_display(&self) {
    self.release(DISPLAY_ONE, DISPLAY_MASK);
  }

  /// Marks the image as having been displayed at least once. The engine
  /// calls this when a delivery commits; embedders displaying a handle
  /// through some other path may call it themselves.
  pub fn mark_displayed(&self) {
    let prev = self.state.fetch_or(DISPLAYED, Ordering::AcqRel);
    // Both counts may already be zero when the flag arrives.
    if prev == 0 {
      self.reclaim();
    }
  }

  fn release(&self, unit: u64, mask: u64) {
    let result = self
      .state
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
        if state & mask == 0 {
          // Unbalanced release; leave the state untouched.
          None
        } else {
          Some(state - unit)
        }
      });

    if let Ok(prev) = result {
      if prev - unit == DISPLAYED {
        self.reclaim();
      }
    }
  }

  fn reclaim(&self) {
    if self.image.lock().take().is_some() {
      trace!("released image buffer ({} bytes)", self.weight);
    }
  }
}

impl<I> fmt::Debug for CachedImage<I> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CachedImage")
      .field("weight", &self.weight)
      .field("cache_refs", &self.cache_refs())
      .field("display_refs", &self.display_refs())
      .field("was_displayed", &self.was_displayed())
      .field("released", &self.is_released())
      .finish()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn fresh_image_is_resident() {
    let image = CachedImage::new(vec![0u8; 16], 16);
    assert!(!image.is_released());
    assert_eq!(image.cache_refs(), 0);
    assert_eq!(image.display_refs(), 0);
    assert!(!image.was_displayed());
  }

  #[test]
  fn eviction_without_display_keeps_buffer() {
    let image = CachedImage::new(vec![0u8; 16], 16);
    image.retain_cache();
    image.release_cache();
    assert!(
      !image.is_released(),
      "an image never shown must stay resident"
    );
  }

  #[test]
  fn release_requires_both_counts_zero() {
    let image = CachedImage::new(vec![0u8; 16], 16);
    image.retain_cache();
    image.retain_display();
    image.mark_displayed();

    image.release_cache();
    assert!(!image.is_released(), "display ref still held");

    image.release_display();
    assert!(image.is_released());
  }

  #[test]
  fn mark_displayed_with_no_refs_releases() {
    let image = CachedImage::new(vec![0u8; 16], 16);
    image.retain_display();
    image.release_display();
    assert!(!image.is_released(), "not yet flagged as displayed");

    image.mark_displayed();
    assert!(image.is_released());
  }

  #[test]
  fn unbalanced_release_is_ignored() {
    let image = CachedImage::new(vec![0u8; 16], 16);
    image.release_cache();
    image.release_display();
    assert_eq!(image.cache_refs(), 0);
    assert_eq!(image.display_refs(), 0);
    assert!(!image.is_released());
  }

  #[test]
  fn with_image_after_release_returns_none() {
    let image = CachedImage::new(7u32, 4);
    image.retain_display();
    image.mark_displayed();
    image.release_display();

    assert!(image.is_released());
    assert_eq!(image.with_image(|v| *v), None);
  }
}
