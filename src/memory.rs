use crate::image::ImageHandle;
use crate::metrics::Metrics;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use generational_arena::{Arena, Index};
use log::trace;
use parking_lot::Mutex;

#[derive(Debug)]
struct Node<I> {
  key: String,
  handle: ImageHandle<I>,
  next: Option<Index>,
  prev: Option<Index>,
}

// The access-ordered core: an intrusive doubly-linked list over an arena,
// with a map for O(1) key lookup. Head is the most-recently-used entry.
struct LruState<I> {
  nodes: Arena<Node<I>>,
  lookup: HashMap<String, Index, ahash::RandomState>,
  head: Option<Index>,
  tail: Option<Index>,
  total_weight: u64,
}

impl<I> LruState<I> {
  fn new() -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::with_hasher(ahash::RandomState::new()),
      head: None,
      tail: None,
      total_weight: 0,
    }
  }

  // Detach a node from the list without touching the arena or the map.
  fn unlink(&mut self, index: Index) {
    let node = &self.nodes[index];
    let prev_idx = node.prev;
    let next_idx = node.next;

    if let Some(prev) = prev_idx {
      self.nodes[prev].next = next_idx;
    } else {
      self.head = next_idx;
    }

    if let Some(next) = next_idx {
      self.nodes[next].prev = prev_idx;
    } else {
      self.tail = prev_idx;
    }
  }

  // Make an already-allocated node the new head.
  fn push_front_node(&mut self, index: Index) {
    let old_head = self.head;
    self.nodes[index].next = old_head;
    self.nodes[index].prev = None;
    self.head = Some(index);

    if let Some(old_head) = old_head {
      self.nodes[old_head].prev = Some(index);
    }

    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  fn insert_front(&mut self, key: String, handle: ImageHandle<I>) {
    let weight = handle.weight();
    let node = Node {
      key: key.clone(),
      handle,
      next: None,
      prev: None,
    };
    let index = self.nodes.insert(node);
    self.lookup.insert(key, index);
    self.total_weight += weight;
    self.push_front_node(index);
  }

  fn promote(&mut self, key: &str) -> Option<ImageHandle<I>> {
    let index = *self.lookup.get(key)?;
    if self.head != Some(index) {
      self.unlink(index);
      self.push_front_node(index);
    }
    Some(self.nodes[index].handle.clone())
  }

  fn pop_back(&mut self) -> Option<(String, ImageHandle<I>)> {
    let tail_index = self.tail?;
    let key = self.nodes[tail_index].key.clone();
    let handle = self.remove(&key);
    handle.map(|h| (key, h))
  }

  fn remove(&mut self, key: &str) -> Option<ImageHandle<I>> {
    let index = self.lookup.remove(key)?;
    self.unlink(index);
    let node = self.nodes.remove(index)?;
    self.total_weight = self.total_weight.saturating_sub(node.handle.weight());
    Some(node.handle)
  }

  fn drain(&mut self) -> Vec<ImageHandle<I>> {
    let handles = self
      .nodes
      .drain()
      .map(|(_, node)| node.handle)
      .collect::<Vec<_>>();
    self.lookup.clear();
    self.head = None;
    self.tail = None;
    self.total_weight = 0;
    handles
  }

  // Test helper: keys from most- to least-recently-used.
  #[cfg(test)]
  fn keys_front_to_back(&self) -> Vec<String> {
    let mut keys = Vec::new();
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].next;
    }
    keys
  }
}

/// The in-memory tier: a bounded, weight-accounted, access-ordered LRU map
/// from cache keys to reference-counted images.
///
/// Every `put` takes a cache reference on the inserted image and evicts
/// least-recently-used entries (dropping their cache references) until the
/// running weight fits the configured capacity again. `get` refreshes
/// recency but never touches reference counts.
pub struct MemoryCache<I> {
  inner: Mutex<LruState<I>>,
  capacity: u64,
  metrics: Arc<Metrics>,
}

impl<I> MemoryCache<I> {
  /// Creates a memory cache bounded to `capacity` bytes of decoded image
  /// weight.
  pub fn new(capacity: u64) -> Self {
    Self::with_metrics(capacity, Arc::new(Metrics::new()))
  }

  pub(crate) fn with_metrics(capacity: u64, metrics: Arc<Metrics>) -> Self {
    Self {
      inner: Mutex::new(LruState::new()),
      capacity,
      metrics,
    }
  }

  /// The configured capacity in bytes.
  pub fn capacity(&self) -> u64 {
    self.capacity
  }

  /// The current total weight of all entries.
  pub fn total_weight(&self) -> u64 {
    self.inner.lock().total_weight
  }

  /// The number of entries currently cached.
  pub fn len(&self) -> usize {
    self.inner.lock().lookup.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Whether `key` is currently cached. Does not refresh recency.
  pub fn contains(&self, key: &str) -> bool {
    self.inner.lock().lookup.contains_key(key)
  }

  /// Inserts or replaces the entry for `key`, taking a cache reference on
  /// `handle`, then evicts from the least-recently-used end until the
  /// running weight fits the capacity again.
  pub fn put(&self, key: &str, handle: ImageHandle<I>) {
    handle.retain_cache();

    let mut state = self.inner.lock();
    if let Some(old) = state.remove(key) {
      old.release_cache();
    }
    state.insert_front(key.to_owned(), handle);
    self.metrics.inserts.fetch_add(1, Ordering::Relaxed);

    let mut evicted = 0u64;
    while state.total_weight > self.capacity {
      match state.pop_back() {
        Some((victim_key, victim)) => {
          victim.release_cache();
          evicted += 1;
          trace!("memory cache evicted {:?}", victim_key);
        }
        None => break,
      }
    }
    if evicted > 0 {
      self
        .metrics
        .memory_evictions
        .fetch_add(evicted, Ordering::Relaxed);
    }
    self
      .metrics
      .current_weight
      .store(state.total_weight, Ordering::Relaxed);
  }

  /// Returns the entry for `key` if present, refreshing its recency.
  /// Reference counts are not modified.
  pub fn get(&self, key: &str) -> Option<ImageHandle<I>> {
    let handle = self.inner.lock().promote(key);
    match &handle {
      Some(_) => self.metrics.memory_hits.fetch_add(1, Ordering::Relaxed),
      None => self.metrics.memory_misses.fetch_add(1, Ordering::Relaxed),
    };
    handle
  }

  /// Deletes the entry for `key` if present, dropping its cache reference.
  /// A missing key is a no-op.
  pub fn remove(&self, key: &str) {
    let mut state = self.inner.lock();
    if let Some(handle) = state.remove(key) {
      handle.release_cache();
      self
        .metrics
        .current_weight
        .store(state.total_weight, Ordering::Relaxed);
    }
  }

  /// Evicts every entry, dropping all cache references.
  pub fn clear(&self) {
    let handles = {
      let mut state = self.inner.lock();
      let handles = state.drain();
      self.metrics.current_weight.store(0, Ordering::Relaxed);
      handles
    };
    for handle in handles {
      handle.release_cache();
    }
  }
}

impl<I> std::fmt::Debug for MemoryCache<I> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MemoryCache")
      .field("capacity", &self.capacity)
      .field("total_weight", &self.total_weight())
      .field("len", &self.len())
      .finish()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::image::CachedImage;

  fn handle(weight: u64) -> ImageHandle<u32> {
    Arc::new(CachedImage::new(0, weight))
  }

  #[test]
  fn new_cache_is_empty() {
    let cache = MemoryCache::<u32>::new(100);
    assert!(cache.is_empty());
    assert_eq!(cache.total_weight(), 0);
    assert!(cache.get("missing").is_none());
  }

  #[test]
  fn put_tracks_weight_and_refcount() {
    let cache = MemoryCache::new(100);
    let image = handle(40);
    cache.put("a", image.clone());

    assert_eq!(cache.total_weight(), 40);
    assert_eq!(image.cache_refs(), 1);
    assert!(cache.contains("a"));
  }

  #[test]
  fn put_replaces_existing_entry() {
    let cache = MemoryCache::new(100);
    let first = handle(40);
    let second = handle(25);
    cache.put("a", first.clone());
    cache.put("a", second.clone());

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.total_weight(), 25);
    assert_eq!(first.cache_refs(), 0, "replaced entry loses its cache ref");
    assert_eq!(second.cache_refs(), 1);
  }

  #[test]
  fn eviction_is_least_recently_used_first() {
    let cache = MemoryCache::new(2);
    let a = handle(1);
    let b = handle(1);
    let c = handle(1);
    cache.put("a", a.clone());
    cache.put("b", b.clone());
    cache.put("c", c.clone());

    assert!(cache.get("a").is_none(), "oldest entry must be evicted");
    assert!(cache.get("b").is_some());
    assert!(cache.get("c").is_some());
    assert_eq!(a.cache_refs(), 0);
    assert_eq!(cache.total_weight(), 2);
  }

  #[test]
  fn get_promotes_recency() {
    let cache = MemoryCache::new(2);
    cache.put("a", handle(1));
    cache.put("b", handle(1));

    // Touch "a" so "b" becomes the eviction candidate.
    assert!(cache.get("a").is_some());
    cache.put("c", handle(1));

    assert!(cache.get("a").is_some());
    assert!(cache.get("b").is_none());
    assert!(cache.get("c").is_some());
  }

  #[test]
  fn oversized_entry_is_evicted_immediately() {
    let cache = MemoryCache::new(10);
    let big = handle(50);
    cache.put("big", big.clone());

    assert!(cache.is_empty());
    assert_eq!(cache.total_weight(), 0);
    assert_eq!(big.cache_refs(), 0);
  }

  #[test]
  fn remove_drops_cache_reference() {
    let cache = MemoryCache::new(100);
    let image = handle(10);
    cache.put("a", image.clone());
    cache.remove("a");

    assert!(cache.is_empty());
    assert_eq!(image.cache_refs(), 0);
    // Removing again is a no-op.
    cache.remove("a");
  }

  #[test]
  fn clear_releases_every_entry() {
    let cache = MemoryCache::new(100);
    let a = handle(10);
    let b = handle(20);
    cache.put("a", a.clone());
    cache.put("b", b.clone());
    cache.clear();

    assert!(cache.is_empty());
    assert_eq!(cache.total_weight(), 0);
    assert_eq!(a.cache_refs(), 0);
    assert_eq!(b.cache_refs(), 0);
  }

  #[test]
  fn recency_order_is_maintained() {
    let cache = MemoryCache::new(100);
    cache.put("a", handle(1));
    cache.put("b", handle(1));
    cache.put("c", handle(1));
    assert_eq!(
      cache.inner.lock().keys_front_to_back(),
      vec!["c", "b", "a"],
      "newest entry at the front"
    );

    cache.get("a");
    assert_eq!(
      cache.inner.lock().keys_front_to_back(),
      vec!["a", "c", "b"],
      "accessed entry moves to the front"
    );
  }

  #[test]
  fn capacity_invariant_holds_after_every_put() {
    let cache = MemoryCache::new(7);
    for (i, weight) in [3u64, 4, 2, 5, 1].iter().enumerate() {
      cache.put(&format!("k{}", i), handle(*weight));
      assert!(
        cache.total_weight() <= 7,
        "weight {} exceeds capacity after put {}",
        cache.total_weight(),
        i
      );
    }
  }
}
