use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the engine.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Tier hit/miss counts ---
  pub(crate) memory_hits: CachePadded<AtomicU64>,
  pub(crate) memory_misses: CachePadded<AtomicU64>,
  pub(crate) storage_hits: CachePadded<AtomicU64>,
  pub(crate) storage_misses: CachePadded<AtomicU64>,

  // --- Loader traffic ---
  pub(crate) loads: CachePadded<AtomicU64>,
  pub(crate) load_failures: CachePadded<AtomicU64>,

  // --- Mutation counts ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,

  // --- Eviction stats per tier ---
  pub(crate) memory_evictions: CachePadded<AtomicU64>,
  pub(crate) storage_evictions: CachePadded<AtomicU64>,

  // --- Task lifecycle ---
  pub(crate) cancellations: CachePadded<AtomicU64>,
  pub(crate) deliveries: CachePadded<AtomicU64>,
  pub(crate) deliveries_dropped: CachePadded<AtomicU64>,

  // --- Weight ---
  pub(crate) current_weight: CachePadded<AtomicU64>,

  created_at: Instant,
}

// Manual implementation of Default to handle the non-default `Instant`.
impl Default for Metrics {
  fn default() -> Self {
    Self {
      memory_hits: CachePadded::new(AtomicU64::new(0)),
      memory_misses: CachePadded::new(AtomicU64::new(0)),
      storage_hits: CachePadded::new(AtomicU64::new(0)),
      storage_misses: CachePadded::new(AtomicU64::new(0)),
      loads: CachePadded::new(AtomicU64::new(0)),
      load_failures: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      memory_evictions: CachePadded::new(AtomicU64::new(0)),
      storage_evictions: CachePadded::new(AtomicU64::new(0)),
      cancellations: CachePadded::new(AtomicU64::new(0)),
      deliveries: CachePadded::new(AtomicU64::new(0)),
      deliveries_dropped: CachePadded::new(AtomicU64::new(0)),
      current_weight: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  /// Creates a new `Metrics` instance, capturing the creation time.
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let memory_hits = self.memory_hits.load(Ordering::Relaxed);
    let memory_misses = self.memory_misses.load(Ordering::Relaxed);
    let total_lookups = memory_hits + memory_misses;

    MetricsSnapshot {
      memory_hits,
      memory_misses,
      memory_hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        memory_hits as f64 / total_lookups as f64
      },
      storage_hits: self.storage_hits.load(Ordering::Relaxed),
      storage_misses: self.storage_misses.load(Ordering::Relaxed),
      loads: self.loads.load(Ordering::Relaxed),
      load_failures: self.load_failures.load(Ordering::Relaxed),
      inserts: self.inserts.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      memory_evictions: self.memory_evictions.load(Ordering::Relaxed),
      storage_evictions: self.storage_evictions.load(Ordering::Relaxed),
      cancellations: self.cancellations.load(Ordering::Relaxed),
      deliveries: self.deliveries.load(Ordering::Relaxed),
      deliveries_dropped: self.deliveries_dropped.load(Ordering::Relaxed),
      current_weight: self.current_weight.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the engine's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Requests answered synchronously by the memory tier.
  pub memory_hits: u64,
  /// Requests that missed the memory tier.
  pub memory_misses: u64,
  /// The memory tier hit ratio (hits / (hits + misses)).
  pub memory_hit_ratio: f64,
  /// Fetches answered by the storage tier.
  pub storage_hits: u64,
  /// Fetches that missed the storage tier.
  pub storage_misses: u64,
  /// Invocations of the external loader.
  pub loads: u64,
  /// Loader invocations that returned an error.
  pub load_failures: u64,
  /// Entries inserted into the memory tier.
  pub inserts: u64,
  /// Keys manually invalidated.
  pub invalidations: u64,
  /// Entries evicted from the memory tier to stay within capacity.
  pub memory_evictions: u64,
  /// Files evicted from the storage tier to stay within capacity.
  pub storage_evictions: u64,
  /// Tasks cancelled before completion.
  pub cancellations: u64,
  /// Deliveries applied to their target.
  pub deliveries: u64,
  /// Deliveries dropped at application time (stale, empty, or draining).
  pub deliveries_dropped: u64,
  /// The current total weight of the memory tier.
  pub current_weight: u64,
  /// The number of seconds the engine has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("memory_hits", &self.memory_hits)
      .field("memory_misses", &self.memory_misses)
      .field(
        "memory_hit_ratio",
        &format!("{:.2}%", self.memory_hit_ratio * 100.0),
      )
      .field("storage_hits", &self.storage_hits)
      .field("storage_misses", &self.storage_misses)
      .field("loads", &self.loads)
      .field("load_failures", &self.load_failures)
      .field("inserts", &self.inserts)
      .field("invalidations", &self.invalidations)
      .field("memory_evictions", &self.memory_evictions)
      .field("storage_evictions", &self.storage_evictions)
      .field("cancellations", &self.cancellations)
      .field("deliveries", &self.deliveries)
      .field("deliveries_dropped", &self.deliveries_dropped)
      .field("current_weight", &self.current_weight)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
