use crate::codec::{Compression, ImageCodec};
use crate::metrics::Metrics;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace, warn};
use parking_lot::Mutex;

/// The on-disk tier: one compressed file per key inside a dedicated
/// directory.
///
/// The directory listing is the only index; each file's last-modified time
/// is its access marker, so eviction is LRU by modification time. All
/// per-file I/O errors degrade to cache misses or silent no-ops.
pub struct StorageCache<I> {
  dir: PathBuf,
  capacity: u64,
  compression: Compression,
  codec: Arc<dyn ImageCodec<I>>,
  // Serializes the eviction scan; concurrent scans would race each other's
  // size computations.
  evict_lock: Mutex<()>,
  metrics: Arc<Metrics>,
}

impl<I> StorageCache<I> {
  /// Creates (or reopens) a storage cache rooted at `dir`, bounded to
  /// `capacity` bytes of encoded file size.
  pub fn new(
    dir: impl Into<PathBuf>,
    capacity: u64,
    compression: Compression,
    codec: Arc<dyn ImageCodec<I>>,
  ) -> io::Result<Self> {
    Self::with_metrics(dir, capacity, compression, codec, Arc::new(Metrics::new()))
  }

  pub(crate) fn with_metrics(
    dir: impl Into<PathBuf>,
    capacity: u64,
    compression: Compression,
    codec: Arc<dyn ImageCodec<I>>,
    metrics: Arc<Metrics>,
  ) -> io::Result<Self> {
    let dir = dir.into();
    fs::create_dir_all(&dir)?;
    Ok(Self {
      dir,
      capacity,
      compression,
      codec,
      evict_lock: Mutex::new(()),
      metrics,
    })
  }

  /// The configured capacity in bytes of encoded file size.
  pub fn capacity(&self) -> u64 {
    self.capacity
  }

  /// The cache directory.
  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn path_for(&self, key: &str) -> PathBuf {
    // Keys are filesystem-safe by contract; they are used verbatim.
    self.dir.join(key)
  }

  /// Encodes `image` and writes (or overwrites) the file named by `key`,
  /// then prunes the directory back under capacity.
  ///
  /// A failed encode or write must not poison the rest of the cache: the
  /// partial file is deleted, every other entry stays intact, and nothing
  /// is reported to the caller.
  pub fn put(&self, key: &str, image: &I) {
    let path = self.path_for(key);
    let bytes = match self.codec.encode(image, &self.compression) {
      Ok(bytes) => bytes,
      Err(err) => {
        warn!("encoding {:?} for storage cache failed: {}", key, err);
        return;
      }
    };

    if let Err(err) = fs::write(&path, &bytes) {
      warn!("storage cache write for {:?} failed: {}", key, err);
      let _ = fs::remove_file(&path);
      return;
    }
    trace!("storage cache wrote {:?} ({} bytes)", key, bytes.len());

    self.fit_cache_size();
  }

  /// Returns the decoded image for `key` if its file exists and decodes,
  /// refreshing the file's modified time as an access marker. Missing files
  /// and decode failures are both reported as `None`.
  pub fn get(&self, key: &str) -> Option<I> {
    let path = self.path_for(key);
    let bytes = match fs::read(&path) {
      Ok(bytes) => bytes,
      Err(err) => {
        if err.kind() != io::ErrorKind::NotFound {
          debug!("storage cache read for {:?} failed: {}", key, err);
        }
        self.metrics.storage_misses.fetch_add(1, Ordering::Relaxed);
        return None;
      }
    };

    match self.codec.decode(&bytes) {
      Some(image) => {
        self.touch(&path);
        self.metrics.storage_hits.fetch_add(1, Ordering::Relaxed);
        Some(image)
      }
      None => {
        debug!("storage cache file for {:?} did not decode", key);
        self.metrics.storage_misses.fetch_add(1, Ordering::Relaxed);
        None
      }
    }
  }

  /// Deletes the file for `key` if present. A missing file is a no-op.
  pub fn remove(&self, key: &str) {
    let _ = fs::remove_file(self.path_for(key));
  }

  /// Deletes every file in the cache directory.
  pub fn clear(&self) {
    let _guard = self.evict_lock.lock();
    let entries = match fs::read_dir(&self.dir) {
      Ok(entries) => entries,
      Err(err) => {
        debug!("storage cache listing failed: {}", err);
        return;
      }
    };
    let mut removed = 0usize;
    for entry in entries.flatten() {
      if entry.file_type().map(|t| t.is_file()).unwrap_or(false)
        && fs::remove_file(entry.path()).is_ok()
      {
        removed += 1;
      }
    }
    debug!("storage cache cleared {} files", removed);
  }

  /// The summed size in bytes of every file currently in the cache.
  pub fn total_size(&self) -> u64 {
    self.list().iter().map(|entry| entry.1).sum()
  }

  /// The number of files currently in the cache.
  pub fn len(&self) -> usize {
    self.list().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  // Refresh the modified time so eviction sees this file as recently used.
  fn touch(&self, path: &Path) {
    let result = fs::OpenOptions::new()
      .append(true)
      .open(path)
      .and_then(|file| file.set_modified(SystemTime::now()));
    if let Err(err) = result {
      debug!("refreshing access time for {:?} failed: {}", path, err);
    }
  }

  fn list(&self) -> Vec<(PathBuf, u64, SystemTime)> {
    let mut entries = Vec::new();
    let dir = match fs::read_dir(&self.dir) {
      Ok(dir) => dir,
      Err(err) => {
        debug!("storage cache listing failed: {}", err);
        return entries;
      }
    };
    for entry in dir.flatten() {
      if let Ok(meta) = entry.metadata() {
        if meta.is_file() {
          let modified = meta.modified().unwrap_or(UNIX_EPOCH);
          entries.push((entry.path(), meta.len(), modified));
        }
      }
    }
    entries
  }

  // Prune least-recently-used files until the directory fits the capacity.
  // The scan-and-delete is a single critical section; put/get/remove of
  // individual keys may proceed concurrently against the filesystem.
  fn fit_cache_size(&self) {
    let _guard = self.evict_lock.lock();

    let mut entries = self.list();
    // A near-empty cache cannot usefully be pruned.
    if entries.len() < 2 {
      return;
    }

    // Newest first; eviction pops from the back.
    entries.sort_by(|a, b| b.2.cmp(&a.2));
    let mut total: u64 = entries.iter().map(|entry| entry.1).sum();
    let mut evicted = 0u64;

    while total > self.capacity {
      let Some((path, size, _)) = entries.pop() else {
        break;
      };
      match fs::remove_file(&path) {
        Ok(()) => {
          evicted += 1;
          trace!("storage cache evicted {:?} ({} bytes)", path, size);
        }
        Err(err) => {
          debug!("storage cache eviction of {:?} failed: {}", path, err);
        }
      }
      // Count the size as freed either way so the scan terminates.
      total = total.saturating_sub(size);
    }

    if evicted > 0 {
      self
        .metrics
        .storage_evictions
        .fetch_add(evicted, Ordering::Relaxed);
    }
  }
}

impl<I> std::fmt::Debug for StorageCache<I> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StorageCache")
      .field("dir", &self.dir)
      .field("capacity", &self.capacity)
      .field("compression", &self.compression)
      .finish_non_exhaustive()
  }
}
