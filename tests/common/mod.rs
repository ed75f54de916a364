#![allow(dead_code)]

use pictor::{Compression, ImageCodec, ImageHandle, LoadCallback, TargetId};

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A stand-in for a decoded bitmap: an id plus dimensions, with a byte
/// footprint of width * height * 4 (RGBA).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestImage {
  pub id: u32,
  pub width: u32,
  pub height: u32,
}

impl TestImage {
  pub fn new(id: u32, width: u32, height: u32) -> Self {
    Self { id, width, height }
  }

  pub fn byte_footprint(&self) -> u64 {
    self.width as u64 * self.height as u64 * 4
  }
}

pub fn weigh(image: &TestImage) -> u64 {
  image.byte_footprint()
}

/// Serializes a `TestImage` as three little-endian u32 words. Decoding
/// rejects anything that is not exactly 12 bytes.
pub struct TestCodec;

impl ImageCodec<TestImage> for TestCodec {
  fn encode(&self, image: &TestImage, _compression: &Compression) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(12);
    bytes.extend_from_slice(&image.id.to_le_bytes());
    bytes.extend_from_slice(&image.width.to_le_bytes());
    bytes.extend_from_slice(&image.height.to_le_bytes());
    Ok(bytes)
  }

  fn decode(&self, bytes: &[u8]) -> Option<TestImage> {
    if bytes.len() != 12 {
      return None;
    }
    let word = |i: usize| u32::from_le_bytes(bytes[i..i + 4].try_into().unwrap());
    Some(TestImage {
      id: word(0),
      width: word(4),
      height: word(8),
    })
  }
}

/// A codec whose encode always fails, for exercising the write-failure
/// policy of the storage tier.
pub struct BrokenEncoder;

impl ImageCodec<TestImage> for BrokenEncoder {
  fn encode(&self, _: &TestImage, _: &Compression) -> io::Result<Vec<u8>> {
    Err(io::Error::new(io::ErrorKind::Other, "encoder exploded"))
  }

  fn decode(&self, bytes: &[u8]) -> Option<TestImage> {
    TestCodec.decode(bytes)
  }
}

/// Records every callback invocation for later assertions.
#[derive(Default)]
pub struct RecordingCallback {
  pub loaded: Mutex<Vec<(String, u32, bool, bool)>>,
  pub delivered: Mutex<Vec<(TargetId, u32)>>,
  pub delivered_handles: Mutex<Vec<ImageHandle<TestImage>>>,
  pub delivered_count: AtomicUsize,
}

impl RecordingCallback {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn loaded_count(&self) -> usize {
    self.loaded.lock().len()
  }

  pub fn delivered_ids(&self) -> Vec<u32> {
    self.delivered.lock().iter().map(|(_, id)| *id).collect()
  }
}

impl LoadCallback<TestImage> for RecordingCallback {
  fn on_loaded(
    &self,
    key: &str,
    image: &ImageHandle<TestImage>,
    from_memory: bool,
    from_storage: bool,
  ) {
    let id = image.with_image(|img| img.id).unwrap_or(u32::MAX);
    self
      .loaded
      .lock()
      .push((key.to_owned(), id, from_memory, from_storage));
  }

  fn on_delivered(&self, target: TargetId, image: &ImageHandle<TestImage>) {
    let id = image.with_image(|img| img.id).unwrap_or(u32::MAX);
    self.delivered.lock().push((target, id));
    self.delivered_handles.lock().push(image.clone());
    self.delivered_count.fetch_add(1, Ordering::SeqCst);
  }
}

/// Polls `cond` until it holds or `timeout` elapses. Returns the final
/// verdict so tests can assert on it.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if cond() {
      return true;
    }
    thread::sleep(Duration::from_millis(5));
  }
  cond()
}
