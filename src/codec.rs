use std::io;

/// The output format for images persisted by the storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
  Png,
  Jpeg,
  Webp,
}

/// Compression parameters for the storage tier: an output format plus a
/// quality in `0..=100`. Lossless formats ignore the quality value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
  pub format: ImageFormat,
  pub quality: u8,
}

impl Compression {
  /// Creates new compression parameters. Quality is clamped to `0..=100`.
  pub fn new(format: ImageFormat, quality: u8) -> Self {
    Self {
      format,
      quality: quality.min(100),
    }
  }
}

impl Default for Compression {
  fn default() -> Self {
    Self {
      format: ImageFormat::Png,
      quality: 100,
    }
  }
}

/// Encodes and decodes images for the storage tier.
///
/// The engine treats images as opaque values; the embedder supplies the
/// codec that turns them into bytes and back. `decode` returns `None` for
/// corrupt or otherwise unreadable data, which the storage tier reports as
/// a plain cache miss.
pub trait ImageCodec<I>: Send + Sync {
  /// Encodes `image` with the given compression parameters.
  fn encode(&self, image: &I, compression: &Compression) -> io::Result<Vec<u8>>;

  /// Decodes a previously encoded image. `None` means the bytes could not
  /// be decoded.
  fn decode(&self, bytes: &[u8]) -> Option<I>;
}
