use std::fmt;

/// Errors that can occur when building an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
  /// A cache tier was configured with a capacity of zero bytes. Leave the
  /// tier unconfigured instead if it is not wanted.
  ZeroCapacity,
  /// The worker pool was configured with zero threads.
  ZeroWorkers,
  /// The memory capacity fraction is outside the accepted `0.1..=0.8` range.
  MemoryFractionOutOfRange(f64),
  /// The storage capacity fraction is outside the accepted `0.01..=1.0` range.
  StorageFractionOutOfRange(f64),
  /// A storage directory was configured without an `ImageCodec` to encode
  /// and decode the persisted files.
  CodecRequired,
  /// The storage cache directory could not be created.
  StorageDir(String),
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::ZeroCapacity => write!(f, "cache capacity cannot be zero"),
      BuildError::ZeroWorkers => write!(f, "worker pool size cannot be zero"),
      BuildError::MemoryFractionOutOfRange(fraction) => write!(
        f,
        "memory capacity fraction {} is outside the accepted 0.1..=0.8 range",
        fraction
      ),
      BuildError::StorageFractionOutOfRange(fraction) => write!(
        f,
        "storage capacity fraction {} is outside the accepted 0.01..=1.0 range",
        fraction
      ),
      BuildError::CodecRequired => write!(
        f,
        "a storage directory requires an image codec to encode and decode files"
      ),
      BuildError::StorageDir(reason) => {
        write!(f, "storage cache directory could not be created: {}", reason)
      }
    }
  }
}

impl std::error::Error for BuildError {}

/// An error produced by the external loader capability.
///
/// The engine performs no retries of its own; a failed load is logged and
/// the fetch completes without an image.
#[derive(Debug, Clone)]
pub struct LoadError {
  message: String,
}

impl LoadError {
  /// Creates a new `LoadError` carrying a human-readable reason.
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

impl fmt::Display for LoadError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "image load failed: {}", self.message)
  }
}

impl std::error::Error for LoadError {}
