use crate::error::LoadError;

use std::sync::Arc;

/// The external capability that produces an image for a cache key.
///
/// The call may block on arbitrary I/O; no cache lock is ever held across
/// it.
pub(crate) type LoaderFn<I> = Arc<dyn Fn(&str) -> Result<I, LoadError> + Send + Sync>;

/// Computes the decoded byte footprint of an image (width x height x
/// bytes-per-pixel for a bitmap), used as its weight in the memory tier.
pub(crate) type WeigherFn<I> = Arc<dyn Fn(&I) -> u64 + Send + Sync>;
