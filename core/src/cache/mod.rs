//! A layer cache sitting in front of a slower source (a registry pull, a
//! tarball read), keyed by the compressed-blob digest.
//!
//! A cache is read-through: [`Cache::get`] returns `Ok(None)` on a miss
//! rather than fetching anything itself. [`Cache::put`] wraps a freshly
//! fetched layer in a lazy tee: merely calling `put` does not read the
//! layer's bytes or touch the cache store. Only once the returned layer is
//! actually opened and read to EOF does the cache get populated, mirroring
//! [`crate::layer::StreamingLayer`]'s own single-consumption model.

mod filesystem;
mod memory;
mod readonly;

pub use filesystem::FilesystemCache;
pub use memory::MemoryCache;
pub use readonly::ReadOnly;

use crate::digest::Digest;
use crate::error::Result;
use crate::layer::Layer;
use crate::partial::{ImageCore, ImageCoreExt};

/// A store for compressed layer blobs keyed by digest.
pub trait Cache: Send + Sync {
    /// Fetch a cached layer, or `Ok(None)` on a miss.
    fn get(&self, digest: &Digest) -> Result<Option<Layer>>;

    /// Wrap `layer` (known to live under `digest`) so that reading it to
    /// EOF also populates the cache. Returns immediately without reading
    /// anything.
    fn put(&self, digest: &Digest, layer: Layer) -> Result<Layer>;

    /// Remove a cached layer, if present. A miss is not an error.
    fn delete(&self, digest: &Digest) -> Result<()>;
}

/// An [`ImageCore`] that transparently memoizes layer bodies in a [`Cache`].
///
/// `layer_by_digest`/`layer_by_diff_id` check the cache first; on a miss
/// they delegate to the wrapped image and tee the result into the cache
/// via [`Cache::put`] before returning it.
pub struct CachedImage<I, C> {
    inner: I,
    cache: C,
}

impl<I, C> CachedImage<I, C> {
    /// Wrap `inner`, memoizing its layers in `cache`.
    pub fn new(inner: I, cache: C) -> Self {
        CachedImage { inner, cache }
    }
}

impl<I: ImageCoreExt, C: Cache> CachedImage<I, C> {
    /// Fetch a layer by its compressed digest, checking the cache first.
    pub fn layer_by_digest(&self, digest: &Digest) -> Result<Layer> {
        if let Some(layer) = self.cache.get(digest)? {
            return Ok(layer);
        }
        let layer = self.inner.layer_by_digest(digest)?;
        self.cache.put(digest, layer)
    }
}

impl<I: ImageCoreExt, C: Cache> ImageCore for CachedImage<I, C> {
    fn raw_manifest(&self) -> Result<Vec<u8>> {
        self.inner.raw_manifest()
    }

    fn raw_config_file(&self) -> Result<Vec<u8>> {
        self.inner.raw_config_file()
    }

    fn layer_by_diff_id(&self, diff_id: &Digest) -> Result<Layer> {
        let digest = self.inner.diff_id_to_blob(diff_id)?;
        self.layer_by_digest(&digest)
    }
}
