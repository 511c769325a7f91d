//! A [`Cache`] wrapper that serves reads from an inner cache but silently
//! discards writes, for callers that want cache-accelerated reads without
//! ever mutating the underlying store (e.g. a shared, pre-warmed cache
//! directory mounted read-only).

use crate::cache::Cache;
use crate::digest::Digest;
use crate::error::Result;
use crate::layer::Layer;

/// Wraps `inner`, delegating [`Cache::get`] but turning [`Cache::put`] and
/// [`Cache::delete`] into no-ops.
pub struct ReadOnly<C> {
    inner: C,
}

impl<C: Cache> ReadOnly<C> {
    /// Wrap `inner` as a read-only view.
    pub fn new(inner: C) -> Self {
        ReadOnly { inner }
    }
}

impl<C: Cache> Cache for ReadOnly<C> {
    fn get(&self, digest: &Digest) -> Result<Option<Layer>> {
        self.inner.get(digest)
    }

    /// A no-op: `layer` is handed back unwrapped, without ever touching
    /// the inner store.
    fn put(&self, _digest: &Digest, layer: Layer) -> Result<Layer> {
        Ok(layer)
    }

    fn delete(&self, _digest: &Digest) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::layer::MaterializedLayer;
    use crate::media::MediaType;
    use pretty_assertions::assert_eq;
    use std::io::Read as _;

    #[test]
    fn put_does_not_touch_the_inner_store() {
        let readonly = ReadOnly::new(MemoryCache::new());
        let layer = MaterializedLayer::from_bytes(MediaType::OciLayer, b"abc".to_vec()).unwrap();
        let digest = layer.digest.clone();

        let passthrough = readonly.put(&digest, Layer::Materialized(layer)).unwrap();
        let mut out = Vec::new();
        passthrough.open().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");

        assert!(readonly.get(&digest).unwrap().is_none());
    }

    #[test]
    fn get_delegates_to_inner() {
        let inner = MemoryCache::new();
        let layer = MaterializedLayer::from_bytes(MediaType::OciLayer, b"abc".to_vec()).unwrap();
        let digest = layer.digest.clone();
        inner
            .put(&digest, Layer::Materialized(layer))
            .unwrap()
            .open()
            .unwrap()
            .read_to_end(&mut Vec::new())
            .unwrap();

        let readonly = ReadOnly::new(inner);
        assert!(readonly.get(&digest).unwrap().is_some());
    }
}
