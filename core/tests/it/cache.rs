//! A [`CachedImage`] wrapping a layout-backed image: a miss populates the
//! cache lazily and a second read never touches the underlying store
//! again.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ocicore::cache::{Cache, CachedImage, FilesystemCache};
use ocicore::digest::Digest;
use ocicore::error::Result;
use ocicore::layer::Layer;
use ocicore::layout::Layout;
use ocicore::partial::{ImageCore, ImageCoreExt};

use crate::common::sample_image;

/// Counts every `layer_by_digest` delegation, so a test can assert the
/// cache actually short-circuited the underlying store.
struct CountingImage<I> {
    inner: I,
    calls: Arc<AtomicUsize>,
}

impl<I: ImageCoreExt> ImageCore for CountingImage<I> {
    fn raw_manifest(&self) -> Result<Vec<u8>> {
        self.inner.raw_manifest()
    }

    fn raw_config_file(&self) -> Result<Vec<u8>> {
        self.inner.raw_config_file()
    }

    fn layer_by_diff_id(&self, diff_id: &Digest) -> Result<Layer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.layer_by_diff_id(diff_id)
    }
}

#[test]
fn second_read_is_served_entirely_from_the_filesystem_cache() {
    let layout_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let layout = Layout::ensure(layout_dir.path()).unwrap();

    let image = sample_image(2);
    let descriptor = layout.write_image(&image, &ocicore::pool::Options::new(2), None).unwrap();
    let reread = layout.read_image(&descriptor.digest).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counting = CountingImage { inner: reread, calls: calls.clone() };
    let cache = FilesystemCache::new(cache_dir.path()).unwrap();
    let cached = CachedImage::new(counting, cache);

    let manifest = cached.manifest().unwrap();
    let target_digest = manifest.layers[0].digest.clone();

    let first = cached.layer_by_digest(&target_digest).unwrap();
    drain(&first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second = cached.layer_by_digest(&target_digest).unwrap();
    drain(&second);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "second read must be served from cache, not the underlying image");
}

#[test]
fn prepopulated_cache_entry_short_circuits_a_miss() {
    let layout_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let layout = Layout::ensure(layout_dir.path()).unwrap();

    let image = sample_image(1);
    let descriptor = layout.write_image(&image, &ocicore::pool::Options::new(1), None).unwrap();
    let reread = layout.read_image(&descriptor.digest).unwrap();
    let manifest = reread.manifest().unwrap();
    let target_digest = manifest.layers[0].digest.clone();

    let calls = Arc::new(AtomicUsize::new(0));
    let counting = CountingImage { inner: reread, calls: calls.clone() };

    let cache = FilesystemCache::new(cache_dir.path()).unwrap();
    let existing = counting.layer_by_digest(&target_digest).unwrap();
    let wrapped = cache.put(&target_digest, existing).unwrap();
    // Draining `put`'s wrapper populates the filesystem cache directly,
    // bypassing `CachedImage` entirely.
    drain(&wrapped);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.get(&target_digest).unwrap().is_some());

    let cached = CachedImage::new(counting, cache);
    let layer = cached.layer_by_digest(&target_digest).unwrap();
    drain(&layer);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "cache hit must not touch the underlying image");
}

fn drain(layer: &Layer) {
    use std::io::Read as _;
    layer.open().unwrap().read_to_end(&mut Vec::new()).unwrap();
}
