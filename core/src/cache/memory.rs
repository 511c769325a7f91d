//! An in-memory [`Cache`], mostly useful for tests and short-lived
//! processes that would rather not touch disk.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};

use crate::cache::Cache;
use crate::digest::Digest;
use crate::error::Result;
use crate::layer::{Layer, MaterializedLayer, StreamingLayer};
use crate::media::MediaType;

/// A [`Cache`] backed by a `HashMap` guarded by a mutex.
#[derive(Default, Clone)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<Digest, Layer>>>,
}

impl MemoryCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get(&self, digest: &Digest) -> Result<Option<Layer>> {
        Ok(self.entries.lock().expect("memory cache mutex poisoned").get(digest).cloned())
    }

    fn put(&self, digest: &Digest, layer: Layer) -> Result<Layer> {
        let entries = self.entries.clone();
        let digest = digest.clone();
        let media_type = layer.media_type().clone();
        let wrapper_media_type = media_type.clone();

        let streaming = StreamingLayer::new(wrapper_media_type, move || {
            let inner = layer.open()?;
            Ok(Box::new(TeeToMemory {
                inner,
                buf: Vec::new(),
                entries,
                digest,
                media_type,
                done: false,
            }) as Box<dyn Read + Send>)
        });
        Ok(Layer::Streaming(Arc::new(streaming)))
    }

    fn delete(&self, digest: &Digest) -> Result<()> {
        self.entries.lock().expect("memory cache mutex poisoned").remove(digest);
        Ok(())
    }
}

/// Tees bytes read from `inner` into an in-memory buffer, committing it to
/// the shared entry map under `digest` once the caller reaches EOF.
struct TeeToMemory {
    inner: Box<dyn Read + Send>,
    buf: Vec<u8>,
    entries: Arc<Mutex<HashMap<Digest, Layer>>>,
    digest: Digest,
    media_type: MediaType,
    done: bool,
}

impl Read for TeeToMemory {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(out)?;
        if n == 0 {
            if !self.done {
                self.done = true;
                let bytes = std::mem::take(&mut self.buf);
                if let Ok(layer) = MaterializedLayer::from_bytes(self.media_type.clone(), bytes) {
                    self.entries
                        .lock()
                        .expect("memory cache mutex poisoned")
                        .insert(self.digest.clone(), Layer::Materialized(layer));
                }
            }
            return Ok(0);
        }
        self.buf.extend_from_slice(&out[..n]);
        Ok(n)
    }
}
