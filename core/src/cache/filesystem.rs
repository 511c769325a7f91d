//! A [`Cache`] backed by a directory on disk, storing each layer's
//! compressed blob under its digest.
//!
//! Writes tee bytes to a temp file in the cache directory and rename it
//! into place only once the caller has read the wrapped layer to a clean
//! EOF; a process killed mid-read simply leaves no temp file behind. A
//! stored file is additionally verified against its own filename on
//! `get`: if the bytes on disk don't hash to the digest they're named
//! after (partial write that nonetheless got renamed, disk corruption),
//! `get` reports a miss and deletes the broken file.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::Cache;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::layer::{Layer, MaterializedLayer, StreamingLayer};
use crate::media::MediaType;

/// A directory-backed layer cache, keyed by compressed digest.
#[derive(Clone)]
pub struct FilesystemCache {
    dir: PathBuf,
}

impl FilesystemCache {
    /// Use (creating if absent) `dir` as the cache root.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FilesystemCache { dir })
    }

    fn path(&self, digest: &Digest) -> PathBuf {
        self.dir.join(format!("{}-{}", digest.algorithm, digest.hex))
    }

    /// The blob's declared media type is stored alongside it: the blob
    /// file alone doesn't say whether it's gzip, zstd, or uncompressed
    /// tar, and that's needed to compute a diff ID on the way back out.
    fn media_type_path(&self, digest: &Digest) -> PathBuf {
        self.dir.join(format!("{}-{}.media-type", digest.algorithm, digest.hex))
    }
}

impl Cache for FilesystemCache {
    #[tracing::instrument(skip(self), fields(%digest))]
    fn get(&self, digest: &Digest) -> Result<Option<Layer>> {
        let path = self.path(digest);
        let media_type_path = self.media_type_path(digest);
        if !path.exists() || !media_type_path.exists() {
            return Ok(None);
        }

        let loaded = (|| -> Result<MaterializedLayer> {
            let media_type: MediaType = fs::read_to_string(&media_type_path)?.parse().unwrap_or(MediaType::OciLayer);
            MaterializedLayer::from_file(media_type, path.clone())
        })();

        match loaded {
            Ok(layer) if layer.digest == *digest => Ok(Some(Layer::Materialized(layer))),
            _ => {
                tracing::warn!("evicting corrupt cache entry");
                let _ = fs::remove_file(&path);
                let _ = fs::remove_file(&media_type_path);
                Ok(None)
            }
        }
    }

    #[tracing::instrument(skip(self, layer), fields(%digest))]
    fn put(&self, digest: &Digest, layer: Layer) -> Result<Layer> {
        let media_type = layer.media_type().clone();
        let dir = self.dir.clone();
        let target = self.path(digest);
        let media_type_path = self.media_type_path(digest);
        let media_type_contents = media_type.to_string();

        let streaming = StreamingLayer::new(media_type, move || {
            let inner = layer.open()?;
            let tmp = tempfile::NamedTempFile::new_in(&dir)?;
            Ok(Box::new(TeeToFile {
                inner,
                tmp: Some(tmp),
                target,
                media_type_path,
                media_type_contents,
            }) as Box<dyn Read + Send>)
        });
        Ok(Layer::Streaming(Arc::new(streaming)))
    }

    fn delete(&self, digest: &Digest) -> Result<()> {
        let _ = fs::remove_file(self.media_type_path(digest));
        match fs::remove_file(self.path(digest)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Tees bytes read from `inner` into a temp file, persisting it (and a
/// sidecar recording the layer's media type) only once the caller reaches
/// EOF.
struct TeeToFile {
    inner: Box<dyn Read + Send>,
    tmp: Option<tempfile::NamedTempFile>,
    target: PathBuf,
    media_type_path: PathBuf,
    media_type_contents: String,
}

impl Read for TeeToFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            if let Some(mut tmp) = self.tmp.take() {
                tmp.flush()?;
                tmp.persist(&self.target).map_err(|e| e.error)?;
                fs::write(&self.media_type_path, &self.media_type_contents)?;
            }
            return Ok(0);
        }
        if let Some(tmp) = self.tmp.as_mut() {
            tmp.write_all(&buf[..n])?;
        }
        Ok(n)
    }
}
