//! The OCI Image Layout: a content-addressed blob store on disk, rooted at
//! `oci-layout` and `index.json`, per the OCI image-spec's on-disk layout.
//!
//! ```text
//! <root>/
//!   oci-layout            {"imageLayoutVersion":"1.0.0"}
//!   index.json            an IndexManifest
//!   blobs/<algo>/<hex>     content-addressed blobs
//! ```
//!
//! Mirrors `hhd-dev-ocidir`'s `OciDir`, but over plain `std::fs` rather than
//! a capability-scoped directory handle, since nothing else in this crate's
//! dependency stack pulls in `cap-std`.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::manifest::{ConfigFile, Descriptor, IndexManifest, Manifest};
use crate::media::MediaType;

const LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const BLOBS_DIR: &str = "blobs";
const IMAGE_LAYOUT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LayoutMarker {
    #[serde(rename = "imageLayoutVersion")]
    image_layout_version: String,
}

/// An OCI Image Layout rooted at a directory on disk.
///
/// `index.json` updates (`append_descriptor`, `remove_descriptors`,
/// `replace_index`) are serialized through an internal mutex: concurrent
/// callers never interleave a read-modify-write cycle against the root
/// index, though blob writes themselves proceed independently.
pub struct Layout {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl Layout {
    /// Open an existing layout, or create one (writing `oci-layout` and an
    /// empty `index.json` if absent) at `root`.
    pub fn ensure(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join(BLOBS_DIR).join(Digest::SHA256))?;

        let layout_path = root.join(LAYOUT_FILE);
        if !layout_path.exists() {
            let marker = LayoutMarker {
                image_layout_version: IMAGE_LAYOUT_VERSION.to_string(),
            };
            atomic_write(&layout_path, &serde_json::to_vec(&marker)?)?;
        }

        let index_path = root.join(INDEX_FILE);
        if !index_path.exists() {
            let empty = IndexManifest::new(MediaType::OciIndex, Vec::new());
            atomic_write(&index_path, &empty.to_raw()?)?;
        }

        Ok(Layout {
            root,
            index_lock: Mutex::new(()),
        })
    }

    /// Open an existing layout at `root` without creating anything;
    /// fails with [`Error::NotFound`] if `oci-layout` is absent.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.join(LAYOUT_FILE).exists() {
            return Err(Error::not_found(format!("oci-layout at {}", root.display())));
        }
        Ok(Layout {
            root,
            index_lock: Mutex::new(()),
        })
    }

    /// The root directory this layout is rooted at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(BLOBS_DIR).join(&digest.algorithm).join(&digest.hex)
    }

    /// Read the root index manifest.
    pub fn read_index(&self) -> Result<IndexManifest> {
        let raw = fs::read(self.root.join(INDEX_FILE))?;
        IndexManifest::from_raw(&raw)
    }

    /// Read a blob's raw bytes by digest.
    pub fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(format!("blob {digest}"))
            } else {
                Error::Io(e)
            }
        })
    }

    /// Open a reader over a blob's raw bytes by digest.
    pub fn open_blob(&self, digest: &Digest) -> Result<Box<dyn Read + Send>> {
        let path = self.blob_path(digest);
        let file = fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(format!("blob {digest}"))
            } else {
                Error::Io(e)
            }
        })?;
        Ok(Box::new(file))
    }

    /// Write a blob's bytes, verifying them against `digest`/`size`.
    ///
    /// Idempotent: if a blob already exists at this digest, its on-disk
    /// size is compared and the write is skipped if they match (the
    /// existing content is trusted, since a digest collision is assumed
    /// impossible); a mismatch overwrites via the same atomic
    /// write-to-temp-then-rename path used for a fresh write.
    #[tracing::instrument(skip(self, reader), fields(%digest, size))]
    pub fn write_blob(&self, digest: &Digest, size: i64, mut reader: impl Read) -> Result<()> {
        let path = self.blob_path(digest);
        if let Ok(metadata) = fs::metadata(&path) {
            if metadata.len() as i64 == size {
                tracing::debug!("blob already present, skipping write");
                // drain the reader so callers that own it don't stall on a dropped pipe
                std::io::copy(&mut reader, &mut std::io::sink())?;
                return Ok(());
            }
        }

        let mut verifying = crate::verify::VerifyingReader::new(&mut reader, digest.clone(), size)?;
        let mut buf = Vec::new();
        verifying.read_to_end(&mut buf)?;

        fs::create_dir_all(path.parent().expect("blob path has a parent"))?;
        atomic_write(&path, &buf)
    }

    /// Remove a single blob file, if present.
    pub fn remove_blob(&self, digest: &Digest) -> Result<()> {
        let path = self.blob_path(digest);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Append a manifest/config/layer set as a new top-level image, adding
    /// `descriptor` to `index.json`. Callers are expected to have already
    /// written the manifest, config, and layer blobs via
    /// [`Layout::write_blob`] (e.g. via [`Layout::write_image`]).
    pub fn append_descriptor(&self, descriptor: Descriptor) -> Result<()> {
        let _guard = self.index_lock.lock().expect("index lock poisoned");
        let mut index = self.read_index()?;
        index.manifests.push(descriptor);
        self.write_index(&index)
    }

    /// Remove every descriptor matching `matcher` from `index.json`.
    pub fn remove_descriptors(&self, matcher: impl Fn(&Descriptor) -> bool) -> Result<()> {
        let _guard = self.index_lock.lock().expect("index lock poisoned");
        let mut index = self.read_index()?;
        index.manifests.retain(|d| !matcher(d));
        self.write_index(&index)
    }

    /// Overwrite `index.json` wholesale.
    pub fn replace_index(&self, index: &IndexManifest) -> Result<()> {
        let _guard = self.index_lock.lock().expect("index lock poisoned");
        self.write_index(index)
    }

    fn write_index(&self, index: &IndexManifest) -> Result<()> {
        atomic_write(&self.root.join(INDEX_FILE), &index.to_raw()?)
    }

    /// Write a complete image's manifest, config, and layers into the
    /// store, then append it to `index.json`.
    ///
    /// Layers are written concurrently through a [`crate::pool::WorkerPool`]
    /// sized by `options.concurrency`; if any layer write fails, the
    /// already-written blobs are left on disk (subsequent retries skip them
    /// via [`Layout::write_blob`]'s dedup) and no descriptor is added to the
    /// index.
    #[tracing::instrument(skip(self, image), fields(tag = tag.unwrap_or("<untagged>")))]
    pub fn write_image(&self, image: &crate::image::Image, options: &crate::pool::Options, tag: Option<&str>) -> Result<Descriptor> {
        use crate::partial::ImageCoreExt;
        use crate::pool::WorkerPool;

        let raw_config = image.raw_config_file()?;
        let config_digest = Digest::sha256_of(&raw_config);
        self.write_blob(&config_digest, raw_config.len() as i64, &raw_config[..])?;

        let manifest = image.manifest()?;
        let layers = image.layers()?;

        let pool = WorkerPool::new(options);
        std::thread::scope(|scope| {
            let tasks: Vec<Box<dyn FnOnce() -> Result<()> + Send>> = layers
                .into_iter()
                .zip(manifest.layers.iter().cloned())
                .map(|(layer, descriptor)| -> Box<dyn FnOnce() -> Result<()> + Send> {
                    Box::new(move || {
                        let reader = layer.open()?;
                        self.write_blob(&descriptor.digest, descriptor.size, reader)
                    })
                })
                .collect();
            pool.run(scope, tasks);
        });
        if let Some(err) = pool.into_error() {
            return Err(err);
        }

        let raw_manifest = image.raw_manifest()?;
        let manifest_digest = Digest::sha256_of(&raw_manifest);
        self.write_blob(&manifest_digest, raw_manifest.len() as i64, &raw_manifest[..])?;

        let mut builder = Descriptor::builder()
            .media_type(manifest.media_type.clone())
            .digest(manifest_digest)
            .size(raw_manifest.len() as i64);
        if let Some(tag) = tag {
            let mut annotations = indexmap::IndexMap::new();
            annotations.insert("org.opencontainers.image.ref.name".to_string(), tag.to_string());
            builder = builder.annotations(annotations);
        }
        let descriptor = builder.build();

        self.append_descriptor(descriptor.clone())?;
        tracing::info!(digest = %descriptor.digest, "wrote image");
        Ok(descriptor)
    }

    /// Read back a top-level image by its manifest digest.
    pub fn read_image(&self, digest: &Digest) -> Result<crate::image::Image> {
        let index = self.read_index()?;
        let descriptor = index
            .manifests
            .iter()
            .find(|d| d.digest == *digest)
            .ok_or_else(|| Error::not_found(format!("manifest {digest} in index")))?;
        self.resolve_image(descriptor)
    }

    fn resolve_image(&self, descriptor: &Descriptor) -> Result<crate::image::Image> {
        let raw_manifest = self.read_blob(&descriptor.digest)?;
        let manifest = Manifest::from_raw(&raw_manifest)?;
        let raw_config = self.read_blob(&manifest.config.digest)?;
        let config = ConfigFile::from_raw(&raw_config)?;
        config.validate_against(manifest.layers.len())?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for (layer_descriptor, diff_id) in manifest.layers.iter().zip(config.rootfs.diff_ids.iter()) {
            if !layer_descriptor.media_type.is_distributable() {
                layers.push(crate::layer::Layer::Foreign(crate::layer::ForeignLayer::new(
                    layer_descriptor.media_type.clone(),
                    layer_descriptor.digest.clone(),
                    layer_descriptor.size,
                    layer_descriptor.urls.clone().unwrap_or_default(),
                )));
                continue;
            }
            let path = self.blob_path(&layer_descriptor.digest);
            if !path.exists() {
                return Err(Error::not_found(format!("blob for layer {}", layer_descriptor.digest)));
            }
            let layer = crate::layer::MaterializedLayer::from_file(layer_descriptor.media_type.clone(), path)?;
            if layer.diff_id != *diff_id {
                return Err(Error::DigestMismatch {
                    got: layer.diff_id,
                    want: diff_id.clone(),
                });
            }
            layers.push(crate::layer::Layer::Materialized(layer));
        }

        crate::image::Image::from_raw_parts(raw_manifest, raw_config, layers)
    }

    /// Compute the live blob set by walking `index.json` and delete every
    /// blob file under `blobs/` not in it. An unrecognized media type
    /// encountered during the walk aborts with [`Error::UnknownMediaType`]
    /// rather than being silently skipped, since it might reference blobs
    /// the walk has no way to enumerate.
    ///
    /// Foreign and otherwise-absent layers are treated as live (never
    /// deleted) since this store has no bytes for them to reclaim.
    #[tracing::instrument(skip(self))]
    pub fn garbage_collect(&self) -> Result<GcReport> {
        let _guard = self.index_lock.lock().expect("index lock poisoned");
        let index = self.read_index()?;

        let mut live = std::collections::HashSet::new();
        for descriptor in &index.manifests {
            self.walk_live(descriptor, &mut live)?;
        }

        let mut deleted = Vec::new();
        let blobs_root = self.root.join(BLOBS_DIR);
        if blobs_root.exists() {
            for entry in walkdir::WalkDir::new(&blobs_root).min_depth(2).max_depth(2) {
                let entry = entry.map_err(std::io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let algorithm = entry.path().parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()).unwrap_or_default();
                let hex = entry.file_name().to_str().unwrap_or_default();
                let digest: Digest = format!("{algorithm}:{hex}").parse()?;
                if !live.contains(&digest) {
                    fs::remove_file(entry.path())?;
                    deleted.push(digest);
                }
            }
        }

        tracing::info!(deleted = deleted.len(), live = live.len(), "garbage collection complete");
        Ok(GcReport { deleted, live_count: live.len() })
    }

    fn walk_live(&self, descriptor: &Descriptor, live: &mut std::collections::HashSet<Digest>) -> Result<()> {
        live.insert(descriptor.digest.clone());

        if !descriptor.media_type.is_distributable() {
            return Ok(());
        }

        if descriptor.media_type.is_index() {
            let raw = self.read_blob(&descriptor.digest)?;
            let child_index = IndexManifest::from_raw(&raw)?;
            for child in &child_index.manifests {
                self.walk_live(child, live)?;
            }
            return Ok(());
        }

        if descriptor.media_type.is_manifest() {
            let raw = self.read_blob(&descriptor.digest)?;
            let manifest = Manifest::from_raw(&raw)?;

            if !manifest.config.media_type.is_config() {
                return Err(Error::UnknownMediaType(manifest.config.media_type.as_str().to_string()));
            }
            live.insert(manifest.config.digest.clone());

            for layer in &manifest.layers {
                if !layer.media_type.is_layer() {
                    return Err(Error::UnknownMediaType(layer.media_type.as_str().to_string()));
                }
                live.insert(layer.digest.clone());
            }

            if let Some(subject) = &manifest.subject {
                if !subject.media_type.is_manifest() {
                    return Err(Error::UnknownMediaType(subject.media_type.as_str().to_string()));
                }
                live.insert(subject.digest.clone());
            }

            return Ok(());
        }

        if descriptor.media_type.is_config() || descriptor.media_type.is_layer() {
            return Ok(());
        }

        Err(Error::UnknownMediaType(descriptor.media_type.as_str().to_string()))
    }
}

/// The result of a [`Layout::garbage_collect`] run.
#[derive(Debug, Clone)]
pub struct GcReport {
    /// Digests of blobs that were deleted.
    pub deleted: Vec<Digest>,
    /// How many distinct digests were found live.
    pub live_count: usize,
}

/// Write `data` to `path` via a temp file in the same directory followed
/// by a rename, so readers never observe a partially-written file.
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().expect("path has a parent directory");
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
