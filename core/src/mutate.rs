//! Pure, immutable transformations over images and indexes.
//!
//! Every function here takes a value and returns a new one; nothing is
//! mutated in place, and shared layers are not copied. Holding the
//! determinism invariant — that re-running a mutation against the same
//! inputs always reproduces byte-identical manifests and configs — rests
//! entirely on `serde_json` preserving struct field declaration order and
//! on never stamping a timestamp the caller didn't supply.

use std::io::Read;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tar::{Archive, Builder, EntryType, Header};

use crate::codec::{Compression, DecodingReader};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::layer::Layer;
use crate::manifest::{ConfigFile, Descriptor, HistoryEntry, IndexManifest, Manifest};
use crate::media::MediaType;
use crate::partial::ImageCoreExt;

/// Append `layers` to `image`'s manifest and config, recomputing the
/// config and manifest digests. Each new layer gets a `history` entry with
/// `empty_layer: false` and the given `created_by` command string.
pub fn append_layers(image: &Image, layers: Vec<Layer>, created_by: Option<String>) -> Result<Image> {
    let manifest = image.manifest()?;
    let mut config = image.config_file()?;
    let mut existing_layers = image.layers()?;

    let mut new_descriptors = Vec::with_capacity(layers.len());
    for layer in &layers {
        new_descriptors.push(
            Descriptor::builder()
                .media_type(layer.media_type().clone())
                .digest(layer.digest()?)
                .size(layer.size()?)
                .build(),
        );
        config.rootfs.diff_ids.push(layer.diff_id()?);
        config.history.push(HistoryEntry {
            created_by: created_by.clone(),
            empty_layer: false,
            ..Default::default()
        });
    }

    let mut manifest_layers = manifest.layers.clone();
    manifest_layers.extend(new_descriptors);
    existing_layers.extend(layers);

    rebuild(manifest.media_type, config, manifest_layers, existing_layers)
}

/// Replace `image`'s config file, preserving its existing
/// `rootfs.diff_ids` (the layers aren't changing, only the rest of the
/// config metadata is).
pub fn set_config(image: &Image, mut new_config: ConfigFile) -> Result<Image> {
    let current = image.config_file()?;
    new_config.rootfs = current.rootfs;
    let manifest = image.manifest()?;
    let layers = image.layers()?;
    rebuild(manifest.media_type, new_config, manifest.layers, layers)
}

/// Rewrite `image`'s config `created` timestamp.
pub fn set_created_at(image: &Image, created: chrono::DateTime<chrono::Utc>) -> Result<Image> {
    let mut config = image.config_file()?;
    config.created = Some(created);
    let manifest = image.manifest()?;
    let layers = image.layers()?;
    rebuild(manifest.media_type, config, manifest.layers, layers)
}

/// Patch `image`'s manifest-level annotations, merging `annotations` on
/// top of any existing ones.
pub fn set_annotations(image: &Image, annotations: IndexMap<String, String>) -> Result<Image> {
    let mut manifest = image.manifest()?;
    let mut merged = manifest.annotations.clone().unwrap_or_default();
    merged.extend(annotations);
    manifest.annotations = Some(merged);

    let config = image.config_file()?;
    let layers = image.layers()?;
    let raw_config = config.to_raw()?;
    let raw_manifest = manifest.to_raw()?;
    Image::from_raw_parts(raw_manifest, raw_config, layers)
}

/// Retype `image`'s manifest to `media_type`. Only Docker↔OCI
/// transitions between matching schemas are valid (manifest stays a
/// manifest, index stays an index); anything else is a parse error.
pub fn retype_manifest(image: &Image, media_type: MediaType) -> Result<Image> {
    let mut manifest = image.manifest()?;
    if manifest.media_type.is_manifest() != media_type.is_manifest() {
        return Err(Error::parse(
            "manifest media type retype",
            InvalidRetype {
                from: manifest.media_type.as_str().to_string(),
                to: media_type.as_str().to_string(),
            },
        ));
    }
    manifest.media_type = media_type;
    let config = image.config_file()?;
    let layers = image.layers()?;
    let raw_config = config.to_raw()?;
    let raw_manifest = manifest.to_raw()?;
    Image::from_raw_parts(raw_manifest, raw_config, layers)
}

#[derive(Debug, thiserror::Error)]
#[error("cannot retype {from} to {to}: not a compatible schema")]
struct InvalidRetype {
    from: String,
    to: String,
}

fn rebuild(media_type: MediaType, config: ConfigFile, layers: Vec<Descriptor>, layer_bodies: Vec<Layer>) -> Result<Image> {
    let raw_config = config.to_raw()?;
    let config_descriptor = Descriptor::builder()
        .media_type(MediaType::OciConfig)
        .digest(Digest::sha256_of(&raw_config))
        .size(raw_config.len() as i64)
        .build();
    let manifest = Manifest::new(media_type, config_descriptor, layers);
    let raw_manifest = manifest.to_raw()?;
    Image::from_raw_parts(raw_manifest, raw_config, layer_bodies)
}

/// Append child manifest descriptors to an index.
pub fn append_manifests(index: &IndexManifest, addenda: Vec<Descriptor>) -> IndexManifest {
    let mut manifests = index.manifests.clone();
    manifests.extend(addenda);
    IndexManifest::new(index.media_type.clone(), manifests)
}

/// Drop every child manifest descriptor matching `matcher`.
pub fn remove_manifests(index: &IndexManifest, matcher: impl Fn(&Descriptor) -> bool) -> IndexManifest {
    let manifests = index.manifests.iter().filter(|d| !matcher(d)).cloned().collect();
    IndexManifest::new(index.media_type.clone(), manifests)
}

/// Replace the first child manifest descriptor matching `matcher` with
/// `replacement`. If nothing matches, `replacement` is appended.
pub fn replace_manifests(index: &IndexManifest, matcher: impl Fn(&Descriptor) -> bool, replacement: Descriptor) -> IndexManifest {
    let mut manifests = index.manifests.clone();
    match manifests.iter().position(&matcher) {
        Some(i) => manifests[i] = replacement,
        None => manifests.push(replacement),
    }
    IndexManifest::new(index.media_type.clone(), manifests)
}

const WHITEOUT_PREFIX: &str = ".wh.";
const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

/// Returns the path a whiteout entry deletes, if `path`'s file name carries
/// the whiteout prefix.
fn whiteout_target(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stripped = name.strip_prefix(WHITEOUT_PREFIX)?;
    Some(match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(stripped),
        _ => PathBuf::from(stripped),
    })
}

struct Entry {
    header: Header,
    data: Vec<u8>,
}

/// Flatten `image`'s layers, in order, into a single uncompressed tar
/// stream, applying whiteout semantics along the way: `.wh.<name>` deletes
/// the prior entry for `<name>`, and `.wh..wh..opq` clears every entry
/// already collected under its containing directory.
///
/// Each layer is read in full before the next is opened, so this
/// necessarily buffers the merged file tree in memory; true single-pass
/// streaming isn't possible since a later layer's whiteout can retract an
/// earlier layer's entry only after that entry has already been read.
pub fn extract(image: &Image) -> Result<Box<dyn Read + Send>> {
    let layers = image.layers()?;
    let mut merged: IndexMap<PathBuf, Entry> = IndexMap::new();

    for layer in &layers {
        let compression = Compression::of_media_type(layer.media_type());
        let reader = layer.open()?;
        let decoded = DecodingReader::new(compression, reader)?;
        let mut archive = Archive::new(decoded);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_path_buf();
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if file_name == WHITEOUT_OPAQUE {
                let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
                merged.retain(|p, _| p.parent() != Some(dir.as_path()));
                continue;
            }

            if let Some(target) = whiteout_target(&path) {
                merged.shift_remove(&target);
                continue;
            }

            let header = entry.header().clone();
            let mut data = Vec::new();
            if header.entry_type() == EntryType::Regular {
                entry.read_to_end(&mut data)?;
            }
            merged.insert(path, Entry { header, data });
        }
    }

    let reader = crate::pipe::spawn_producer(move |writer| {
        let mut builder = Builder::new(writer);
        for (path, entry) in merged {
            let mut header = entry.header;
            builder.append_data(&mut header, &path, entry.data.as_slice())?;
        }
        builder.finish()
    });
    Ok(Box::new(reader))
}
