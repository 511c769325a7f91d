//! The `docker save`/`docker load` tarball codec.
//!
//! On disk: a root `manifest.json` listing one entry per image (its config
//! file name, repo tags, ordered layer file names, and optionally
//! `LayerSources` for foreign layers), plus the config and layer files
//! themselves. Alongside it, the writer also emits the legacy v1 layout for
//! compatibility with tooling that predates `manifest.json`: a `repositories`
//! file (`repo -> tag -> top layer id`) plus, per layer in each image's
//! chain, an `<id>/VERSION` (`1.0`), `<id>/json`, and `<id>/layer.tar`, where
//! `<id>` is that layer's chain ID per the OCI image-spec's layer chain ID
//! algorithm (`id_0 = diffID_0`, `id_i = digest(id_{i-1} + " " + diffID_i)`).
//! None of this is required on read; this module only implements the v2
//! (`manifest.json`) reader, per the format's own backwards-compatibility
//! story.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tar::{Archive, Builder, Header};

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::manifest::Descriptor;
use crate::media::MediaType;
use crate::partial::ImageCoreExt;

/// One entry of a tarball's root `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TarballManifestEntry {
    #[serde(rename = "Config")]
    pub config: String,

    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Vec<String>,

    #[serde(rename = "Layers")]
    pub layers: Vec<String>,

    #[serde(rename = "LayerSources", skip_serializing_if = "Option::is_none")]
    pub layer_sources: Option<IndexMap<String, Descriptor>>,
}

/// Legacy v1 `repositories` file: `repo -> tag -> top layer id`.
pub type Repositories = HashMap<String, HashMap<String, String>>;

/// Layer file naming never uses `:`; legacy `tar` implementations treat it
/// as a tape-drive specifier.
fn layer_file_name(digest: &Digest, gzip: bool) -> String {
    let ext = if gzip { "tar.gz" } else { "tar" };
    format!("{}.{ext}", digest.hex)
}

/// The OCI image-spec's layer chain ID for each prefix of `diff_ids`:
/// `chain_id[0] = diff_ids[0]`, `chain_id[i] = digest(chain_id[i-1] + " " +
/// diff_ids[i])`. These double as the v1 legacy format's per-layer
/// directory names.
fn chain_ids(diff_ids: &[Digest]) -> Vec<Digest> {
    let mut out = Vec::with_capacity(diff_ids.len());
    for diff_id in diff_ids {
        let next = match out.last() {
            None => diff_id.clone(),
            Some(prev) => Digest::sha256_of(format!("{prev} {diff_id}").as_bytes()),
        };
        out.push(next);
    }
    out
}

/// The v1-era per-layer `json` document: intermediate layers carry only
/// `id`/`parent`; the top layer additionally carries the image config.
#[derive(Serialize)]
struct V1LayerJson<'a> {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    architecture: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    os: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<&'a crate::manifest::RuntimeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<chrono::DateTime<chrono::Utc>>,
}

/// Write one layer's `<id>/VERSION`, `<id>/json`, and `<id>/layer.tar` into
/// the legacy v1 directory scheme. `top_config` is `Some` only for the
/// image's top (last) layer, whose `json` carries the full image config.
fn write_v1_layer<W: Write>(
    builder: &mut Builder<W>,
    id: &Digest,
    parent: Option<&Digest>,
    layer_bytes: &[u8],
    top_config: Option<&crate::manifest::ConfigFile>,
) -> Result<()> {
    let dir = id.hex.as_str();
    append_bytes(builder, &format!("{dir}/VERSION"), b"1.0")?;
    append_bytes(builder, &format!("{dir}/layer.tar"), layer_bytes)?;

    let json = V1LayerJson {
        id: id.hex.clone(),
        parent: parent.map(|p| p.hex.clone()),
        architecture: top_config.map(|c| c.architecture.as_str()),
        os: top_config.map(|c| c.os.as_str()),
        config: top_config.and_then(|c| c.config.as_ref()),
        created: top_config.and_then(|c| c.created),
    };
    append_bytes(builder, &format!("{dir}/json"), &serde_json::to_vec(&json)?)?;
    Ok(())
}

/// Optionally suppress layer bytes already present at the load target
/// (e.g. a daemon that already has some of an image's layers), so only
/// the layers it's missing are copied into the tarball.
pub trait LayerFilter {
    /// Returns true if `digest` should be included in the written tarball.
    fn include(&self, digest: &Digest) -> bool;
}

/// Include every layer; the default when no filter is supplied.
pub struct IncludeAll;

impl LayerFilter for IncludeAll {
    fn include(&self, _digest: &Digest) -> bool {
        true
    }
}

/// Write a single image as a tarball to `writer`, tagged with `repo_tags`.
pub fn write_image<W: Write>(writer: W, image: &Image, repo_tags: Vec<String>) -> Result<()> {
    write_images(writer, &[(image, repo_tags)], &IncludeAll)
}

/// Write multiple images into one tarball, e.g. for a multi-tag save.
#[tracing::instrument(skip(writer, images, filter), fields(image_count = images.len()))]
pub fn write_images<W: Write>(writer: W, images: &[(&Image, Vec<String>)], filter: &dyn LayerFilter) -> Result<()> {
    let mut builder = Builder::new(writer);
    let mut manifest_entries = Vec::with_capacity(images.len());
    let mut repositories: Repositories = HashMap::new();

    for (image, repo_tags) in images {
        let raw_config = image.raw_config_file()?;
        let config_name = format!("{}.json", Digest::sha256_of(&raw_config).hex);
        append_bytes(&mut builder, &config_name, &raw_config)?;

        let manifest = image.manifest()?;
        let config_file = image.config_file()?;
        let diff_ids = image.diff_ids()?;
        let chain_ids = chain_ids(&diff_ids);

        let mut layer_names = Vec::with_capacity(manifest.layers.len());
        let mut layer_sources = IndexMap::new();
        let mut parent: Option<Digest> = None;
        let mut top_layer_id: Option<Digest> = None;

        for (i, descriptor) in manifest.layers.iter().enumerate() {
            let diff_id = diff_ids[i].clone();
            let layer = image.layer_by_diff_id(&diff_id)?;
            let gzip = matches!(
                descriptor.media_type,
                MediaType::OciLayerGzip | MediaType::DockerLayerGzip | MediaType::OciLayerForeignGzip | MediaType::DockerLayerForeignGzip
            );
            let name = layer_file_name(&descriptor.digest, gzip);

            if !descriptor.media_type.is_distributable() {
                tracing::debug!(layer = %descriptor.digest, "recording foreign layer as a LayerSource");
                layer_sources.insert(name.clone(), descriptor.clone());
                parent = Some(chain_ids[i].clone());
                continue;
            }

            if !filter.include(&descriptor.digest) {
                tracing::debug!(layer = %descriptor.digest, "filter excluded layer, omitting bytes");
                parent = Some(chain_ids[i].clone());
                continue;
            }

            let mut reader = layer.open()?;
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            append_bytes(&mut builder, &name, &bytes)?;
            layer_names.push(name);

            let id = chain_ids[i].clone();
            let is_top = i == manifest.layers.len() - 1;
            write_v1_layer(&mut builder, &id, parent.as_ref(), &bytes, is_top.then_some(&config_file))?;
            top_layer_id = Some(id.clone());
            parent = Some(id);
        }

        for tag in repo_tags {
            if let Some(top_layer_id) = &top_layer_id {
                let (repo, reference) = tag.split_once(':').unwrap_or((tag.as_str(), "latest"));
                repositories.entry(repo.to_string()).or_default().insert(reference.to_string(), top_layer_id.hex.clone());
            }
        }

        manifest_entries.push(TarballManifestEntry {
            config: config_name,
            repo_tags: repo_tags.clone(),
            layers: layer_names,
            layer_sources: if layer_sources.is_empty() { None } else { Some(layer_sources) },
        });
    }

    if !repositories.is_empty() {
        append_bytes(&mut builder, "repositories", &serde_json::to_vec(&repositories)?)?;
    }

    let manifest_json = serde_json::to_vec(&manifest_entries)?;
    append_bytes(&mut builder, "manifest.json", &manifest_json)?;
    builder.finish()?;
    Ok(())
}

fn append_bytes<W: Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> std::io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data)
}

/// Read all entries out of a tar stream into memory, keyed by path.
fn read_all_entries<R: Read>(reader: R) -> Result<HashMap<String, Vec<u8>>> {
    let mut archive = Archive::new(reader);
    let mut out = HashMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        out.insert(path, data);
    }
    Ok(out)
}

/// A tarball opened for reading: its manifest entries and raw file
/// contents, all buffered in memory.
pub struct TarballReader {
    entries: Vec<TarballManifestEntry>,
    files: HashMap<String, Vec<u8>>,
}

impl TarballReader {
    /// Read a tarball from `reader` in full.
    #[tracing::instrument(skip(reader))]
    pub fn new<R: Read>(reader: R) -> Result<Self> {
        let files = read_all_entries(reader)?;
        let manifest_bytes = files.get("manifest.json").ok_or_else(|| Error::not_found("manifest.json"))?;
        let entries: Vec<TarballManifestEntry> = serde_json::from_slice(manifest_bytes)?;
        tracing::info!(images = entries.len(), "loaded tarball manifest");
        Ok(TarballReader { entries, files })
    }

    /// Read a tarball from a file path.
    pub fn open(path: &Path) -> Result<Self> {
        Self::new(std::fs::File::open(path)?)
    }

    /// The manifest entry matching `tag`, or the sole entry if there's
    /// exactly one and no tag was requested.
    pub fn find(&self, tag: Option<&str>) -> Result<&TarballManifestEntry> {
        match tag {
            Some(tag) => self
                .entries
                .iter()
                .find(|e| e.repo_tags.iter().any(|t| t == tag))
                .ok_or_else(|| Error::not_found(format!("tag {tag}"))),
            None => match self.entries.as_slice() {
                [single] => Ok(single),
                [] => Err(Error::not_found("any image in tarball")),
                _ => Err(Error::not_found("a tag must be specified: tarball has multiple images")),
            },
        }
    }

    /// Decode the image addressed by `entry` into an [`Image`].
    pub fn image(&self, entry: &TarballManifestEntry) -> Result<Image> {
        let raw_config = self
            .files
            .get(&entry.config)
            .ok_or_else(|| Error::not_found(entry.config.clone()))?
            .clone();
        let config = crate::manifest::ConfigFile::from_raw(&raw_config)?;

        let mut layers = Vec::with_capacity(config.rootfs.diff_ids.len());
        let mut descriptors = Vec::with_capacity(config.rootfs.diff_ids.len());

        let compression_from_name = |name: &str| name.ends_with(".tar.gz");

        for name in &entry.layers {
            let bytes = self.files.get(name).ok_or_else(|| Error::not_found(name.clone()))?.clone();
            let media_type = if compression_from_name(name) {
                MediaType::OciLayerGzip
            } else {
                MediaType::OciLayer
            };
            let layer = crate::layer::MaterializedLayer::from_bytes(media_type.clone(), bytes)?;
            descriptors.push(
                Descriptor::builder()
                    .media_type(media_type)
                    .digest(layer.digest.clone())
                    .size(layer.size)
                    .build(),
            );
            layers.push(crate::layer::Layer::Materialized(layer));
        }

        if let Some(sources) = &entry.layer_sources {
            for descriptor in sources.values() {
                descriptors.push(descriptor.clone());
                layers.push(crate::layer::Layer::Foreign(crate::layer::ForeignLayer::new(
                    descriptor.media_type.clone(),
                    descriptor.digest.clone(),
                    descriptor.size,
                    descriptor.urls.clone().unwrap_or_default(),
                )));
            }
        }

        let manifest = crate::manifest::Manifest::new(
            MediaType::OciManifest,
            Descriptor::builder()
                .media_type(MediaType::OciConfig)
                .digest(Digest::sha256_of(&raw_config))
                .size(raw_config.len() as i64)
                .build(),
            descriptors,
        );

        Image::new(&manifest, raw_config, layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Layer, MaterializedLayer};
    use crate::manifest::RootFs;
    use pretty_assertions::assert_eq;

    fn sample_image() -> Image {
        let layer = MaterializedLayer::from_bytes(MediaType::OciLayer, b"layer bytes".to_vec()).unwrap();
        let config = crate::manifest::ConfigFile {
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            created: None,
            config: None,
            rootfs: RootFs::layers(vec![layer.diff_id.clone()]),
            history: Vec::new(),
        };
        let raw_config = config.to_raw().unwrap();
        let manifest = crate::manifest::Manifest::new(
            MediaType::OciManifest,
            Descriptor::builder()
                .media_type(MediaType::OciConfig)
                .digest(Digest::sha256_of(&raw_config))
                .size(raw_config.len() as i64)
                .build(),
            vec![Descriptor::builder()
                .media_type(MediaType::OciLayer)
                .digest(layer.digest.clone())
                .size(layer.size)
                .build()],
        );
        Image::new(&manifest, raw_config, vec![Layer::Materialized(layer)]).unwrap()
    }

    #[test]
    fn round_trips_single_image() {
        let image = sample_image();
        let mut buf = Vec::new();
        write_image(&mut buf, &image, vec!["example:latest".to_string()]).unwrap();

        let reader = TarballReader::new(&buf[..]).unwrap();
        let entry = reader.find(Some("example:latest")).unwrap();
        let loaded = reader.image(entry).unwrap();

        assert_eq!(loaded.config_file().unwrap().os, "linux");
        assert_eq!(loaded.manifest().unwrap().layers.len(), 1);
    }

    #[test]
    fn find_without_tag_requires_single_entry() {
        let image = sample_image();
        let mut buf = Vec::new();
        write_image(&mut buf, &image, vec![]).unwrap();
        let reader = TarballReader::new(&buf[..]).unwrap();
        assert!(reader.find(None).is_ok());
    }

    #[test]
    fn emits_legacy_v1_repositories_and_layer_directory() {
        let image = sample_image();
        let mut buf = Vec::new();
        write_image(&mut buf, &image, vec!["example:latest".to_string()]).unwrap();

        let files = read_all_entries(&buf[..]).unwrap();
        let repositories: Repositories = serde_json::from_slice(files.get("repositories").unwrap()).unwrap();
        let top_layer_id = repositories.get("example").unwrap().get("latest").unwrap();

        assert_eq!(files.get(&format!("{top_layer_id}/VERSION")).unwrap().as_slice(), b"1.0");
        assert!(files.contains_key(&format!("{top_layer_id}/layer.tar")));

        let json: serde_json::Value = serde_json::from_slice(files.get(&format!("{top_layer_id}/json")).unwrap()).unwrap();
        assert_eq!(json["id"], top_layer_id.as_str());
        assert_eq!(json["os"], "linux");

        let diff_id = &image.diff_ids().unwrap()[0];
        assert_eq!(chain_ids(std::slice::from_ref(diff_id))[0].hex, *top_layer_id);
    }

    #[test]
    fn layer_filenames_never_contain_colons() {
        let digest = Digest::sha256_of(b"data");
        assert!(!layer_file_name(&digest, true).contains(':'));
        assert!(!layer_file_name(&digest, false).contains(':'));
    }
}
