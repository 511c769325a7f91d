//! Thin adapters that let an image implementation supply only a minimal set
//! of core operations and derive the rest.
//!
//! An [`ImageCore`] implementor need only answer three questions: its raw
//! manifest bytes, its raw config bytes, and how to fetch a layer by diff
//! ID. [`ImageCoreExt`] (blanket-implemented for every `ImageCore`) derives
//! everything else: parsed manifest/config, digests, sizes, and lookup by
//! compressed digest (including synthesizing a pseudo-layer for the config
//! blob itself, which the OCI spec treats as addressable the same way a
//! layer is).

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::layer::{Layer, MaterializedLayer};
use crate::manifest::{ConfigFile, Manifest};
use crate::media::MediaType;

/// The minimal operations an image implementation must supply.
pub trait ImageCore: Send + Sync {
    /// The image's raw manifest JSON.
    fn raw_manifest(&self) -> Result<Vec<u8>>;

    /// The image's raw config JSON.
    fn raw_config_file(&self) -> Result<Vec<u8>>;

    /// Fetch a layer by its diff ID (the digest of its uncompressed
    /// content), as listed in the config file's `rootfs.diff_ids`.
    fn layer_by_diff_id(&self, diff_id: &Digest) -> Result<Layer>;
}

/// Operations derived from [`ImageCore`]; blanket-implemented for every
/// implementor.
pub trait ImageCoreExt: ImageCore {
    /// Parse [`ImageCore::raw_manifest`].
    fn manifest(&self) -> Result<Manifest> {
        Manifest::from_raw(&self.raw_manifest()?)
    }

    /// The digest of the raw manifest.
    fn digest(&self) -> Result<Digest> {
        Ok(Digest::sha256_of(&self.raw_manifest()?))
    }

    /// The byte size of the raw manifest.
    fn size(&self) -> Result<i64> {
        Ok(self.raw_manifest()?.len() as i64)
    }

    /// Parse [`ImageCore::raw_config_file`].
    fn config_file(&self) -> Result<ConfigFile> {
        ConfigFile::from_raw(&self.raw_config_file()?)
    }

    /// The digest of the raw config file, i.e. the manifest's `config`
    /// descriptor digest.
    fn config_name(&self) -> Result<Digest> {
        Ok(Digest::sha256_of(&self.raw_config_file()?))
    }

    /// The ordered diff IDs from the config file's `rootfs`.
    fn diff_ids(&self) -> Result<Vec<Digest>> {
        Ok(self.config_file()?.rootfs.diff_ids)
    }

    /// All layers, in manifest order, resolved via repeated
    /// [`ImageCore::layer_by_diff_id`] calls.
    fn layers(&self) -> Result<Vec<Layer>> {
        self.diff_ids()?.iter().map(|id| self.layer_by_diff_id(id)).collect()
    }

    /// Fetch a layer (or the synthesized config pseudo-layer) by its
    /// compressed digest, the digest that appears on manifest layer
    /// descriptors.
    ///
    /// If `h` matches the config digest, a materialized layer wrapping the
    /// raw config bytes is synthesized, with media type
    /// [`MediaType::OciConfig`] — this is how callers can treat "the
    /// config blob" as just another addressable blob.
    fn layer_by_digest(&self, h: &Digest) -> Result<Layer> {
        if *h == self.config_name()? {
            let raw = self.raw_config_file()?;
            return MaterializedLayer::from_bytes(MediaType::OciConfig, raw).map(Layer::Materialized);
        }
        let diff_id = self.blob_to_diff_id(h)?;
        self.layer_by_diff_id(&diff_id)
    }

    /// Map a compressed-blob digest to its diff ID, by matching the
    /// manifest's layer order against the config file's `diff_ids`. Errors
    /// if the two lists disagree in length.
    fn blob_to_diff_id(&self, h: &Digest) -> Result<Digest> {
        let manifest = self.manifest()?;
        let diff_ids = self.diff_ids()?;
        if manifest.layers.len() != diff_ids.len() {
            return Err(Error::parse(
                "image manifest/config",
                MismatchedLayerCount {
                    manifest_layers: manifest.layers.len(),
                    config_diff_ids: diff_ids.len(),
                },
            ));
        }
        manifest
            .layers
            .iter()
            .position(|l| l.digest == *h)
            .map(|i| diff_ids[i].clone())
            .ok_or_else(|| Error::not_found(format!("layer with digest {h}")))
    }

    /// The inverse of [`ImageCoreExt::blob_to_diff_id`].
    fn diff_id_to_blob(&self, diff_id: &Digest) -> Result<Digest> {
        let manifest = self.manifest()?;
        let diff_ids = self.diff_ids()?;
        if manifest.layers.len() != diff_ids.len() {
            return Err(Error::parse(
                "image manifest/config",
                MismatchedLayerCount {
                    manifest_layers: manifest.layers.len(),
                    config_diff_ids: diff_ids.len(),
                },
            ));
        }
        diff_ids
            .iter()
            .position(|d| d == diff_id)
            .map(|i| manifest.layers[i].digest.clone())
            .ok_or_else(|| Error::not_found(format!("layer with diff id {diff_id}")))
    }
}

impl<T: ImageCore + ?Sized> ImageCoreExt for T {}

#[derive(Debug, thiserror::Error)]
#[error("manifest has {manifest_layers} layers but config has {config_diff_ids} diff_ids")]
struct MismatchedLayerCount {
    manifest_layers: usize,
    config_diff_ids: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Descriptor, RootFs};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct FakeImage {
        manifest: Vec<u8>,
        config: Vec<u8>,
        layers: Mutex<Vec<(Digest, Vec<u8>)>>,
    }

    impl ImageCore for FakeImage {
        fn raw_manifest(&self) -> Result<Vec<u8>> {
            Ok(self.manifest.clone())
        }

        fn raw_config_file(&self) -> Result<Vec<u8>> {
            Ok(self.config.clone())
        }

        fn layer_by_diff_id(&self, diff_id: &Digest) -> Result<Layer> {
            let layers = self.layers.lock().unwrap();
            let (_, bytes) = layers
                .iter()
                .find(|(id, _)| id == diff_id)
                .ok_or_else(|| Error::not_found("layer"))?;
            MaterializedLayer::from_bytes(MediaType::OciLayer, bytes.clone()).map(Layer::Materialized)
        }
    }

    fn fake_image() -> FakeImage {
        let layer_bytes = b"layer contents".to_vec();
        let diff_id = Digest::sha256_of(&layer_bytes);
        let layer_digest = diff_id.clone();
        let layer_size = layer_bytes.len() as i64;

        let config = ConfigFile {
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            created: None,
            config: None,
            rootfs: RootFs::layers(vec![diff_id.clone()]),
            history: Vec::new(),
        };
        let raw_config = config.to_raw().unwrap();
        let config_digest = Digest::sha256_of(&raw_config);

        let manifest = Manifest::new(
            MediaType::OciManifest,
            Descriptor::builder()
                .media_type(MediaType::OciConfig)
                .digest(config_digest)
                .size(raw_config.len() as i64)
                .build(),
            vec![Descriptor::builder()
                .media_type(MediaType::OciLayer)
                .digest(layer_digest)
                .size(layer_size)
                .build()],
        );

        FakeImage {
            manifest: manifest.to_raw().unwrap(),
            config: raw_config,
            layers: Mutex::new(vec![(diff_id, layer_bytes)]),
        }
    }

    #[test]
    fn derives_config_file_and_diff_ids() {
        let image = fake_image();
        let config = image.config_file().unwrap();
        assert_eq!(config.os, "linux");
        assert_eq!(image.diff_ids().unwrap(), config.rootfs.diff_ids);
    }

    #[test]
    fn layer_by_digest_resolves_through_diff_id() {
        let image = fake_image();
        let manifest = image.manifest().unwrap();
        let layer = image.layer_by_digest(&manifest.layers[0].digest).unwrap();
        assert_eq!(layer.digest().unwrap(), manifest.layers[0].digest);
    }

    #[test]
    fn layer_by_digest_synthesizes_config_pseudo_layer() {
        let image = fake_image();
        let config_name = image.config_name().unwrap();
        let layer = image.layer_by_digest(&config_name).unwrap();
        assert_eq!(layer.media_type(), &MediaType::OciConfig);
        assert_eq!(layer.digest().unwrap(), config_name);
    }

    #[test]
    fn blob_to_diff_id_round_trips_with_inverse() {
        let image = fake_image();
        let manifest = image.manifest().unwrap();
        let blob_digest = manifest.layers[0].digest.clone();
        let diff_id = image.blob_to_diff_id(&blob_digest).unwrap();
        assert_eq!(image.diff_id_to_blob(&diff_id).unwrap(), blob_digest);
    }
}
