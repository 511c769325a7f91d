//! An image index (manifest list): a set of child manifests, typically one
//! per platform, plus platform-based selection.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::image::Image;
use crate::manifest::{Descriptor, IndexManifest};
use crate::platform::Platform;

/// A resolver from an index child descriptor to its image, supplied by the
/// caller (a registry puller, an OCI layout store, a tarball reader — see
/// `transport.rs`). Kept generic over `Index` rather than baked into it so
/// the index type stays usable with any source of child images.
pub trait ImageResolver: Send + Sync {
    /// Resolve a child manifest descriptor to its image.
    fn resolve(&self, descriptor: &Descriptor) -> Result<Image>;
}

/// An index and a resolver able to materialize its children.
pub struct Index {
    raw: Arc<Vec<u8>>,
    manifest: IndexManifest,
    resolver: Arc<dyn ImageResolver>,
}

impl Index {
    /// Build an index from its parsed manifest list and a resolver for its
    /// children.
    pub fn new(manifest: IndexManifest, resolver: Arc<dyn ImageResolver>) -> Result<Self> {
        let raw = manifest.to_raw()?;
        Ok(Index {
            raw: Arc::new(raw),
            manifest,
            resolver,
        })
    }

    /// The raw index JSON.
    pub fn raw_index(&self) -> &[u8] {
        &self.raw
    }

    /// The parsed index manifest.
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// The digest of the raw index JSON.
    pub fn digest(&self) -> crate::digest::Digest {
        crate::digest::Digest::sha256_of(&self.raw)
    }

    /// Select and resolve the first child manifest whose platform
    /// satisfies `spec` (see [`Platform::satisfies`]). A child with no
    /// explicit platform is treated as `linux/amd64`.
    pub fn image_by_platform(&self, spec: &Platform) -> Result<Image> {
        let descriptor = self
            .manifest
            .manifests
            .iter()
            .find(|d| {
                let platform = d.platform.clone().unwrap_or_else(Platform::linux_amd64);
                platform.satisfies(spec)
            })
            .ok_or_else(|| Error::not_found(format!("manifest matching platform {spec}")))?;
        self.resolver.resolve(descriptor)
    }

    /// All child descriptors, in manifest order.
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.manifest.manifests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::MaterializedLayer;
    use crate::manifest::{ConfigFile, Manifest, RootFs};
    use crate::media::MediaType;
    use crate::digest::Digest;
    use crate::layer::Layer;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapResolver(Mutex<HashMap<Digest, Image>>);

    impl ImageResolver for MapResolver {
        fn resolve(&self, descriptor: &Descriptor) -> Result<Image> {
            self.0
                .lock()
                .unwrap()
                .get(&descriptor.digest)
                .cloned()
                .ok_or_else(|| Error::not_found("child image"))
        }
    }

    fn image_for(os: &str, arch: &str) -> (Image, Descriptor) {
        let layer = MaterializedLayer::from_bytes(MediaType::OciLayer, b"bytes".to_vec()).unwrap();
        let config = ConfigFile {
            architecture: arch.to_string(),
            os: os.to_string(),
            created: None,
            config: None,
            rootfs: RootFs::layers(vec![layer.diff_id.clone()]),
            history: Vec::new(),
        };
        let raw_config = config.to_raw().unwrap();
        let config_digest = Digest::sha256_of(&raw_config);
        let manifest = Manifest::new(
            MediaType::OciManifest,
            crate::manifest::Descriptor::builder()
                .media_type(MediaType::OciConfig)
                .digest(config_digest)
                .size(raw_config.len() as i64)
                .build(),
            vec![crate::manifest::Descriptor::builder()
                .media_type(MediaType::OciLayer)
                .digest(layer.digest.clone())
                .size(layer.size)
                .build()],
        );
        let raw_manifest = manifest.to_raw().unwrap();
        let manifest_digest = Digest::sha256_of(&raw_manifest);
        let image = Image::new(&manifest, raw_config, vec![Layer::Materialized(layer)]).unwrap();
        let descriptor = Descriptor::builder()
            .media_type(MediaType::OciManifest)
            .digest(manifest_digest)
            .size(raw_manifest.len() as i64)
            .platform(Platform::builder().os(os).architecture(arch).build())
            .build();
        (image, descriptor)
    }

    #[test]
    fn selects_matching_platform() {
        let (linux_image, linux_desc) = image_for("linux", "amd64");
        let (arm_image, arm_desc) = image_for("linux", "arm64");

        let mut map = HashMap::new();
        map.insert(linux_desc.digest.clone(), linux_image);
        map.insert(arm_desc.digest.clone(), arm_image);

        let index_manifest = IndexManifest::new(MediaType::OciIndex, vec![linux_desc, arm_desc]);
        let index = Index::new(index_manifest, Arc::new(MapResolver(Mutex::new(map)))).unwrap();

        let resolved = index.image_by_platform(&Platform::linux_arm64()).unwrap();
        assert_eq!(resolved.platform().unwrap().architecture, "arm64");
    }

    #[test]
    fn missing_platform_is_not_found() {
        let (image, descriptor) = image_for("linux", "amd64");
        let mut map = HashMap::new();
        map.insert(descriptor.digest.clone(), image);
        let index_manifest = IndexManifest::new(MediaType::OciIndex, vec![descriptor]);
        let index = Index::new(index_manifest, Arc::new(MapResolver(Mutex::new(map)))).unwrap();

        let err = index.image_by_platform(&Platform::builder().os("windows").architecture("amd64").build());
        assert!(matches!(err, Err(Error::NotFound(_))));
    }
}
