//! Structural diffing between two images: manifest, config, and layer
//! descriptors, without touching layer bytes.

use crate::digest::Digest;
use crate::manifest::Descriptor;
use crate::media::MediaType;
use crate::partial::ImageCoreExt;

/// A single difference found between two images.
#[derive(Debug, Clone, PartialEq)]
pub enum Difference {
    /// The manifests' media types differ.
    ManifestMediaType(MediaType, MediaType),
    /// The manifest digests differ (a catch-all: any other field changed
    /// too, since the manifest digest is a hash of the whole document).
    ManifestDigest(Digest, Digest),
    /// The config digests differ.
    ConfigDigest(Digest, Digest),
    /// The layer lists differ in length.
    LayerCount(usize, usize),
    /// The layer at `index` differs between the two images.
    Layer { index: usize, a: Descriptor, b: Descriptor },
}

/// Compare two images structurally. An empty result means `a` and `b` have
/// identical manifests (which, since a manifest digest covers the whole
/// document, implies identical configs and layer descriptors too — the
/// finer-grained variants exist so a caller can report exactly what
/// changed rather than just "they differ").
pub fn images(a: &impl ImageCoreExt, b: &impl ImageCoreExt) -> crate::error::Result<Vec<Difference>> {
    let mut differences = Vec::new();

    let manifest_a = a.manifest()?;
    let manifest_b = b.manifest()?;

    if manifest_a.media_type != manifest_b.media_type {
        differences.push(Difference::ManifestMediaType(manifest_a.media_type.clone(), manifest_b.media_type.clone()));
    }

    let digest_a = a.digest()?;
    let digest_b = b.digest()?;
    if digest_a == digest_b {
        return Ok(differences);
    }
    differences.push(Difference::ManifestDigest(digest_a, digest_b));

    if manifest_a.config.digest != manifest_b.config.digest {
        differences.push(Difference::ConfigDigest(manifest_a.config.digest.clone(), manifest_b.config.digest.clone()));
    }

    if manifest_a.layers.len() != manifest_b.layers.len() {
        differences.push(Difference::LayerCount(manifest_a.layers.len(), manifest_b.layers.len()));
    }

    for (i, (layer_a, layer_b)) in manifest_a.layers.iter().zip(manifest_b.layers.iter()).enumerate() {
        if layer_a.digest != layer_b.digest || layer_a.media_type != layer_b.media_type || layer_a.size != layer_b.size {
            differences.push(Difference::Layer {
                index: i,
                a: layer_a.clone(),
                b: layer_b.clone(),
            });
        }
    }

    Ok(differences)
}
