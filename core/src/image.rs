//! A concrete, immutable image handle: a manifest, its config, and its
//! layers, addressable as an [`ImageCore`].

use std::sync::Arc;

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::manifest::{ConfigFile, Manifest};
use crate::partial::{ImageCore, ImageCoreExt};

/// A fully-materialized image: its manifest and config are known up front,
/// and each layer is held directly (so `layer_by_diff_id` is a lookup, not
/// a fetch). Shared cheaply via `Clone` (everything is reference-counted).
#[derive(Clone)]
pub struct Image {
    raw_manifest: Arc<Vec<u8>>,
    raw_config: Arc<Vec<u8>>,
    layers: Arc<Vec<Layer>>,
}

impl Image {
    /// Build an image from its parsed manifest, raw config bytes, and
    /// layers in the same order as `manifest.layers`.
    ///
    /// The manifest is re-serialized via [`Manifest::to_raw`] to obtain a
    /// canonical byte form; callers that already hold the exact original
    /// bytes (e.g. a registry response) should prefer
    /// [`Image::from_raw_parts`] to preserve them untouched.
    pub fn new(manifest: &Manifest, raw_config: Vec<u8>, layers: Vec<Layer>) -> Result<Self> {
        Self::from_raw_parts(manifest.to_raw()?, raw_config, layers)
    }

    /// Build an image from raw manifest bytes, raw config bytes, and
    /// layers in manifest order. Does not validate that `layers` is
    /// consistent with the manifest; use [`crate::validate::image`] for
    /// that.
    pub fn from_raw_parts(raw_manifest: Vec<u8>, raw_config: Vec<u8>, layers: Vec<Layer>) -> Result<Self> {
        Ok(Image {
            raw_manifest: Arc::new(raw_manifest),
            raw_config: Arc::new(raw_config),
            layers: Arc::new(layers),
        })
    }

    /// The image's platform, read from its config file's `os`/`architecture`.
    pub fn platform(&self) -> Result<crate::platform::Platform> {
        let config = self.config_file()?;
        Ok(crate::platform::Platform::builder()
            .os(config.os)
            .architecture(config.architecture)
            .build())
    }
}

impl ImageCore for Image {
    fn raw_manifest(&self) -> Result<Vec<u8>> {
        Ok((*self.raw_manifest).clone())
    }

    fn raw_config_file(&self) -> Result<Vec<u8>> {
        Ok((*self.raw_config).clone())
    }

    fn layer_by_diff_id(&self, diff_id: &Digest) -> Result<Layer> {
        for layer in self.layers.iter() {
            if layer.diff_id()? == *diff_id {
                return Ok(layer.clone());
            }
        }
        Err(Error::not_found(format!("layer with diff id {diff_id}")))
    }
}

/// Decode an image's manifest and config together, e.g. after a tarball or
/// layout read, where both blobs are already in hand.
pub fn parse(raw_manifest: &[u8], raw_config: &[u8]) -> Result<(Manifest, ConfigFile)> {
    let manifest = Manifest::from_raw(raw_manifest)?;
    let config = ConfigFile::from_raw(raw_config)?;
    config.validate_against(manifest.layers.len())?;
    Ok((manifest, config))
}
