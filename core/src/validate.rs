//! Full-content validation: reads every blob an image or index references
//! and checks it against its declared digest, size, and (for layers)
//! diff ID, rather than trusting the manifest's bookkeeping.

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::index::Index;
use crate::partial::ImageCoreExt;

/// Fully exercise an image: fetch its manifest and config, open every
/// layer, and confirm each one's compressed digest/size and diff ID match
/// what the manifest and config declare.
///
/// Layers are opened in manifest order; a [`crate::layer::Layer::Foreign`]
/// layer has no local bytes to check and is skipped rather than treated as
/// an error.
pub fn image(img: &impl ImageCoreExt) -> Result<()> {
    let manifest = img.manifest()?;
    let config = img.config_file()?;
    config.validate_against(manifest.layers.len())?;

    for (descriptor, diff_id) in manifest.layers.iter().zip(config.rootfs.diff_ids.iter()) {
        if !descriptor.media_type.is_distributable() {
            continue;
        }

        let layer = img.layer_by_diff_id(diff_id)?;

        // A single pass: the decoder reads compressed bytes through the
        // verifying reader (checking the compressed digest/size as they
        // flow past) and hashes what comes out the other side for the diff
        // ID — this works for a streaming layer too, which can only be
        // opened once.
        let verifying = crate::verify::VerifyingReader::new(layer.open()?, descriptor.digest.clone(), descriptor.size)?;
        let compression = crate::codec::Compression::of_media_type(&descriptor.media_type);
        let mut decoder = crate::codec::DecodingReader::new(compression, verifying)?;
        let (computed_diff_id, _) = Digest::sha256_reader(&mut decoder)?;

        if computed_diff_id != *diff_id {
            return Err(Error::DigestMismatch {
                got: computed_diff_id,
                want: diff_id.clone(),
            });
        }
    }

    Ok(())
}

/// Recursively validate every child manifest of an index.
pub fn index(idx: &Index) -> Result<()> {
    for descriptor in idx.descriptors() {
        let platform = descriptor.platform.clone().unwrap_or_else(crate::platform::Platform::linux_amd64);
        let child = idx.image_by_platform(&platform)?;
        self::image(&child)?;
    }
    Ok(())
}
