//! Docker save/load tarball codec: incremental writes via a [`LayerFilter`]
//! and a full round trip through [`TarballReader`].

use std::collections::HashSet;

use ocicore::digest::Digest;
use ocicore::partial::ImageCoreExt;
use ocicore::tarball::{self, LayerFilter, TarballReader};

use crate::common::sample_image;

struct ExcludeOne(Digest);

impl LayerFilter for ExcludeOne {
    fn include(&self, digest: &Digest) -> bool {
        *digest != self.0
    }
}

#[test]
fn round_trip_preserves_tags_and_layers() {
    let image = sample_image(2);
    let mut bytes = Vec::new();
    tarball::write_image(&mut bytes, &image, vec!["example:latest".to_string()]).unwrap();

    let reader = TarballReader::new(&bytes[..]).unwrap();
    let entry = reader.find(Some("example:latest")).unwrap();
    assert_eq!(entry.repo_tags, vec!["example:latest".to_string()]);
    assert_eq!(entry.layers.len(), 2);

    let reread = reader.image(entry).unwrap();
    assert_eq!(reread.diff_ids().unwrap(), image.diff_ids().unwrap());
}

#[test]
fn filtered_layer_is_omitted_from_the_written_tarball() {
    let image = sample_image(3);
    let manifest = image.manifest().unwrap();
    let already_present = manifest.layers[1].digest.clone();

    let mut bytes = Vec::new();
    tarball::write_images(
        &mut bytes,
        &[(&image, vec!["incremental:latest".to_string()])],
        &ExcludeOne(already_present.clone()),
    )
    .unwrap();

    let reader = TarballReader::new(&bytes[..]).unwrap();
    let entry = reader.find(Some("incremental:latest")).unwrap();

    // Only the two non-excluded layers were written into the tarball.
    assert_eq!(entry.layers.len(), 2);

    let written_hexes: HashSet<&str> = entry.layers.iter().filter_map(|name| name.split('.').next()).collect();
    assert!(!written_hexes.contains(already_present.hex.as_str()));
}
