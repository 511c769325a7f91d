//! Garbage collection: liveness across shared layers, and refusal to guess
//! at an unrecognized media type.

use ocicore::digest::Digest;
use ocicore::layout::Layout;
use ocicore::manifest::{ConfigFile, Descriptor, Manifest, RootFs};
use ocicore::media::MediaType;

use crate::common::sample_image;

#[test]
fn shared_layers_survive_removing_one_of_two_images() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::ensure(dir.path()).unwrap();

    let shared = sample_image(2);
    let unique = sample_image(3);

    let shared_descriptor = layout.write_image(&shared, &ocicore::pool::Options::new(2), Some("shared")).unwrap();
    let unique_descriptor = layout.write_image(&unique, &ocicore::pool::Options::new(2), Some("unique")).unwrap();

    // Remove only the second image's manifest from the index; its layers
    // are distinct from the first image's, so they should be reclaimed,
    // while everything the first image still references survives.
    layout.remove_descriptors(|d| d.digest == unique_descriptor.digest).unwrap();
    let report = layout.garbage_collect().unwrap();

    assert!(!report.deleted.is_empty());
    assert!(layout.read_image(&shared_descriptor.digest).is_ok());
}

#[test]
fn unknown_media_type_aborts_without_deleting_anything() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::ensure(dir.path()).unwrap();
    let image = sample_image(1);
    layout.write_image(&image, &ocicore::pool::Options::new(1), Some("tagged")).unwrap();

    // A manifest that itself references a descriptor of an unrecognized
    // media type, exactly as a registry or layout could hand us: the
    // reference lives inside the manifest, not bolted onto the index.
    let config = ConfigFile {
        architecture: "amd64".to_string(),
        os: "linux".to_string(),
        created: None,
        config: None,
        rootfs: RootFs::layers(vec![]),
        history: Vec::new(),
    };
    let raw_config = config.to_raw().unwrap();
    let config_digest = Digest::sha256_of(&raw_config);
    layout.write_blob(&config_digest, raw_config.len() as i64, &raw_config[..]).unwrap();

    let bogus_digest = Digest::sha256_of(b"not a real blob");
    layout.write_blob(&bogus_digest, 16, &b"not a real blob"[..]).unwrap();

    let manifest = Manifest::new(
        MediaType::OciManifest,
        Descriptor::builder()
            .media_type(MediaType::OciConfig)
            .digest(config_digest)
            .size(raw_config.len() as i64)
            .build(),
        vec![Descriptor::builder()
            .media_type(MediaType::Other("application/vnd.oci.descriptor.v1+json".to_string()))
            .digest(bogus_digest)
            .size(16)
            .build()],
    );
    let raw_manifest = manifest.to_raw().unwrap();
    let manifest_digest = Digest::sha256_of(&raw_manifest);
    layout.write_blob(&manifest_digest, raw_manifest.len() as i64, &raw_manifest[..]).unwrap();
    layout
        .append_descriptor(
            Descriptor::builder()
                .media_type(MediaType::OciManifest)
                .digest(manifest_digest)
                .size(raw_manifest.len() as i64)
                .build(),
        )
        .unwrap();

    let before = walk_blob_count(&layout);
    let result = layout.garbage_collect();
    assert!(result.is_err());
    assert_eq!(walk_blob_count(&layout), before, "a failed gc must not delete any blob");
}

fn walk_blob_count(layout: &Layout) -> usize {
    walkdir::WalkDir::new(layout.root().join("blobs")).min_depth(2).max_depth(2).into_iter().filter(|e| e.as_ref().map(|e| e.file_type().is_file()).unwrap_or(false)).count()
}
