//! End-to-end round trip through an OCI Image Layout store: write an image,
//! read it back, fully validate it, and confirm it's indistinguishable from
//! the original.

use ocicore::compare;
use ocicore::layout::Layout;
use ocicore::validate;

use crate::common::sample_image;

#[test]
fn write_then_read_back_is_identical() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::ensure(dir.path()).unwrap();
    let image = sample_image(3);

    let descriptor = layout.write_image(&image, &ocicore::pool::Options::new(2), Some("latest")).unwrap();
    let reread = layout.read_image(&descriptor.digest).unwrap();

    validate::image(&reread).unwrap();

    let differences = compare::images(&image, &reread).unwrap();
    assert!(differences.is_empty(), "expected no differences, got {differences:?}");
}

#[test]
fn index_json_carries_the_requested_tag() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::ensure(dir.path()).unwrap();
    let image = sample_image(1);

    layout.write_image(&image, &ocicore::pool::Options::new(4), Some("v1")).unwrap();
    let index = layout.read_index().unwrap();

    let descriptor = &index.manifests[0];
    let annotations = descriptor.annotations.as_ref().expect("tagged manifest has annotations");
    assert_eq!(annotations.get("org.opencontainers.image.ref.name").map(String::as_str), Some("v1"));
}

#[test]
fn write_image_is_resumable_after_a_partial_failure() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::ensure(dir.path()).unwrap();
    let image = sample_image(2);

    let descriptor = layout.write_image(&image, &ocicore::pool::Options::new(1), None).unwrap();
    // Writing the same image again must not error: every blob is already
    // present and `write_blob` dedups by size.
    let second = layout.write_image(&image, &ocicore::pool::Options::new(1), None).unwrap();
    assert_eq!(descriptor.digest, second.digest);
}
