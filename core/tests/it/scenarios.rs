//! Fixed-output scenarios from the object model's test matrix: cases with
//! one specific, literal expected result rather than a round-trip property.

use ocicore::partial::ImageCoreExt;

use crate::common::content;

#[test]
fn one_layer_image_has_the_expected_manifest_digest() {
    let image = content::image(&[("/test", "testy")]);
    let digest = image.manifest().unwrap().digest().unwrap();
    assert_eq!(digest.to_string(), "sha256:d1fd83b38f973d31da3ca7298f9e490e7715c9387bc609cd349ffc3909c20c8a");
}
