//! Shared helpers for building sample images across integration tests.

use ocicore::digest::Digest;
use ocicore::image::Image;
use ocicore::layer::{Layer, MaterializedLayer};
use ocicore::manifest::{ConfigFile, Descriptor, Manifest, RootFs};
use ocicore::media::MediaType;

/// Build an image with `n` layers, each holding distinct, deterministic
/// content, so tests can identify individual layers by index.
pub fn sample_image(n: usize) -> Image {
    let layers: Vec<MaterializedLayer> = (0..n)
        .map(|i| MaterializedLayer::from_bytes(MediaType::OciLayerGzip, gzip_bytes(format!("layer-{i} contents").as_bytes())).unwrap())
        .collect();

    let config = ConfigFile {
        architecture: "amd64".to_string(),
        os: "linux".to_string(),
        created: None,
        config: None,
        rootfs: RootFs::layers(layers.iter().map(|l| l.diff_id.clone()).collect()),
        history: Vec::new(),
    };
    let raw_config = config.to_raw().unwrap();

    let manifest = Manifest::new(
        MediaType::OciManifest,
        Descriptor::builder()
            .media_type(MediaType::OciConfig)
            .digest(Digest::sha256_of(&raw_config))
            .size(raw_config.len() as i64)
            .build(),
        layers
            .iter()
            .map(|l| {
                Descriptor::builder()
                    .media_type(MediaType::OciLayerGzip)
                    .digest(l.digest.clone())
                    .size(l.size)
                    .build()
            })
            .collect(),
    );

    Image::new(&manifest, raw_config, layers.into_iter().map(Layer::Materialized).collect()).unwrap()
}

/// gzip-compress `data` so layers exercise the codec path, not just an
/// identity "compression".
pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Build single-layer images from an in-memory file set, for tests that
/// need a fixed, reproducible manifest rather than an arbitrary sample.
pub mod content {
    use ocicore::digest::Digest;
    use ocicore::image::Image;
    use ocicore::layer::{Layer, MaterializedLayer};
    use ocicore::manifest::{ConfigFile, Descriptor, Manifest, RootFs};
    use ocicore::media::MediaType;
    use tar::{Builder, Header};

    /// One layer, one uncompressed tar, one file per `(path, contents)`
    /// pair. Every tar header field that isn't the path or size is pinned
    /// (mode `0o644`, uid/gid `0`, mtime `0`) so the layer's bytes, and so
    /// the resulting manifest digest, are fully determined by `files`.
    pub fn image(files: &[(&str, &str)]) -> Image {
        let mut builder = Builder::new(Vec::new());
        for (path, contents) in files {
            let mut header = Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mtime(0);
            header.set_cksum();
            builder.append_data(&mut header, path.trim_start_matches('/'), contents.as_bytes()).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let layer = MaterializedLayer::from_bytes(MediaType::OciLayer, tar_bytes).unwrap();

        let config = ConfigFile {
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            created: None,
            config: None,
            rootfs: RootFs::layers(vec![layer.diff_id.clone()]),
            history: Vec::new(),
        };
        let raw_config = config.to_raw().unwrap();

        let manifest = Manifest::new(
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
}
