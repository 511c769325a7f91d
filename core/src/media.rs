//! Container image media types.
//!
//! Every entry round-trips to its exact spec string; unrecognized strings
//! are preserved via [`MediaType::Other`] rather than rejected, since a
//! descriptor referencing an unknown media type is valid to hold (just not
//! to recurse into — see [`crate::layout::Layout::garbage_collect`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A container image media type, as carried on a [`crate::manifest::Descriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// `application/vnd.oci.image.manifest.v1+json`
    OciManifest,
    /// `application/vnd.oci.image.index.v1+json`
    OciIndex,
    /// `application/vnd.oci.image.config.v1+json`
    OciConfig,
    /// `application/vnd.oci.image.layer.v1.tar+gzip`
    OciLayerGzip,
    /// `application/vnd.oci.image.layer.v1.tar+zstd`
    OciLayerZstd,
    /// `application/vnd.oci.image.layer.v1.tar`
    OciLayer,
    /// `application/vnd.oci.image.layer.nondistributable.v1.tar+gzip`
    OciLayerForeignGzip,
    /// `application/vnd.docker.distribution.manifest.v2+json`
    DockerManifest,
    /// `application/vnd.docker.distribution.manifest.list.v2+json`
    DockerManifestList,
    /// `application/vnd.docker.container.image.v1+json`
    DockerConfig,
    /// `application/vnd.docker.image.rootfs.diff.tar.gzip`
    DockerLayerGzip,
    /// `application/vnd.docker.image.rootfs.foreign.diff.tar.gzip`
    DockerLayerForeignGzip,
    /// Any media type this crate doesn't assign special meaning to; the
    /// exact string is preserved verbatim.
    Other(String),
}

impl MediaType {
    const TABLE: &'static [(&'static str, fn() -> MediaType)] = &[
        ("application/vnd.oci.image.manifest.v1+json", || MediaType::OciManifest),
        ("application/vnd.oci.image.index.v1+json", || MediaType::OciIndex),
        ("application/vnd.oci.image.config.v1+json", || MediaType::OciConfig),
        ("application/vnd.oci.image.layer.v1.tar+gzip", || MediaType::OciLayerGzip),
        ("application/vnd.oci.image.layer.v1.tar+zstd", || MediaType::OciLayerZstd),
        ("application/vnd.oci.image.layer.v1.tar", || MediaType::OciLayer),
        (
            "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip",
            || MediaType::OciLayerForeignGzip,
        ),
        (
            "application/vnd.docker.distribution.manifest.v2+json",
            || MediaType::DockerManifest,
        ),
        (
            "application/vnd.docker.distribution.manifest.list.v2+json",
            || MediaType::DockerManifestList,
        ),
        ("application/vnd.docker.container.image.v1+json", || MediaType::DockerConfig),
        ("application/vnd.docker.image.rootfs.diff.tar.gzip", || MediaType::DockerLayerGzip),
        (
            "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip",
            || MediaType::DockerLayerForeignGzip,
        ),
    ];

    /// The canonical spec string for this media type.
    pub fn as_str(&self) -> &str {
        match self {
            MediaType::OciManifest => "application/vnd.oci.image.manifest.v1+json",
            MediaType::OciIndex => "application/vnd.oci.image.index.v1+json",
            MediaType::OciConfig => "application/vnd.oci.image.config.v1+json",
            MediaType::OciLayerGzip => "application/vnd.oci.image.layer.v1.tar+gzip",
            MediaType::OciLayerZstd => "application/vnd.oci.image.layer.v1.tar+zstd",
            MediaType::OciLayer => "application/vnd.oci.image.layer.v1.tar",
            MediaType::OciLayerForeignGzip => "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip",
            MediaType::DockerManifest => "application/vnd.docker.distribution.manifest.v2+json",
            MediaType::DockerManifestList => "application/vnd.docker.distribution.manifest.list.v2+json",
            MediaType::DockerConfig => "application/vnd.docker.container.image.v1+json",
            MediaType::DockerLayerGzip => "application/vnd.docker.image.rootfs.diff.tar.gzip",
            MediaType::DockerLayerForeignGzip => "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip",
            MediaType::Other(s) => s,
        }
    }

    /// Is this an index (manifest list) media type?
    pub fn is_index(&self) -> bool {
        matches!(self, MediaType::OciIndex | MediaType::DockerManifestList)
    }

    /// Is this a single-image manifest media type?
    pub fn is_manifest(&self) -> bool {
        matches!(self, MediaType::OciManifest | MediaType::DockerManifest)
    }

    /// Is this a config media type?
    pub fn is_config(&self) -> bool {
        matches!(self, MediaType::OciConfig | MediaType::DockerConfig)
    }

    /// Is this a layer media type (of any compression/foreign-ness)?
    pub fn is_layer(&self) -> bool {
        matches!(
            self,
            MediaType::OciLayerGzip
                | MediaType::OciLayerZstd
                | MediaType::OciLayer
                | MediaType::OciLayerForeignGzip
                | MediaType::DockerLayerGzip
                | MediaType::DockerLayerForeignGzip
        )
    }

    /// Registries are not required to serve foreign/non-distributable
    /// layers; everything else is distributable.
    pub fn is_distributable(&self) -> bool {
        !matches!(self, MediaType::OciLayerForeignGzip | MediaType::DockerLayerForeignGzip)
    }
}

impl FromStr for MediaType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for (candidate, make) in Self::TABLE {
            if *candidate == s {
                return Ok(make());
            }
        }
        Ok(MediaType::Other(s.to_string()))
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for MediaType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().expect("MediaType::from_str is infallible"))
    }
}
