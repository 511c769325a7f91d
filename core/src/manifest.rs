//! JSON document shapes: descriptors, manifests, image indexes, and config
//! files.

use bon::Builder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::media::MediaType;
use crate::platform::Platform;

/// A typed pointer to a blob in the content-addressed graph.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct Descriptor {
    /// The media type of the referenced blob.
    #[serde(rename = "mediaType")]
    pub media_type: MediaType,

    /// The digest of the referenced blob.
    pub digest: Digest,

    /// The exact byte size of the referenced blob.
    pub size: i64,

    /// Foreign-layer fetch locations.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub urls: Option<Vec<String>>,

    /// Free-form annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub annotations: Option<IndexMap<String, String>>,

    /// Only meaningful inside an index: the platform this manifest targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub platform: Option<Platform>,

    /// Optional inlined payload; when present, must hash/size-match the
    /// descriptor (see [`Descriptor::verify`]).
    #[serde(skip_serializing_if = "Option::is_none", with = "base64_data", default)]
    #[builder(into)]
    pub data: Option<Vec<u8>>,
}

mod base64_data {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => STANDARD.encode(bytes).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom)).transpose()
    }
}

impl Descriptor {
    /// Validate a descriptor whose `data` is populated: its inlined bytes
    /// must hash to `digest` and have length `size`.
    pub fn verify(&self) -> Result<()> {
        let data = self.data.as_ref().ok_or_else(|| Error::not_found("descriptor data"))?;
        if data.len() as i64 != self.size {
            return Err(Error::SizeMismatch {
                got: data.len() as i64,
                want: self.size,
            });
        }
        let got = Digest::sha256_of(data);
        if got != self.digest {
            return Err(Error::DigestMismatch {
                got,
                want: self.digest.clone(),
            });
        }
        Ok(())
    }
}

/// The manifest for a single image: a config blob plus ordered layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType")]
    pub media_type: MediaType,

    pub config: Descriptor,

    pub layers: Vec<Descriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<IndexMap<String, String>>,
}

impl Manifest {
    /// Build a manifest with `schemaVersion: 2` and the given media type.
    pub fn new(media_type: MediaType, config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Manifest {
            schema_version: 2,
            media_type,
            config,
            layers,
            subject: None,
            annotations: None,
        }
    }

    /// Serialize with stable field order for deterministic digests.
    pub fn to_raw(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a raw manifest document.
    pub fn from_raw(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The digest of this manifest's canonical JSON form.
    pub fn digest(&self) -> Result<Digest> {
        Ok(Digest::sha256_of(&self.to_raw()?))
    }
}

/// An index (manifest list): a set of child manifests, typically one per
/// platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType")]
    pub media_type: MediaType,

    pub manifests: Vec<Descriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<IndexMap<String, String>>,
}

impl IndexManifest {
    /// Build an empty index with the given media type.
    pub fn new(media_type: MediaType, manifests: Vec<Descriptor>) -> Self {
        IndexManifest {
            schema_version: 2,
            media_type,
            manifests,
            subject: None,
            annotations: None,
        }
    }

    /// Serialize with stable field order for deterministic digests.
    pub fn to_raw(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a raw index document.
    pub fn from_raw(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The digest of this index's canonical JSON form.
    pub fn digest(&self) -> Result<Digest> {
        Ok(Digest::sha256_of(&self.to_raw()?))
    }
}

/// The `rootfs` field of a config file: always `{type: "layers", diff_ids}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub kind: String,
    pub diff_ids: Vec<Digest>,
}

impl RootFs {
    /// Build a `{type: "layers", diff_ids}` rootfs.
    pub fn layers(diff_ids: Vec<Digest>) -> Self {
        RootFs {
            kind: "layers".to_string(),
            diff_ids,
        }
    }
}

/// One entry of a config file's `history` array.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

/// The container runtime configuration embedded in a config file's `config`
/// field. Fields are intentionally permissive (all optional) since the core
/// only needs to round-trip them, not interpret them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "User")]
    pub user: Option<String>,

    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

/// The JSON config blob an image manifest's `config` descriptor points to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub architecture: String,

    pub os: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<RuntimeConfig>,

    pub rootfs: RootFs,

    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ConfigFile {
    /// Serialize with stable field order for deterministic digests.
    pub fn to_raw(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a raw config document.
    pub fn from_raw(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Validate the invariant that `rootfs.diff_ids` has one entry per
    /// manifest layer.
    pub fn validate_against(&self, layer_count: usize) -> Result<()> {
        if self.rootfs.diff_ids.len() != layer_count {
            return Err(Error::Parse {
                what: "config file".to_string(),
                cause: Box::new(MismatchedDiffIds {
                    diff_ids: self.rootfs.diff_ids.len(),
                    layers: layer_count,
                }),
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("config has {diff_ids} diff_ids but manifest has {layers} layers")]
struct MismatchedDiffIds {
    diff_ids: usize,
    layers: usize,
}
