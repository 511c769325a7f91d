//! Content-addressable digests: `{algorithm, hex}`, formatted as `algorithm:hex`.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};

/// A content-addressable digest, e.g. `sha256:d1fd83b3...`.
///
/// Total-ordered by `(algorithm, hex)` so that digests sort stably for
/// on-disk paths (`blobs/<algorithm>/<hex>`) and deterministic reporting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    /// The hashing algorithm, lowercase (e.g. `"sha256"`).
    pub algorithm: String,
    /// The lowercase hex-encoded hash.
    pub hex: String,
}

impl Digest {
    /// The SHA-256 algorithm token.
    pub const SHA256: &'static str = "sha256";

    /// Expected hex length, in characters, for each algorithm this crate
    /// recognizes.
    fn expected_hex_len(algorithm: &str) -> Option<usize> {
        match algorithm {
            Self::SHA256 => Some(64),
            _ => None,
        }
    }

    /// Construct a digest from a raw SHA-256 hash.
    pub fn sha256(hash: impl AsRef<[u8]>) -> Self {
        Digest {
            algorithm: Self::SHA256.to_string(),
            hex: hex::encode(hash),
        }
    }

    /// Hash `data` as a SHA-256 digest.
    pub fn sha256_of(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Digest::sha256(hash)
    }

    /// Consume a reader to EOF, returning its SHA-256 digest and byte count.
    ///
    /// This is the only way to learn the digest and size of a streaming
    /// source: both are "unknown" until the stream has been fully read.
    pub fn sha256_reader(mut reader: impl Read) -> Result<(Digest, u64)> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }
        Ok((Digest::sha256(hasher.finalize()), total))
    }

    /// Returns true if this crate knows how to compute/verify this
    /// algorithm.
    pub fn is_supported(&self) -> bool {
        Self::expected_hex_len(&self.algorithm).is_some()
    }

    /// Validate that `hex` has the length expected for `algorithm`, and that
    /// both fields are well-formed lowercase tokens.
    fn validate(algorithm: &str, hex: &str) -> Result<()> {
        let valid_token = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        let valid_hex = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        if !valid_token(algorithm) || !valid_hex(hex) {
            return Err(Error::InvalidHash(format!("{algorithm}:{hex}")));
        }
        if let Some(expected) = Self::expected_hex_len(algorithm) {
            if hex.len() != expected {
                return Err(Error::InvalidHash(format!("{algorithm}:{hex}")));
            }
        }
        Ok(())
    }

    /// The filename this digest would use inside `blobs/<algorithm>/`.
    pub fn blob_filename(&self) -> &str {
        &self.hex
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidHash(s.to_string()))?;
        Digest::validate(algorithm, hex)?;
        Ok(Digest {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_str(&s).map_err(serde::de::Error::custom)
    }
}
