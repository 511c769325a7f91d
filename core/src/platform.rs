//! The platform a container image (or a manifest within an index) targets.

use std::fmt;
use std::str::FromStr;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// `{os, architecture, variant?, os.version?, os.features?, features?}`.
///
/// Equality is field-wise, with the two feature lists compared as sets
/// (order-independent). Use [`Platform::satisfies`] for the partial-order
/// relation used to select a manifest from an index.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct Platform {
    /// e.g. `"linux"`, `"windows"`, `"darwin"`.
    #[builder(into)]
    pub os: String,

    /// e.g. `"amd64"`, `"arm64"`.
    #[builder(into)]
    pub architecture: String,

    /// CPU variant, e.g. `"v7"`.
    #[builder(into)]
    pub variant: Option<String>,

    /// OS version, e.g. Windows build number.
    #[builder(into)]
    pub os_version: Option<String>,

    /// Additional OS features required (OCI spec: only `"win32k"` is
    /// officially defined, only under Windows).
    #[builder(into, default)]
    pub os_features: Vec<String>,

    /// Additional CPU features required.
    #[builder(into, default)]
    pub features: Vec<String>,
}

impl Platform {
    /// `linux/amd64`.
    pub fn linux_amd64() -> Self {
        Self::builder().os("linux").architecture("amd64").build()
    }

    /// `linux/arm64`.
    pub fn linux_arm64() -> Self {
        Self::builder().os("linux").architecture("arm64").build()
    }

    fn feature_sets_equal(a: &[String], b: &[String]) -> bool {
        let mut a = a.to_vec();
        let mut b = b.to_vec();
        a.sort();
        b.sort();
        a == b
    }

    /// Field-wise equality, with feature lists compared as sets.
    pub fn matches(&self, other: &Platform) -> bool {
        self.os == other.os
            && self.architecture == other.architecture
            && self.variant == other.variant
            && self.os_version == other.os_version
            && Self::feature_sets_equal(&self.os_features, &other.os_features)
            && Self::feature_sets_equal(&self.features, &other.features)
    }

    /// Returns true if `self` ("have") satisfies `spec` ("want"): `spec`'s
    /// required fields all match, and `spec`'s feature sets are subsets of
    /// `self`'s.
    pub fn satisfies(&self, spec: &Platform) -> bool {
        if self.os != spec.os || self.architecture != spec.architecture {
            return false;
        }
        if let Some(v) = &spec.variant {
            if self.variant.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        if let Some(v) = &spec.os_version {
            if self.os_version.as_deref() != Some(v.as_str()) {
                return false;
            }
        }
        let is_subset = |want: &[String], have: &[String]| want.iter().all(|f| have.contains(f));
        is_subset(&spec.os_features, &self.os_features) && is_subset(&spec.features, &self.features)
    }
}

impl PartialEq for Platform {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl FromStr for Platform {
    type Err = Error;

    /// `os/arch[/variant][:osversion]`. Up to 3 slash-separated fields
    /// before the optional `:osversion` suffix; more than 3 is an error.
    fn from_str(s: &str) -> Result<Self, Error> {
        let (fields, os_version) = match s.split_once(':') {
            Some((fields, version)) => (fields, Some(version.to_string())),
            None => (s, None),
        };

        let parts: Vec<&str> = fields.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) || parts.len() > 3 {
            return Err(Error::parse(
                "platform string",
                InvalidPlatform(s.to_string()),
            ));
        }

        let (os, architecture, variant) = match parts.as_slice() {
            [os, arch] => (os.to_string(), arch.to_string(), None),
            [os, arch, variant] => (os.to_string(), arch.to_string(), Some(variant.to_string())),
            _ => {
                return Err(Error::parse(
                    "platform string",
                    InvalidPlatform(s.to_string()),
                ))
            }
        };

        Ok(Platform::builder()
            .os(os)
            .architecture(architecture)
            .maybe_variant(variant)
            .maybe_os_version(os_version)
            .build())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        if let Some(os_version) = &self.os_version {
            write!(f, ":{os_version}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid platform format: {0:?}, expected os/arch[/variant][:osversion]")]
struct InvalidPlatform(String);
