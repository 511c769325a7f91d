#![deny(clippy::uninlined_format_args)]
#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

//! A content-addressed container-image object model, plus the OCI Image
//! Layout and Docker save-tarball storage formats built on top of it.
//!
//! The object model (manifests, configs, layers, digests) is deliberately
//! independent of any particular source or sink: an [`image::Image`] can
//! come from a registry pull, an [`layout::Layout`] on disk, or a
//! [`tarball::TarballReader`], and [`partial::ImageCoreExt`] derives the
//! same read operations regardless. [`transport`] defines the boundary a
//! registry client would implement against, but no such client lives here.

pub mod cache;
pub mod codec;
pub mod compare;
pub mod digest;
pub mod error;
pub mod image;
pub mod index;
pub mod layer;
pub mod layout;
pub mod manifest;
pub mod media;
pub mod mutate;
pub mod partial;
pub mod pipe;
pub mod platform;
pub mod pool;
pub mod tarball;
pub mod transport;
pub mod validate;
pub mod verify;

pub use error::{Error, Result};
