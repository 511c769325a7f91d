//! Puller/Pusher boundary traits: the shape a registry client, tarball
//! reader, or OCI layout store must present to feed images into the rest
//! of this crate. Nothing in this module talks to a network or implements
//! a registry wire protocol — that's deliberately out of scope; these
//! traits exist purely so the rest of the crate (image/index/layout
//! plumbing) can be written against a source without depending on what
//! that source actually is.

use crate::digest::Digest;
use crate::error::Result;
use crate::image::Image;
use crate::index::Index;
use crate::layer::Layer;
use crate::manifest::Descriptor;

/// A reference to a manifest or index: either a tag or a digest, scoped to
/// some repository the implementor already knows how to address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Tag(String),
    Digest(Digest),
}

/// A source of images and indexes, addressed by [`Reference`].
///
/// Implemented by registry clients, tarball readers, and OCI layout
/// stores alike; nothing else in this crate depends on which.
pub trait Puller: Send + Sync {
    /// Fetch just the descriptor for `reference` (a `HEAD`-equivalent),
    /// without fetching the manifest body.
    fn head(&self, reference: &Reference) -> Result<Descriptor>;

    /// Fetch and parse the manifest or index at `reference` as a generic
    /// artifact descriptor set, leaving the caller to decide whether it's
    /// a single image or an index.
    fn get_descriptor(&self, reference: &Reference) -> Result<Descriptor>;

    /// Fetch `reference` as a single image.
    fn image(&self, reference: &Reference) -> Result<Image>;

    /// Fetch `reference` as an index.
    fn index(&self, reference: &Reference) -> Result<Index>;

    /// Fetch a single layer by its compressed digest.
    fn layer(&self, digest: &Digest) -> Result<Layer>;

    /// List known references (tags) in the addressed repository.
    fn list(&self) -> Result<Vec<String>>;
}

/// A sink for images and indexes, addressed by [`Reference`].
pub trait Pusher: Send + Sync {
    /// Upload a single blob (manifest, config, or layer), verified against
    /// `descriptor`.
    fn upload(&self, descriptor: &Descriptor, data: Box<dyn std::io::Read + Send>) -> Result<()>;

    /// Publish an image under `reference`, assuming its blobs have already
    /// been uploaded.
    fn push(&self, reference: &Reference, image: &Image) -> Result<()>;

    /// Delete whatever `reference` points to.
    fn delete(&self, reference: &Reference) -> Result<()>;
}
