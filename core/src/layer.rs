//! The layer abstraction: a single filesystem diff within an image, in one
//! of three shapes depending on where its bytes currently live.
//!
//! A [`Layer`] always knows its media type. Beyond that:
//!
//! - [`Layer::Materialized`] wraps bytes already resident in memory or on
//!   disk; digest, diff ID, and size are cheap known scalars, and the
//!   content can be read any number of times.
//! - [`Layer::Streaming`] wraps a single-use byte source (e.g. a registry
//!   pull). Its digest/diff ID/size are undefined until the stream has been
//!   fully consumed once — see [`Error::NotYetComputed`] — and the stream
//!   itself can only be taken once — see [`Error::AlreadyConsumed`].
//! - [`Layer::Foreign`] describes a layer whose bytes are not available
//!   locally at all (an OCI "nondistributable" layer hosted elsewhere);
//!   only its descriptor is known.
//!
//! This mirrors the source's [`Layer`]/[`LayerMediaType`] pair, but widened
//! from "descriptor known, bytes maybe available via pull" into an explicit
//! three-state model per this crate's design (content can arrive from a
//! pull, a local tarball, or never at all).

use std::io::{Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use crate::codec::{Compression, DecodingReader};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::media::MediaType;
use crate::pipe;

/// A filesystem diff layer, in one of three states depending on where its
/// bytes live.
#[derive(Clone)]
pub enum Layer {
    Materialized(MaterializedLayer),
    Streaming(Arc<StreamingLayer>),
    Foreign(ForeignLayer),
}

impl Layer {
    /// The layer's declared media type.
    pub fn media_type(&self) -> &MediaType {
        match self {
            Layer::Materialized(l) => &l.media_type,
            Layer::Streaming(l) => &l.media_type,
            Layer::Foreign(l) => &l.media_type,
        }
    }

    /// The compressed-blob digest, if known without consuming a stream.
    pub fn digest(&self) -> Result<Digest> {
        match self {
            Layer::Materialized(l) => Ok(l.digest.clone()),
            Layer::Streaming(l) => l.digest(),
            Layer::Foreign(l) => Ok(l.descriptor_digest.clone()),
        }
    }

    /// The compressed-blob size, if known without consuming a stream.
    pub fn size(&self) -> Result<i64> {
        match self {
            Layer::Materialized(l) => Ok(l.size),
            Layer::Streaming(l) => l.size(),
            Layer::Foreign(l) => Ok(l.descriptor_size),
        }
    }

    /// The uncompressed diff ID, if known without consuming a stream.
    pub fn diff_id(&self) -> Result<Digest> {
        match self {
            Layer::Materialized(l) => Ok(l.diff_id.clone()),
            Layer::Streaming(l) => l.diff_id(),
            Layer::Foreign(_) => Err(Error::not_found("diff id for foreign layer")),
        }
    }

    /// Open a fresh reader over the layer's compressed bytes.
    ///
    /// For a [`Layer::Materialized`] this can be called repeatedly. For a
    /// [`Layer::Streaming`] this can only succeed once; subsequent calls
    /// fail with [`Error::AlreadyConsumed`]. A [`Layer::Foreign`] layer has
    /// no local bytes and always fails with [`Error::NotFound`].
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        match self {
            Layer::Materialized(l) => l.open(),
            Layer::Streaming(l) => l.take_reader(),
            Layer::Foreign(_) => Err(Error::not_found("bytes for foreign layer")),
        }
    }

    /// Returns true for a [`Layer::Foreign`] layer.
    pub fn is_foreign(&self) -> bool {
        matches!(self, Layer::Foreign(_))
    }
}

/// The underlying byte source a [`MaterializedLayer`] reads from.
#[derive(Clone)]
enum MaterializedSource {
    Bytes(Arc<Vec<u8>>),
    File(Arc<std::path::PathBuf>),
}

/// A layer whose compressed bytes are fully resident (in memory or on
/// disk), so its digest, diff ID, and size are known up front and its
/// content can be read repeatedly.
#[derive(Clone)]
pub struct MaterializedLayer {
    pub media_type: MediaType,
    pub digest: Digest,
    pub diff_id: Digest,
    pub size: i64,
    source: MaterializedSource,
}

impl MaterializedLayer {
    /// Build a materialized layer from bytes already held in memory,
    /// computing its compressed digest and decompressed diff ID.
    pub fn from_bytes(media_type: MediaType, bytes: Vec<u8>) -> Result<Self> {
        let digest = Digest::sha256_of(&bytes);
        let size = bytes.len() as i64;
        let diff_id = Self::compute_diff_id(&media_type, &bytes)?;
        Ok(MaterializedLayer {
            media_type,
            digest,
            diff_id,
            size,
            source: MaterializedSource::Bytes(Arc::new(bytes)),
        })
    }

    /// Build a materialized layer backed by a file on disk, computing its
    /// compressed digest and decompressed diff ID by reading it once.
    pub fn from_file(media_type: MediaType, path: std::path::PathBuf) -> Result<Self> {
        let (digest, size) = Digest::sha256_reader(std::fs::File::open(&path)?)?;
        let diff_id = {
            let compression = Compression::of_media_type(&media_type);
            let file = std::fs::File::open(&path)?;
            let mut decoder = crate::codec::DecodingReader::new(compression, file)?;
            let (diff_id, _) = Digest::sha256_reader(&mut decoder)?;
            diff_id
        };
        Ok(MaterializedLayer {
            media_type,
            digest,
            diff_id,
            size: size as i64,
            source: MaterializedSource::File(Arc::new(path)),
        })
    }

    fn compute_diff_id(media_type: &MediaType, compressed: &[u8]) -> Result<Digest> {
        let compression = Compression::of_media_type(media_type);
        let mut decoder = crate::codec::DecodingReader::new(compression, compressed)?;
        let (diff_id, _) = Digest::sha256_reader(&mut decoder)?;
        Ok(diff_id)
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        match &self.source {
            MaterializedSource::Bytes(bytes) => Ok(Box::new(VecReader::new(bytes.clone()))),
            MaterializedSource::File(path) => Ok(Box::new(std::fs::File::open(path.as_ref())?)),
        }
    }
}

/// An owning, restartable reader over a reference-counted byte buffer.
struct VecReader {
    bytes: Arc<Vec<u8>>,
    pos: usize,
}

impl VecReader {
    fn new(bytes: Arc<Vec<u8>>) -> Self {
        VecReader { bytes, pos: 0 }
    }
}

impl Read for VecReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = &self.bytes[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Lifecycle of a [`StreamingLayer`]'s single-use reader.
enum StreamState {
    Pending(Box<dyn FnOnce() -> Result<Box<dyn Read + Send>> + Send>),
    InProgress,
    Ready {
        digest: Digest,
        diff_id: Digest,
        size: i64,
    },
    Failed(String),
}

/// A layer whose compressed bytes come from a single-use source (e.g. a
/// registry pull). Its scalars are undefined until the reader returned by
/// [`StreamingLayer::take_reader`] has been read to EOF.
pub struct StreamingLayer {
    pub media_type: MediaType,
    state: Mutex<StreamState>,
}

impl StreamingLayer {
    /// Build a streaming layer whose bytes are produced lazily by `open`,
    /// called at most once, the first time a reader is taken.
    pub fn new<F>(media_type: MediaType, open: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn Read + Send>> + Send + 'static,
    {
        StreamingLayer {
            media_type,
            state: Mutex::new(StreamState::Pending(Box::new(open))),
        }
    }

    /// Take the single-use reader. Consuming it to EOF through the
    /// returned wrapper populates this layer's digest/diff-id/size;
    /// calling this a second time fails with [`Error::AlreadyConsumed`].
    pub fn take_reader(self: &Arc<Self>) -> Result<Box<dyn Read + Send>> {
        let open = {
            let mut state = self.state.lock().expect("streaming layer mutex poisoned");
            match std::mem::replace(&mut *state, StreamState::InProgress) {
                StreamState::Pending(open) => open,
                other => {
                    *state = other;
                    return Err(Error::AlreadyConsumed);
                }
            }
        };
        let inner = open()?;
        let compression = Compression::of_media_type(&self.media_type);

        // Hashing the decompressed bytes requires decompressing the stream
        // as it's read; since the caller only sees the compressed bytes,
        // the decompression happens on a background thread fed through our
        // pipe, mirroring the source's goroutine + io.Pipe dual-hash.
        let (diff_writer, diff_reader) = pipe::pipe();
        let (diff_tx, diff_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = (|| -> Result<Digest> {
                let mut decoder = DecodingReader::new(compression, diff_reader)?;
                let (digest, _) = Digest::sha256_reader(&mut decoder)?;
                Ok(digest)
            })();
            let _ = diff_tx.send(result);
        });

        Ok(Box::new(FinalizingReader {
            layer: self.clone(),
            hasher: sha2::Sha256::new(),
            diff_writer: Some(diff_writer),
            diff_rx,
            inner,
            read: 0,
        }))
    }

    fn digest(&self) -> Result<Digest> {
        match &*self.state.lock().expect("streaming layer mutex poisoned") {
            StreamState::Ready { digest, .. } => Ok(digest.clone()),
            StreamState::Failed(msg) => Err(Error::parse("streaming layer", StreamingFailure(msg.clone()))),
            _ => Err(Error::NotYetComputed),
        }
    }

    fn diff_id(&self) -> Result<Digest> {
        match &*self.state.lock().expect("streaming layer mutex poisoned") {
            StreamState::Ready { diff_id, .. } => Ok(diff_id.clone()),
            StreamState::Failed(msg) => Err(Error::parse("streaming layer", StreamingFailure(msg.clone()))),
            _ => Err(Error::NotYetComputed),
        }
    }

    fn size(&self) -> Result<i64> {
        match &*self.state.lock().expect("streaming layer mutex poisoned") {
            StreamState::Ready { size, .. } => Ok(*size),
            StreamState::Failed(msg) => Err(Error::parse("streaming layer", StreamingFailure(msg.clone()))),
            _ => Err(Error::NotYetComputed),
        }
    }

    fn mark_ready(&self, digest: Digest, diff_id: Digest, size: i64) {
        *self.state.lock().expect("streaming layer mutex poisoned") = StreamState::Ready { digest, diff_id, size };
    }

    fn mark_failed(&self, msg: String) {
        *self.state.lock().expect("streaming layer mutex poisoned") = StreamState::Failed(msg);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct StreamingFailure(String);

use sha2::Digest as _;

/// Wraps a streaming layer's source reader, hashing compressed bytes as
/// the caller reads them and tee-ing the same bytes into a background
/// thread that decompresses and hashes them for the diff ID. Publishes the
/// result to the owning [`StreamingLayer`] on clean EOF, or marks it
/// failed on any error (including the caller abandoning the read, which
/// the diff thread observes as a broken pipe).
struct FinalizingReader {
    layer: Arc<StreamingLayer>,
    hasher: sha2::Sha256,
    diff_writer: Option<pipe::PipeWriter>,
    diff_rx: mpsc::Receiver<Result<Digest>>,
    inner: Box<dyn Read + Send>,
    read: i64,
}

impl Read for FinalizingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = match self.inner.read(buf) {
            Ok(n) => n,
            Err(e) => {
                self.layer.mark_failed(e.to_string());
                return Err(e);
            }
        };
        if n == 0 {
            // Dropping the writer signals EOF to the diff thread's decoder.
            self.diff_writer.take();
            let diff_id = match self.finalize_diff_id() {
                Ok(d) => d,
                Err(e) => {
                    self.layer.mark_failed(e.to_string());
                    return Err(std::io::Error::other(e));
                }
            };
            let digest = Digest::sha256(self.hasher.clone().finalize());
            self.layer.mark_ready(digest, diff_id, self.read);
            return Ok(0);
        }
        self.hasher.update(&buf[..n]);
        self.read += n as i64;
        if let Some(writer) = self.diff_writer.as_mut() {
            if let Err(e) = writer.write_all(&buf[..n]) {
                self.diff_writer.take();
                return Err(e);
            }
        }
        Ok(n)
    }
}

impl FinalizingReader {
    fn finalize_diff_id(&mut self) -> Result<Digest> {
        self.diff_rx.recv().map_err(|_| {
            Error::parse(
                "streaming layer",
                StreamingFailure("diff id thread never reported a result".to_string()),
            )
        })?
    }
}

/// A layer known only by its descriptor; no local bytes exist.
#[derive(Clone)]
pub struct ForeignLayer {
    pub media_type: MediaType,
    pub descriptor_digest: Digest,
    pub descriptor_size: i64,
    pub urls: Vec<String>,
}

impl ForeignLayer {
    /// Build a foreign-layer placeholder from its descriptor fields.
    pub fn new(media_type: MediaType, digest: Digest, size: i64, urls: Vec<String>) -> Self {
        ForeignLayer {
            media_type,
            descriptor_digest: digest,
            descriptor_size: size,
            urls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Read as _;

    #[test]
    fn materialized_from_bytes_computes_scalars() {
        let layer = MaterializedLayer::from_bytes(MediaType::OciLayer, b"hello tar bytes".to_vec()).unwrap();
        assert_eq!(layer.digest, Digest::sha256_of(b"hello tar bytes"));
        assert_eq!(layer.diff_id, Digest::sha256_of(b"hello tar bytes"));
        assert_eq!(layer.size, 15);
    }

    #[test]
    fn materialized_can_be_read_twice() {
        let layer = MaterializedLayer::from_bytes(MediaType::OciLayer, b"abc".to_vec()).unwrap();
        let mut first = Vec::new();
        layer.open().unwrap().read_to_end(&mut first).unwrap();
        let mut second = Vec::new();
        layer.open().unwrap().read_to_end(&mut second).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, b"abc");
    }

    #[test]
    fn streaming_layer_computes_scalars_after_full_read() {
        let data = b"streamed tar payload".to_vec();
        let expected_digest = Digest::sha256_of(&data);
        let streaming = Arc::new(StreamingLayer::new(MediaType::OciLayer, {
            let data = data.clone();
            move || Ok(Box::new(std::io::Cursor::new(data)) as Box<dyn Read + Send>)
        }));
        let layer = Layer::Streaming(streaming.clone());

        assert!(matches!(layer.digest(), Err(Error::NotYetComputed)));

        let mut out = Vec::new();
        layer.open().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, data);

        assert_eq!(layer.digest().unwrap(), expected_digest);
        assert_eq!(layer.diff_id().unwrap(), expected_digest);
        assert_eq!(layer.size().unwrap(), data.len() as i64);
    }

    #[test]
    fn streaming_layer_rejects_second_open() {
        let streaming = Arc::new(StreamingLayer::new(MediaType::OciLayer, || {
            Ok(Box::new(std::io::Cursor::new(b"x".to_vec())) as Box<dyn Read + Send>)
        }));
        let layer = Layer::Streaming(streaming);
        let mut first = layer.open().unwrap();
        let mut buf = Vec::new();
        first.read_to_end(&mut buf).unwrap();
        assert!(matches!(layer.open(), Err(Error::AlreadyConsumed)));
    }

    #[test]
    fn foreign_layer_has_no_bytes() {
        let layer = Layer::Foreign(ForeignLayer::new(
            MediaType::OciLayerForeignGzip,
            Digest::sha256_of(b"placeholder"),
            10,
            vec!["https://example.test/layer".to_string()],
        ));
        assert!(layer.is_foreign());
        assert!(layer.open().is_err());
        assert!(layer.digest().is_ok());
        assert!(layer.diff_id().is_err());
    }
}
