//! Compression codecs for layer tar streams: magic-byte detection, and
//! decoding/encoding readers for gzip and zstd.
//!
//! Mirrors the source's `transform` module (gzip/zstd decoder selection by
//! media type flag), but built on blocking [`std::io::Read`] rather than
//! `futures_lite::Stream`, per the sync I/O model this crate uses (see
//! `pipe.rs`).

use std::io::{self, BufReader, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;

use crate::error::{Error, Result};
use crate::media::MediaType;

/// Bytes buffered by an encoder before handing a chunk to its sink.
pub const ENCODER_BUFFER_SIZE: usize = 128 * 1024;

/// gzip's `Compression::best_speed()` equivalent, matched to the source's
/// `flate2` default for layer re-compression.
const GZIP_LEVEL: u32 = 1;

/// zstd level 1, for the same reason.
const ZSTD_LEVEL: i32 = 1;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// A compression format identified from a stream's leading bytes or a
/// descriptor's media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression; the stream is a raw tar.
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// The compression a media type declares, independent of sniffing.
    pub fn of_media_type(media_type: &MediaType) -> Compression {
        match media_type {
            MediaType::OciLayerGzip | MediaType::OciLayerForeignGzip | MediaType::DockerLayerGzip | MediaType::DockerLayerForeignGzip => {
                Compression::Gzip
            }
            MediaType::OciLayerZstd => Compression::Zstd,
            _ => Compression::None,
        }
    }

    /// Sniff a compression format from a stream's first bytes, without
    /// consuming more than necessary. Returns a reader that replays the
    /// peeked bytes, so the caller sees the full stream regardless of which
    /// branch fired.
    pub fn peek<R: Read>(mut reader: R) -> io::Result<(Compression, PeekReader<R>)> {
        let mut prefix = [0u8; 4];
        let mut filled = 0;
        while filled < prefix.len() {
            let n = reader.read(&mut prefix[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let compression = if filled >= 4 && prefix == ZSTD_MAGIC {
            Compression::Zstd
        } else if filled >= 2 && prefix[..2] == GZIP_MAGIC {
            Compression::Gzip
        } else {
            Compression::None
        };

        Ok((
            compression,
            PeekReader {
                prefix,
                filled,
                pos: 0,
                inner: reader,
            },
        ))
    }
}

/// A reader that replays a small peeked prefix before resuming from the
/// wrapped reader, so sniffing a stream's compression doesn't consume it.
pub struct PeekReader<R> {
    prefix: [u8; 4],
    filled: usize,
    pos: usize,
    inner: R,
}

impl<R: Read> Read for PeekReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.filled {
            let n = (self.filled - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.prefix[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

/// A reader that decompresses according to an explicit [`Compression`], or
/// passes bytes through unmodified for [`Compression::None`].
pub enum DecodingReader<R: Read> {
    None(R),
    Gzip(GzDecoder<BufReader<R>>),
    Zstd(zstd::Decoder<'static, BufReader<R>>),
}

impl<R: Read> DecodingReader<R> {
    /// Wrap `inner` to decompress it per `compression`.
    pub fn new(compression: Compression, inner: R) -> Result<Self> {
        Ok(match compression {
            Compression::None => DecodingReader::None(inner),
            Compression::Gzip => DecodingReader::Gzip(GzDecoder::new(BufReader::new(inner))),
            Compression::Zstd => {
                DecodingReader::Zstd(zstd::Decoder::new(inner).map_err(|e| Error::parse("zstd stream", e))?)
            }
        })
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DecodingReader::None(r) => r.read(buf),
            DecodingReader::Gzip(r) => r.read(buf),
            DecodingReader::Zstd(r) => r.read(buf),
        }
    }
}

/// A writer that compresses according to an explicit [`Compression`] before
/// forwarding to its sink, buffering [`ENCODER_BUFFER_SIZE`] bytes at a time.
pub enum EncodingWriter<W: Write> {
    None(W),
    Gzip(GzEncoder<W>),
    Zstd(zstd::Encoder<'static, W>),
}

impl<W: Write> EncodingWriter<W> {
    /// Wrap `inner` to compress writes per `compression`.
    pub fn new(compression: Compression, inner: W) -> Result<Self> {
        Ok(match compression {
            Compression::None => EncodingWriter::None(inner),
            Compression::Gzip => EncodingWriter::Gzip(GzEncoder::new(inner, GzCompression::new(GZIP_LEVEL))),
            Compression::Zstd => {
                EncodingWriter::Zstd(zstd::Encoder::new(inner, ZSTD_LEVEL).map_err(|e| Error::parse("zstd stream", e))?)
            }
        })
    }

    /// Flush and finalize the underlying encoder, returning the wrapped
    /// sink.
    pub fn finish(self) -> io::Result<W> {
        match self {
            EncodingWriter::None(w) => Ok(w),
            EncodingWriter::Gzip(w) => w.finish(),
            EncodingWriter::Zstd(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for EncodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            EncodingWriter::None(w) => w.write(buf),
            EncodingWriter::Gzip(w) => w.write(buf),
            EncodingWriter::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            EncodingWriter::None(w) => w.flush(),
            EncodingWriter::Gzip(w) => w.flush(),
            EncodingWriter::Zstd(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Read as _;

    fn round_trip(compression: Compression, data: &[u8]) -> Vec<u8> {
        let mut compressed = Vec::new();
        let mut encoder = EncodingWriter::new(compression, &mut compressed).unwrap();
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap();

        let mut decoder = DecodingReader::new(compression, &compressed[..]).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn gzip_round_trips() {
        let data = b"some tar bytes, repeated ".repeat(100);
        assert_eq!(round_trip(Compression::Gzip, &data), data);
    }

    #[test]
    fn zstd_round_trips() {
        let data = b"some tar bytes, repeated ".repeat(100);
        assert_eq!(round_trip(Compression::Zstd, &data), data);
    }

    #[test]
    fn none_passes_through() {
        let data = b"raw tar bytes".to_vec();
        assert_eq!(round_trip(Compression::None, &data), data);
    }

    #[test]
    fn peek_detects_gzip() {
        let mut compressed = Vec::new();
        let mut encoder = EncodingWriter::new(Compression::Gzip, &mut compressed).unwrap();
        encoder.write_all(b"hello").unwrap();
        encoder.finish().unwrap();

        let (detected, mut reader) = Compression::peek(&compressed[..]).unwrap();
        assert_eq!(detected, Compression::Gzip);
        let mut replayed = Vec::new();
        reader.read_to_end(&mut replayed).unwrap();
        assert_eq!(replayed, compressed);
    }

    #[test]
    fn peek_detects_zstd() {
        let mut compressed = Vec::new();
        let mut encoder = EncodingWriter::new(Compression::Zstd, &mut compressed).unwrap();
        encoder.write_all(b"hello").unwrap();
        encoder.finish().unwrap();

        let (detected, _reader) = Compression::peek(&compressed[..]).unwrap();
        assert_eq!(detected, Compression::Zstd);
    }

    #[test]
    fn peek_detects_none_for_short_stream() {
        let (detected, mut reader) = Compression::peek(&b"ab"[..]).unwrap();
        assert_eq!(detected, Compression::None);
        let mut replayed = Vec::new();
        reader.read_to_end(&mut replayed).unwrap();
        assert_eq!(replayed, b"ab");
    }

    #[test]
    fn peek_detects_none_for_plain_tar_bytes() {
        let (detected, _reader) = Compression::peek(&b"plain tar content here"[..]).unwrap();
        assert_eq!(detected, Compression::None);
    }
}
