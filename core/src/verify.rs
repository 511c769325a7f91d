//! A size- and digest-checked pass-through reader.

use std::io::{self, Read};

use sha2::{Digest as _, Sha256};

use crate::digest::Digest;
use crate::error::Error;

/// Sentinel for "no declared size" — the reader skips the size check.
pub const SIZE_UNKNOWN: i64 = -1;

/// Wraps a reader, hashing and counting bytes as they pass through, and
/// failing as soon as a mismatch is detectable.
///
/// - If the declared size is known, reading past it fails immediately with
///   [`Error::SizeMismatch`], before returning the excess bytes to the
///   caller.
/// - On EOF, the accumulated digest is compared to the expected digest; a
///   mismatch is reported as [`Error::DigestMismatch`]. If the declared size
///   is known and the total read differs, [`Error::SizeMismatch`] is
///   reported instead (checked first, since a size-mismatched stream makes a
///   digest mismatch uninformative).
pub struct VerifyingReader<R> {
    inner: R,
    hasher: Sha256,
    algorithm: String,
    expected_digest: Digest,
    expected_size: i64,
    read: i64,
    finished: bool,
}

impl<R: Read> VerifyingReader<R> {
    /// Wrap `inner`, checking its bytes against `expected_digest` and
    /// (unless `SIZE_UNKNOWN`) `expected_size`.
    ///
    /// Fails immediately if `expected_digest`'s algorithm isn't supported.
    pub fn new(inner: R, expected_digest: Digest, expected_size: i64) -> Result<Self, Error> {
        if !expected_digest.is_supported() {
            return Err(Error::UnsupportedAlgorithm(expected_digest.algorithm.clone()));
        }
        Ok(Self {
            inner,
            hasher: Sha256::new(),
            algorithm: expected_digest.algorithm.clone(),
            expected_digest,
            expected_size,
            read: 0,
            finished: false,
        })
    }

    fn size_known(&self) -> bool {
        self.expected_size != SIZE_UNKNOWN
    }

    fn finalize(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if self.size_known() && self.read != self.expected_size {
            return Err(io::Error::other(Error::SizeMismatch {
                got: self.read,
                want: self.expected_size,
            }));
        }

        let got = Digest {
            algorithm: self.algorithm.clone(),
            hex: hex::encode(self.hasher.clone().finalize()),
        };
        if got != self.expected_digest {
            return Err(io::Error::other(Error::DigestMismatch {
                got,
                want: self.expected_digest.clone(),
            }));
        }
        Ok(())
    }
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.size_known() {
            let remaining = self.expected_size - self.read;
            if remaining < 0 {
                return Err(io::Error::other(Error::SizeMismatch {
                    got: self.read,
                    want: self.expected_size,
                }));
            }
            if remaining == 0 {
                // Confirm there isn't more data than declared before
                // reporting a clean EOF.
                let mut probe = [0u8; 1];
                let n = self.inner.read(&mut probe)?;
                if n > 0 {
                    return Err(io::Error::other(Error::SizeMismatch {
                        got: self.read + 1,
                        want: self.expected_size,
                    }));
                }
                self.finalize()?;
                return Ok(0);
            }
        }

        let n = self.inner.read(buf)?;
        if n == 0 {
            self.finalize()?;
            return Ok(0);
        }

        self.hasher.update(&buf[..n]);
        self.read += n as i64;

        if self.size_known() && self.read > self.expected_size {
            return Err(io::Error::other(Error::SizeMismatch {
                got: self.read,
                want: self.expected_size,
            }));
        }

        Ok(n)
    }
}
