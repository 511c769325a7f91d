//! Crate-wide error type.
//!
//! One variant per error kind named in the core's error handling design:
//! callers match on these rather than parse strings, since this crate is a
//! library consumed by registry clients, daemon bridges, and CLIs, not an
//! application in its own right.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::digest::Digest;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the container-image object model and layout engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A digest string did not match `algorithm:hex`, or its hex length
    /// didn't match the algorithm.
    #[error("invalid digest: {0}")]
    InvalidHash(String),

    /// A digest named an algorithm this crate doesn't implement.
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A stream or descriptor's actual digest didn't match what was declared.
    #[error("digest mismatch: got {got}, want {want}")]
    DigestMismatch {
        /// The digest actually observed.
        got: Digest,
        /// The digest that was declared or expected.
        want: Digest,
    },

    /// A stream's actual length disagreed with its declared size.
    #[error("size mismatch: got {got}, want {want}")]
    SizeMismatch {
        /// The size actually observed.
        got: i64,
        /// The size that was declared or expected.
        want: i64,
    },

    /// A blob, layer, or reference was not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write raced with another write to the same target in a context
    /// where idempotent dedup does not apply.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A walker or garbage collector encountered a media type it doesn't
    /// know how to recurse into.
    #[error("unknown media type: {0}")]
    UnknownMediaType(String),

    /// A streaming layer's digest/diff-id/size was queried before the
    /// underlying stream was fully consumed.
    #[error("digest not yet computed: stream has not been fully read")]
    NotYetComputed,

    /// A streaming layer's single-use reader was requested a second time.
    #[error("layer stream already consumed")]
    AlreadyConsumed,

    /// A manifest, config, or platform string failed to parse.
    #[error("failed to parse {what}: {cause}")]
    Parse {
        /// What was being parsed, for error context (e.g. "platform string").
        what: String,
        /// The underlying parse failure.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An underlying filesystem or pipe operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A JSON document could not be (de)serialized.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// The operation was aborted via a cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap an arbitrary error as a [`Error::Parse`] failure, tagging what
    /// was being parsed.
    pub fn parse(what: impl Into<String>, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Parse {
            what: what.into(),
            cause: Box::new(cause),
        }
    }

    /// Construct a [`Error::NotFound`] with a formatted message.
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }
}

/// A cooperative cancellation signal shared across an operation's worker
/// threads.
///
/// Cloning shares the underlying flag; [`CancellationToken::cancel`] from
/// any clone is observed by all others on their next [`CancellationToken::check`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every holder of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true if [`CancellationToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(Error::Cancelled)` if the token has been cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
