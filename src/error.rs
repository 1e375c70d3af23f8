use std::io;

/// Errors surfaced by every format reader and writer in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// OS-level I/O failure (open, read, seek, map).
    #[error("I/O error: {0}")]
    File(#[from] io::Error),
    /// Magic bytes did not match any recognised format.
    #[error("invalid signature (magic number): {0}")]
    InvalidSignature(String),
    /// Recognised format, but a version this crate does not handle.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Format-level corruption: mismatched sizes, bad cross-references,
    /// internal offsets that disagree.
    #[error("invalid data: {0}")]
    Invalid(String),
    /// A read past the end of a buffer.
    #[error("out of bounds buffer read at 0x{0:x}")]
    OutOfBounds(usize),
    /// zlib inflate/deflate returned non-OK.
    #[error("compression error: {0}")]
    Compression(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::Invalid(msg.into())
    }
}
