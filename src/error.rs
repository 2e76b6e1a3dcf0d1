//! Error types for building and reading packed tries.

use thiserror::Error;

/// Broad classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An illegal size or value was supplied by the caller.
    Configuration,
    /// No pointer width can address the built structure.
    Capacity,
    /// The buffer is malformed or truncated.
    Decoding,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Configuration
    #[error("invalid bitmap size {0} (expected 1, 2, 4 or 8 bytes)")]
    InvalidBitmapSize(usize),

    #[error("invalid value size {0} (expected 1, 2, 4 or 8 bytes)")]
    InvalidValueSize(usize),

    #[error("invalid pointer size {0} (expected 1 to 4 bytes)")]
    InvalidPointerSize(usize),

    #[error("value {value:#x} for key {key} does not fit in {value_size} bytes")]
    ValueTooWide {
        key: u64,
        value: u64,
        value_size: usize,
    },

    // Capacity
    /// `pointer_size` is the widest width that was tried.
    #[error("{bytes} bytes of nodes cannot be addressed with {pointer_size}-byte pointers")]
    Capacity { bytes: u64, pointer_size: usize },

    // Decoding
    #[error("buffer of {len} bytes is too short for a trie header")]
    BufferTooShort { len: usize },

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    #[error("read of {need} bytes at data offset {offset} exceeds data section of {len} bytes")]
    Truncated { offset: usize, need: usize, len: usize },

    #[error("malformed trie: {0}")]
    Malformed(&'static str),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidBitmapSize(_)
            | Error::InvalidValueSize(_)
            | Error::InvalidPointerSize(_)
            | Error::ValueTooWide { .. } => ErrorKind::Configuration,
            Error::Capacity { .. } => ErrorKind::Capacity,
            Error::BufferTooShort { .. }
            | Error::UnsupportedVersion(_)
            | Error::InvalidHeader(_)
            | Error::Truncated { .. }
            | Error::Malformed(_) => ErrorKind::Decoding,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
