// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{DecodeError, EncodeError};

/// Represents errors that can occur in the replay log
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Invalid segment format version
    InvalidVersion(Option<u16>),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// JSON (de)serialization failed
    Json(serde_json::Error),

    /// Compression failed
    Compress,

    /// Decompression failed
    Decompress,

    /// The requested compression codec is not compiled in
    CompressionUnavailable(crate::CompressionType),

    /// Payload checksum did not match the frame header
    ChecksumMismatch {
        /// CRC32 stored in the frame header
        expected: u32,
        /// CRC32 computed over the payload
        got: u32,
    },

    /// A frame or block declared a size above the format ceiling
    FrameTooLarge(u64),

    /// Memory-mapped access requires an uncompressed segment
    CompressedSegmentNotMappable,

    /// Segment has no index region
    MissingIndex,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReplayLogError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Replay log result
pub type Result<T> = std::result::Result<T, Error>;
