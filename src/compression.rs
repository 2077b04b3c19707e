// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{format::CompressionType, Error, Result};

/// Whether the given codec can actually be used by this build.
///
/// Identity is always available; LZ4 requires the `lz4` feature.
#[must_use]
pub fn is_available(compression: CompressionType) -> bool {
    match compression {
        CompressionType::None => true,
        CompressionType::Lz4 => cfg!(feature = "lz4"),
    }
}

/// Upper bound for the compressed size of `src_size` input bytes.
///
/// # Errors
///
/// Will return `Err` if the codec is not compiled in.
pub fn max_compressed_size(compression: CompressionType, src_size: usize) -> Result<usize> {
    match compression {
        CompressionType::None => Ok(src_size),

        #[cfg(feature = "lz4")]
        CompressionType::Lz4 => Ok(lz4_flex::block::get_maximum_output_size(src_size)),

        #[cfg(not(feature = "lz4"))]
        CompressionType::Lz4 => Err(Error::CompressionUnavailable(compression)),
    }
}

/// Compresses a block of frames.
///
/// The original size is carried out-of-band (in the block header), so the
/// compressed bytes do not embed it.
///
/// # Errors
///
/// Will return `Err` if the codec is not compiled in or compression fails.
pub fn compress(compression: CompressionType, src: &[u8]) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(src.to_vec()),

        #[cfg(feature = "lz4")]
        CompressionType::Lz4 => Ok(lz4_flex::block::compress(src)),

        #[cfg(not(feature = "lz4"))]
        CompressionType::Lz4 => Err(Error::CompressionUnavailable(compression)),
    }
}

/// Decompresses a block, which must expand to exactly `original_size` bytes.
///
/// # Errors
///
/// Will return `Err` if the codec is not compiled in, the data is corrupt, or
/// the decompressed length does not match.
pub fn decompress(
    compression: CompressionType,
    src: &[u8],
    original_size: usize,
) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => {
            if src.len() != original_size {
                return Err(Error::Decompress);
            }
            Ok(src.to_vec())
        }

        #[cfg(feature = "lz4")]
        CompressionType::Lz4 => {
            let out =
                lz4_flex::block::decompress(src, original_size).map_err(|_| Error::Decompress)?;
            if out.len() != original_size {
                return Err(Error::Decompress);
            }
            Ok(out)
        }

        #[cfg(not(feature = "lz4"))]
        CompressionType::Lz4 => Err(Error::CompressionUnavailable(compression)),
    }
}
