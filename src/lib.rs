// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Segmented binary log for market data, with deterministic replay.
//!
//! Timestamped events (trades and order book updates) are appended to an
//! append-only, self-describing on-disk log:
//!
//! [header | frame frame frame ... | sparse index]
//!
//! Segments rotate by size, optionally pack frames into LZ4-compressed
//! blocks, and carry a sparse `(timestamp, offset)` index for O(log n)
//! seeks. A dataset is a directory of sealed segments plus optional
//! sidecars (a binary manifest, a JSON metadata file, a global index).
//!
//! The read side offers a streaming iterator, a memory-mapped reader for
//! uncompressed segments, a multi-segment coordinator with time/symbol
//! filters, and a worker-pool reader with k-way merged, globally
//! time-ordered output.
//!
//! On top of the log sits a deterministic replay driver: a virtual clock
//! advanced by event timestamps, optional wall-clock pacing, and an
//! interactive mode with step execution and breakpoints for debugging
//! strategies against recorded history.
//!
//! # Example usage
//!
//! ```
//! use floxlog::{LogReader, TradeRecord, WriterConfig};
//!
//! # fn main() -> floxlog::Result<()> {
//! # let folder = tempfile::tempdir()?;
//! # let path = folder.path();
//! let writer = WriterConfig::new(path).open()?;
//!
//! for i in 0..100i64 {
//!     writer.write_trade(&TradeRecord {
//!         exchange_ts_ns: i * 1_000_000,
//!         price_raw: 50_000 * floxlog::FIXED_POINT_SCALE,
//!         qty_raw: floxlog::FIXED_POINT_SCALE,
//!         trade_id: i as u64,
//!         symbol_id: 1,
//!         side: 1,
//!         ..Default::default()
//!     })?;
//! }
//!
//! writer.close()?;
//!
//! let mut reader = LogReader::open(path);
//! assert_eq!(100, reader.count()?);
//! #
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all, clippy::cargo)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::missing_errors_doc)]
#![warn(clippy::multiple_crate_versions)]

mod coding;
mod compression;
mod error;
mod event;
mod filter;
mod format;
mod index;
mod manifest;
mod metadata;
mod parallel;
mod partition;
mod reader;
mod registry;
mod replay;
mod segment;
mod validate;

pub mod ops;
pub mod time_util;

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, xxhash_rust::xxh3::Xxh3Builder>;
pub(crate) type HashSet<T> = std::collections::HashSet<T, xxhash_rust::xxh3::Xxh3Builder>;

pub use {
    coding::{Decode, DecodeError, Encode, EncodeError},
    error::{Error, Result},
    event::{BookRecord, Price, Qty, ReplayEvent, Side, FIXED_POINT_SCALE},
    filter::ReaderFilter,
    format::{
        book_record_size, index_entries_crc, BookLevel, BookRecordHeader, CompressedBlockHeader,
        CompressionType, EventKind, FrameHeader, GlobalIndexHeader, GlobalIndexSegment,
        IndexEntry, SegmentHeader, SegmentIndexHeader, TradeRecord, DEFAULT_INDEX_INTERVAL,
        SEGMENT_EXT,
    },
    index::{
        GlobalIndex, GlobalIndexBuilder, GlobalIndexEntry, IndexBuildStats, IndexBuilder,
        IndexBuilderConfig, GLOBAL_INDEX_FILE,
    },
    manifest::{get_or_build_manifest, manifest_path, SegmentManifest, MANIFEST_FILE},
    metadata::{RecordingMetadata, SymbolDescription, METADATA_FILE},
    parallel::{ParallelReader, ParallelReaderConfig, ParallelReaderStats},
    partition::{CalendarUnit, Partition, Partitioner},
    reader::{DatasetSummary, EventStream, LogReader, ReaderConfig, ReaderStats},
    registry::{
        InstrumentType, OptionType, SymbolId, SymbolInfo, SymbolRegistry,
        MAX_EQUIVALENTS_PER_SYMBOL,
    },
    replay::{
        clock::{Clock, SimulatedClock},
        driver::{
            Breakpoint, InteractiveHandle, InteractiveReplay, PauseCallback, ReplayConfig,
            ReplayDriver,
        },
        BookEvent, BookUpdateKind, OrderExecutor, ReplayContext, ReplaySpeed, ReplayState,
        Signal, Strategy, TradeEvent,
    },
    segment::{
        iterator::SegmentIterator,
        mmap::{MmapReader, MmapReaderStats, MmapSegmentReader},
        writer::{LogWriter, RotationCallback, WriterConfig, WriterStats},
        SegmentInfo,
    },
    validate::{
        is_valid_dataset, is_valid_segment, DatasetValidationResult, DatasetValidator,
        IssueKind, IssueSeverity, RepairConfig, RepairResult, SegmentRepairer, SegmentValidator,
        SegmentValidationResult, ValidationIssue, ValidatorConfig,
    },
};

#[doc(hidden)]
pub use compression::{compress, decompress, is_available as compression_available};
