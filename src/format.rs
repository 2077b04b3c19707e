// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk structures of the segment format, version 1.
//!
//! Every multi-byte field is little-endian. Struct sizes are fixed and
//! asserted by tests; readers bail out on anything that does not match.
//!
//! A segment file is laid out as:
//!
//! `[SegmentHeader | frames or blocks ... | optional index region]`
//!
//! where the index region is `[SegmentIndexHeader | IndexEntry * N]` and its
//! start offset is recorded in the segment header.

use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// "FLOX"
pub const SEGMENT_MAGIC: u32 = 0x584F_4C46;

/// "FBLK"
pub const BLOCK_MAGIC: u32 = 0x4B4C_4246;

/// "INDX"
pub const INDEX_MAGIC: u32 = 0x5844_4E49;

/// "GIDX"
pub const GLOBAL_INDEX_MAGIC: u32 = 0x5844_4947;

/// Segment format version written by this crate
pub const FORMAT_VERSION: u16 = 1;

/// Index format version written by this crate
pub const INDEX_VERSION: u16 = 1;

/// Global index format version written by this crate
pub const GLOBAL_INDEX_VERSION: u16 = 1;

/// File extension of segment files
pub const SEGMENT_EXT: &str = "floxlog";

/// One sparse index entry every N events (and one per compressed block)
pub const DEFAULT_INDEX_INTERVAL: u16 = 1000;

/// Frames above this size are considered corrupt
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Blocks above this size (either side of compression) are considered corrupt
pub const MAX_BLOCK_SIZE: u32 = 100 * 1024 * 1024;

pub const SEGMENT_HEADER_SIZE: usize = 64;
pub const FRAME_HEADER_SIZE: usize = 12;
pub const TRADE_RECORD_SIZE: usize = 48;
pub const BOOK_LEVEL_SIZE: usize = 16;
pub const BOOK_RECORD_HEADER_SIZE: usize = 40;
pub const BLOCK_HEADER_SIZE: usize = 16;
pub const INDEX_HEADER_SIZE: usize = 32;
pub const INDEX_ENTRY_SIZE: usize = 16;
pub const GLOBAL_INDEX_HEADER_SIZE: usize = 64;
pub const GLOBAL_INDEX_SEGMENT_SIZE: usize = 48;

/// Segment header flag bits
pub mod segment_flags {
    /// Segment carries a sparse index region
    pub const HAS_INDEX: u8 = 0x01;

    /// Body is a sequence of compressed blocks instead of raw frames
    pub const COMPRESSED: u8 = 0x02;

    /// Reserved for future use
    pub const ENCRYPTED: u8 = 0x04;
}

/// Event discriminant stored in the frame header
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum EventKind {
    /// A single trade
    Trade = 1,

    /// Full order book snapshot
    BookSnapshot = 2,

    /// Incremental order book update
    BookDelta = 3,
}

impl TryFrom<u8> for EventKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            1 => Ok(Self::Trade),
            2 => Ok(Self::BookSnapshot),
            3 => Ok(Self::BookDelta),
            v => Err(DecodeError::InvalidTag(("EventKind", v))),
        }
    }
}

/// Block compression scheme recorded in the segment header
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression, frames are written directly
    #[default]
    None = 0,

    /// LZ4 block compression, one block per `index_interval` events
    Lz4 = 1,
}

impl TryFrom<u8> for CompressionType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Lz4),
            v => Err(DecodeError::InvalidTag(("CompressionType", v))),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Lz4 => write!(f, "lz4"),
        }
    }
}

/// 64-byte summary header at offset 0 of every segment.
///
/// Written as a placeholder when the segment is opened and rewritten with
/// final statistics when the segment is sealed.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentHeader {
    pub magic: u32,
    pub version: u16,
    pub flags: u8,
    pub exchange_id: u8,
    pub created_ns: i64,
    pub first_event_ns: i64,
    pub last_event_ns: i64,
    pub event_count: u32,
    pub symbol_count: u32,
    pub index_offset: u64,
    pub compression: u8,
}

impl Default for SegmentHeader {
    fn default() -> Self {
        Self {
            magic: SEGMENT_MAGIC,
            version: FORMAT_VERSION,
            flags: 0,
            exchange_id: 0,
            created_ns: 0,
            first_event_ns: 0,
            last_event_ns: 0,
            event_count: 0,
            symbol_count: 0,
            index_offset: 0,
            compression: 0,
        }
    }
}

impl SegmentHeader {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.magic == SEGMENT_MAGIC && self.version == FORMAT_VERSION
    }

    #[must_use]
    pub fn has_index(&self) -> bool {
        (self.flags & segment_flags::HAS_INDEX) != 0 && self.index_offset > 0
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        (self.flags & segment_flags::COMPRESSED) != 0
    }

    /// Compression scheme, defaulting to identity on an unknown tag.
    #[must_use]
    pub fn compression_type(&self) -> CompressionType {
        CompressionType::try_from(self.compression).unwrap_or(CompressionType::None)
    }

    /// End of the event body: index start if present, `file_size` otherwise.
    #[must_use]
    pub fn data_end(&self, file_size: u64) -> u64 {
        if self.has_index() {
            self.index_offset
        } else {
            file_size
        }
    }
}

impl Encode for SegmentHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u8(self.flags)?;
        writer.write_u8(self.exchange_id)?;
        writer.write_i64::<LittleEndian>(self.created_ns)?;
        writer.write_i64::<LittleEndian>(self.first_event_ns)?;
        writer.write_i64::<LittleEndian>(self.last_event_ns)?;
        writer.write_u32::<LittleEndian>(self.event_count)?;
        writer.write_u32::<LittleEndian>(self.symbol_count)?;
        writer.write_u64::<LittleEndian>(self.index_offset)?;
        writer.write_u8(self.compression)?;
        writer.write_all(&[0u8; 15])?;
        Ok(())
    }
}

impl Decode for SegmentHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let magic = reader.read_u32::<LittleEndian>()?;
        let version = reader.read_u16::<LittleEndian>()?;
        let flags = reader.read_u8()?;
        let exchange_id = reader.read_u8()?;
        let created_ns = reader.read_i64::<LittleEndian>()?;
        let first_event_ns = reader.read_i64::<LittleEndian>()?;
        let last_event_ns = reader.read_i64::<LittleEndian>()?;
        let event_count = reader.read_u32::<LittleEndian>()?;
        let symbol_count = reader.read_u32::<LittleEndian>()?;
        let index_offset = reader.read_u64::<LittleEndian>()?;
        let compression = reader.read_u8()?;

        let mut reserved = [0u8; 15];
        reader.read_exact(&mut reserved)?;

        Ok(Self {
            magic,
            version,
            flags,
            exchange_id,
            created_ns,
            first_event_ns,
            last_event_ns,
            event_count,
            symbol_count,
            index_offset,
            compression,
        })
    }
}

/// 12-byte header preceding every event payload.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameHeader {
    pub size: u32,
    pub crc32: u32,
    pub kind: u8,
    pub rec_version: u8,
    pub flags: u16,
}

impl Encode for FrameHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(self.size)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u8(self.kind)?;
        writer.write_u8(self.rec_version)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        Ok(())
    }
}

impl Decode for FrameHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            size: reader.read_u32::<LittleEndian>()?,
            crc32: reader.read_u32::<LittleEndian>()?,
            kind: reader.read_u8()?,
            rec_version: reader.read_u8()?,
            flags: reader.read_u16::<LittleEndian>()?,
        })
    }
}

/// 48-byte trade payload.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TradeRecord {
    pub exchange_ts_ns: i64,
    pub recv_ts_ns: i64,
    pub price_raw: i64,
    pub qty_raw: i64,
    pub trade_id: u64,
    pub symbol_id: u32,
    pub side: u8,
    pub instrument: u8,
    pub exchange_id: u16,
}

impl Encode for TradeRecord {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i64::<LittleEndian>(self.exchange_ts_ns)?;
        writer.write_i64::<LittleEndian>(self.recv_ts_ns)?;
        writer.write_i64::<LittleEndian>(self.price_raw)?;
        writer.write_i64::<LittleEndian>(self.qty_raw)?;
        writer.write_u64::<LittleEndian>(self.trade_id)?;
        writer.write_u32::<LittleEndian>(self.symbol_id)?;
        writer.write_u8(self.side)?;
        writer.write_u8(self.instrument)?;
        writer.write_u16::<LittleEndian>(self.exchange_id)?;
        Ok(())
    }
}

impl Decode for TradeRecord {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            exchange_ts_ns: reader.read_i64::<LittleEndian>()?,
            recv_ts_ns: reader.read_i64::<LittleEndian>()?,
            price_raw: reader.read_i64::<LittleEndian>()?,
            qty_raw: reader.read_i64::<LittleEndian>()?,
            trade_id: reader.read_u64::<LittleEndian>()?,
            symbol_id: reader.read_u32::<LittleEndian>()?,
            side: reader.read_u8()?,
            instrument: reader.read_u8()?,
            exchange_id: reader.read_u16::<LittleEndian>()?,
        })
    }
}

/// One price level of a book record.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BookLevel {
    pub price_raw: i64,
    pub qty_raw: i64,
}

impl Encode for BookLevel {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i64::<LittleEndian>(self.price_raw)?;
        writer.write_i64::<LittleEndian>(self.qty_raw)?;
        Ok(())
    }
}

impl Decode for BookLevel {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            price_raw: reader.read_i64::<LittleEndian>()?,
            qty_raw: reader.read_i64::<LittleEndian>()?,
        })
    }
}

/// 40-byte book payload header; `bid_count` + `ask_count` levels follow.
///
/// `subkind` 0 marks a snapshot, anything else a delta.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BookRecordHeader {
    pub exchange_ts_ns: i64,
    pub recv_ts_ns: i64,
    pub seq: i64,
    pub symbol_id: u32,
    pub bid_count: u16,
    pub ask_count: u16,
    pub subkind: u8,
    pub instrument: u8,
    pub exchange_id: u16,
}

impl BookRecordHeader {
    #[must_use]
    pub fn event_kind(&self) -> EventKind {
        if self.subkind == 0 {
            EventKind::BookSnapshot
        } else {
            EventKind::BookDelta
        }
    }
}

impl Encode for BookRecordHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i64::<LittleEndian>(self.exchange_ts_ns)?;
        writer.write_i64::<LittleEndian>(self.recv_ts_ns)?;
        writer.write_i64::<LittleEndian>(self.seq)?;
        writer.write_u32::<LittleEndian>(self.symbol_id)?;
        writer.write_u16::<LittleEndian>(self.bid_count)?;
        writer.write_u16::<LittleEndian>(self.ask_count)?;
        writer.write_u8(self.subkind)?;
        writer.write_u8(self.instrument)?;
        writer.write_u16::<LittleEndian>(self.exchange_id)?;
        writer.write_u32::<LittleEndian>(0)?; // pad
        Ok(())
    }
}

impl Decode for BookRecordHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let hdr = Self {
            exchange_ts_ns: reader.read_i64::<LittleEndian>()?,
            recv_ts_ns: reader.read_i64::<LittleEndian>()?,
            seq: reader.read_i64::<LittleEndian>()?,
            symbol_id: reader.read_u32::<LittleEndian>()?,
            bid_count: reader.read_u16::<LittleEndian>()?,
            ask_count: reader.read_u16::<LittleEndian>()?,
            subkind: reader.read_u8()?,
            instrument: reader.read_u8()?,
            exchange_id: reader.read_u16::<LittleEndian>()?,
        };
        let _pad = reader.read_u32::<LittleEndian>()?;
        Ok(hdr)
    }
}

/// Payload size of a book record with the given level counts.
#[must_use]
pub fn book_record_size(bid_count: u16, ask_count: u16) -> usize {
    BOOK_RECORD_HEADER_SIZE + (bid_count as usize + ask_count as usize) * BOOK_LEVEL_SIZE
}

/// 16-byte header preceding each compressed block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CompressedBlockHeader {
    pub magic: u32,
    pub compressed_size: u32,
    pub original_size: u32,
    pub event_count: u16,
    pub flags: u16,
}

impl Default for CompressedBlockHeader {
    fn default() -> Self {
        Self {
            magic: BLOCK_MAGIC,
            compressed_size: 0,
            original_size: 0,
            event_count: 0,
            flags: 0,
        }
    }
}

impl CompressedBlockHeader {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.magic == BLOCK_MAGIC
    }
}

impl Encode for CompressedBlockHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.original_size)?;
        writer.write_u16::<LittleEndian>(self.event_count)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        Ok(())
    }
}

impl Decode for CompressedBlockHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            magic: reader.read_u32::<LittleEndian>()?,
            compressed_size: reader.read_u32::<LittleEndian>()?,
            original_size: reader.read_u32::<LittleEndian>()?,
            event_count: reader.read_u16::<LittleEndian>()?,
            flags: reader.read_u16::<LittleEndian>()?,
        })
    }
}

/// 32-byte header of the sparse index region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SegmentIndexHeader {
    pub magic: u32,
    pub version: u16,
    pub interval: u16,
    pub entry_count: u32,
    pub crc32: u32,
    pub first_ts_ns: i64,
    pub last_ts_ns: i64,
}

impl Default for SegmentIndexHeader {
    fn default() -> Self {
        Self {
            magic: INDEX_MAGIC,
            version: INDEX_VERSION,
            interval: 0,
            entry_count: 0,
            crc32: 0,
            first_ts_ns: 0,
            last_ts_ns: 0,
        }
    }
}

impl SegmentIndexHeader {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.magic == INDEX_MAGIC && self.version == INDEX_VERSION
    }
}

impl Encode for SegmentIndexHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u16::<LittleEndian>(self.interval)?;
        writer.write_u32::<LittleEndian>(self.entry_count)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_i64::<LittleEndian>(self.first_ts_ns)?;
        writer.write_i64::<LittleEndian>(self.last_ts_ns)?;
        Ok(())
    }
}

impl Decode for SegmentIndexHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            magic: reader.read_u32::<LittleEndian>()?,
            version: reader.read_u16::<LittleEndian>()?,
            interval: reader.read_u16::<LittleEndian>()?,
            entry_count: reader.read_u32::<LittleEndian>()?,
            crc32: reader.read_u32::<LittleEndian>()?,
            first_ts_ns: reader.read_i64::<LittleEndian>()?,
            last_ts_ns: reader.read_i64::<LittleEndian>()?,
        })
    }
}

/// One sparse index checkpoint: event (or block) timestamp and byte offset.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexEntry {
    pub timestamp_ns: i64,
    pub file_offset: u64,
}

impl Encode for IndexEntry {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i64::<LittleEndian>(self.timestamp_ns)?;
        writer.write_u64::<LittleEndian>(self.file_offset)?;
        Ok(())
    }
}

impl Decode for IndexEntry {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            timestamp_ns: reader.read_i64::<LittleEndian>()?,
            file_offset: reader.read_u64::<LittleEndian>()?,
        })
    }
}

/// Serializes index entries the way they appear on disk, for CRC purposes.
#[must_use]
pub fn index_entries_bytes(entries: &[IndexEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * INDEX_ENTRY_SIZE);
    for entry in entries {
        buf.extend_from_slice(&entry.timestamp_ns.to_le_bytes());
        buf.extend_from_slice(&entry.file_offset.to_le_bytes());
    }
    buf
}

/// CRC32 over the on-disk representation of the index entries, as stored in
/// [`SegmentIndexHeader::crc32`].
#[must_use]
pub fn index_entries_crc(entries: &[IndexEntry]) -> u32 {
    crc32fast::hash(&index_entries_bytes(entries))
}

/// 64-byte header of the dataset-wide `index.floxidx` file.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GlobalIndexHeader {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    pub created_ns: i64,
    pub first_event_ns: i64,
    pub last_event_ns: i64,
    pub segment_count: u32,
    pub crc32: u32,
    pub total_events: u64,
    pub string_table_offset: u64,
}

impl Default for GlobalIndexHeader {
    fn default() -> Self {
        Self {
            magic: GLOBAL_INDEX_MAGIC,
            version: GLOBAL_INDEX_VERSION,
            flags: 0,
            created_ns: 0,
            first_event_ns: 0,
            last_event_ns: 0,
            segment_count: 0,
            crc32: 0,
            total_events: 0,
            string_table_offset: 0,
        }
    }
}

impl GlobalIndexHeader {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.magic == GLOBAL_INDEX_MAGIC && self.version == GLOBAL_INDEX_VERSION
    }
}

impl Encode for GlobalIndexHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_i64::<LittleEndian>(self.created_ns)?;
        writer.write_i64::<LittleEndian>(self.first_event_ns)?;
        writer.write_i64::<LittleEndian>(self.last_event_ns)?;
        writer.write_u32::<LittleEndian>(self.segment_count)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u64::<LittleEndian>(self.total_events)?;
        writer.write_u64::<LittleEndian>(self.string_table_offset)?;
        writer.write_all(&[0u8; 8])?;
        Ok(())
    }
}

impl Decode for GlobalIndexHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let header = Self {
            magic: reader.read_u32::<LittleEndian>()?,
            version: reader.read_u16::<LittleEndian>()?,
            flags: reader.read_u16::<LittleEndian>()?,
            created_ns: reader.read_i64::<LittleEndian>()?,
            first_event_ns: reader.read_i64::<LittleEndian>()?,
            last_event_ns: reader.read_i64::<LittleEndian>()?,
            segment_count: reader.read_u32::<LittleEndian>()?,
            crc32: reader.read_u32::<LittleEndian>()?,
            total_events: reader.read_u64::<LittleEndian>()?,
            string_table_offset: reader.read_u64::<LittleEndian>()?,
        };
        let mut reserved = [0u8; 8];
        reader.read_exact(&mut reserved)?;
        Ok(header)
    }
}

/// Per-segment entry of the global index; `filename_offset` points into the
/// trailing string table of null-terminated filenames.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GlobalIndexSegment {
    pub first_event_ns: i64,
    pub last_event_ns: i64,
    pub event_count: u32,
    pub flags: u32,
    pub file_size: u64,
    pub filename_offset: u64,
}

impl Encode for GlobalIndexSegment {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_i64::<LittleEndian>(self.first_event_ns)?;
        writer.write_i64::<LittleEndian>(self.last_event_ns)?;
        writer.write_u32::<LittleEndian>(self.event_count)?;
        writer.write_u32::<LittleEndian>(self.flags)?;
        writer.write_u64::<LittleEndian>(self.file_size)?;
        writer.write_u64::<LittleEndian>(self.filename_offset)?;
        writer.write_u64::<LittleEndian>(0)?; // reserved
        Ok(())
    }
}

impl Decode for GlobalIndexSegment {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let entry = Self {
            first_event_ns: reader.read_i64::<LittleEndian>()?,
            last_event_ns: reader.read_i64::<LittleEndian>()?,
            event_count: reader.read_u32::<LittleEndian>()?,
            flags: reader.read_u32::<LittleEndian>()?,
            file_size: reader.read_u64::<LittleEndian>()?,
            filename_offset: reader.read_u64::<LittleEndian>()?,
        };
        let _reserved = reader.read_u64::<LittleEndian>()?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes_are_fixed() -> Result<(), EncodeError> {
        assert_eq!(
            SEGMENT_HEADER_SIZE,
            SegmentHeader::default().encode_into_vec()?.len()
        );
        assert_eq!(
            FRAME_HEADER_SIZE,
            FrameHeader::default().encode_into_vec()?.len()
        );
        assert_eq!(
            TRADE_RECORD_SIZE,
            TradeRecord::default().encode_into_vec()?.len()
        );
        assert_eq!(
            BOOK_LEVEL_SIZE,
            BookLevel::default().encode_into_vec()?.len()
        );
        assert_eq!(
            BOOK_RECORD_HEADER_SIZE,
            BookRecordHeader::default().encode_into_vec()?.len()
        );
        assert_eq!(
            BLOCK_HEADER_SIZE,
            CompressedBlockHeader::default().encode_into_vec()?.len()
        );
        assert_eq!(
            INDEX_HEADER_SIZE,
            SegmentIndexHeader::default().encode_into_vec()?.len()
        );
        assert_eq!(
            INDEX_ENTRY_SIZE,
            IndexEntry::default().encode_into_vec()?.len()
        );
        assert_eq!(
            GLOBAL_INDEX_HEADER_SIZE,
            GlobalIndexHeader::default().encode_into_vec()?.len()
        );
        assert_eq!(
            GLOBAL_INDEX_SEGMENT_SIZE,
            GlobalIndexSegment::default().encode_into_vec()?.len()
        );
        Ok(())
    }

    #[test]
    fn segment_header_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let header = SegmentHeader {
            flags: segment_flags::HAS_INDEX | segment_flags::COMPRESSED,
            exchange_id: 3,
            created_ns: 1_700_000_000_000_000_000,
            first_event_ns: 1,
            last_event_ns: 999,
            event_count: 1000,
            symbol_count: 4,
            index_offset: 8192,
            compression: CompressionType::Lz4 as u8,
            ..Default::default()
        };

        let bytes = header.encode_into_vec()?;
        let decoded = SegmentHeader::decode_from(&mut &bytes[..])?;

        assert_eq!(header, decoded);
        assert!(decoded.is_valid());
        assert!(decoded.has_index());
        assert!(decoded.is_compressed());
        assert_eq!(CompressionType::Lz4, decoded.compression_type());

        Ok(())
    }

    #[test]
    fn trade_record_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let trade = TradeRecord {
            exchange_ts_ns: 1_000_000_000,
            recv_ts_ns: 1_000_000_100,
            price_raw: 50_000_000_000,
            qty_raw: 1_000_000,
            trade_id: 12345,
            symbol_id: 1,
            side: 1,
            instrument: 0,
            exchange_id: 7,
        };

        let bytes = trade.encode_into_vec()?;
        assert_eq!(TRADE_RECORD_SIZE, bytes.len());
        assert_eq!(trade, TradeRecord::decode_from(&mut &bytes[..])?);

        Ok(())
    }

    #[test]
    fn magic_bytes_spell_out() {
        assert_eq!(b"FLOX", &SEGMENT_MAGIC.to_le_bytes());
        assert_eq!(b"FBLK", &BLOCK_MAGIC.to_le_bytes());
        assert_eq!(b"INDX", &INDEX_MAGIC.to_le_bytes());
        assert_eq!(b"GIDX", &GLOBAL_INDEX_MAGIC.to_le_bytes());
    }

    #[test]
    fn unknown_event_kind_is_rejected() {
        assert!(EventKind::try_from(0).is_err());
        assert!(EventKind::try_from(4).is_err());
        assert!(matches!(EventKind::try_from(3), Ok(EventKind::BookDelta)));
    }
}
