// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError},
    compression,
    event::ReplayEvent,
    format::{
        index_entries_crc, CompressedBlockHeader, EventKind, FrameHeader, IndexEntry,
        SegmentHeader, SegmentIndexHeader, BLOCK_HEADER_SIZE, FRAME_HEADER_SIZE,
        INDEX_HEADER_SIZE, MAX_BLOCK_SIZE, MAX_FRAME_SIZE, SEGMENT_HEADER_SIZE,
    },
    Error, Result,
};
use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
};

/// Reads through one segment in file order.
///
/// Frames are CRC-verified and decoded one at a time; compressed segments
/// are handled transparently by inflating one block at a time. Iteration
/// stops cleanly at the index region (or EOF) and returns an error on the
/// first structural problem — detailed diagnosis is the validator's job.
pub struct SegmentIterator {
    file: BufReader<File>,
    header: SegmentHeader,
    position: u64,
    data_end: u64,
    verify_crc: bool,

    payload_buf: Vec<u8>,
    index: Vec<IndexEntry>,

    block_data: Vec<u8>,
    block_offset: usize,
    block_events_remaining: u16,
}

impl SegmentIterator {
    /// Opens a segment and validates its summary header.
    ///
    /// # Errors
    ///
    /// Will return `Err` on IO errors, a bad magic number or an unsupported
    /// version.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file_size = std::fs::metadata(path)?.len();
        let mut file = BufReader::new(File::open(path)?);

        let header = SegmentHeader::decode_from(&mut file)?;
        if header.magic != crate::format::SEGMENT_MAGIC {
            return Err(Error::Decode(DecodeError::InvalidHeader("Segment")));
        }
        if header.version != crate::format::FORMAT_VERSION {
            return Err(Error::InvalidVersion(Some(header.version)));
        }

        Ok(Self {
            file,
            data_end: header.data_end(file_size),
            header,
            position: SEGMENT_HEADER_SIZE as u64,
            verify_crc: true,
            payload_buf: Vec::with_capacity(64 * 1024),
            index: vec![],
            block_data: vec![],
            block_offset: 0,
            block_events_remaining: 0,
        })
    }

    /// Disables payload CRC verification (faster bulk scans).
    #[must_use]
    pub fn verify_crc(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }

    #[must_use]
    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.header.is_compressed()
    }

    #[must_use]
    pub fn has_index(&self) -> bool {
        !self.index.is_empty()
    }

    #[must_use]
    pub fn index_entries(&self) -> &[IndexEntry] {
        &self.index
    }

    /// Produces the next event, or `None` at the end of the data region.
    ///
    /// # Errors
    ///
    /// Will return `Err` on IO errors, CRC mismatches or malformed frames.
    pub fn next_event(&mut self) -> Result<Option<ReplayEvent>> {
        if self.header.is_compressed() {
            self.next_compressed()
        } else {
            self.next_uncompressed()
        }
    }

    fn next_uncompressed(&mut self) -> Result<Option<ReplayEvent>> {
        // Trailing bytes smaller than a frame header are the end of data
        if self.position + FRAME_HEADER_SIZE as u64 > self.data_end {
            return Ok(None);
        }

        let frame = FrameHeader::decode_from(&mut self.file)?;
        self.position += FRAME_HEADER_SIZE as u64;

        if frame.size > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(frame.size.into()));
        }
        if self.position + u64::from(frame.size) > self.data_end {
            return Err(Error::Decode(DecodeError::InvalidHeader("Frame")));
        }

        let kind = EventKind::try_from(frame.kind).map_err(Error::Decode)?;

        self.payload_buf.resize(frame.size as usize, 0);
        self.file.read_exact(&mut self.payload_buf)?;
        self.position += u64::from(frame.size);

        if self.verify_crc {
            let computed = crc32fast::hash(&self.payload_buf);
            if computed != frame.crc32 {
                return Err(Error::ChecksumMismatch {
                    expected: frame.crc32,
                    got: computed,
                });
            }
        }

        let event = ReplayEvent::decode_payload(kind, &self.payload_buf).map_err(Error::Decode)?;
        Ok(Some(event))
    }

    fn next_compressed(&mut self) -> Result<Option<ReplayEvent>> {
        while self.block_events_remaining == 0 {
            if !self.load_next_block()? {
                return Ok(None);
            }
        }

        if self.block_offset + FRAME_HEADER_SIZE > self.block_data.len() {
            return Err(Error::Decode(DecodeError::InvalidHeader("Frame")));
        }

        let mut cursor = &self.block_data[self.block_offset..];
        let frame = FrameHeader::decode_from(&mut cursor)?;
        self.block_offset += FRAME_HEADER_SIZE;

        if frame.size > MAX_FRAME_SIZE
            || self.block_offset + frame.size as usize > self.block_data.len()
        {
            return Err(Error::Decode(DecodeError::InvalidHeader("Frame")));
        }

        let kind = EventKind::try_from(frame.kind).map_err(Error::Decode)?;

        let payload = &self.block_data[self.block_offset..self.block_offset + frame.size as usize];

        if self.verify_crc {
            let computed = crc32fast::hash(payload);
            if computed != frame.crc32 {
                return Err(Error::ChecksumMismatch {
                    expected: frame.crc32,
                    got: computed,
                });
            }
        }

        let event = ReplayEvent::decode_payload(kind, payload).map_err(Error::Decode)?;

        self.block_offset += frame.size as usize;
        self.block_events_remaining -= 1;

        Ok(Some(event))
    }

    fn load_next_block(&mut self) -> Result<bool> {
        if self.position + BLOCK_HEADER_SIZE as u64 > self.data_end {
            return Ok(false);
        }

        let block = CompressedBlockHeader::decode_from(&mut self.file)?;
        self.position += BLOCK_HEADER_SIZE as u64;

        if !block.is_valid() {
            return Err(Error::Decode(DecodeError::InvalidHeader("Block")));
        }
        if block.compressed_size > MAX_BLOCK_SIZE || block.original_size > MAX_BLOCK_SIZE {
            return Err(Error::FrameTooLarge(block.compressed_size.into()));
        }

        self.payload_buf.resize(block.compressed_size as usize, 0);
        self.file.read_exact(&mut self.payload_buf)?;
        self.position += u64::from(block.compressed_size);

        self.block_data = compression::decompress(
            self.header.compression_type(),
            &self.payload_buf,
            block.original_size as usize,
        )?;

        self.block_offset = 0;
        self.block_events_remaining = block.event_count;

        Ok(true)
    }

    /// Loads and verifies the sparse index, then rewinds to the data start.
    ///
    /// Returns `false` when the segment has no index.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the index region is malformed or its CRC does
    /// not match.
    pub fn load_index(&mut self) -> Result<bool> {
        if !self.header.has_index() {
            return Ok(false);
        }

        self.seek(self.header.index_offset)?;

        let result = self.read_index_region();

        // Data position is unchanged as far as callers are concerned
        self.seek(SEGMENT_HEADER_SIZE as u64)?;

        let entries = result?;
        self.index = entries;
        Ok(true)
    }

    fn read_index_region(&mut self) -> Result<Vec<IndexEntry>> {
        let index_header = SegmentIndexHeader::decode_from(&mut self.file)?;
        self.position += INDEX_HEADER_SIZE as u64;

        if !index_header.is_valid() {
            return Err(Error::Decode(DecodeError::InvalidHeader("Index")));
        }

        let mut entries = Vec::with_capacity(index_header.entry_count as usize);
        for _ in 0..index_header.entry_count {
            entries.push(IndexEntry::decode_from(&mut self.file)?);
        }

        let computed = index_entries_crc(&entries);
        if computed != index_header.crc32 {
            return Err(Error::ChecksumMismatch {
                expected: index_header.crc32,
                got: computed,
            });
        }

        Ok(entries)
    }

    /// Repositions at the largest index entry with `ts <= target_ts_ns`
    /// (or the data start if all entries are later).
    ///
    /// For compressed segments the entry points at a block start, so the
    /// first events produced afterwards may still be before the target;
    /// callers linear-skip the remainder.
    ///
    /// # Errors
    ///
    /// Will return `Err` if no index is loaded or the seek fails.
    pub fn seek_to_timestamp(&mut self, target_ts_ns: i64) -> Result<()> {
        if self.index.is_empty() {
            return Err(Error::MissingIndex);
        }

        let idx = self
            .index
            .partition_point(|entry| entry.timestamp_ns <= target_ts_ns);

        let offset = if idx == 0 {
            SEGMENT_HEADER_SIZE as u64
        } else {
            self.index[idx - 1].file_offset
        };

        self.seek(offset)
    }

    /// Rewinds to the first event.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the seek fails.
    pub fn reset(&mut self) -> Result<()> {
        self.seek(SEGMENT_HEADER_SIZE as u64)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        self.block_data.clear();
        self.block_offset = 0;
        self.block_events_remaining = 0;
        Ok(())
    }
}

impl Iterator for SegmentIterator {
    type Item = Result<ReplayEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}
