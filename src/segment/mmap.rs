// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError},
    event::ReplayEvent,
    format::{
        index_entries_crc, EventKind, FrameHeader, IndexEntry, SegmentHeader, SegmentIndexHeader,
        FRAME_HEADER_SIZE, INDEX_HEADER_SIZE, MAX_FRAME_SIZE, SEGMENT_HEADER_SIZE,
    },
    Error, Result,
};
use std::{fs::File, path::Path};

/// Reads an uncompressed segment through a read-only memory mapping.
///
/// Walking frames is an offset advance over the mapping; all multi-byte
/// fields go through byte copies, so the 12-byte frame headers breaking
/// natural alignment is harmless. Compressed segments are rejected —
/// callers fall back to [`super::iterator::SegmentIterator`].
pub struct MmapSegmentReader {
    mmap: memmap2::Mmap,
    header: SegmentHeader,
    position: usize,
    data_end: usize,
    index: Vec<IndexEntry>,
}

impl MmapSegmentReader {
    /// Maps a segment file and validates its header.
    ///
    /// # Errors
    ///
    /// Will return `Err` on IO errors, a malformed header, or a compressed
    /// segment.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;

        // SAFETY: The mapping is read-only and segments are sealed before
        // they are read; the single-writer directory contract (§ concurrency
        // model) rules out concurrent truncation.
        #[allow(unsafe_code)]
        let mmap = unsafe { memmap2::Mmap::map(&file)? };

        #[cfg(unix)]
        {
            // Linear scans dominate; let readahead work for us
            let _ = mmap.advise(memmap2::Advice::Sequential);
        }

        if mmap.len() < SEGMENT_HEADER_SIZE {
            return Err(Error::Decode(DecodeError::InvalidHeader("Segment")));
        }

        let header = SegmentHeader::decode_from(&mut &mmap[..SEGMENT_HEADER_SIZE])?;
        if header.magic != crate::format::SEGMENT_MAGIC {
            return Err(Error::Decode(DecodeError::InvalidHeader("Segment")));
        }
        if header.version != crate::format::FORMAT_VERSION {
            return Err(Error::InvalidVersion(Some(header.version)));
        }
        if header.is_compressed() {
            return Err(Error::CompressedSegmentNotMappable);
        }

        // NOTE: Mapped files fit an usize by construction
        #[allow(clippy::cast_possible_truncation)]
        let data_end = header.data_end(mmap.len() as u64) as usize;

        Ok(Self {
            mmap,
            header,
            position: SEGMENT_HEADER_SIZE,
            data_end,
            index: vec![],
        })
    }

    #[must_use]
    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// Total mapped size in bytes.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.mmap.len()
    }

    /// Size of the event body (header excluded, index excluded).
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.data_end.saturating_sub(SEGMENT_HEADER_SIZE)
    }

    /// Current byte offset into the mapping.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn has_index(&self) -> bool {
        !self.index.is_empty()
    }

    #[must_use]
    pub fn index_entries(&self) -> &[IndexEntry] {
        &self.index
    }

    /// Decodes the frame at the current offset and advances past it.
    ///
    /// # Errors
    ///
    /// Will return `Err` on CRC mismatches or malformed frames.
    pub fn next_event(&mut self) -> Result<Option<ReplayEvent>> {
        if self.position + FRAME_HEADER_SIZE > self.data_end {
            return Ok(None);
        }

        let mut cursor = &self.mmap[self.position..self.data_end];
        let frame = FrameHeader::decode_from(&mut cursor)?;

        if frame.size > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(frame.size.into()));
        }

        let payload_start = self.position + FRAME_HEADER_SIZE;
        let payload_end = payload_start + frame.size as usize;
        if payload_end > self.data_end {
            return Err(Error::Decode(DecodeError::InvalidHeader("Frame")));
        }

        let kind = EventKind::try_from(frame.kind).map_err(Error::Decode)?;
        let payload = &self.mmap[payload_start..payload_end];

        let computed = crc32fast::hash(payload);
        if computed != frame.crc32 {
            return Err(Error::ChecksumMismatch {
                expected: frame.crc32,
                got: computed,
            });
        }

        let event = ReplayEvent::decode_payload(kind, payload).map_err(Error::Decode)?;
        self.position = payload_end;

        Ok(Some(event))
    }

    /// Rewinds to the first frame.
    pub fn reset(&mut self) {
        self.position = SEGMENT_HEADER_SIZE;
    }

    /// Loads and verifies the sparse index out of the mapping.
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

        // NOTE: Mapped files fit an usize by construction
        #[allow(clippy::cast_possible_truncation)]
        let index_start = self.header.index_offset as usize;

        if index_start + INDEX_HEADER_SIZE > self.mmap.len() {
            return Err(Error::Decode(DecodeError::InvalidHeader("Index")));
        }

        let mut cursor = &self.mmap[index_start..];
        let index_header = SegmentIndexHeader::decode_from(&mut cursor)?;

        if !index_header.is_valid() {
            return Err(Error::Decode(DecodeError::InvalidHeader("Index")));
        }

        let mut entries = Vec::with_capacity(index_header.entry_count as usize);
        for _ in 0..index_header.entry_count {
            entries.push(IndexEntry::decode_from(&mut cursor)?);
        }

        let computed = index_entries_crc(&entries);
        if computed != index_header.crc32 {
            return Err(Error::ChecksumMismatch {
                expected: index_header.crc32,
                got: computed,
            });
        }

        self.index = entries;
        Ok(true)
    }

    /// Repositions at the largest index entry with `ts <= target_ts_ns`
    /// (or the data start if all entries are later).
    ///
    /// # Errors
    ///
    /// Will return `Err` if no index is loaded.
    pub fn seek_to_timestamp(&mut self, target_ts_ns: i64) -> Result<()> {
        if self.index.is_empty() {
            return Err(Error::MissingIndex);
        }

        let idx = self
            .index
            .partition_point(|entry| entry.timestamp_ns <= target_ts_ns);

        if idx == 0 {
            self.position = SEGMENT_HEADER_SIZE;
        } else {
            // NOTE: Mapped files fit an usize by construction
            #[allow(clippy::cast_possible_truncation)]
            let offset = self.index[idx - 1].file_offset as usize;
            self.position = offset;
        }

        Ok(())
    }
}

impl Iterator for MmapSegmentReader {
    type Item = Result<ReplayEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

/// Counters of a multi-segment mapped read.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MmapReaderStats {
    pub segments_mapped: u64,
    pub bytes_mapped: u64,
    pub events_read: u64,
}

/// Maps every uncompressed segment of a dataset and iterates them in
/// timestamp-sorted segment order. Compressed segments are skipped with a
/// warning — use [`crate::LogReader`] for mixed datasets.
pub struct MmapReader {
    segments: Vec<super::SegmentInfo>,
    filter: crate::ReaderFilter,
    stats: MmapReaderStats,
}

impl MmapReader {
    /// Scans `data_dir` for segments.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn new<P: AsRef<Path>>(data_dir: P, filter: crate::ReaderFilter) -> Result<Self> {
        Ok(Self {
            segments: super::scan_segments(data_dir.as_ref())?,
            filter,
            stats: MmapReaderStats::default(),
        })
    }

    #[must_use]
    pub fn segments(&self) -> &[super::SegmentInfo] {
        &self.segments
    }

    /// Total events according to segment headers.
    #[must_use]
    pub fn total_events(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| u64::from(s.event_count))
            .sum()
    }

    #[must_use]
    pub fn stats(&self) -> MmapReaderStats {
        self.stats
    }

    /// Delivers every filtered event to `callback`; a `false` return stops
    /// at that event boundary. Returns the number of events delivered.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a mapping fails for IO reasons.
    pub fn for_each<F: FnMut(&ReplayEvent) -> bool>(&mut self, mut callback: F) -> Result<u64> {
        let segments = std::mem::take(&mut self.segments);
        let mut delivered = 0u64;

        'segments: for segment in &segments {
            let mut reader = match MmapSegmentReader::new(&segment.path) {
                Ok(reader) => reader,
                Err(Error::CompressedSegmentNotMappable) => {
                    log::warn!("Skipping compressed segment {:?} in mmap read", segment.path);
                    continue;
                }
                Err(e) => {
                    log::warn!("Skipping segment {:?}: {e:?}", segment.path);
                    continue;
                }
            };

            self.stats.segments_mapped += 1;
            self.stats.bytes_mapped += reader.total_size() as u64;

            loop {
                let event = match reader.next_event() {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Stopping at structural error in {:?}: {e:?}", segment.path);
                        break;
                    }
                };

                self.stats.events_read += 1;

                if self.filter.passes_event(&event) {
                    delivered += 1;
                    if !callback(&event) {
                        break 'segments;
                    }
                }
            }
        }

        self.segments = segments;
        Ok(delivered)
    }

    /// Like [`MmapReader::for_each`], but starts at the first event with
    /// `ts >= start_ts_ns`, seeking via the sparse index when available.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a mapping fails for IO reasons.
    pub fn for_each_from<F: FnMut(&ReplayEvent) -> bool>(
        &mut self,
        start_ts_ns: i64,
        mut callback: F,
    ) -> Result<u64> {
        let segments = std::mem::take(&mut self.segments);
        let mut delivered = 0u64;

        let first = segments.partition_point(|s| s.last_event_ns < start_ts_ns);

        'segments: for (i, segment) in segments.iter().enumerate().skip(first) {
            let mut reader = match MmapSegmentReader::new(&segment.path) {
                Ok(reader) => reader,
                Err(e) => {
                    log::warn!("Skipping segment {:?}: {e:?}", segment.path);
                    continue;
                }
            };

            self.stats.segments_mapped += 1;
            self.stats.bytes_mapped += reader.total_size() as u64;

            let skip_below = (i == first).then_some(start_ts_ns);

            if skip_below.is_some() && segment.has_index {
                match reader.load_index().and_then(|loaded| {
                    if loaded {
                        reader.seek_to_timestamp(start_ts_ns)
                    } else {
                        Ok(())
                    }
                }) {
                    Ok(()) => {}
                    Err(e) => log::warn!("Ignoring bad index in {:?}: {e:?}", segment.path),
                }
            }

            loop {
                let event = match reader.next_event() {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Stopping at structural error in {:?}: {e:?}", segment.path);
                        break;
                    }
                };

                if skip_below.is_some_and(|start| event.timestamp_ns() < start) {
                    continue;
                }

                self.stats.events_read += 1;

                if self.filter.passes_event(&event) {
                    delivered += 1;
                    if !callback(&event) {
                        break 'segments;
                    }
                }
            }
        }

        self.segments = segments;
        Ok(delivered)
    }
}
