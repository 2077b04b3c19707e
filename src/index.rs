// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Second-pass index tools: build or strip sparse indexes on sealed
//! segments, and aggregate all segment headers into a dataset-wide
//! `index.floxidx`.

use crate::{
    coding::{Decode, DecodeError, Encode},
    compression,
    format::{
        index_entries_crc, segment_flags, CompressedBlockHeader, FrameHeader, GlobalIndexHeader,
        GlobalIndexSegment, IndexEntry, SegmentHeader, SegmentIndexHeader, BLOCK_HEADER_SIZE,
        DEFAULT_INDEX_INTERVAL, FRAME_HEADER_SIZE, MAX_BLOCK_SIZE, MAX_FRAME_SIZE,
        SEGMENT_HEADER_SIZE,
    },
    segment::{read_segment_header, scan_segments},
    time_util, Error, Result,
};
use std::{
    fs::{File, OpenOptions},
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// Dataset-wide index file name
pub const GLOBAL_INDEX_FILE: &str = "index.floxidx";

/// Index builder configuration
#[derive(Clone, Debug)]
pub struct IndexBuilderConfig {
    pub index_interval: u16,
    pub verify_crc: bool,
    pub backup_original: bool,
}

impl Default for IndexBuilderConfig {
    fn default() -> Self {
        Self {
            index_interval: DEFAULT_INDEX_INTERVAL,
            verify_crc: true,
            backup_original: false,
        }
    }
}

/// Outcome of one segment index build.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexBuildStats {
    pub events_scanned: u32,
    pub index_entries_created: u32,
}

/// Builds (or removes) sparse indexes on existing segments in place.
///
/// The segment must be sealed and not currently held by a writer.
pub struct IndexBuilder {
    config: IndexBuilderConfig,
}

impl IndexBuilder {
    #[must_use]
    pub fn new(config: IndexBuilderConfig) -> Self {
        Self { config }
    }

    /// Scans all frames of a segment, then appends a fresh index region and
    /// rewrites the summary header (overwriting any previous index).
    ///
    /// # Errors
    ///
    /// Will return `Err` on IO errors or structural corruption.
    pub fn build_for_segment(&self, segment_path: &Path) -> Result<IndexBuildStats> {
        let header = read_segment_header(segment_path)?;
        let file_size = std::fs::metadata(segment_path)?.len();
        let data_end = header.data_end(file_size);

        let scan = self.scan_frames(segment_path, &header, data_end)?;

        if self.config.backup_original {
            let backup = segment_path.with_extension("floxlog.bak");
            std::fs::copy(segment_path, &backup)?;
            log::debug!("Backed up {segment_path:?} to {backup:?}");
        }

        let mut updated = header.clone();
        updated.first_event_ns = scan.first_ts;
        updated.last_event_ns = scan.last_ts;
        updated.event_count = scan.stats.events_scanned;
        updated.index_offset = data_end;
        updated.flags |= segment_flags::HAS_INDEX;

        let index_header = SegmentIndexHeader {
            interval: self.config.index_interval,
            #[allow(clippy::cast_possible_truncation)]
            entry_count: scan.entries.len() as u32,
            crc32: index_entries_crc(&scan.entries),
            first_ts_ns: scan.entries.first().map_or(0, |e| e.timestamp_ns),
            last_ts_ns: scan.entries.last().map_or(0, |e| e.timestamp_ns),
            ..Default::default()
        };

        let file = OpenOptions::new().read(true).write(true).open(segment_path)?;

        // Drop any previous index region before appending the new one
        file.set_len(data_end)?;

        let mut writer = BufWriter::new(file);
        writer.seek(SeekFrom::Start(data_end))?;
        index_header.encode_into(&mut writer)?;
        for entry in &scan.entries {
            entry.encode_into(&mut writer)?;
        }

        writer.seek(SeekFrom::Start(0))?;
        updated.encode_into(&mut writer)?;
        writer.flush()?;

        log::debug!(
            "Indexed {segment_path:?}: {} entries over {} events",
            scan.entries.len(),
            scan.stats.events_scanned
        );

        Ok(scan.stats)
    }

    /// Builds indexes for every segment in a directory, in scan order.
    ///
    /// # Errors
    ///
    /// Will return `Err` on the first segment that fails.
    pub fn build_for_directory(&self, data_dir: &Path) -> Result<Vec<IndexBuildStats>> {
        let mut results = vec![];
        for segment in scan_segments(data_dir)? {
            results.push(self.build_for_segment(&segment.path)?);
        }
        Ok(results)
    }

    /// Whether a segment carries an index.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the header cannot be read.
    pub fn has_index(segment_path: &Path) -> Result<bool> {
        Ok(read_segment_header(segment_path)?.has_index())
    }

    /// Truncates the index region off a segment and clears the header flag.
    /// Returns `false` when there was no index to remove.
    ///
    /// # Errors
    ///
    /// Will return `Err` on IO errors.
    pub fn remove_index(segment_path: &Path) -> Result<bool> {
        let mut header = read_segment_header(segment_path)?;
        if !header.has_index() {
            return Ok(false);
        }

        let index_offset = header.index_offset;
        header.flags &= !segment_flags::HAS_INDEX;
        header.index_offset = 0;

        let mut file = OpenOptions::new().read(true).write(true).open(segment_path)?;
        file.set_len(index_offset)?;
        file.seek(SeekFrom::Start(0))?;
        header.encode_into(&mut file)?;
        file.flush()?;

        Ok(true)
    }

    fn scan_frames(
        &self,
        segment_path: &Path,
        header: &SegmentHeader,
        data_end: u64,
    ) -> Result<FrameScan> {
        let mut file = BufReader::new(File::open(segment_path)?);
        file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;

        let mut scan = FrameScan::default();
        let mut position = SEGMENT_HEADER_SIZE as u64;
        let mut events_since_last_entry = u32::from(self.config.index_interval);

        if header.is_compressed() {
            let mut compressed_buf = vec![];

            while position + BLOCK_HEADER_SIZE as u64 <= data_end {
                let block_offset = position;
                let block = CompressedBlockHeader::decode_from(&mut file)?;
                position += BLOCK_HEADER_SIZE as u64;

                if !block.is_valid() {
                    return Err(Error::Decode(DecodeError::InvalidHeader("Block")));
                }
                if block.compressed_size > MAX_BLOCK_SIZE || block.original_size > MAX_BLOCK_SIZE {
                    return Err(Error::FrameTooLarge(block.compressed_size.into()));
                }

                compressed_buf.resize(block.compressed_size as usize, 0);
                file.read_exact(&mut compressed_buf)?;
                position += u64::from(block.compressed_size);

                let data = compression::decompress(
                    header.compression_type(),
                    &compressed_buf,
                    block.original_size as usize,
                )?;

                // One checkpoint per block; the entry timestamp is the
                // block's first event
                let mut block_first_ts = None;
                let mut offset = 0usize;

                while offset + FRAME_HEADER_SIZE <= data.len() {
                    let mut cursor = &data[offset..];
                    let frame = FrameHeader::decode_from(&mut cursor)?;
                    offset += FRAME_HEADER_SIZE;

                    if frame.size > MAX_FRAME_SIZE || offset + frame.size as usize > data.len() {
                        return Err(Error::Decode(DecodeError::InvalidHeader("Frame")));
                    }

                    let payload = &data[offset..offset + frame.size as usize];
                    let ts = self.check_frame(&frame, payload)?;
                    offset += frame.size as usize;

                    if block_first_ts.is_none() {
                        block_first_ts = Some(ts);
                    }
                    scan.track(ts);
                }

                if let Some(ts) = block_first_ts {
                    scan.entries.push(IndexEntry {
                        timestamp_ns: ts,
                        file_offset: block_offset,
                    });
                }
            }
        } else {
            let mut payload_buf = vec![];

            while position + FRAME_HEADER_SIZE as u64 <= data_end {
                let frame_offset = position;
                let frame = FrameHeader::decode_from(&mut file)?;
                position += FRAME_HEADER_SIZE as u64;

                if frame.size > MAX_FRAME_SIZE {
                    return Err(Error::FrameTooLarge(frame.size.into()));
                }
                if position + u64::from(frame.size) > data_end {
                    return Err(Error::Decode(DecodeError::InvalidHeader("Frame")));
                }

                payload_buf.resize(frame.size as usize, 0);
                file.read_exact(&mut payload_buf)?;
                position += u64::from(frame.size);

                let ts = self.check_frame(&frame, &payload_buf)?;

                if events_since_last_entry >= u32::from(self.config.index_interval) {
                    scan.entries.push(IndexEntry {
                        timestamp_ns: ts,
                        file_offset: frame_offset,
                    });
                    events_since_last_entry = 0;
                }
                events_since_last_entry += 1;

                scan.track(ts);
            }
        }

        scan.stats.index_entries_created = scan.entries.len() as u32;
        Ok(scan)
    }

    /// Verifies one frame (CRC if configured) and extracts its timestamp.
    ///
    /// Both trade and book payloads lead with `exchange_ts_ns`.
    fn check_frame(&self, frame: &FrameHeader, payload: &[u8]) -> Result<i64> {
        if self.config.verify_crc {
            let computed = crc32fast::hash(payload);
            if computed != frame.crc32 {
                return Err(Error::ChecksumMismatch {
                    expected: frame.crc32,
                    got: computed,
                });
            }
        }

        let ts_bytes: [u8; 8] = payload
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::Decode(DecodeError::InvalidHeader("Frame")))?;

        Ok(i64::from_le_bytes(ts_bytes))
    }
}

#[derive(Default)]
struct FrameScan {
    entries: Vec<IndexEntry>,
    first_ts: i64,
    last_ts: i64,
    stats: IndexBuildStats,
}

impl FrameScan {
    fn track(&mut self, ts: i64) {
        if self.first_ts == 0 {
            self.first_ts = ts;
        }
        self.last_ts = ts;
        self.stats.events_scanned += 1;
    }
}

/// One entry of a loaded global index.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalIndexEntry {
    pub filename: String,
    pub segment: GlobalIndexSegment,
}

/// A loaded `index.floxidx`.
#[derive(Clone, Debug)]
pub struct GlobalIndex {
    pub header: GlobalIndexHeader,
    pub entries: Vec<GlobalIndexEntry>,
}

/// Aggregates all segment headers of a dataset into `index.floxidx`.
pub struct GlobalIndexBuilder;

impl GlobalIndexBuilder {
    /// Default global index path for a dataset directory.
    #[must_use]
    pub fn index_path(data_dir: &Path) -> PathBuf {
        data_dir.join(GLOBAL_INDEX_FILE)
    }

    /// Builds `<data_dir>/index.floxidx` (or `output_path` when given) from
    /// the segment headers. Returns the number of segments indexed.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the scan or the write fails.
    pub fn build(data_dir: &Path, output_path: Option<&Path>) -> Result<u32> {
        let segments = scan_segments(data_dir)?;

        let mut entries = vec![];
        let mut string_table = vec![];
        let mut first_event_ns = 0i64;
        let mut last_event_ns = 0i64;
        let mut total_events = 0u64;

        for segment in &segments {
            let filename_offset = string_table.len() as u64;
            let filename = segment
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            string_table.extend_from_slice(filename.as_bytes());
            string_table.push(0);

            let mut flags = 0u32;
            if segment.has_index {
                flags |= u32::from(segment_flags::HAS_INDEX);
            }
            if segment.compressed {
                flags |= u32::from(segment_flags::COMPRESSED);
            }

            entries.push(GlobalIndexSegment {
                first_event_ns: segment.first_event_ns,
                last_event_ns: segment.last_event_ns,
                event_count: segment.event_count,
                flags,
                file_size: segment.file_size,
                filename_offset,
            });

            if first_event_ns == 0 || segment.first_event_ns < first_event_ns {
                first_event_ns = segment.first_event_ns;
            }
            last_event_ns = last_event_ns.max(segment.last_event_ns);
            total_events += u64::from(segment.event_count);
        }

        let mut entry_bytes = vec![];
        for entry in &entries {
            entry.encode_into(&mut entry_bytes)?;
        }

        let header = GlobalIndexHeader {
            created_ns: time_util::now_ns(),
            first_event_ns,
            last_event_ns,
            #[allow(clippy::cast_possible_truncation)]
            segment_count: entries.len() as u32,
            crc32: crc32fast::hash(&entry_bytes),
            total_events,
            string_table_offset: (crate::format::GLOBAL_INDEX_HEADER_SIZE + entry_bytes.len())
                as u64,
            ..Default::default()
        };

        let path = output_path.map_or_else(|| Self::index_path(data_dir), Path::to_path_buf);
        let mut file = BufWriter::new(File::create(&path)?);
        header.encode_into(&mut file)?;
        file.write_all(&entry_bytes)?;
        file.write_all(&string_table)?;
        file.flush()?;

        log::debug!("Wrote global index {path:?} ({} segments)", entries.len());

        Ok(header.segment_count)
    }

    /// Loads and verifies a global index file.
    ///
    /// # Errors
    ///
    /// Will return `Err` on IO errors, a bad magic number or a CRC
    /// mismatch.
    pub fn load(index_path: &Path) -> Result<GlobalIndex> {
        let bytes = std::fs::read(index_path)?;
        let mut cursor = &bytes[..];

        let header = GlobalIndexHeader::decode_from(&mut cursor)?;
        if !header.is_valid() {
            return Err(Error::Decode(DecodeError::InvalidHeader("GlobalIndex")));
        }

        let mut segments = Vec::with_capacity(header.segment_count as usize);
        for _ in 0..header.segment_count {
            segments.push(GlobalIndexSegment::decode_from(&mut cursor)?);
        }

        let mut entry_bytes = vec![];
        for segment in &segments {
            segment.encode_into(&mut entry_bytes)?;
        }
        let computed = crc32fast::hash(&entry_bytes);
        if computed != header.crc32 {
            return Err(Error::ChecksumMismatch {
                expected: header.crc32,
                got: computed,
            });
        }

        // NOTE: Bounded by the file size
        #[allow(clippy::cast_possible_truncation)]
        let table_start = (header.string_table_offset as usize).min(bytes.len());
        let string_table = &bytes[table_start..];

        let entries = segments
            .into_iter()
            .map(|segment| {
                #[allow(clippy::cast_possible_truncation)]
                let start = (segment.filename_offset as usize).min(string_table.len());
                let name_bytes = string_table[start..]
                    .split(|&b| b == 0)
                    .next()
                    .unwrap_or_default();

                GlobalIndexEntry {
                    filename: String::from_utf8_lossy(name_bytes).into_owned(),
                    segment,
                }
            })
            .collect();

        Ok(GlobalIndex { header, entries })
    }
}
