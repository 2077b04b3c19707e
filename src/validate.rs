// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Structural validation and best-effort repair of segments.
//!
//! The validator never fails fast (unless configured to): it accumulates
//! typed issues so one pass reports everything a segment has to say. The
//! repairer consumes a validation result and fixes what it can in place,
//! taking a backup first.

use crate::{
    coding::Decode,
    compression,
    format::{
        index_entries_crc, CompressedBlockHeader, CompressionType, EventKind, FrameHeader,
        IndexEntry, SegmentHeader, SegmentIndexHeader, BLOCK_HEADER_SIZE, FORMAT_VERSION,
        FRAME_HEADER_SIZE, INDEX_HEADER_SIZE, MAX_BLOCK_SIZE, MAX_FRAME_SIZE, SEGMENT_HEADER_SIZE,
        SEGMENT_MAGIC,
    },
    index::{IndexBuilder, IndexBuilderConfig},
    segment::list_segment_paths,
    time_util::NANOS_PER_HOUR,
    Result,
};
use std::{
    fs::{File, OpenOptions},
    io::{BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

/// Classified structural problems.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IssueKind {
    InvalidMagic,
    InvalidVersion,
    HeaderCorrupted,

    FrameCrcMismatch,
    FrameSizeTooLarge,
    FrameTypeUnknown,
    FrameTruncated,

    BlockMagicInvalid,
    BlockDecompressionFailed,
    BlockSizeMismatch,

    IndexCrcMismatch,
    IndexMagicInvalid,
    IndexOutOfBounds,
    IndexNotSorted,

    TimestampOutOfOrder,
    TimestampJumpTooLarge,
    EventCountMismatch,
    FileTruncated,

    FileNotFound,
    FileReadError,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// One recorded problem, with enough context to locate it.
#[derive(Clone, Debug)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub severity: IssueSeverity,
    pub message: String,
    pub file_offset: u64,
    pub event_index: u64,
    pub timestamp_ns: i64,
}

/// Validation policy
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    pub verify_crc: bool,
    pub verify_timestamps: bool,
    pub verify_index: bool,
    pub scan_all_events: bool,
    pub stop_on_first_error: bool,
    pub max_timestamp_jump_ns: i64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            verify_crc: true,
            verify_timestamps: true,
            verify_index: true,
            scan_all_events: true,
            stop_on_first_error: false,
            max_timestamp_jump_ns: NANOS_PER_HOUR,
        }
    }
}

/// Everything one validation pass learned about a segment.
#[derive(Clone, Debug, Default)]
pub struct SegmentValidationResult {
    pub path: PathBuf,
    pub issues: Vec<ValidationIssue>,

    pub header_valid: bool,
    pub reported_event_count: u32,
    pub reported_first_ts: i64,
    pub reported_last_ts: i64,
    pub is_compressed: bool,
    pub compression_type: CompressionType,

    pub actual_event_count: u32,
    pub actual_first_ts: i64,
    pub actual_last_ts: i64,
    pub bytes_scanned: u64,

    pub has_index: bool,
    pub index_valid: bool,
    pub index_entry_count: u32,

    pub trades_found: u32,
    pub book_updates_found: u32,
    pub crc_errors: u32,
    pub timestamp_anomalies: u32,
}

impl SegmentValidationResult {
    /// A segment is valid iff nothing critical was found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.has_critical()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity >= IssueSeverity::Error)
    }

    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Critical)
    }

    #[must_use]
    pub fn issues_of(&self, kind: IssueKind) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.kind == kind).collect()
    }
}

/// Aggregated validation over a whole dataset directory.
#[derive(Clone, Debug, Default)]
pub struct DatasetValidationResult {
    pub data_dir: PathBuf,
    pub segments: Vec<SegmentValidationResult>,

    pub total_segments: u32,
    pub valid_segments: u32,
    pub corrupted_segments: u32,
    pub total_events: u64,
    pub total_bytes: u64,

    pub first_timestamp: i64,
    pub last_timestamp: i64,

    pub total_errors: u32,
    pub total_warnings: u32,
}

impl DatasetValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.corrupted_segments == 0
    }
}

/// Structural scan of single segments.
pub struct SegmentValidator {
    config: ValidatorConfig,
}

impl Default for SegmentValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

impl SegmentValidator {
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Scans one segment, accumulating issues instead of failing fast.
    #[must_use]
    pub fn validate(&self, segment_path: &Path) -> SegmentValidationResult {
        let mut result = SegmentValidationResult {
            path: segment_path.to_path_buf(),
            ..Default::default()
        };

        if !segment_path.exists() {
            add_issue(
                &mut result,
                IssueKind::FileNotFound,
                IssueSeverity::Critical,
                format!("file not found: {}", segment_path.display()),
                0,
            );
            return result;
        }

        let Ok(file_size) = std::fs::metadata(segment_path).map(|m| m.len()) else {
            add_issue(
                &mut result,
                IssueKind::FileReadError,
                IssueSeverity::Critical,
                "cannot stat file".into(),
                0,
            );
            return result;
        };

        let file = match File::open(segment_path) {
            Ok(file) => file,
            Err(e) => {
                add_issue(
                    &mut result,
                    IssueKind::FileReadError,
                    IssueSeverity::Critical,
                    format!("cannot open file: {e}"),
                    0,
                );
                return result;
            }
        };
        let mut reader = BufReader::new(file);

        let Some(header) = self.validate_header(&mut reader, file_size, &mut result) else {
            return result;
        };

        let data_end = header.data_end(file_size);

        if self.config.scan_all_events {
            if header.is_compressed() {
                self.scan_compressed(&mut reader, &header, data_end, &mut result);
            } else {
                self.scan_uncompressed(&mut reader, data_end, &mut result);
            }

            if result.actual_event_count != result.reported_event_count {
                let msg = format!(
                    "header event count mismatch: reported={} actual={}",
                    result.reported_event_count, result.actual_event_count
                );
                add_issue(
                    &mut result,
                    IssueKind::EventCountMismatch,
                    IssueSeverity::Warning,
                    msg,
                    0,
                );
            }
        }

        if self.config.verify_index && header.has_index() {
            self.validate_index(&mut reader, &header, file_size, data_end, &mut result);
        }

        result
    }

    fn validate_header(
        &self,
        reader: &mut BufReader<File>,
        file_size: u64,
        result: &mut SegmentValidationResult,
    ) -> Option<SegmentHeader> {
        if file_size < SEGMENT_HEADER_SIZE as u64 {
            add_issue(
                result,
                IssueKind::FileTruncated,
                IssueSeverity::Critical,
                format!("file smaller than segment header: {file_size} bytes"),
                0,
            );
            return None;
        }

        let Ok(header) = SegmentHeader::decode_from(reader) else {
            add_issue(
                result,
                IssueKind::HeaderCorrupted,
                IssueSeverity::Critical,
                "segment header unreadable".into(),
                0,
            );
            return None;
        };

        if header.magic != SEGMENT_MAGIC {
            add_issue(
                result,
                IssueKind::InvalidMagic,
                IssueSeverity::Critical,
                format!("bad segment magic: {:#010x}", header.magic),
                0,
            );
            return None;
        }
        if header.version != FORMAT_VERSION {
            add_issue(
                result,
                IssueKind::InvalidVersion,
                IssueSeverity::Critical,
                format!("unsupported version: {}", header.version),
                0,
            );
            return None;
        }

        if header.has_index() && header.index_offset >= file_size {
            add_issue(
                result,
                IssueKind::IndexOutOfBounds,
                IssueSeverity::Error,
                format!(
                    "index offset {} beyond file size {file_size}",
                    header.index_offset
                ),
                header.index_offset,
            );
        }

        result.header_valid = true;
        result.reported_event_count = header.event_count;
        result.reported_first_ts = header.first_event_ns;
        result.reported_last_ts = header.last_event_ns;
        result.is_compressed = header.is_compressed();
        result.compression_type = header.compression_type();
        result.has_index = header.has_index();

        Some(header)
    }

    fn scan_uncompressed(
        &self,
        reader: &mut BufReader<File>,
        data_end: u64,
        result: &mut SegmentValidationResult,
    ) {
        let mut position = SEGMENT_HEADER_SIZE as u64;
        let mut payload_buf = vec![];
        let mut last_ts = 0i64;

        loop {
            if position >= data_end {
                break;
            }
            if position + FRAME_HEADER_SIZE as u64 > data_end {
                add_issue(
                    result,
                    IssueKind::FrameTruncated,
                    IssueSeverity::Error,
                    format!("{} trailing bytes, too short for a frame", data_end - position),
                    position,
                );
                break;
            }

            let frame_offset = position;
            let Ok(frame) = FrameHeader::decode_from(reader) else {
                add_issue(
                    result,
                    IssueKind::FileReadError,
                    IssueSeverity::Critical,
                    "frame header read failed".into(),
                    position,
                );
                break;
            };
            position += FRAME_HEADER_SIZE as u64;

            if frame.size > MAX_FRAME_SIZE {
                add_issue(
                    result,
                    IssueKind::FrameSizeTooLarge,
                    IssueSeverity::Critical,
                    format!("frame declares {} bytes", frame.size),
                    frame_offset,
                );
                break;
            }
            if position + u64::from(frame.size) > data_end {
                add_issue(
                    result,
                    IssueKind::FrameTruncated,
                    IssueSeverity::Error,
                    format!("frame payload of {} bytes overruns data end", frame.size),
                    frame_offset,
                );
                break;
            }

            payload_buf.resize(frame.size as usize, 0);
            if reader.read_exact(&mut payload_buf).is_err() {
                add_issue(
                    result,
                    IssueKind::FileReadError,
                    IssueSeverity::Critical,
                    "frame payload read failed".into(),
                    frame_offset,
                );
                break;
            }
            position += u64::from(frame.size);

            self.check_frame(&frame, &payload_buf, frame_offset, &mut last_ts, result);
            result.bytes_scanned = position;

            if self.config.stop_on_first_error && result.has_errors() {
                break;
            }
        }
    }

    fn scan_compressed(
        &self,
        reader: &mut BufReader<File>,
        header: &SegmentHeader,
        data_end: u64,
        result: &mut SegmentValidationResult,
    ) {
        let mut position = SEGMENT_HEADER_SIZE as u64;
        let mut compressed_buf = vec![];
        let mut last_ts = 0i64;

        loop {
            if position >= data_end {
                break;
            }
            if position + BLOCK_HEADER_SIZE as u64 > data_end {
                add_issue(
                    result,
                    IssueKind::FileTruncated,
                    IssueSeverity::Error,
                    format!("{} trailing bytes, too short for a block", data_end - position),
                    position,
                );
                break;
            }

            let block_offset = position;
            let Ok(block) = CompressedBlockHeader::decode_from(reader) else {
                add_issue(
                    result,
                    IssueKind::FileReadError,
                    IssueSeverity::Critical,
                    "block header read failed".into(),
                    position,
                );
                break;
            };
            position += BLOCK_HEADER_SIZE as u64;

            if !block.is_valid() {
                add_issue(
                    result,
                    IssueKind::BlockMagicInvalid,
                    IssueSeverity::Critical,
                    format!("bad block magic: {:#010x}", block.magic),
                    block_offset,
                );
                break;
            }
            if block.compressed_size > MAX_BLOCK_SIZE || block.original_size > MAX_BLOCK_SIZE {
                add_issue(
                    result,
                    IssueKind::BlockSizeMismatch,
                    IssueSeverity::Critical,
                    format!(
                        "block sizes out of range: compressed={} original={}",
                        block.compressed_size, block.original_size
                    ),
                    block_offset,
                );
                break;
            }
            if position + u64::from(block.compressed_size) > data_end {
                add_issue(
                    result,
                    IssueKind::FileTruncated,
                    IssueSeverity::Error,
                    format!("block of {} bytes overruns data end", block.compressed_size),
                    block_offset,
                );
                break;
            }

            compressed_buf.resize(block.compressed_size as usize, 0);
            if reader.read_exact(&mut compressed_buf).is_err() {
                add_issue(
                    result,
                    IssueKind::FileReadError,
                    IssueSeverity::Critical,
                    "block payload read failed".into(),
                    block_offset,
                );
                break;
            }
            position += u64::from(block.compressed_size);
            result.bytes_scanned = position;

            let data = match compression::decompress(
                header.compression_type(),
                &compressed_buf,
                block.original_size as usize,
            ) {
                Ok(data) => data,
                Err(e) => {
                    add_issue(
                        result,
                        IssueKind::BlockDecompressionFailed,
                        IssueSeverity::Error,
                        format!("block decompression failed: {e:?}"),
                        block_offset,
                    );
                    // The next block header is still locatable; keep going
                    if self.config.stop_on_first_error {
                        break;
                    }
                    continue;
                }
            };

            let mut offset = 0usize;
            let mut frames_in_block = 0u16;

            while offset + FRAME_HEADER_SIZE <= data.len() {
                let mut cursor = &data[offset..];
                let Ok(frame) = FrameHeader::decode_from(&mut cursor) else {
                    break;
                };
                offset += FRAME_HEADER_SIZE;

                if frame.size > MAX_FRAME_SIZE || offset + frame.size as usize > data.len() {
                    add_issue(
                        result,
                        IssueKind::FrameTruncated,
                        IssueSeverity::Error,
                        format!("frame of {} bytes overruns its block", frame.size),
                        block_offset,
                    );
                    break;
                }

                let payload = &data[offset..offset + frame.size as usize];
                offset += frame.size as usize;
                frames_in_block += 1;

                self.check_frame(&frame, payload, block_offset, &mut last_ts, result);
            }

            if frames_in_block != block.event_count {
                add_issue(
                    result,
                    IssueKind::EventCountMismatch,
                    IssueSeverity::Warning,
                    format!(
                        "block event count mismatch: reported={} actual={frames_in_block}",
                        block.event_count
                    ),
                    block_offset,
                );
            }

            if self.config.stop_on_first_error && result.has_errors() {
                break;
            }
        }
    }

    fn check_frame(
        &self,
        frame: &FrameHeader,
        payload: &[u8],
        file_offset: u64,
        last_ts: &mut i64,
        result: &mut SegmentValidationResult,
    ) {
        if self.config.verify_crc {
            let computed = crc32fast::hash(payload);
            if computed != frame.crc32 {
                result.crc_errors += 1;
                add_issue(
                    result,
                    IssueKind::FrameCrcMismatch,
                    IssueSeverity::Error,
                    format!(
                        "payload CRC mismatch: stored={:#010x} computed={computed:#010x}",
                        frame.crc32
                    ),
                    file_offset,
                );
            }
        }

        match EventKind::try_from(frame.kind) {
            Ok(EventKind::Trade) => result.trades_found += 1,
            Ok(_) => result.book_updates_found += 1,
            Err(_) => {
                add_issue(
                    result,
                    IssueKind::FrameTypeUnknown,
                    IssueSeverity::Error,
                    format!("unknown frame kind {}", frame.kind),
                    file_offset,
                );
            }
        }

        // Both record kinds lead with exchange_ts_ns
        let ts = payload
            .get(..8)
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
            .map_or(0, i64::from_le_bytes);

        if result.actual_event_count == 0 {
            result.actual_first_ts = ts;
        }

        let prev_ts = *last_ts;
        if self.config.verify_timestamps && result.actual_event_count > 0 {
            if ts < prev_ts {
                result.timestamp_anomalies += 1;
                add_issue_with_ts(
                    result,
                    IssueKind::TimestampOutOfOrder,
                    IssueSeverity::Warning,
                    format!("timestamp {ts} precedes {prev_ts}"),
                    file_offset,
                    ts,
                );
            } else if prev_ts > 0 && ts - prev_ts > self.config.max_timestamp_jump_ns {
                result.timestamp_anomalies += 1;
                add_issue_with_ts(
                    result,
                    IssueKind::TimestampJumpTooLarge,
                    IssueSeverity::Warning,
                    format!("timestamp jumps {} ns forward", ts - prev_ts),
                    file_offset,
                    ts,
                );
            }
        }

        *last_ts = ts;
        result.actual_last_ts = result.actual_last_ts.max(ts);
        result.actual_event_count += 1;
    }

    fn validate_index(
        &self,
        reader: &mut BufReader<File>,
        header: &SegmentHeader,
        file_size: u64,
        data_end: u64,
        result: &mut SegmentValidationResult,
    ) {
        if header.index_offset + INDEX_HEADER_SIZE as u64 > file_size {
            add_issue(
                result,
                IssueKind::IndexOutOfBounds,
                IssueSeverity::Error,
                "index region does not fit in file".into(),
                header.index_offset,
            );
            return;
        }

        if reader.seek(SeekFrom::Start(header.index_offset)).is_err() {
            add_issue(
                result,
                IssueKind::FileReadError,
                IssueSeverity::Error,
                "cannot seek to index".into(),
                header.index_offset,
            );
            return;
        }

        let Ok(index_header) = SegmentIndexHeader::decode_from(reader) else {
            add_issue(
                result,
                IssueKind::IndexMagicInvalid,
                IssueSeverity::Error,
                "index header unreadable".into(),
                header.index_offset,
            );
            return;
        };

        if !index_header.is_valid() {
            add_issue(
                result,
                IssueKind::IndexMagicInvalid,
                IssueSeverity::Error,
                format!("bad index magic: {:#010x}", index_header.magic),
                header.index_offset,
            );
            return;
        }

        result.index_entry_count = index_header.entry_count;

        let mut entries = Vec::with_capacity(index_header.entry_count as usize);
        for _ in 0..index_header.entry_count {
            match IndexEntry::decode_from(reader) {
                Ok(entry) => entries.push(entry),
                Err(_) => {
                    add_issue(
                        result,
                        IssueKind::IndexOutOfBounds,
                        IssueSeverity::Error,
                        format!(
                            "index truncated: {} of {} entries readable",
                            entries.len(),
                            index_header.entry_count
                        ),
                        header.index_offset,
                    );
                    return;
                }
            }
        }

        let computed = index_entries_crc(&entries);
        if computed != index_header.crc32 {
            add_issue(
                result,
                IssueKind::IndexCrcMismatch,
                IssueSeverity::Error,
                format!(
                    "index CRC mismatch: stored={:#010x} computed={computed:#010x}",
                    index_header.crc32
                ),
                header.index_offset,
            );
            return;
        }

        let mut sorted = true;
        for pair in entries.windows(2) {
            if pair[1].timestamp_ns < pair[0].timestamp_ns {
                sorted = false;
                break;
            }
        }
        if !sorted {
            add_issue(
                result,
                IssueKind::IndexNotSorted,
                IssueSeverity::Error,
                "index entries are not sorted by timestamp".into(),
                header.index_offset,
            );
            return;
        }

        for entry in &entries {
            if entry.file_offset < SEGMENT_HEADER_SIZE as u64 || entry.file_offset >= data_end {
                add_issue(
                    result,
                    IssueKind::IndexOutOfBounds,
                    IssueSeverity::Error,
                    format!("index entry points at {}, outside the data region", entry.file_offset),
                    entry.file_offset,
                );
                return;
            }
        }

        result.index_valid = true;
    }
}

fn add_issue(
    result: &mut SegmentValidationResult,
    kind: IssueKind,
    severity: IssueSeverity,
    message: String,
    file_offset: u64,
) {
    let event_index = u64::from(result.actual_event_count);
    result.issues.push(ValidationIssue {
        kind,
        severity,
        message,
        file_offset,
        event_index,
        timestamp_ns: 0,
    });
}

fn add_issue_with_ts(
    result: &mut SegmentValidationResult,
    kind: IssueKind,
    severity: IssueSeverity,
    message: String,
    file_offset: u64,
    timestamp_ns: i64,
) {
    let event_index = u64::from(result.actual_event_count);
    result.issues.push(ValidationIssue {
        kind,
        severity,
        message,
        file_offset,
        event_index,
        timestamp_ns,
    });
}

/// Runs segment validation across a dataset, aggregating the results.
pub struct DatasetValidator {
    config: ValidatorConfig,
}

impl Default for DatasetValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

impl DatasetValidator {
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validates every segment in `data_dir` in sequence.
    ///
    /// # Errors
    ///
    /// Will return `Err` only if the directory itself cannot be listed.
    pub fn validate(&self, data_dir: &Path) -> Result<DatasetValidationResult> {
        let validator = SegmentValidator::new(self.config.clone());

        let mut result = DatasetValidationResult {
            data_dir: data_dir.to_path_buf(),
            ..Default::default()
        };

        for path in list_segment_paths(data_dir)? {
            let segment = validator.validate(&path);

            result.total_segments += 1;
            result.total_events += u64::from(segment.actual_event_count);
            result.total_bytes += segment.bytes_scanned;

            if segment.is_valid() {
                result.valid_segments += 1;
            } else {
                result.corrupted_segments += 1;
            }

            for issue in &segment.issues {
                match issue.severity {
                    IssueSeverity::Warning => result.total_warnings += 1,
                    IssueSeverity::Error | IssueSeverity::Critical => result.total_errors += 1,
                    IssueSeverity::Info => {}
                }
            }

            if segment.actual_first_ts > 0
                && (result.first_timestamp == 0 || segment.actual_first_ts < result.first_timestamp)
            {
                result.first_timestamp = segment.actual_first_ts;
            }
            result.last_timestamp = result.last_timestamp.max(segment.actual_last_ts);

            result.segments.push(segment);
        }

        Ok(result)
    }
}

/// Repair policy
#[derive(Clone, Debug)]
pub struct RepairConfig {
    pub backup_before_repair: bool,
    pub backup_suffix: String,
    pub fix_header_timestamps: bool,
    pub fix_event_count: bool,
    pub rebuild_index: bool,
    pub truncate_at_corruption: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            backup_before_repair: true,
            backup_suffix: ".backup".into(),
            fix_header_timestamps: true,
            fix_event_count: true,
            rebuild_index: true,
            truncate_at_corruption: false,
        }
    }
}

/// What a repair pass did.
#[derive(Clone, Debug, Default)]
pub struct RepairResult {
    pub path: PathBuf,
    pub success: bool,
    pub backup_created: bool,
    pub backup_path: Option<PathBuf>,
    pub actions_taken: Vec<String>,
    pub errors: Vec<String>,
}

/// Best-effort in-place segment repair.
pub struct SegmentRepairer {
    config: RepairConfig,
}

impl Default for SegmentRepairer {
    fn default() -> Self {
        Self::new(RepairConfig::default())
    }
}

impl SegmentRepairer {
    #[must_use]
    pub fn new(config: RepairConfig) -> Self {
        Self { config }
    }

    /// Validates, then repairs.
    #[must_use]
    pub fn repair(&self, segment_path: &Path) -> RepairResult {
        let validation = SegmentValidator::default().validate(segment_path);
        self.repair_with(segment_path, &validation)
    }

    /// Repairs using an existing validation result.
    #[must_use]
    pub fn repair_with(
        &self,
        segment_path: &Path,
        validation: &SegmentValidationResult,
    ) -> RepairResult {
        let mut result = RepairResult {
            path: segment_path.to_path_buf(),
            ..Default::default()
        };

        if !validation.header_valid {
            result
                .errors
                .push("header is unrecoverable, cannot repair".into());
            return result;
        }

        if self.config.backup_before_repair {
            let backup = PathBuf::from(format!(
                "{}{}",
                segment_path.display(),
                self.config.backup_suffix
            ));
            match std::fs::copy(segment_path, &backup) {
                Ok(_) => {
                    result.backup_created = true;
                    result.backup_path = Some(backup);
                }
                Err(e) => {
                    result.errors.push(format!("backup failed: {e}"));
                    return result;
                }
            }
        }

        if self.config.truncate_at_corruption {
            if let Err(e) = self.truncate_at_corruption(segment_path, validation, &mut result) {
                result.errors.push(format!("truncation failed: {e:?}"));
            }
        }

        // Truncation invalidates the scanned stats; rescan before touching
        // the header
        let rescanned;
        let validation = if self.config.truncate_at_corruption {
            rescanned = SegmentValidator::default().validate(segment_path);
            &rescanned
        } else {
            validation
        };

        if let Err(e) = self.fix_header(segment_path, validation, &mut result) {
            result.errors.push(format!("header fix failed: {e:?}"));
        }

        if self.config.rebuild_index && validation.has_index {
            let builder = IndexBuilder::new(IndexBuilderConfig::default());
            match builder.build_for_segment(segment_path) {
                Ok(stats) => {
                    result.actions_taken.push(format!(
                        "rebuilt index ({} entries)",
                        stats.index_entries_created
                    ));
                }
                Err(e) => {
                    result.errors.push(format!("index rebuild failed: {e:?}"));
                }
            }
        }

        result.success = result.errors.is_empty();
        if result.success {
            log::info!(
                "Repaired {segment_path:?}: {}",
                result.actions_taken.join(", ")
            );
        }
        result
    }

    fn truncate_at_corruption(
        &self,
        segment_path: &Path,
        validation: &SegmentValidationResult,
        result: &mut RepairResult,
    ) -> Result<()> {
        let corruption_offset = validation
            .issues
            .iter()
            .filter(|i| {
                matches!(
                    i.kind,
                    IssueKind::FrameTruncated
                        | IssueKind::FrameSizeTooLarge
                        | IssueKind::FrameCrcMismatch
                        | IssueKind::BlockMagicInvalid
                        | IssueKind::BlockDecompressionFailed
                        | IssueKind::BlockSizeMismatch
                )
            })
            .map(|i| i.file_offset)
            .filter(|&offset| offset >= SEGMENT_HEADER_SIZE as u64)
            .min();

        let Some(offset) = corruption_offset else {
            return Ok(());
        };

        let file = OpenOptions::new().write(true).open(segment_path)?;
        file.set_len(offset)?;

        result
            .actions_taken
            .push(format!("truncated at corruption offset {offset}"));
        Ok(())
    }

    fn fix_header(
        &self,
        segment_path: &Path,
        validation: &SegmentValidationResult,
        result: &mut RepairResult,
    ) -> Result<()> {
        let mut header = crate::segment::read_segment_header(segment_path)?;
        let mut touched = false;

        if self.config.fix_header_timestamps
            && (header.first_event_ns != validation.actual_first_ts
                || header.last_event_ns != validation.actual_last_ts)
        {
            header.first_event_ns = validation.actual_first_ts;
            header.last_event_ns = validation.actual_last_ts;
            touched = true;
            result.actions_taken.push(format!(
                "fixed header timestamps to [{}, {}]",
                validation.actual_first_ts, validation.actual_last_ts
            ));
        }

        if self.config.fix_event_count && header.event_count != validation.actual_event_count {
            result.actions_taken.push(format!(
                "fixed event count {} -> {}",
                header.event_count, validation.actual_event_count
            ));
            header.event_count = validation.actual_event_count;
            touched = true;
        }

        if touched {
            use crate::coding::Encode;

            let mut file = OpenOptions::new().read(true).write(true).open(segment_path)?;
            file.seek(SeekFrom::Start(0))?;
            header.encode_into(&mut file)?;
        }

        Ok(())
    }
}

/// One-call structural check of a single segment.
#[must_use]
pub fn is_valid_segment(segment_path: &Path) -> bool {
    let result = SegmentValidator::default().validate(segment_path);
    result.is_valid() && !result.has_errors()
}

/// One-call structural check of a whole dataset.
#[must_use]
pub fn is_valid_dataset(data_dir: &Path) -> bool {
    DatasetValidator::default()
        .validate(data_dir)
        .map(|r| r.is_valid())
        .unwrap_or(false)
}
