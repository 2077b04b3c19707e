mod common;

use common::write_trades;
use floxlog::{
    CompressionType, DatasetValidator, IssueKind, IssueSeverity, LogReader, RepairConfig,
    SegmentRepairer, SegmentValidator,
};
use std::io::{Seek, SeekFrom, Write};
use test_log::test;

// event_count lives at byte 32 of the segment header
const EVENT_COUNT_OFFSET: u64 = 32;

#[test]
fn clean_segment_validates_clean() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_trades(folder.path(), 100, 1_000_000, CompressionType::None, 10)?;

    let segment_path = LogReader::open(folder.path()).segment_files()?.remove(0);
    let result = SegmentValidator::default().validate(&segment_path);

    assert!(result.is_valid());
    assert!(!result.has_errors());
    assert!(result.header_valid);
    assert_eq!(100, result.actual_event_count);
    assert_eq!(100, result.reported_event_count);
    assert_eq!(100, result.trades_found);
    assert_eq!(0, result.crc_errors);
    assert!(result.has_index);
    assert!(result.index_valid);

    Ok(())
}

#[test]
fn corrupted_event_count_is_reported_and_repaired() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_trades(folder.path(), 100, 1_000_000, CompressionType::None, 10)?;

    let segment_path = LogReader::open(folder.path()).segment_files()?.remove(0);

    // Corrupt the header's event count
    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&segment_path)?;
        file.seek(SeekFrom::Start(EVENT_COUNT_OFFSET))?;
        file.write_all(&999u32.to_le_bytes())?;
    }

    let result = SegmentValidator::default().validate(&segment_path);
    assert!(result.is_valid()); // a count mismatch is not critical
    assert_eq!(999, result.reported_event_count);
    assert_eq!(100, result.actual_event_count);

    let mismatches = result.issues_of(IssueKind::EventCountMismatch);
    assert_eq!(1, mismatches.len());
    assert_eq!(IssueSeverity::Warning, mismatches[0].severity);
    assert!(mismatches[0].message.contains("reported=999"));
    assert!(mismatches[0].message.contains("actual=100"));

    // Repair, then a second validation shows equality
    let repair = SegmentRepairer::default().repair(&segment_path);
    assert!(repair.success, "repair errors: {:?}", repair.errors);
    assert!(repair.backup_created);
    assert!(repair
        .backup_path
        .as_ref()
        .is_some_and(|p| p.exists()));

    let result = SegmentValidator::default().validate(&segment_path);
    assert_eq!(100, result.reported_event_count);
    assert_eq!(100, result.actual_event_count);
    assert!(result.issues_of(IssueKind::EventCountMismatch).is_empty());

    Ok(())
}

#[test]
fn flipped_payload_byte_is_a_crc_error() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_trades(folder.path(), 10, 1_000_000, CompressionType::None, 1000)?;

    let segment_path = LogReader::open(folder.path()).segment_files()?.remove(0);

    // Flip one byte in the middle of the first payload (the price field)
    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&segment_path)?;
        file.seek(SeekFrom::Start(64 + 12 + 20))?;
        file.write_all(&[0xFF])?;
    }

    let result = SegmentValidator::default().validate(&segment_path);
    assert_eq!(1, result.crc_errors);
    assert!(result.has_errors());
    assert!(result.is_valid()); // CRC damage is an error, not critical

    let crc_issues = result.issues_of(IssueKind::FrameCrcMismatch);
    assert_eq!(1, crc_issues.len());

    // The reader stops cleanly at the bad frame
    let mut count = 0u64;
    LogReader::open(folder.path()).for_each(|_| {
        count += 1;
        true
    })?;
    assert_eq!(0, count);

    Ok(())
}

#[test]
fn truncated_tail_is_detected() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    // No index so the data region runs to EOF
    let writer = floxlog::WriterConfig::new(folder.path())
        .create_index(false)
        .open()?;
    for i in 0..10i64 {
        writer.write_trade(&common::trade(i * 1_000, 1, i as u64))?;
    }
    writer.close()?;

    let segment_path = LogReader::open(folder.path()).segment_files()?.remove(0);

    // Chop the last frame in half
    let len = std::fs::metadata(&segment_path)?.len();
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&segment_path)?;
    file.set_len(len - 30)?;

    let result = SegmentValidator::default().validate(&segment_path);
    assert!(result.has_errors());
    assert_eq!(9, result.actual_event_count);
    assert!(!result.issues_of(IssueKind::FrameTruncated).is_empty());

    // Truncating repair drops the partial frame and fixes the header
    let repair = SegmentRepairer::new(RepairConfig {
        truncate_at_corruption: true,
        rebuild_index: false,
        ..Default::default()
    })
    .repair(&segment_path);
    assert!(repair.success, "repair errors: {:?}", repair.errors);

    let result = SegmentValidator::default().validate(&segment_path);
    assert!(!result.has_errors());
    assert_eq!(9, result.actual_event_count);
    assert_eq!(9, result.reported_event_count);

    Ok(())
}

#[test]
fn dataset_validation_aggregates() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = floxlog::WriterConfig::new(folder.path())
        .max_segment_bytes(2048)
        .open()?;
    for i in 0..100i64 {
        writer.write_trade(&common::trade(i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    let result = DatasetValidator::default().validate(folder.path())?;

    assert!(result.is_valid());
    assert!(result.total_segments > 1);
    assert_eq!(result.total_segments, result.valid_segments);
    assert_eq!(0, result.corrupted_segments);
    assert_eq!(100, result.total_events);
    assert_eq!(99 * 1_000_000, result.last_timestamp);

    Ok(())
}

#[test]
fn missing_file_is_critical() {
    let result = SegmentValidator::default().validate(std::path::Path::new("/nonexistent.floxlog"));
    assert!(!result.is_valid());
    assert!(!result.issues_of(IssueKind::FileNotFound).is_empty());
}
