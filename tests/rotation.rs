mod common;

use common::trade;
use floxlog::{LogReader, WriterConfig};
use test_log::test;

#[test]
fn rotation_by_size_preserves_the_stream() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path())
        .max_segment_bytes(2048)
        .open()?;
    for i in 0..100i64 {
        writer.write_trade(&trade(i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    assert!(writer.stats().segments_created > 1);
    assert_eq!(100, writer.stats().events_written);

    let mut reader = LogReader::open(folder.path());
    assert!(reader.segments()?.len() > 1);

    // Union of all segments, in read order, equals the input stream
    let mut timestamps = vec![];
    reader.for_each(|event| {
        timestamps.push(event.timestamp_ns());
        true
    })?;

    let expected: Vec<i64> = (0..100).map(|i| i * 1_000_000).collect();
    assert_eq!(expected, timestamps);

    Ok(())
}

#[test]
fn sealed_segments_have_consistent_headers() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path())
        .max_segment_bytes(2048)
        .open()?;
    for i in 0..100i64 {
        writer.write_trade(&trade(i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    let mut reader = LogReader::open(folder.path());

    let mut header_total = 0u64;
    for segment in reader.segments()? {
        // No frame crosses a segment boundary, so each header's event
        // count must match a full scan of its body
        let actual = floxlog::SegmentIterator::new(&segment.path)?.count();
        assert_eq!(segment.event_count as usize, actual);
        assert!(segment.first_event_ns <= segment.last_event_ns);
        header_total += u64::from(segment.event_count);
    }

    assert_eq!(100, header_total);

    Ok(())
}

#[test]
fn first_segment_uses_configured_filename() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path())
        .output_filename("capture.floxlog")
        .open()?;
    writer.write_trade(&trade(1, 1, 1))?;
    writer.close()?;

    assert!(folder.path().join("capture.floxlog").exists());

    Ok(())
}

#[test]
fn rotation_callback_names_segments() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path())
        .max_segment_bytes(1024)
        .rotation_callback(Box::new(|dir, n| dir.join(format!("part_{n:03}.floxlog"))))
        .open()?;
    for i in 0..100i64 {
        writer.write_trade(&trade(i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    assert!(folder.path().join("part_001.floxlog").exists());
    assert!(folder.path().join("part_002.floxlog").exists());

    Ok(())
}
