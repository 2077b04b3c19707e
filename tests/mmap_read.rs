mod common;

use common::write_trades;
use floxlog::{CompressionType, LogReader, MmapReader, MmapSegmentReader, ReaderFilter};
use test_log::test;

#[test]
fn mapped_read_matches_streaming_read() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_trades(folder.path(), 500, 1_000_000, CompressionType::None, 50)?;

    let mut streamed = vec![];
    LogReader::open(folder.path()).for_each(|event| {
        streamed.push(event.clone());
        true
    })?;

    let mut mapped = vec![];
    MmapReader::new(folder.path(), ReaderFilter::default())?.for_each(|event| {
        mapped.push(event.clone());
        true
    })?;

    assert_eq!(streamed, mapped);

    Ok(())
}

#[test]
fn mapped_seek_uses_the_index() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_trades(folder.path(), 1000, 1_000_000_000, CompressionType::None, 100)?;

    let segment_path = LogReader::open(folder.path()).segment_files()?.remove(0);

    let mut reader = MmapSegmentReader::new(&segment_path)?;
    assert!(reader.load_index()?);
    assert!(reader.index_entries().len() >= 10);

    reader.seek_to_timestamp(500 * 1_000_000_000)?;
    let first = reader.next_event()?.expect("events after seek");
    assert!(first.timestamp_ns() <= 500 * 1_000_000_000);

    // And the multi-segment path linear-skips up to the target
    let mut first_delivered = None;
    MmapReader::new(folder.path(), ReaderFilter::default())?.for_each_from(
        500 * 1_000_000_000,
        |event| {
            first_delivered = Some(event.timestamp_ns());
            false
        },
    )?;
    assert_eq!(Some(500 * 1_000_000_000), first_delivered);

    Ok(())
}

#[cfg(feature = "lz4")]
#[test]
fn compressed_segments_are_rejected_for_mapping() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_trades(folder.path(), 100, 1_000_000, CompressionType::Lz4, 50)?;

    let segment_path = LogReader::open(folder.path()).segment_files()?.remove(0);

    assert!(matches!(
        MmapSegmentReader::new(&segment_path),
        Err(floxlog::Error::CompressedSegmentNotMappable)
    ));

    Ok(())
}

#[test]
fn reset_rewinds_to_the_first_frame() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_trades(folder.path(), 10, 1_000, CompressionType::None, 10)?;

    let segment_path = LogReader::open(folder.path()).segment_files()?.remove(0);
    let mut reader = MmapSegmentReader::new(&segment_path)?;

    let first = reader.next_event()?.expect("first event");
    while reader.next_event()?.is_some() {}

    reader.reset();
    let again = reader.next_event()?.expect("first event after reset");
    assert_eq!(first, again);

    Ok(())
}
