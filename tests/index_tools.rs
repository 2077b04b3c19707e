mod common;

use common::write_trades;
use floxlog::{
    CompressionType, GlobalIndexBuilder, IndexBuilder, IndexBuilderConfig, LogReader,
    SegmentIterator,
};
use test_log::test;

#[test]
fn build_then_remove_index() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    // Written without an index
    let writer = floxlog::WriterConfig::new(folder.path())
        .create_index(false)
        .open()?;
    for i in 0..100i64 {
        writer.write_trade(&common::trade(i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    let mut reader = LogReader::open(folder.path());
    let segment_path = reader.segment_files()?.remove(0);
    assert!(!IndexBuilder::has_index(&segment_path)?);

    // Second pass adds the index in place
    let builder = IndexBuilder::new(IndexBuilderConfig {
        index_interval: 10,
        ..Default::default()
    });
    let stats = builder.build_for_segment(&segment_path)?;

    assert_eq!(100, stats.events_scanned);
    assert_eq!(10, stats.index_entries_created);
    assert!(IndexBuilder::has_index(&segment_path)?);

    let indexed_size = std::fs::metadata(&segment_path)?.len();

    let mut count = 0u64;
    LogReader::open(folder.path()).for_each(|_| {
        count += 1;
        true
    })?;
    assert_eq!(100, count);

    // Removing the index shrinks the file but not the data
    assert!(IndexBuilder::remove_index(&segment_path)?);
    assert!(!IndexBuilder::has_index(&segment_path)?);
    assert!(std::fs::metadata(&segment_path)?.len() < indexed_size);

    let mut count = 0u64;
    LogReader::open(folder.path()).for_each(|_| {
        count += 1;
        true
    })?;
    assert_eq!(100, count);

    // No-op on a segment without an index
    assert!(!IndexBuilder::remove_index(&segment_path)?);

    Ok(())
}

#[test]
fn built_index_is_loadable_and_seekable() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = floxlog::WriterConfig::new(folder.path())
        .create_index(false)
        .open()?;
    for i in 0..500i64 {
        writer.write_trade(&common::trade(i * 1_000_000_000, 1, i as u64))?;
    }
    writer.close()?;

    let segment_path = LogReader::open(folder.path()).segment_files()?.remove(0);

    IndexBuilder::new(IndexBuilderConfig {
        index_interval: 50,
        ..Default::default()
    })
    .build_for_segment(&segment_path)?;

    let mut iter = SegmentIterator::new(&segment_path)?;
    assert!(iter.load_index()?);
    iter.seek_to_timestamp(250 * 1_000_000_000)?;

    let first = iter
        .next_event()?
        .expect("events after seek position");
    assert!(first.timestamp_ns() <= 250 * 1_000_000_000);

    Ok(())
}

#[test]
fn global_index_covers_all_segments() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = floxlog::WriterConfig::new(folder.path())
        .max_segment_bytes(2048)
        .open()?;
    for i in 0..200i64 {
        writer.write_trade(&common::trade(i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    let segment_count = LogReader::open(folder.path()).segments()?.len();

    let indexed = GlobalIndexBuilder::build(folder.path(), None)?;
    assert_eq!(segment_count as u32, indexed);

    let index = GlobalIndexBuilder::load(&GlobalIndexBuilder::index_path(folder.path()))?;
    assert_eq!(segment_count, index.entries.len());
    assert_eq!(200, index.header.total_events);

    let named_total: u64 = index
        .entries
        .iter()
        .map(|e| u64::from(e.segment.event_count))
        .sum();
    assert_eq!(200, named_total);

    for entry in &index.entries {
        assert!(entry.filename.ends_with(".floxlog"));
        assert!(folder.path().join(&entry.filename).exists());
    }

    Ok(())
}

#[cfg(feature = "lz4")]
#[test]
fn index_builder_handles_compressed_segments() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_trades(folder.path(), 300, 1_000_000, CompressionType::Lz4, 50)?;

    let segment_path = LogReader::open(folder.path()).segment_files()?.remove(0);

    // Rebuild over the existing index; one entry per block
    let stats = IndexBuilder::new(IndexBuilderConfig::default()).build_for_segment(&segment_path)?;
    assert_eq!(300, stats.events_scanned);
    assert_eq!(6, stats.index_entries_created);

    let mut count = 0u64;
    LogReader::open(folder.path()).for_each(|_| {
        count += 1;
        true
    })?;
    assert_eq!(300, count);

    Ok(())
}
