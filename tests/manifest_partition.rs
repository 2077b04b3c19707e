mod common;

use common::{trade, write_trades};
use floxlog::{
    get_or_build_manifest, manifest_path, CalendarUnit, CompressionType, Partition, Partitioner,
    SegmentManifest, WriterConfig,
};
use test_log::test;

#[test]
fn manifest_build_save_load() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path())
        .max_segment_bytes(2048)
        .open()?;
    for i in 0..100i64 {
        writer.write_trade(&trade(i * 1_000_000, 1 + (i % 2) as u32, i as u64))?;
    }
    writer.close()?;

    let manifest = SegmentManifest::build_and_save(folder.path())?;

    assert!(manifest.segment_count() > 1);
    assert_eq!(100, manifest.total_events());
    assert_eq!(0, manifest.first_timestamp());
    assert_eq!(99 * 1_000_000, manifest.last_timestamp());
    assert_eq!(2, manifest.symbols().len());

    let loaded = SegmentManifest::load(&manifest_path(folder.path())).expect("saved manifest");
    assert_eq!(manifest.segment_count(), loaded.segment_count());
    assert_eq!(manifest.total_events(), loaded.total_events());
    assert_eq!(manifest.symbols(), loaded.symbols());
    assert!(loaded.is_up_to_date());

    Ok(())
}

#[test]
fn new_segment_invalidates_manifest() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_trades(folder.path(), 50, 1_000_000, CompressionType::None, 10)?;

    SegmentManifest::build_and_save(folder.path())?;
    let loaded = SegmentManifest::load(&manifest_path(folder.path())).expect("saved manifest");
    assert!(loaded.is_up_to_date());

    // A new segment appears
    std::thread::sleep(std::time::Duration::from_millis(20));
    let writer = WriterConfig::new(folder.path())
        .output_filename("extra.floxlog")
        .open()?;
    writer.write_trade(&trade(1_000_000_000, 9, 1))?;
    writer.close()?;

    assert!(!loaded.is_up_to_date());

    // get_or_build picks up the new state
    let rebuilt = get_or_build_manifest(folder.path())?;
    assert_eq!(51, rebuilt.total_events());
    assert!(rebuilt.symbols().contains(&9));

    Ok(())
}

#[test]
fn time_partitions_tile_the_range() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_trades(folder.path(), 1000, 1_000_000, CompressionType::None, 100)?;

    let partitioner = Partitioner::from_dir(folder.path())?;
    let partitions = partitioner.partition_by_time(4, 10_000_000);

    assert_eq!(4, partitions.len());

    // Contiguous, non-overlapping, covering [first, last]
    assert_eq!(0, partitions[0].from_ns);
    assert_eq!(999_000_000, partitions[3].to_ns);
    for pair in partitions.windows(2) {
        assert_eq!(pair[0].to_ns, pair[1].from_ns);
    }

    // Warmup clamps to the dataset start
    assert_eq!(0, partitions[0].warmup_from_ns);
    assert!(partitions[1].has_warmup());
    assert_eq!(
        partitions[1].from_ns - 10_000_000,
        partitions[1].warmup_from_ns
    );

    for partition in &partitions {
        assert!(!partition.segments.is_empty());
        assert!(partition.estimated_events > 0);
    }

    Ok(())
}

#[test]
fn calendar_partitions_wrap_duration() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    // 3 hours of data, one event per minute
    write_trades(
        folder.path(),
        180,
        60 * 1_000_000_000,
        CompressionType::None,
        100,
    )?;

    let partitioner = Partitioner::from_dir(folder.path())?;
    let partitions = partitioner.partition_by_calendar(CalendarUnit::Hour, 0);

    assert_eq!(3, partitions.len());
    assert_eq!(
        3_600_000_000_000,
        partitions[0].processing_duration()
    );

    Ok(())
}

#[test]
fn symbol_partitions_split_the_universe() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path()).open()?;
    for i in 0..400i64 {
        writer.write_trade(&trade(i * 1_000, 1 + (i % 4) as u32, i as u64))?;
    }
    writer.close()?;

    let partitioner = Partitioner::from_dir(folder.path())?;

    let partitions = partitioner.partition_by_symbol(2);
    assert_eq!(2, partitions.len());
    assert_eq!(2, partitions[0].symbols.len());
    assert_eq!(2, partitions[1].symbols.len());

    let per_symbol = partitioner.partition_per_symbol();
    assert_eq!(4, per_symbol.len());
    assert!(per_symbol.iter().all(|p| p.symbols.len() == 1));
    assert_eq!(100, per_symbol[0].estimated_events);

    Ok(())
}

#[test]
fn event_count_partitions_follow_segments() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path())
        .max_segment_bytes(2048)
        .open()?;
    for i in 0..300i64 {
        writer.write_trade(&trade(i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    let partitioner = Partitioner::from_dir(folder.path())?;
    let partitions = partitioner.partition_by_event_count(3);

    assert!(!partitions.is_empty());

    let total: u64 = partitions.iter().map(|p| p.estimated_events).sum();
    assert_eq!(300, total);

    // Partitions are segment-aligned and ordered
    for pair in partitions.windows(2) {
        assert!(pair[0].to_ns <= pair[1].from_ns);
    }

    Ok(())
}

#[test]
fn partition_dispatch_roundtrip() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_trades(folder.path(), 100, 1_000_000, CompressionType::None, 10)?;

    let partitioner = Partitioner::from_dir(folder.path())?;
    let partitions = partitioner.partition_by_time(2, 0);

    for partition in &partitions {
        let restored = Partition::deserialize(&partition.serialize()).expect("should parse");
        assert_eq!(partition.partition_id, restored.partition_id);
        assert_eq!(partition.from_ns, restored.from_ns);
        assert_eq!(partition.to_ns, restored.to_ns);
        assert_eq!(partition.segments.len(), restored.segments.len());

        let json: serde_json::Value =
            serde_json::from_str(&partition.to_json()).expect("valid JSON");
        assert_eq!(partition.from_ns, json["from_ns"].as_i64().expect("from_ns"));
    }

    Ok(())
}
