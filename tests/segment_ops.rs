mod common;

use common::{book, trade, write_trades};
use floxlog::{
    ops::{self, ExportConfig, ExportFormat, MergeConfig, SplitConfig, SplitMode},
    CompressionType, LogReader, SegmentIterator, WriterConfig,
};
use test_log::test;

#[test]
fn merge_interleaves_by_timestamp() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;

    // Two segments with interleaved timestamps
    let writer = WriterConfig::new(folder.path())
        .output_filename("even.floxlog")
        .open()?;
    for i in (0..100i64).step_by(2) {
        writer.write_trade(&trade(i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    let writer = WriterConfig::new(folder.path())
        .output_filename("odd.floxlog")
        .open()?;
    for i in (1..100i64).step_by(2) {
        writer.write_trade(&trade(i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    let result = ops::merge_directory(folder.path(), &MergeConfig::new(out.path()))?;

    assert_eq!(2, result.segments_merged);
    assert_eq!(100, result.events_written);
    assert!(result.output_path.exists());

    let mut timestamps = vec![];
    LogReader::open(out.path()).for_each(|event| {
        timestamps.push(event.timestamp_ns());
        true
    })?;

    let expected: Vec<i64> = (0..100).map(|i| i * 1_000_000).collect();
    assert_eq!(expected, timestamps);

    Ok(())
}

#[test]
fn split_by_event_count() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    write_trades(folder.path(), 100, 1_000_000, CompressionType::None, 1000)?;

    let input = LogReader::open(folder.path()).segment_files()?.remove(0);

    let mut config = SplitConfig::new(out.path(), SplitMode::ByEventCount);
    config.events_per_file = 30;
    let result = ops::split(&input, &config)?;

    assert_eq!(4, result.segments_created);
    assert_eq!(100, result.events_written);
    assert!(out.path().join("segment_000000.floxlog").exists());
    assert!(out.path().join("segment_000003.floxlog").exists());

    let mut reader = LogReader::open(out.path());
    assert_eq!(100, reader.count()?);

    Ok(())
}

#[test]
fn split_by_symbol_routes_every_event() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path()).open()?;
    for i in 0..90i64 {
        writer.write_trade(&trade(i * 1_000, 1 + (i % 3) as u32, i as u64))?;
    }
    writer.close()?;

    let input = LogReader::open(folder.path()).segment_files()?.remove(0);
    let result = ops::split(&input, &SplitConfig::new(out.path(), SplitMode::BySymbol))?;

    assert_eq!(3, result.segments_created);
    assert_eq!(90, result.events_written);

    for symbol in 1..=3u32 {
        let path = out.path().join(format!("symbol_{symbol}.floxlog"));
        let mut iter = SegmentIterator::new(&path)?;
        let mut count = 0;
        while let Some(event) = iter.next_event()? {
            assert_eq!(symbol, event.symbol_id());
            count += 1;
        }
        assert_eq!(30, count);
    }

    Ok(())
}

#[test]
fn split_by_time_buckets() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;

    // 4 hours of data, one event per minute
    write_trades(
        folder.path(),
        240,
        60 * 1_000_000_000,
        CompressionType::None,
        1000,
    )?;

    let input = LogReader::open(folder.path()).segment_files()?.remove(0);
    let result = ops::split(&input, &SplitConfig::new(out.path(), SplitMode::ByTime))?;

    assert_eq!(4, result.segments_created);
    assert_eq!(240, result.events_written);
    // Hour buckets starting at the epoch
    assert!(out.path().join("19700101_000000.floxlog").exists());
    assert!(out.path().join("19700101_030000.floxlog").exists());

    Ok(())
}

#[test]
fn extract_and_filter() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    write_trades(folder.path(), 1000, 1_000_000, CompressionType::None, 1000)?;

    let input = LogReader::open(folder.path()).segment_files()?.remove(0);

    let extracted = ops::extract_time_range(
        &input,
        &out.path().join("slice.floxlog"),
        100_000_000,
        199_000_000,
    )?;
    assert_eq!(100, extracted);

    let mut iter = SegmentIterator::new(out.path().join("slice.floxlog"))?;
    while let Some(event) = iter.next_event()? {
        assert!(event.timestamp_ns() >= 100_000_000);
        assert!(event.timestamp_ns() <= 199_000_000);
    }

    Ok(())
}

#[cfg(feature = "lz4")]
#[test]
fn recompress_preserves_events() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    write_trades(folder.path(), 500, 1_000_000, CompressionType::None, 100)?;

    let input = LogReader::open(folder.path()).segment_files()?.remove(0);
    let output = out.path().join("packed.floxlog");

    let written = ops::recompress(&input, &output, CompressionType::Lz4)?;
    assert_eq!(500, written);
    assert!(std::fs::metadata(&output)?.len() < std::fs::metadata(&input)?.len());

    let mut timestamps = vec![];
    let mut iter = SegmentIterator::new(&output)?;
    while let Some(event) = iter.next_event()? {
        timestamps.push(event.timestamp_ns());
    }
    assert_eq!(500, timestamps.len());
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

    Ok(())
}

#[test]
fn csv_export_has_fixed_columns() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path()).open()?;
    writer.write_trade(&trade(1_000, 7, 42))?;
    let (header, bids, asks) = book(2_000, 8, 2);
    writer.write_book(&header, &bids, &asks)?;
    writer.close()?;

    let input = LogReader::open(folder.path()).segment_files()?.remove(0);
    let csv_path = out.path().join("events.csv");

    let result = ops::export(&input, &ExportConfig::new(&csv_path, ExportFormat::Csv))?;
    assert_eq!(2, result.events_exported);

    let text = std::fs::read_to_string(&csv_path)?;
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(
        "type,timestamp_ns,symbol_id,price,qty,side,trade_id,bid_count,ask_count",
        lines[0]
    );
    assert_eq!(
        "trade,1000,7,50000000000,1000000,1,42,0,0",
        lines[1]
    );
    assert_eq!("book_snapshot,2000,8,0,0,0,0,2,2", lines[2]);

    Ok(())
}

#[test]
fn jsonl_export_is_one_object_per_line() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    write_trades(folder.path(), 10, 1_000, CompressionType::None, 1000)?;

    let input = LogReader::open(folder.path()).segment_files()?.remove(0);
    let path = out.path().join("events.jsonl");

    ops::export(&input, &ExportConfig::new(&path, ExportFormat::JsonLines))?;

    let text = std::fs::read_to_string(&path)?;
    assert_eq!(10, text.lines().count());

    for line in text.lines() {
        let value: serde_json::Value = serde_json::from_str(line).expect("valid JSON");
        assert_eq!("trade", value["type"]);
    }

    Ok(())
}

#[test]
fn json_export_is_a_valid_array() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    write_trades(folder.path(), 5, 1_000, CompressionType::None, 1000)?;

    let input = LogReader::open(folder.path()).segment_files()?.remove(0);
    let path = out.path().join("events.json");

    ops::export(&input, &ExportConfig::new(&path, ExportFormat::Json))?;

    let text = std::fs::read_to_string(&path)?;
    let value: serde_json::Value = serde_json::from_str(&text).expect("valid JSON");
    assert_eq!(5, value.as_array().expect("array").len());

    Ok(())
}

#[test]
fn trades_only_export_filters_books() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path()).open()?;
    for i in 0..20i64 {
        if i % 2 == 0 {
            writer.write_trade(&trade(i * 1_000, 1, i as u64))?;
        } else {
            let (header, bids, asks) = book(i * 1_000, 1, 1);
            writer.write_book(&header, &bids, &asks)?;
        }
    }
    writer.close()?;

    let input = LogReader::open(folder.path()).segment_files()?.remove(0);
    let path = out.path().join("trades.csv");

    let mut config = ExportConfig::new(&path, ExportFormat::Csv);
    config.trades_only = true;
    let result = ops::export(&input, &config)?;

    assert_eq!(10, result.events_exported);

    Ok(())
}
