mod common;

use common::trade;
use floxlog::{ParallelReaderConfig, ReaderFilter, WriterConfig};
use test_log::test;

/// Two segments with disjoint time ranges, written in reverse order.
fn write_reversed_dataset(dir: &std::path::Path) -> floxlog::Result<()> {
    let writer = WriterConfig::new(dir)
        .output_filename("late.floxlog")
        .open()?;
    for i in 0..100i64 {
        writer.write_trade(&trade(100_000_000 + i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    let writer = WriterConfig::new(dir)
        .output_filename("early.floxlog")
        .open()?;
    for i in 0..100i64 {
        writer.write_trade(&trade(i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    Ok(())
}

#[test]
fn sorted_output_is_globally_ordered() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_reversed_dataset(folder.path())?;

    let mut reader = ParallelReaderConfig::new(folder.path())
        .sort_output(true)
        .open()?;

    let mut timestamps = vec![];
    let delivered = reader.for_each(|event| {
        timestamps.push(event.timestamp_ns());
        true
    });

    assert_eq!(200, delivered);
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(0, timestamps[0]);
    assert_eq!(199_000_000, *timestamps.last().expect("non-empty"));

    let stats = reader.stats();
    assert_eq!(2, stats.segments_processed);
    assert_eq!(200, stats.events_read);
    assert_eq!(200, stats.trades_read);

    Ok(())
}

#[test]
fn unsorted_output_preserves_within_segment_order() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_reversed_dataset(folder.path())?;

    let mut reader = ParallelReaderConfig::new(folder.path())
        .sort_output(false)
        .num_threads(2)
        .open()?;

    let mut timestamps = vec![];
    let delivered = reader.for_each(|event| {
        timestamps.push(event.timestamp_ns());
        true
    });

    assert_eq!(200, delivered);

    // Each segment's events arrive as one contiguous, ordered run
    let first_of_second_run = timestamps
        .windows(2)
        .position(|w| w[0] > w[1])
        .map_or(timestamps.len(), |i| i + 1);
    assert!(timestamps[..first_of_second_run].windows(2).all(|w| w[0] <= w[1]));
    assert!(timestamps[first_of_second_run..].windows(2).all(|w| w[0] <= w[1]));

    Ok(())
}

#[test]
fn filters_apply_per_event() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_reversed_dataset(folder.path())?;

    let mut reader = ParallelReaderConfig::new(folder.path())
        .filter(ReaderFilter::new().from_ns(50_000_000).to_ns(149_000_000))
        .open()?;

    let mut count = 0u64;
    reader.for_each(|event| {
        assert!(event.timestamp_ns() >= 50_000_000);
        assert!(event.timestamp_ns() <= 149_000_000);
        count += 1;
        true
    });

    assert_eq!(100, count);

    Ok(())
}

#[test]
fn callback_false_cancels_workers() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_reversed_dataset(folder.path())?;

    let mut reader = ParallelReaderConfig::new(folder.path())
        .sort_output(false)
        .open()?;

    let mut seen = 0u64;
    let delivered = reader.for_each(|_| {
        seen += 1;
        seen < 5
    });

    assert_eq!(5, delivered);

    Ok(())
}

#[test]
fn batch_delivery_hands_out_whole_segments() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    write_reversed_dataset(folder.path())?;

    let mut reader = ParallelReaderConfig::new(folder.path()).open()?;

    let mut batches = vec![];
    reader.for_each_batch(|batch| {
        batches.push(batch.len());
        true
    });

    assert_eq!(2, batches.len());
    assert_eq!(vec![100, 100], batches);

    Ok(())
}
