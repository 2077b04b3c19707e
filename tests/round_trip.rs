mod common;

use common::{book, trade};
use floxlog::{CompressionType, LogReader, ReplayEvent, WriterConfig};
use test_log::test;

#[test]
fn single_trade_round_trip() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path()).open()?;
    writer.write_trade(&floxlog::TradeRecord {
        exchange_ts_ns: 1_000_000_000,
        recv_ts_ns: 1_000_000_100,
        price_raw: 50_000_000_000,
        qty_raw: 1_000_000,
        trade_id: 12345,
        symbol_id: 1,
        side: 1,
        ..Default::default()
    })?;
    writer.close()?;

    let mut reader = LogReader::open(folder.path());

    let summary = reader.summary()?;
    assert_eq!(1, summary.total_events);
    assert_eq!(1_000_000_000, summary.first_event_ns);
    assert_eq!(1_000_000_000, summary.last_event_ns);

    let mut seen = vec![];
    reader.for_each(|event| {
        seen.push(event.clone());
        true
    })?;

    assert_eq!(1, seen.len());
    let ReplayEvent::Trade(t) = &seen[0] else {
        panic!("expected a trade");
    };
    assert_eq!(1_000_000_000, t.exchange_ts_ns);
    assert_eq!(1_000_000_100, t.recv_ts_ns);
    assert_eq!(50_000_000_000, t.price_raw);
    assert_eq!(1_000_000, t.qty_raw);
    assert_eq!(12345, t.trade_id);
    assert_eq!(1, t.symbol_id);
    assert_eq!(1, t.side);

    Ok(())
}

#[test]
fn mixed_events_round_trip_in_order() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path()).open()?;
    for i in 0..50i64 {
        let ts = i * 1_000_000;
        if i % 2 == 0 {
            writer.write_trade(&trade(ts, 1, i as u64))?;
        } else {
            let (header, bids, asks) = book(ts, 2, 5);
            writer.write_book(&header, &bids, &asks)?;
        }
    }
    writer.close()?;

    let mut timestamps = vec![];
    let mut books = 0usize;
    LogReader::open(folder.path()).for_each(|event| {
        timestamps.push(event.timestamp_ns());
        if let ReplayEvent::Book(b) = event {
            assert_eq!(5, b.bids.len());
            assert_eq!(5, b.asks.len());
            assert_eq!(49_000_000_000, b.bids[0].price_raw);
            books += 1;
        }
        true
    })?;

    assert_eq!(50, timestamps.len());
    assert_eq!(25, books);
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

    Ok(())
}

#[cfg(feature = "lz4")]
#[test]
fn compressed_round_trip() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let writer = WriterConfig::new(folder.path())
        .compression(CompressionType::Lz4)
        .index_interval(64)
        .open()?;
    for i in 0..1000i64 {
        writer.write_trade(&trade(i * 1_000_000, 1, i as u64))?;
    }
    writer.close()?;

    let stats = writer.stats();
    assert!(stats.blocks_written > 1);
    assert!(stats.compressed_bytes > 0);
    assert!(stats.compressed_bytes < stats.uncompressed_bytes);

    let mut reader = LogReader::open(folder.path());

    let mut count = 0u64;
    let mut last_ts = i64::MIN;
    reader.for_each(|event| {
        assert!(event.timestamp_ns() >= last_ts);
        last_ts = event.timestamp_ns();
        count += 1;
        true
    })?;

    assert_eq!(1000, count);

    Ok(())
}

#[test]
fn randomized_book_ladders_round_trip() -> floxlog::Result<()> {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let folder = tempfile::tempdir()?;
    let mut rng = StdRng::seed_from_u64(0xF10C);

    let mut written = vec![];

    let writer = WriterConfig::new(folder.path()).open()?;
    for i in 0..200i64 {
        let levels = rng.gen_range(0..40u16);
        let (mut header, bids, asks) = book(i * 1_000, rng.gen_range(1..5u32), levels);
        header.subkind = u8::from(rng.gen_bool(0.5));
        writer.write_book(&header, &bids, &asks)?;
        written.push((header, bids, asks));
    }
    writer.close()?;

    let mut read_back = vec![];
    LogReader::open(folder.path()).for_each(|event| {
        if let ReplayEvent::Book(b) = event {
            read_back.push((b.header, b.bids.clone(), b.asks.clone()));
        }
        true
    })?;

    assert_eq!(written, read_back);

    Ok(())
}

#[test]
fn iterator_shape_matches_callback_shape() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    common::write_trades(folder.path(), 100, 1_000_000, CompressionType::None, 10)?;

    let mut reader = LogReader::open(folder.path());

    let mut from_callback = vec![];
    reader.for_each(|event| {
        from_callback.push(event.timestamp_ns());
        true
    })?;

    let from_iterator: Vec<i64> = reader.events()?.map(|e| e.timestamp_ns()).collect();

    assert_eq!(from_callback, from_iterator);

    Ok(())
}

#[test]
fn callback_false_stops_at_event_boundary() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    common::write_trades(folder.path(), 100, 1_000_000, CompressionType::None, 10)?;

    let mut seen = 0u64;
    let delivered = LogReader::open(folder.path()).for_each(|_| {
        seen += 1;
        seen < 10
    })?;

    assert_eq!(10, seen);
    assert_eq!(10, delivered);

    Ok(())
}
