#![allow(dead_code)]

use floxlog::{BookLevel, BookRecordHeader, CompressionType, TradeRecord, WriterConfig};
use std::path::Path;

pub fn trade(ts_ns: i64, symbol_id: u32, trade_id: u64) -> TradeRecord {
    TradeRecord {
        exchange_ts_ns: ts_ns,
        recv_ts_ns: ts_ns + 100,
        price_raw: 50_000_000_000,
        qty_raw: 1_000_000,
        trade_id,
        symbol_id,
        side: 1,
        instrument: 0,
        exchange_id: 1,
    }
}

pub fn book(ts_ns: i64, symbol_id: u32, levels: u16) -> (BookRecordHeader, Vec<BookLevel>, Vec<BookLevel>) {
    let header = BookRecordHeader {
        exchange_ts_ns: ts_ns,
        recv_ts_ns: ts_ns + 50,
        seq: ts_ns / 1_000,
        symbol_id,
        bid_count: levels,
        ask_count: levels,
        subkind: 0,
        instrument: 0,
        exchange_id: 1,
    };

    let bids = (0..levels)
        .map(|i| BookLevel {
            price_raw: 49_000_000_000 - i64::from(i) * 1_000_000,
            qty_raw: 2_000_000 + i64::from(i),
        })
        .collect();

    let asks = (0..levels)
        .map(|i| BookLevel {
            price_raw: 51_000_000_000 + i64::from(i) * 1_000_000,
            qty_raw: 3_000_000 + i64::from(i),
        })
        .collect();

    (header, bids, asks)
}

/// Writes `count` trades with timestamps `i * step_ns` into `dir`.
pub fn write_trades(
    dir: &Path,
    count: u64,
    step_ns: i64,
    compression: CompressionType,
    index_interval: u16,
) -> floxlog::Result<()> {
    let writer = WriterConfig::new(dir)
        .compression(compression)
        .index_interval(index_interval)
        .open()?;

    for i in 0..count {
        writer.write_trade(&trade(i as i64 * step_ns, 1, i))?;
    }

    writer.close()
}
