use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use floxlog::{CompressionType, LogReader, TradeRecord, WriterConfig};

fn make_trade(i: i64) -> TradeRecord {
    TradeRecord {
        exchange_ts_ns: i * 1_000,
        recv_ts_ns: i * 1_000 + 100,
        price_raw: 50_000_000_000 + i,
        qty_raw: 1_000_000,
        trade_id: i as u64,
        symbol_id: 1,
        side: (i % 2) as u8,
        instrument: 0,
        exchange_id: 1,
    }
}

fn write_trades(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_trades");
    group.throughput(Throughput::Elements(10_000));

    for compression in [CompressionType::None, CompressionType::Lz4] {
        group.bench_function(format!("{compression}"), |b| {
            b.iter_with_setup(tempfile::tempdir, |dir| {
                let dir = dir.expect("tempdir");
                let writer = WriterConfig::new(dir.path())
                    .compression(compression)
                    .open()
                    .expect("writer");

                for i in 0..10_000 {
                    writer.write_trade(&make_trade(i)).expect("write");
                }
                writer.close().expect("close");
            });
        });
    }

    group.finish();
}

fn read_trades(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let writer = WriterConfig::new(dir.path()).open().expect("writer");
        for i in 0..100_000 {
            writer.write_trade(&make_trade(i)).expect("write");
        }
        writer.close().expect("close");
    }

    let mut group = c.benchmark_group("read_trades");
    group.throughput(Throughput::Elements(100_000));

    group.bench_function("streaming", |b| {
        b.iter(|| {
            let mut count = 0u64;
            LogReader::open(dir.path())
                .for_each(|_| {
                    count += 1;
                    true
                })
                .expect("read");
            assert_eq!(100_000, count);
        });
    });

    group.finish();
}

criterion_group!(benches, write_trades, read_trades);
criterion_main!(benches);
