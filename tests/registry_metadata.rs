mod common;

use floxlog::{
    InstrumentType, Price, RecordingMetadata, SymbolDescription, SymbolInfo, SymbolRegistry,
    WriterConfig,
};
use test_log::test;

#[test]
fn registry_survives_a_file_roundtrip() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;
    let path = folder.path().join("symbols.sreg");

    let registry = SymbolRegistry::new();
    let btc = registry.register("binance", "BTCUSDT");
    let eth = registry.register("binance", "ETHUSDT");
    registry.register_info(SymbolInfo {
        instrument_type: InstrumentType::Perpetual,
        tick_size: Price::from_f64(0.5),
        ..SymbolInfo::new("bybit", "BTCUSDT")
    });
    registry.map_equivalent_symbols(&[btc, registry.symbol_id("bybit", "BTCUSDT").expect("known")]);

    registry.save_to_file(&path)?;

    let restored = SymbolRegistry::new();
    restored.load_from_file(&path)?;

    assert_eq!(3, restored.len());
    assert_eq!(Some(btc), restored.symbol_id("binance", "BTCUSDT"));
    assert_eq!(Some(eth), restored.symbol_id("binance", "ETHUSDT"));
    assert_eq!(
        Some(("binance".to_owned(), "BTCUSDT".to_owned())),
        restored.symbol_name(btc)
    );

    // Registering a known pair after reload keeps its id stable
    assert_eq!(btc, restored.register("binance", "BTCUSDT"));

    // New registrations continue above the loaded id range
    let new_id = restored.register("okx", "SOLUSDT");
    assert!(new_id > eth);

    Ok(())
}

#[test]
fn registry_json_is_permissive() -> floxlog::Result<()> {
    let registry = SymbolRegistry::new();
    registry.register("binance", "BTCUSDT");

    let json = registry.to_json()?;

    let restored = SymbolRegistry::new();
    restored.from_json(&json)?;
    assert_eq!(registry.all_symbols(), restored.all_symbols());

    Ok(())
}

#[test]
fn writer_emits_metadata_sidecar_on_close() -> floxlog::Result<()> {
    let folder = tempfile::tempdir()?;

    let metadata = RecordingMetadata {
        recording_id: "rec-42".into(),
        exchange: "binance".into(),
        exchange_type: "cex".into(),
        instrument_type: "spot".into(),
        has_trades: true,
        recording_start: "2025-01-15T10:30:00Z".into(),
        symbols: vec![SymbolDescription {
            symbol_id: 1,
            name: "BTCUSDT".into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            price_precision: 2,
            qty_precision: 6,
        }],
        ..Default::default()
    };

    let writer = WriterConfig::new(folder.path()).metadata(metadata).open()?;
    writer.write_trade(&common::trade(1_000_000_000, 1, 1))?;
    writer.close()?;

    let sidecar = RecordingMetadata::load(RecordingMetadata::metadata_path(folder.path()))
        .expect("sidecar written on close");

    assert_eq!("rec-42", sidecar.recording_id);
    assert_eq!("binance", sidecar.exchange);
    assert_eq!(100_000_000, sidecar.price_scale);
    assert_eq!("BTCUSDT", sidecar.symbol(1).expect("symbol 1").name);

    // recording_end was stamped at close
    assert!(!sidecar.recording_end.is_empty());
    assert!(floxlog::time_util::parse_iso8601(&sidecar.recording_end).is_some());

    Ok(())
}
