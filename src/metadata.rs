// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The human-readable `metadata.json` sidecar written next to segments.
//!
//! Parsing is lenient: unknown keys are ignored and missing fields fall
//! back to documented defaults (fixed-point scales default to 10^8).

use crate::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Sidecar file name inside a dataset directory
pub const METADATA_FILE: &str = "metadata.json";

fn default_precision() -> i8 {
    8
}

fn default_scale() -> i64 {
    crate::event::FIXED_POINT_SCALE
}

/// One recorded symbol, as described by the sidecar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolDescription {
    pub symbol_id: u32,
    pub name: String,
    pub base_asset: String,
    pub quote_asset: String,

    #[serde(default = "default_precision")]
    pub price_precision: i8,

    #[serde(default = "default_precision")]
    pub qty_precision: i8,
}

/// Recording metadata stored as JSON alongside `.floxlog` files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingMetadata {
    pub recording_id: String,
    pub description: String,

    pub exchange: String,
    pub exchange_type: String,
    pub instrument_type: String,
    pub connector_version: String,

    pub symbols: Vec<SymbolDescription>,

    pub has_trades: bool,
    pub has_book_snapshots: bool,
    pub has_book_deltas: bool,

    /// Max book levels recorded, 0 if unknown
    pub book_depth: u16,

    /// ISO 8601
    pub recording_start: String,

    /// ISO 8601, stamped when the writer closes
    pub recording_end: String,

    #[serde(default = "default_scale")]
    pub price_scale: i64,

    #[serde(default = "default_scale")]
    pub qty_scale: i64,

    pub hostname: String,
    pub timezone: String,
    pub flox_version: String,

    pub custom: BTreeMap<String, String>,
}

impl Default for RecordingMetadata {
    fn default() -> Self {
        Self {
            recording_id: String::new(),
            description: String::new(),
            exchange: String::new(),
            exchange_type: String::new(),
            instrument_type: String::new(),
            connector_version: String::new(),
            symbols: vec![],
            has_trades: false,
            has_book_snapshots: false,
            has_book_deltas: false,
            book_depth: 0,
            recording_start: String::new(),
            recording_end: String::new(),
            price_scale: default_scale(),
            qty_scale: default_scale(),
            hostname: String::new(),
            timezone: String::new(),
            flox_version: String::new(),
            custom: BTreeMap::new(),
        }
    }
}

impl RecordingMetadata {
    /// Default sidecar path for a dataset directory.
    #[must_use]
    pub fn metadata_path(data_dir: &Path) -> PathBuf {
        data_dir.join(METADATA_FILE)
    }

    /// Writes the sidecar, pretty-printed.
    ///
    /// # Errors
    ///
    /// Will return `Err` on IO or serialization errors.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reads a sidecar; `None` when the file is missing or not JSON.
    /// Unknown keys are ignored, missing fields get defaults.
    #[must_use]
    pub fn load<P: AsRef<Path>>(path: P) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Looks up a recorded symbol by id.
    #[must_use]
    pub fn symbol(&self, symbol_id: u32) -> Option<&SymbolDescription> {
        self.symbols.iter().find(|s| s.symbol_id == symbol_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_get_defaults() {
        let metadata: RecordingMetadata =
            serde_json::from_str(r#"{"exchange": "binance"}"#).expect("should parse");

        assert_eq!("binance", metadata.exchange);
        assert_eq!(100_000_000, metadata.price_scale);
        assert_eq!(100_000_000, metadata.qty_scale);
        assert!(metadata.symbols.is_empty());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let metadata: RecordingMetadata =
            serde_json::from_str(r#"{"exchange": "bybit", "some_future_field": [1, 2, 3]}"#)
                .expect("should parse");

        assert_eq!("bybit", metadata.exchange);
    }

    #[test]
    fn sidecar_roundtrip() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = RecordingMetadata::metadata_path(dir.path());

        let metadata = RecordingMetadata {
            recording_id: "rec-001".into(),
            exchange: "binance".into(),
            exchange_type: "cex".into(),
            instrument_type: "spot".into(),
            symbols: vec![SymbolDescription {
                symbol_id: 1,
                name: "BTCUSDT".into(),
                base_asset: "BTC".into(),
                quote_asset: "USDT".into(),
                price_precision: 2,
                qty_precision: 6,
            }],
            has_trades: true,
            book_depth: 50,
            recording_start: "2025-01-15T10:30:00Z".into(),
            custom: BTreeMap::from([("region".into(), "eu".into())]),
            ..Default::default()
        };

        metadata.save(&path)?;
        let loaded = RecordingMetadata::load(&path).expect("should load");

        assert_eq!(metadata, loaded);
        assert_eq!("BTCUSDT", loaded.symbol(1).expect("symbol 1").name);

        Ok(())
    }
}
