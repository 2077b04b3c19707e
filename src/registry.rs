// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Stable integer IDs for `(exchange, symbol)` pairs.
//!
//! The registry is explicit process-scoped state passed by reference, not a
//! singleton. The binary serialization (magic `SREG`) is authoritative; a
//! permissive JSON form exists for tooling.

use crate::{
    coding::DecodeError,
    event::Price,
    Error, HashMap, Result,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::{
    io::{Cursor, Read},
    path::Path,
    sync::Mutex,
};

/// "SREG"
pub const REGISTRY_MAGIC: u32 = 0x4745_5253;

pub const REGISTRY_VERSION: u32 = 1;

/// Cross-exchange equivalence fan-out cap per symbol
pub const MAX_EQUIVALENTS_PER_SYMBOL: usize = 8;

pub type SymbolId = u32;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum InstrumentType {
    #[default]
    Spot = 0,
    Perpetual = 1,
    Future = 2,
    Option = 3,
}

impl From<u8> for InstrumentType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Perpetual,
            2 => Self::Future,
            3 => Self::Option,
            _ => Self::Spot,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OptionType {
    Call = 0,
    Put = 1,
}

/// Everything known about one registered symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub id: SymbolId,
    pub exchange: String,
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub tick_size: Price,

    #[serde(default)]
    pub strike: Option<Price>,

    #[serde(default)]
    pub expiry_ns: Option<i64>,

    #[serde(default)]
    pub option_type: Option<OptionType>,
}

impl SymbolInfo {
    #[must_use]
    pub fn new(exchange: &str, symbol: &str) -> Self {
        Self {
            id: 0,
            exchange: exchange.into(),
            symbol: symbol.into(),
            instrument_type: InstrumentType::Spot,
            tick_size: Price::from_f64(0.01),
            strike: None,
            expiry_ns: None,
            option_type: None,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    symbols: HashMap<SymbolId, SymbolInfo>,
    by_name: HashMap<(String, String), SymbolId>,
    equivalents: HashMap<SymbolId, Vec<SymbolId>>,
    next_id: SymbolId,
}

impl RegistryInner {
    fn insert(&mut self, mut info: SymbolInfo) -> SymbolId {
        let key = (info.exchange.clone(), info.symbol.clone());
        if let Some(&id) = self.by_name.get(&key) {
            return id;
        }

        if info.id == 0 {
            self.next_id += 1;
            info.id = self.next_id;
        } else {
            self.next_id = self.next_id.max(info.id);
        }

        let id = info.id;
        self.by_name.insert(key, id);
        self.symbols.insert(id, info);
        id
    }
}

/// Thread-safe `(exchange, symbol) <-> id` mapping with per-symbol
/// attributes and a capped cross-exchange equivalence relation.
#[derive(Default)]
pub struct SymbolRegistry {
    inner: Mutex<RegistryInner>,
}

impl SymbolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pair, returning the existing id if already known.
    pub fn register(&self, exchange: &str, symbol: &str) -> SymbolId {
        let mut inner = self.inner.lock().expect("lock is poisoned");
        inner.insert(SymbolInfo::new(exchange, symbol))
    }

    /// Registers a fully described symbol. An `id` of 0 lets the registry
    /// assign the next one; registering an already-known pair returns the
    /// existing id.
    pub fn register_info(&self, info: SymbolInfo) -> SymbolId {
        let mut inner = self.inner.lock().expect("lock is poisoned");
        inner.insert(info)
    }

    #[must_use]
    pub fn symbol_id(&self, exchange: &str, symbol: &str) -> Option<SymbolId> {
        let inner = self.inner.lock().expect("lock is poisoned");
        inner
            .by_name
            .get(&(exchange.to_owned(), symbol.to_owned()))
            .copied()
    }

    #[must_use]
    pub fn symbol_info(&self, id: SymbolId) -> Option<SymbolInfo> {
        let inner = self.inner.lock().expect("lock is poisoned");
        inner.symbols.get(&id).cloned()
    }

    /// `(exchange, symbol)` names for an id.
    #[must_use]
    pub fn symbol_name(&self, id: SymbolId) -> Option<(String, String)> {
        let inner = self.inner.lock().expect("lock is poisoned");
        inner
            .symbols
            .get(&id)
            .map(|info| (info.exchange.clone(), info.symbol.clone()))
    }

    /// Marks a set of symbols as equivalent across exchanges. Every symbol
    /// learns the others, capped at [`MAX_EQUIVALENTS_PER_SYMBOL`].
    pub fn map_equivalent_symbols(&self, symbols: &[SymbolId]) {
        let mut inner = self.inner.lock().expect("lock is poisoned");

        for &symbol in symbols {
            let entry = inner.equivalents.entry(symbol).or_default();
            for &other in symbols {
                if other != symbol
                    && !entry.contains(&other)
                    && entry.len() < MAX_EQUIVALENTS_PER_SYMBOL
                {
                    entry.push(other);
                }
            }
        }
    }

    #[must_use]
    pub fn equivalent_symbols(&self, id: SymbolId) -> Vec<SymbolId> {
        let inner = self.inner.lock().expect("lock is poisoned");
        inner.equivalents.get(&id).cloned().unwrap_or_default()
    }

    /// The equivalent of `id` listed on `exchange`, if any.
    #[must_use]
    pub fn equivalent_on_exchange(&self, id: SymbolId, exchange: &str) -> Option<SymbolId> {
        let inner = self.inner.lock().expect("lock is poisoned");
        inner
            .equivalents
            .get(&id)?
            .iter()
            .copied()
            .find(|eq| {
                inner
                    .symbols
                    .get(eq)
                    .is_some_and(|info| info.exchange == exchange)
            })
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("lock is poisoned");
        *inner = RegistryInner::default();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock is poisoned").symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered symbols, sorted by id.
    #[must_use]
    pub fn all_symbols(&self) -> Vec<SymbolInfo> {
        let inner = self.inner.lock().expect("lock is poisoned");
        let mut symbols: Vec<SymbolInfo> = inner.symbols.values().cloned().collect();
        symbols.sort_by_key(|s| s.id);
        symbols
    }

    /// Authoritative binary form.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let symbols = self.all_symbols();

        let mut data = Vec::with_capacity(12 + symbols.len() * 64);

        // Infallible: writing into a Vec
        let _ = data.write_u32::<LittleEndian>(REGISTRY_MAGIC);
        let _ = data.write_u32::<LittleEndian>(REGISTRY_VERSION);
        #[allow(clippy::cast_possible_truncation)]
        let _ = data.write_u32::<LittleEndian>(symbols.len() as u32);

        for info in &symbols {
            let _ = data.write_u32::<LittleEndian>(info.id);

            for text in [&info.exchange, &info.symbol] {
                #[allow(clippy::cast_possible_truncation)]
                let _ = data.write_u16::<LittleEndian>(text.len() as u16);
                data.extend_from_slice(text.as_bytes());
            }

            let _ = data.write_u8(info.instrument_type as u8);

            let mut flags = 0u8;
            if info.strike.is_some() {
                flags |= 0x01;
            }
            if info.expiry_ns.is_some() {
                flags |= 0x02;
            }
            if info.option_type.is_some() {
                flags |= 0x04;
            }
            let _ = data.write_u8(flags);

            if let Some(strike) = info.strike {
                let _ = data.write_i64::<LittleEndian>(strike.raw());
            }
            if let Some(expiry_ns) = info.expiry_ns {
                let _ = data.write_i64::<LittleEndian>(expiry_ns);
            }
            if let Some(option_type) = info.option_type {
                let _ = data.write_u8(option_type as u8);
            }
        }

        data
    }

    /// Replaces the registry contents from the binary form, rebuilding all
    /// indexes.
    ///
    /// # Errors
    ///
    /// Will return `Err` on a bad magic number, unsupported version, or
    /// truncated input.
    pub fn deserialize(&self, data: &[u8]) -> Result<()> {
        let mut cursor = Cursor::new(data);

        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != REGISTRY_MAGIC {
            return Err(Error::Decode(DecodeError::InvalidHeader("SymbolRegistry")));
        }

        let version = cursor.read_u32::<LittleEndian>()?;
        if version != REGISTRY_VERSION {
            #[allow(clippy::cast_possible_truncation)]
            let version = version.min(u32::from(u16::MAX)) as u16;
            return Err(Error::Decode(DecodeError::InvalidVersion((
                "SymbolRegistry",
                version,
            ))));
        }

        let count = cursor.read_u32::<LittleEndian>()?;

        let mut fresh = RegistryInner::default();

        for _ in 0..count {
            let id = cursor.read_u32::<LittleEndian>()?;

            let mut read_string = |cursor: &mut Cursor<&[u8]>| -> Result<String> {
                let len = cursor.read_u16::<LittleEndian>()? as usize;
                let mut buf = vec![0u8; len];
                cursor.read_exact(&mut buf)?;
                String::from_utf8(buf)
                    .map_err(|_| Error::Decode(DecodeError::InvalidHeader("SymbolRegistry")))
            };

            let exchange = read_string(&mut cursor)?;
            let symbol = read_string(&mut cursor)?;

            let instrument_type = InstrumentType::from(cursor.read_u8()?);
            let flags = cursor.read_u8()?;

            let strike = if flags & 0x01 != 0 {
                Some(Price::from_raw(cursor.read_i64::<LittleEndian>()?))
            } else {
                None
            };
            let expiry_ns = if flags & 0x02 != 0 {
                Some(cursor.read_i64::<LittleEndian>()?)
            } else {
                None
            };
            let option_type = if flags & 0x04 != 0 {
                match cursor.read_u8()? {
                    1 => Some(OptionType::Put),
                    _ => Some(OptionType::Call),
                }
            } else {
                None
            };

            fresh.insert(SymbolInfo {
                id,
                exchange,
                symbol,
                instrument_type,
                tick_size: Price::from_f64(0.01),
                strike,
                expiry_ns,
                option_type,
            });
        }

        let mut inner = self.inner.lock().expect("lock is poisoned");
        *inner = fresh;

        Ok(())
    }

    /// Saves the binary form to a file.
    ///
    /// # Errors
    ///
    /// Will return `Err` on IO errors.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.serialize())?;
        Ok(())
    }

    /// Loads the binary form from a file, replacing the current contents.
    ///
    /// # Errors
    ///
    /// Will return `Err` on IO or format errors.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = std::fs::read(path)?;
        self.deserialize(&data)
    }

    /// Permissive JSON form for tooling.
    ///
    /// # Errors
    ///
    /// Will return `Err` on serialization errors.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.all_symbols())?)
    }

    /// Replaces the registry contents from the JSON form.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the JSON does not parse.
    pub fn from_json(&self, json: &str) -> Result<()> {
        let symbols: Vec<SymbolInfo> = serde_json::from_str(json)?;

        let mut fresh = RegistryInner::default();
        for info in symbols {
            fresh.insert(info);
        }

        let mut inner = self.inner.lock().expect("lock is poisoned");
        *inner = fresh;

        Ok(())
    }
}
