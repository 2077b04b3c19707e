// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError},
    format::{book_record_size, BookLevel, BookRecordHeader, EventKind, TradeRecord},
    format::{BOOK_RECORD_HEADER_SIZE, TRADE_RECORD_SIZE},
};

/// Implicit decimal scale of `price_raw` / `qty_raw` fields (10^8).
pub const FIXED_POINT_SCALE: i64 = 100_000_000;

/// Fixed-point price with an implicit 10^8 scale.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Price(i64);

/// Fixed-point quantity with an implicit 10^8 scale.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Qty(i64);

macro_rules! impl_fixed_point {
    ($t:ident) => {
        impl $t {
            #[must_use]
            pub fn from_raw(raw: i64) -> Self {
                Self(raw)
            }

            #[must_use]
            pub fn raw(self) -> i64 {
                self.0
            }

            // NOTE: Precision loss is acceptable, this is a display conversion
            #[allow(clippy::cast_precision_loss)]
            #[must_use]
            pub fn to_f64(self) -> f64 {
                self.0 as f64 / FIXED_POINT_SCALE as f64
            }

            #[allow(clippy::cast_possible_truncation)]
            #[must_use]
            pub fn from_f64(value: f64) -> Self {
                Self((value * FIXED_POINT_SCALE as f64).round() as i64)
            }
        }

        impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_f64())
            }
        }
    };
}

impl_fixed_point!(Price);
impl_fixed_point!(Qty);

/// Trade aggressor side.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Side {
    /// Aggressor sold
    Sell = 0,

    /// Aggressor bought
    Buy = 1,
}

impl From<u8> for Side {
    fn from(value: u8) -> Self {
        if value == 1 {
            Self::Buy
        } else {
            Self::Sell
        }
    }
}

/// An order book record: header plus bid and ask ladders.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BookRecord {
    pub header: BookRecordHeader,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// One logical event of the replayed stream.
///
/// The wire format stores snapshots and deltas under separate frame kinds;
/// both decode into [`ReplayEvent::Book`] with the subkind preserved in the
/// record header.
#[derive(Clone, Debug, PartialEq)]
pub enum ReplayEvent {
    Trade(TradeRecord),
    Book(BookRecord),
}

impl ReplayEvent {
    /// Source timestamp driving ordering and the virtual clock.
    #[must_use]
    pub fn timestamp_ns(&self) -> i64 {
        match self {
            Self::Trade(t) => t.exchange_ts_ns,
            Self::Book(b) => b.header.exchange_ts_ns,
        }
    }

    #[must_use]
    pub fn symbol_id(&self) -> u32 {
        match self {
            Self::Trade(t) => t.symbol_id,
            Self::Book(b) => b.header.symbol_id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Trade(_) => EventKind::Trade,
            Self::Book(b) => b.header.event_kind(),
        }
    }

    #[must_use]
    pub fn is_trade(&self) -> bool {
        matches!(self, Self::Trade(_))
    }

    /// Decodes a frame payload into an event.
    pub(crate) fn decode_payload(kind: EventKind, payload: &[u8]) -> Result<Self, DecodeError> {
        match kind {
            EventKind::Trade => {
                if payload.len() < TRADE_RECORD_SIZE {
                    return Err(DecodeError::InvalidHeader("TradeRecord"));
                }
                let trade = TradeRecord::decode_from(&mut &payload[..])?;
                Ok(Self::Trade(trade))
            }

            EventKind::BookSnapshot | EventKind::BookDelta => {
                if payload.len() < BOOK_RECORD_HEADER_SIZE {
                    return Err(DecodeError::InvalidHeader("BookRecordHeader"));
                }

                let mut cursor = &payload[..];
                let header = BookRecordHeader::decode_from(&mut cursor)?;

                if payload.len() < book_record_size(header.bid_count, header.ask_count) {
                    return Err(DecodeError::InvalidHeader("BookRecord"));
                }

                let mut bids = Vec::with_capacity(header.bid_count.into());
                for _ in 0..header.bid_count {
                    bids.push(BookLevel::decode_from(&mut cursor)?);
                }

                let mut asks = Vec::with_capacity(header.ask_count.into());
                for _ in 0..header.ask_count {
                    asks.push(BookLevel::decode_from(&mut cursor)?);
                }

                Ok(Self::Book(BookRecord { header, bids, asks }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coding::Encode;

    #[test]
    fn fixed_point_conversions() {
        let price = Price::from_raw(50_000_000_000);
        assert_eq!(500.0, price.to_f64());
        assert_eq!(price, Price::from_f64(500.0));
    }

    #[test]
    fn book_payload_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let header = BookRecordHeader {
            exchange_ts_ns: 42,
            recv_ts_ns: 43,
            seq: 7,
            symbol_id: 2,
            bid_count: 2,
            ask_count: 1,
            subkind: 1,
            ..Default::default()
        };

        let mut payload = header.encode_into_vec()?;
        for level in [
            BookLevel {
                price_raw: 100,
                qty_raw: 5,
            },
            BookLevel {
                price_raw: 99,
                qty_raw: 3,
            },
            BookLevel {
                price_raw: 101,
                qty_raw: 4,
            },
        ] {
            level.encode_into(&mut payload)?;
        }

        let event = ReplayEvent::decode_payload(EventKind::BookDelta, &payload)?;

        let ReplayEvent::Book(book) = event else {
            panic!("expected book event");
        };
        assert_eq!(header, book.header);
        assert_eq!(2, book.bids.len());
        assert_eq!(1, book.asks.len());
        assert_eq!(101, book.asks[0].price_raw);

        Ok(())
    }

    #[test]
    fn short_trade_payload_is_rejected() {
        assert!(ReplayEvent::decode_payload(EventKind::Trade, &[0u8; 12]).is_err());
    }
}
