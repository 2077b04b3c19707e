// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Deterministic replay: a virtual clock driven by recorded events, an
//! event loop dispatching to a strategy, and interactive step/breakpoint
//! control on top.
//!
//! Strategies and order executors are external collaborators; only their
//! contracts ([`Strategy`], [`OrderExecutor`]) live here.

pub mod clock;
pub mod driver;

use crate::{
    event::{BookRecord, Price, Qty, Side},
    format::{EventKind, TradeRecord},
};

/// Wall-clock pacing factor.
///
/// `0` replays as fast as possible; `1` paces one simulated second per wall
/// second; larger values run proportionally faster.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ReplaySpeed {
    pub multiplier: f64,
}

impl ReplaySpeed {
    /// Unpaced, as fast as the reader can go.
    #[must_use]
    pub fn max() -> Self {
        Self { multiplier: 0.0 }
    }

    /// One simulated second per wall-clock second.
    #[must_use]
    pub fn realtime() -> Self {
        Self { multiplier: 1.0 }
    }

    /// `multiplier` simulated seconds per wall-clock second.
    #[must_use]
    pub fn x(multiplier: f64) -> Self {
        Self { multiplier }
    }

    #[must_use]
    pub fn is_unpaced(&self) -> bool {
        self.multiplier <= 0.0
    }
}

impl Default for ReplaySpeed {
    fn default() -> Self {
        Self::max()
    }
}

/// Strategy-facing trade shape: fixed-point decimals instead of raw wire
/// integers, timestamps preserved.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TradeEvent {
    pub symbol_id: u32,
    pub price: Price,
    pub qty: Qty,
    pub side: Side,
    pub trade_id: u64,
    pub exchange_ts_ns: i64,
    pub recv_ts_ns: i64,
    pub exchange_id: u16,
    pub instrument: u8,
}

impl From<&TradeRecord> for TradeEvent {
    fn from(record: &TradeRecord) -> Self {
        Self {
            symbol_id: record.symbol_id,
            price: Price::from_raw(record.price_raw),
            qty: Qty::from_raw(record.qty_raw),
            side: Side::from(record.side),
            trade_id: record.trade_id,
            exchange_ts_ns: record.exchange_ts_ns,
            recv_ts_ns: record.recv_ts_ns,
            exchange_id: record.exchange_id,
            instrument: record.instrument,
        }
    }
}

/// Book update variant as seen by strategies.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BookUpdateKind {
    Snapshot,
    Delta,
}

/// Strategy-facing book shape: price/qty ladders as fixed-point pairs.
#[derive(Clone, Debug, PartialEq)]
pub struct BookEvent {
    pub symbol_id: u32,
    pub kind: BookUpdateKind,
    pub seq: i64,
    pub bids: Vec<(Price, Qty)>,
    pub asks: Vec<(Price, Qty)>,
    pub exchange_ts_ns: i64,
    pub recv_ts_ns: i64,
    pub exchange_id: u16,
    pub instrument: u8,
}

impl From<&BookRecord> for BookEvent {
    fn from(record: &BookRecord) -> Self {
        let convert = |levels: &[crate::format::BookLevel]| {
            levels
                .iter()
                .map(|l| (Price::from_raw(l.price_raw), Qty::from_raw(l.qty_raw)))
                .collect()
        };

        Self {
            symbol_id: record.header.symbol_id,
            kind: if record.header.subkind == 0 {
                BookUpdateKind::Snapshot
            } else {
                BookUpdateKind::Delta
            },
            seq: record.header.seq,
            bids: convert(&record.bids),
            asks: convert(&record.asks),
            exchange_ts_ns: record.header.exchange_ts_ns,
            recv_ts_ns: record.header.recv_ts_ns,
            exchange_id: record.header.exchange_id,
            instrument: record.header.instrument,
        }
    }
}

/// An order intent emitted by a strategy during replay.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Signal {
    pub symbol_id: u32,
    pub side: Side,
    pub price: Price,
    pub qty: Qty,
}

/// Per-event context handed to the strategy: the virtual clock reading and
/// a channel for signals.
pub struct ReplayContext {
    now_ns: i64,
    signals: Vec<Signal>,
}

impl ReplayContext {
    pub(crate) fn new() -> Self {
        Self {
            now_ns: 0,
            signals: vec![],
        }
    }

    pub(crate) fn begin_event(&mut self, now_ns: i64) {
        self.now_ns = now_ns;
        self.signals.clear();
    }

    pub(crate) fn take_signals(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.signals)
    }

    /// Virtual clock reading for the event being processed.
    #[must_use]
    pub fn now_ns(&self) -> i64 {
        self.now_ns
    }

    /// Queues an order intent; routed to the executor after the callback.
    pub fn emit_signal(&mut self, signal: Signal) {
        self.signals.push(signal);
    }
}

/// A trading strategy under test.
///
/// The driver calls exactly one of these per replayed event, after
/// advancing the virtual clock.
pub trait Strategy: Send {
    fn on_trade(&mut self, trade: &TradeEvent, ctx: &mut ReplayContext);
    fn on_book_update(&mut self, book: &BookEvent, ctx: &mut ReplayContext);
}

/// Simulated order executor contract.
///
/// Matching and fill logic live outside this crate; the driver only feeds
/// market data and strategy signals through this interface.
#[allow(unused_variables)]
pub trait OrderExecutor: Send {
    fn on_trade(&mut self, trade: &TradeEvent) {}
    fn on_book_update(&mut self, book: &BookEvent) {}
    fn on_signal(&mut self, signal: &Signal, now_ns: i64) {}
}

/// Replay progress snapshot for inspection.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ReplayState {
    pub current_time_ns: i64,
    pub event_count: u64,
    pub trade_count: u64,
    pub book_update_count: u64,
    pub signal_count: u64,
    pub is_running: bool,
    pub is_paused: bool,
    pub is_finished: bool,
    pub last_event_kind: Option<EventKind>,
}
