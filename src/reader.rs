// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    event::ReplayEvent,
    filter::ReaderFilter,
    segment::{iterator::SegmentIterator, scan_segments, SegmentInfo},
    time_util::TimeRange,
    HashSet, Result,
};
use std::path::{Path, PathBuf};

/// Multi-segment reader configuration
#[derive(Clone, Debug)]
pub struct ReaderConfig {
    pub(crate) data_dir: PathBuf,
    pub(crate) filter: ReaderFilter,
    pub(crate) verify_crc: bool,
}

impl ReaderConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().into(),
            filter: ReaderFilter::default(),
            verify_crc: true,
        }
    }

    /// Time/symbol filter applied to every delivered event.
    #[must_use]
    pub fn filter(mut self, filter: ReaderFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Disables payload CRC verification (faster bulk scans).
    #[must_use]
    pub fn verify_crc(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }

    /// Opens a [`LogReader`] with this configuration.
    pub fn open(self) -> LogReader {
        LogReader::new(self)
    }
}

/// Aggregate statistics over one dataset directory.
#[derive(Clone, Debug, Default)]
pub struct DatasetSummary {
    pub data_dir: PathBuf,
    pub first_event_ns: i64,
    pub last_event_ns: i64,
    pub total_events: u64,
    pub segment_count: u32,
    pub total_bytes: u64,
    pub symbols: HashSet<u32>,
    pub segments_with_index: u32,
    pub segments_without_index: u32,
}

impl DatasetSummary {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_events == 0
    }

    #[must_use]
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.first_event_ns, self.last_event_ns)
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.time_range().duration_seconds()
    }

    #[must_use]
    pub fn fully_indexed(&self) -> bool {
        self.segments_without_index == 0 && self.segment_count > 0
    }
}

/// Read-side counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReaderStats {
    pub files_read: u64,
    pub events_read: u64,
    pub trades_read: u64,
    pub book_updates_read: u64,
    pub bytes_read: u64,
}

/// Coordinates reads across all segments of a dataset directory.
///
/// Holds no open file handles at rest: a scan collects each segment's
/// summary header, sorted by first event timestamp, and iteration opens one
/// [`SegmentIterator`] at a time. Within a segment events arrive in file
/// order; across segments in segment-sorted order.
pub struct LogReader {
    config: ReaderConfig,
    segments: Vec<SegmentInfo>,
    scanned: bool,
    stats: ReaderStats,
}

impl LogReader {
    #[must_use]
    pub fn new(config: ReaderConfig) -> Self {
        Self {
            config,
            segments: vec![],
            scanned: false,
            stats: ReaderStats::default(),
        }
    }

    /// Opens a reader over `data_dir` with no filter.
    #[must_use]
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Self {
        Self::new(ReaderConfig::new(data_dir))
    }

    fn scan(&mut self) -> Result<()> {
        if self.scanned {
            return Ok(());
        }
        self.segments = scan_segments(&self.config.data_dir)?;
        self.scanned = true;
        Ok(())
    }

    /// Scanned segment summaries, sorted by first event timestamp.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn segments(&mut self) -> Result<&[SegmentInfo]> {
        self.scan()?;
        Ok(&self.segments)
    }

    /// Paths of all scanned segments.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn segment_files(&mut self) -> Result<Vec<PathBuf>> {
        self.scan()?;
        Ok(self.segments.iter().map(|s| s.path.clone()).collect())
    }

    /// Delivers every filtered event in order to `callback`; a `false`
    /// return stops at that event boundary. Returns the number of events
    /// delivered.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails. Structural errors
    /// inside a segment end that segment cleanly; the validator is the tool
    /// for diagnosing them.
    pub fn for_each<F: FnMut(&ReplayEvent) -> bool>(&mut self, mut callback: F) -> Result<u64> {
        self.scan()?;

        let mut delivered = 0u64;
        let segments = std::mem::take(&mut self.segments);

        let mut outcome = Ok(());
        for segment in &segments {
            match self.read_segment(segment, None, &mut callback, &mut delivered) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        self.segments = segments;
        outcome?;
        Ok(delivered)
    }

    /// Like [`LogReader::for_each`], but starts at the first event with
    /// `ts >= start_ts_ns`, seeking via the sparse index when available.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn for_each_from<F: FnMut(&ReplayEvent) -> bool>(
        &mut self,
        start_ts_ns: i64,
        mut callback: F,
    ) -> Result<u64> {
        self.scan()?;

        let mut delivered = 0u64;
        let segments = std::mem::take(&mut self.segments);

        // First segment that may still contain events >= start
        let first = segments.partition_point(|s| s.last_event_ns < start_ts_ns);

        let mut outcome = Ok(());
        for (i, segment) in segments.iter().enumerate().skip(first) {
            let start = (i == first).then_some(start_ts_ns);
            match self.read_segment(segment, start, &mut callback, &mut delivered) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        self.segments = segments;
        outcome?;
        Ok(delivered)
    }

    /// Reads one segment; returns `false` if the callback requested a stop.
    fn read_segment<F: FnMut(&ReplayEvent) -> bool>(
        &mut self,
        segment: &SegmentInfo,
        start_ts_ns: Option<i64>,
        callback: &mut F,
        delivered: &mut u64,
    ) -> Result<bool> {
        let mut iter = match SegmentIterator::new(&segment.path) {
            Ok(iter) => iter.verify_crc(self.config.verify_crc),
            Err(e) => {
                log::warn!("Skipping segment {:?}: {e:?}", segment.path);
                return Ok(true);
            }
        };

        self.stats.files_read += 1;
        self.stats.bytes_read += segment.file_size;

        if let Some(start) = start_ts_ns {
            if segment.has_index {
                match iter.load_index().and_then(|loaded| {
                    if loaded {
                        iter.seek_to_timestamp(start)
                    } else {
                        Ok(())
                    }
                }) {
                    Ok(()) => {}
                    Err(e) => {
                        log::warn!("Ignoring bad index in {:?}: {e:?}", segment.path);
                    }
                }
            }
        }

        loop {
            let event = match iter.next_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Stopping at structural error in {:?}: {e:?}", segment.path);
                    break;
                }
            };

            // Linear skip from the sparse index position
            if start_ts_ns.is_some_and(|start| event.timestamp_ns() < start) {
                continue;
            }

            self.stats.events_read += 1;
            if event.is_trade() {
                self.stats.trades_read += 1;
            } else {
                self.stats.book_updates_read += 1;
            }

            if self.config.filter.passes_event(&event) {
                *delivered += 1;
                if !callback(&event) {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// Lazily yields filtered events; the iterator twin of
    /// [`LogReader::for_each`].
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn events(&mut self) -> Result<EventStream> {
        self.scan()?;
        Ok(EventStream {
            segments: self.segments.clone(),
            filter: self.config.filter.clone(),
            verify_crc: self.config.verify_crc,
            next_segment: 0,
            current: None,
        })
    }

    /// Summary built from segment headers only (no event scan).
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn summary(&mut self) -> Result<DatasetSummary> {
        self.scan()?;

        let mut summary = DatasetSummary {
            data_dir: self.config.data_dir.clone(),
            ..Default::default()
        };

        for segment in &self.segments {
            summary.segment_count += 1;
            summary.total_events += u64::from(segment.event_count);
            summary.total_bytes += segment.file_size;

            if summary.first_event_ns == 0 || segment.first_event_ns < summary.first_event_ns {
                summary.first_event_ns = segment.first_event_ns;
            }
            if segment.last_event_ns > summary.last_event_ns {
                summary.last_event_ns = segment.last_event_ns;
            }

            if segment.has_index {
                summary.segments_with_index += 1;
            } else {
                summary.segments_without_index += 1;
            }
        }

        Ok(summary)
    }

    /// Header-only dataset summary without constructing a reader.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn inspect<P: AsRef<Path>>(data_dir: P) -> Result<DatasetSummary> {
        LogReader::open(data_dir).summary()
    }

    /// Dataset summary including the symbol universe, which requires a full
    /// event scan (CRC checks skipped for speed).
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn inspect_with_symbols<P: AsRef<Path>>(data_dir: P) -> Result<DatasetSummary> {
        let mut reader = ReaderConfig::new(data_dir).verify_crc(false).open();
        let mut summary = reader.summary()?;

        let symbols = &mut summary.symbols;
        reader.for_each(|event| {
            symbols.insert(event.symbol_id());
            true
        })?;

        Ok(summary)
    }

    /// Total events according to segment headers.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn count(&mut self) -> Result<u64> {
        self.scan()?;
        Ok(self
            .segments
            .iter()
            .map(|s| u64::from(s.event_count))
            .sum())
    }

    /// Distinct symbol IDs, via a full scan.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn available_symbols(&mut self) -> Result<HashSet<u32>> {
        let mut symbols = HashSet::default();
        self.for_each(|event| {
            symbols.insert(event.symbol_id());
            true
        })?;
        Ok(symbols)
    }

    /// `[min first_event_ns, max last_event_ns]` over all segments, or
    /// `None` for an empty dataset.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn time_range(&mut self) -> Result<Option<TimeRange>> {
        self.scan()?;

        let mut min_ts = i64::MAX;
        let mut max_ts = i64::MIN;

        for segment in &self.segments {
            if segment.first_event_ns > 0 {
                min_ts = min_ts.min(segment.first_event_ns);
            }
            if segment.last_event_ns > 0 {
                max_ts = max_ts.max(segment.last_event_ns);
            }
        }

        if min_ts == i64::MAX || max_ts == i64::MIN {
            return Ok(None);
        }

        Ok(Some(TimeRange::new(min_ts, max_ts)))
    }

    #[must_use]
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }
}

/// Stoppable lazy event sequence over a dataset.
pub struct EventStream {
    segments: Vec<SegmentInfo>,
    filter: ReaderFilter,
    verify_crc: bool,
    next_segment: usize,
    current: Option<SegmentIterator>,
}

impl Iterator for EventStream {
    type Item = ReplayEvent;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let segment = self.segments.get(self.next_segment)?;
                self.next_segment += 1;

                match SegmentIterator::new(&segment.path) {
                    Ok(iter) => self.current = Some(iter.verify_crc(self.verify_crc)),
                    Err(e) => {
                        log::warn!("Skipping segment {:?}: {e:?}", segment.path);
                        continue;
                    }
                }
            }

            let iter = self.current.as_mut().expect("just set");
            match iter.next_event() {
                Ok(Some(event)) => {
                    if self.filter.passes_event(&event) {
                        return Some(event);
                    }
                }
                Ok(None) => self.current = None,
                Err(e) => {
                    log::warn!("Stopping segment at structural error: {e:?}");
                    self.current = None;
                }
            }
        }
    }
}
