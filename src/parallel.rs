// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    event::ReplayEvent,
    filter::ReaderFilter,
    segment::{iterator::SegmentIterator, scan_segments, SegmentInfo},
    time_util, Result,
};
use min_max_heap::MinMaxHeap;
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Parallel reader configuration
#[derive(Clone, Debug)]
pub struct ParallelReaderConfig {
    pub(crate) data_dir: PathBuf,

    /// 0 = one thread per available core
    pub(crate) num_threads: usize,

    pub(crate) filter: ReaderFilter,
    pub(crate) verify_crc: bool,

    /// Merge per-segment buffers into one globally time-ordered stream
    pub(crate) sort_output: bool,
}

impl ParallelReaderConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().into(),
            num_threads: 0,
            filter: ReaderFilter::default(),
            verify_crc: true,
            sort_output: true,
        }
    }

    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: ReaderFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn verify_crc(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }

    /// Without sorted output only within-segment order is guaranteed.
    #[must_use]
    pub fn sort_output(mut self, sort: bool) -> Self {
        self.sort_output = sort;
        self
    }

    /// Opens a [`ParallelReader`] with this configuration.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn open(self) -> Result<ParallelReader> {
        ParallelReader::new(self)
    }
}

/// Counters and throughput figures of one parallel read.
#[derive(Copy, Clone, Debug, Default)]
pub struct ParallelReaderStats {
    pub segments_processed: u64,
    pub events_read: u64,
    pub trades_read: u64,
    pub book_updates_read: u64,
    pub bytes_read: u64,
    pub start_time_ns: i64,
    pub end_time_ns: i64,
}

impl ParallelReaderStats {
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn events_per_second(&self) -> f64 {
        if self.end_time_ns <= self.start_time_ns {
            return 0.0;
        }
        let elapsed = time_util::ns_to_seconds(self.end_time_ns - self.start_time_ns);
        self.events_read as f64 / elapsed
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn throughput_mbps(&self) -> f64 {
        if self.end_time_ns <= self.start_time_ns {
            return 0.0;
        }
        let elapsed = time_util::ns_to_seconds(self.end_time_ns - self.start_time_ns);
        self.bytes_read as f64 / (1024.0 * 1024.0) / elapsed
    }
}

/// One segment fully read into memory by a worker.
struct SegmentBuffer {
    order: usize,
    events: Vec<ReplayEvent>,
    events_scanned: u64,
    trades: u64,
    books: u64,
    bytes: u64,
}

/// Reads segments on a worker pool, optionally k-way merging the buffers
/// into a globally time-ordered stream.
///
/// Cancellation is cooperative: a shared flag set when the callback returns
/// `false` is checked by workers between events. Workers are joined before
/// any `for_each` call returns.
pub struct ParallelReader {
    config: ParallelReaderConfig,
    num_threads: usize,
    segments: Vec<SegmentInfo>,
    stats: ParallelReaderStats,
}

impl ParallelReader {
    /// Scans the dataset directory and sizes the worker pool.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn new(config: ParallelReaderConfig) -> Result<Self> {
        let segments = scan_segments(&config.data_dir)?;

        let num_threads = if config.num_threads > 0 {
            config.num_threads
        } else {
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
        }
        .max(1);

        Ok(Self {
            config,
            num_threads,
            segments,
            stats: ParallelReaderStats::default(),
        })
    }

    #[must_use]
    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    #[must_use]
    pub fn stats(&self) -> ParallelReaderStats {
        self.stats
    }

    /// Delivers filtered events to `callback`. With `sort_output` the
    /// stream is globally non-decreasing in timestamp; without it, events
    /// arrive buffer by buffer as workers finish, within-segment order
    /// preserved. Returns the number of events delivered.
    pub fn for_each<F: FnMut(&ReplayEvent) -> bool>(&mut self, mut callback: F) -> u64 {
        let sort_output = self.config.sort_output;

        self.run_workers(|results, cancel, stats| {
            let mut delivered = 0u64;

            if sort_output {
                // Barrier: global order needs every buffer first
                let mut buffers: Vec<SegmentBuffer> = results
                    .inspect(|buffer| track_buffer(stats, buffer))
                    .collect();
                buffers.sort_by_key(|b| b.order);
                delivered = merge_buffers(&buffers, &mut callback);
            } else {
                for buffer in results {
                    track_buffer(stats, &buffer);

                    for event in &buffer.events {
                        delivered += 1;
                        if !callback(event) {
                            cancel.store(true, Ordering::Relaxed);
                            return delivered;
                        }
                    }
                }
            }

            delivered
        })
    }

    /// Delivers whole per-segment buffers as workers finish, without any
    /// merge. Returns the number of events delivered.
    pub fn for_each_batch<F: FnMut(&[ReplayEvent]) -> bool>(&mut self, mut callback: F) -> u64 {
        self.run_workers(|results, cancel, stats| {
            let mut delivered = 0u64;

            for buffer in results {
                track_buffer(stats, &buffer);

                delivered += buffer.events.len() as u64;
                if !callback(&buffer.events) {
                    cancel.store(true, Ordering::Relaxed);
                    break;
                }
            }

            delivered
        })
    }

    fn run_workers<F>(&mut self, consume: F) -> u64
    where
        F: FnOnce(
            crossbeam_channel::IntoIter<SegmentBuffer>,
            &AtomicBool,
            &mut ParallelReaderStats,
        ) -> u64,
    {
        self.stats = ParallelReaderStats {
            start_time_ns: time_util::now_ns(),
            ..Default::default()
        };

        let (work_tx, work_rx) = crossbeam_channel::unbounded::<(usize, SegmentInfo)>();
        for work in self.segments.iter().cloned().enumerate() {
            work_tx.send(work).expect("channel should be open");
        }
        drop(work_tx);

        let (result_tx, result_rx) = crossbeam_channel::unbounded::<SegmentBuffer>();

        let cancel = Arc::new(AtomicBool::new(false));
        let workers = self.num_threads.min(self.segments.len()).max(1);
        let filter = &self.config.filter;
        let verify_crc = self.config.verify_crc;
        let stats = &mut self.stats;

        let delivered = std::thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let cancel = Arc::clone(&cancel);

                scope.spawn(move || {
                    while let Ok((order, segment)) = work_rx.recv() {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Some(buffer) =
                            read_segment_buffer(order, &segment, filter, verify_crc, &cancel)
                        {
                            if result_tx.send(buffer).is_err() {
                                break;
                            }
                        }
                    }
                });
            }
            drop(result_tx);

            consume(result_rx.into_iter(), &cancel, stats)
        });

        self.stats.end_time_ns = time_util::now_ns();

        delivered
    }
}

fn track_buffer(stats: &mut ParallelReaderStats, buffer: &SegmentBuffer) {
    stats.segments_processed += 1;
    stats.events_read += buffer.events_scanned;
    stats.trades_read += buffer.trades;
    stats.book_updates_read += buffer.books;
    stats.bytes_read += buffer.bytes;
}

/// K-way merge over fully buffered segments, keyed on the front event's
/// timestamp. Ties break on buffer order, keeping the merge deterministic.
fn merge_buffers<F: FnMut(&ReplayEvent) -> bool>(
    buffers: &[SegmentBuffer],
    callback: &mut F,
) -> u64 {
    #[derive(Eq, PartialEq, Ord, PartialOrd)]
    struct Head {
        ts: i64,
        buffer: usize,
        offset: usize,
    }

    let mut heap = MinMaxHeap::with_capacity(buffers.len());

    for (i, buffer) in buffers.iter().enumerate() {
        if let Some(event) = buffer.events.first() {
            heap.push(Head {
                ts: event.timestamp_ns(),
                buffer: i,
                offset: 0,
            });
        }
    }

    let mut delivered = 0u64;

    while let Some(head) = heap.pop_min() {
        let events = &buffers[head.buffer].events;
        let event = &events[head.offset];

        delivered += 1;
        if !callback(event) {
            break;
        }

        let next_offset = head.offset + 1;
        if let Some(next) = events.get(next_offset) {
            heap.push(Head {
                ts: next.timestamp_ns(),
                buffer: head.buffer,
                offset: next_offset,
            });
        }
    }

    delivered
}

/// Reads one segment into memory, applying the filter. Returns `None` when
/// the segment cannot even be opened.
fn read_segment_buffer(
    order: usize,
    segment: &SegmentInfo,
    filter: &ReaderFilter,
    verify_crc: bool,
    cancel: &AtomicBool,
) -> Option<SegmentBuffer> {
    let mut iter = match SegmentIterator::new(&segment.path) {
        Ok(iter) => iter.verify_crc(verify_crc),
        Err(e) => {
            log::warn!("Skipping segment {:?}: {e:?}", segment.path);
            return None;
        }
    };

    let mut buffer = SegmentBuffer {
        order,
        events: Vec::with_capacity(segment.event_count as usize),
        events_scanned: 0,
        trades: 0,
        books: 0,
        bytes: segment.file_size,
    };

    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        let event = match iter.next_event() {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(e) => {
                log::warn!("Stopping at structural error in {:?}: {e:?}", segment.path);
                break;
            }
        };

        buffer.events_scanned += 1;
        if event.is_trade() {
            buffer.trades += 1;
        } else {
            buffer.books += 1;
        }

        if filter.passes_event(&event) {
            buffer.events.push(event);
        }
    }

    Some(buffer)
}
