// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Offline segment operations: merge, split, filter, extract, recompress
//! and export. All of them read through [`SegmentIterator`] and write
//! through [`LogWriter`], so every output is a well-formed segment.

use crate::{
    event::ReplayEvent,
    filter::ReaderFilter,
    format::{CompressionType, EventKind, DEFAULT_INDEX_INTERVAL, FRAME_HEADER_SIZE},
    segment::{
        iterator::SegmentIterator,
        list_segment_paths,
        writer::{LogWriter, WriterConfig},
    },
    time_util, HashMap, Result,
};
use std::{
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Merge configuration
#[derive(Clone, Debug)]
pub struct MergeConfig {
    pub output_dir: PathBuf,

    /// Output file name; defaults to `merged.floxlog`
    pub output_name: Option<String>,

    pub create_index: bool,
    pub index_interval: u16,
    pub compression: CompressionType,

    /// Stable-sort all events by timestamp before writing. With a single
    /// input (or already-ordered inputs) plain concatenation is enough.
    pub sort_by_timestamp: bool,
}

impl MergeConfig {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().into(),
            output_name: None,
            create_index: true,
            index_interval: DEFAULT_INDEX_INTERVAL,
            compression: CompressionType::None,
            sort_by_timestamp: true,
        }
    }
}

/// Outcome of a merge.
#[derive(Clone, Debug, Default)]
pub struct MergeResult {
    pub output_path: PathBuf,
    pub segments_merged: u32,
    pub events_written: u64,
    pub bytes_written: u64,
}

/// Split axis
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SplitMode {
    /// New segment whenever the event's time bucket changes
    ByTime,

    /// New segment every `events_per_file` events
    ByEventCount,

    /// New segment when the running payload size passes `bytes_per_file`
    BySize,

    /// One output segment per symbol id
    BySymbol,
}

/// Split configuration
#[derive(Clone, Debug)]
pub struct SplitConfig {
    pub output_dir: PathBuf,
    pub mode: SplitMode,

    pub time_interval_ns: i64,
    pub events_per_file: u64,
    pub bytes_per_file: u64,

    pub create_index: bool,
    pub index_interval: u16,
    pub compression: CompressionType,
}

impl SplitConfig {
    pub fn new<P: AsRef<Path>>(output_dir: P, mode: SplitMode) -> Self {
        Self {
            output_dir: output_dir.as_ref().into(),
            mode,
            time_interval_ns: time_util::NANOS_PER_HOUR,
            events_per_file: 1_000_000,
            bytes_per_file: 256 << 20,
            create_index: true,
            index_interval: DEFAULT_INDEX_INTERVAL,
            compression: CompressionType::None,
        }
    }
}

/// Outcome of a split.
#[derive(Clone, Debug, Default)]
pub struct SplitResult {
    pub output_paths: Vec<PathBuf>,
    pub segments_created: u32,
    pub events_written: u64,
}

/// Export output format
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExportFormat {
    Csv,
    Json,
    JsonLines,
    Binary,
}

/// Export configuration
#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub output_path: PathBuf,
    pub format: ExportFormat,

    pub filter: ReaderFilter,
    pub trades_only: bool,
    pub books_only: bool,

    pub delimiter: char,
    pub include_header: bool,
    pub pretty_print: bool,
}

impl ExportConfig {
    pub fn new<P: AsRef<Path>>(output_path: P, format: ExportFormat) -> Self {
        Self {
            output_path: output_path.as_ref().into(),
            format,
            filter: ReaderFilter::default(),
            trades_only: false,
            books_only: false,
            delimiter: ',',
            include_header: true,
            pretty_print: false,
        }
    }
}

/// Outcome of an export.
#[derive(Clone, Debug, Default)]
pub struct ExportResult {
    pub output_path: PathBuf,
    pub events_exported: u64,
    pub bytes_written: u64,
}

fn write_event(writer: &LogWriter, event: &ReplayEvent) -> Result<()> {
    match event {
        ReplayEvent::Trade(trade) => writer.write_trade(trade),
        ReplayEvent::Book(book) => writer.write_book(&book.header, &book.bids, &book.asks),
    }
}

fn output_writer_config(config: &MergeConfig, name: &str) -> WriterConfig {
    WriterConfig::new(&config.output_dir)
        .output_filename(name)
        .create_index(config.create_index)
        .index_interval(config.index_interval)
        .compression(config.compression)
        .max_segment_bytes(u64::MAX)
}

/// Merges input segments into a single output segment, preserving order.
///
/// With `sort_by_timestamp` and more than one input, all events are read
/// into memory and stable-sorted first; otherwise inputs are concatenated
/// in the given order.
///
/// # Errors
///
/// Will return `Err` on IO errors or unreadable inputs.
pub fn merge(input_paths: &[PathBuf], config: &MergeConfig) -> Result<MergeResult> {
    let name = config.output_name.as_deref().unwrap_or("merged.floxlog");

    let writer = output_writer_config(config, name).open()?;
    let mut result = MergeResult {
        output_path: config.output_dir.join(name),
        ..Default::default()
    };

    if config.sort_by_timestamp && input_paths.len() > 1 {
        let mut events = vec![];
        for path in input_paths {
            let mut iter = SegmentIterator::new(path)?;
            while let Some(event) = iter.next_event()? {
                events.push(event);
            }
            result.segments_merged += 1;
        }

        events.sort_by_key(ReplayEvent::timestamp_ns);

        for event in &events {
            write_event(&writer, event)?;
        }
        result.events_written = events.len() as u64;
    } else {
        for path in input_paths {
            let mut iter = SegmentIterator::new(path)?;
            while let Some(event) = iter.next_event()? {
                write_event(&writer, &event)?;
                result.events_written += 1;
            }
            result.segments_merged += 1;
        }
    }

    writer.close()?;
    result.bytes_written = writer.stats().bytes_written;

    log::info!(
        "Merged {} segments into {:?} ({} events)",
        result.segments_merged,
        result.output_path,
        result.events_written
    );

    Ok(result)
}

/// Merges every segment of a directory, in timestamp order.
///
/// # Errors
///
/// Will return `Err` on IO errors or unreadable inputs.
pub fn merge_directory(input_dir: &Path, config: &MergeConfig) -> Result<MergeResult> {
    let paths = crate::segment::scan_segments(input_dir)?
        .into_iter()
        .map(|s| s.path)
        .collect::<Vec<_>>();
    merge(&paths, config)
}

fn split_path(config: &SplitConfig, index: u32, boundary_value: i64) -> PathBuf {
    let name = match config.mode {
        SplitMode::ByTime => format!("{}.floxlog", time_util::format_compact(boundary_value)),
        SplitMode::ByEventCount | SplitMode::BySize => format!("segment_{index:06}.floxlog"),
        SplitMode::BySymbol => format!("symbol_{boundary_value}.floxlog"),
    };
    config.output_dir.join(name)
}

fn split_writer(config: &SplitConfig, path: &Path) -> Result<LogWriter> {
    WriterConfig::new(&config.output_dir)
        .output_filename(path.file_name().and_then(|n| n.to_str()).unwrap_or_default())
        .create_index(config.create_index)
        .index_interval(config.index_interval)
        .compression(config.compression)
        .max_segment_bytes(u64::MAX)
        .open()
}

/// Splits one segment into multiple outputs along the configured axis.
/// Output naming is deterministic: a `YYYYmmdd_HHMMSS` stamp for time
/// buckets, `segment_NNNNNN` for count/size splits, `symbol_<id>` per
/// symbol.
///
/// # Errors
///
/// Will return `Err` on IO errors or an unreadable input.
pub fn split(input_path: &Path, config: &SplitConfig) -> Result<SplitResult> {
    std::fs::create_dir_all(&config.output_dir)?;

    let mut result = SplitResult::default();
    let mut iter = SegmentIterator::new(input_path)?;

    match config.mode {
        SplitMode::BySymbol => {
            let mut writers: HashMap<u32, LogWriter> = HashMap::default();

            while let Some(event) = iter.next_event()? {
                let symbol_id = event.symbol_id();

                if !writers.contains_key(&symbol_id) {
                    let path = split_path(config, 0, i64::from(symbol_id));
                    result.output_paths.push(path.clone());
                    result.segments_created += 1;
                    writers.insert(symbol_id, split_writer(config, &path)?);
                }

                let writer = writers.get(&symbol_id).expect("just inserted");
                write_event(writer, &event)?;
                result.events_written += 1;
            }

            for writer in writers.values() {
                writer.close()?;
            }
        }

        SplitMode::ByTime => {
            let mut current: Option<(i64, LogWriter)> = None;

            while let Some(event) = iter.next_event()? {
                let bucket = event.timestamp_ns().div_euclid(config.time_interval_ns);

                let rotate = current.as_ref().map_or(true, |(b, _)| *b != bucket);
                if rotate {
                    if let Some((_, writer)) = current.take() {
                        writer.close()?;
                    }
                    let path = split_path(config, 0, bucket * config.time_interval_ns);
                    result.output_paths.push(path.clone());
                    result.segments_created += 1;
                    current = Some((bucket, split_writer(config, &path)?));
                }

                let (_, writer) = current.as_ref().expect("just opened");
                write_event(writer, &event)?;
                result.events_written += 1;
            }

            if let Some((_, writer)) = current.take() {
                writer.close()?;
            }
        }

        SplitMode::ByEventCount | SplitMode::BySize => {
            let mut current: Option<LogWriter> = None;
            let mut index = 0u32;
            let mut in_file_events = 0u64;
            let mut in_file_bytes = 0u64;

            while let Some(event) = iter.next_event()? {
                let full = match (config.mode, current.is_some()) {
                    (_, false) => true,
                    (SplitMode::ByEventCount, true) => in_file_events >= config.events_per_file,
                    (_, true) => in_file_bytes >= config.bytes_per_file,
                };

                if full {
                    if let Some(writer) = current.take() {
                        writer.close()?;
                    }
                    let path = split_path(config, index, 0);
                    result.output_paths.push(path.clone());
                    result.segments_created += 1;
                    index += 1;
                    in_file_events = 0;
                    in_file_bytes = 0;
                    current = Some(split_writer(config, &path)?);
                }

                let writer = current.as_ref().expect("just opened");
                write_event(writer, &event)?;
                result.events_written += 1;
                in_file_events += 1;
                in_file_bytes += (FRAME_HEADER_SIZE + payload_size(&event)) as u64;
            }

            if let Some(writer) = current.take() {
                writer.close()?;
            }
        }
    }

    log::info!(
        "Split {input_path:?} into {} segments ({} events)",
        result.segments_created,
        result.events_written
    );

    Ok(result)
}

/// Splits every segment of a directory with one shared output numbering.
///
/// # Errors
///
/// Will return `Err` on IO errors or unreadable inputs.
pub fn split_directory(input_dir: &Path, config: &SplitConfig) -> Result<SplitResult> {
    let mut combined = SplitResult::default();

    for path in list_segment_paths(input_dir)? {
        let result = split(&path, config)?;
        combined.segments_created += result.segments_created;
        combined.events_written += result.events_written;
        combined.output_paths.extend(result.output_paths);
    }

    Ok(combined)
}

fn payload_size(event: &ReplayEvent) -> usize {
    match event {
        ReplayEvent::Trade(_) => crate::format::TRADE_RECORD_SIZE,
        ReplayEvent::Book(book) => {
            crate::format::book_record_size(book.header.bid_count, book.header.ask_count)
        }
    }
}

/// Copies events passing `predicate` into a new segment. Returns the number
/// of events written.
///
/// # Errors
///
/// Will return `Err` on IO errors or an unreadable input.
pub fn filter<F: FnMut(&ReplayEvent) -> bool>(
    input_path: &Path,
    output_path: &Path,
    mut predicate: F,
    compression: CompressionType,
) -> Result<u64> {
    let output_dir = output_path.parent().unwrap_or(Path::new("."));
    let writer = WriterConfig::new(output_dir)
        .output_filename(
            output_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default(),
        )
        .compression(compression)
        .max_segment_bytes(u64::MAX)
        .open()?;

    let mut iter = SegmentIterator::new(input_path)?;
    let mut written = 0u64;

    while let Some(event) = iter.next_event()? {
        if predicate(&event) {
            write_event(&writer, &event)?;
            written += 1;
        }
    }

    writer.close()?;
    Ok(written)
}

/// Extracts all events of the given symbols into a new segment.
///
/// # Errors
///
/// Will return `Err` on IO errors or an unreadable input.
pub fn extract_symbols(input_path: &Path, output_path: &Path, symbols: &[u32]) -> Result<u64> {
    filter(
        input_path,
        output_path,
        |event| symbols.contains(&event.symbol_id()),
        CompressionType::None,
    )
}

/// Extracts all events inside `[from_ns, to_ns]` into a new segment.
///
/// # Errors
///
/// Will return `Err` on IO errors or an unreadable input.
pub fn extract_time_range(
    input_path: &Path,
    output_path: &Path,
    from_ns: i64,
    to_ns: i64,
) -> Result<u64> {
    filter(
        input_path,
        output_path,
        |event| {
            let ts = event.timestamp_ns();
            ts >= from_ns && ts <= to_ns
        },
        CompressionType::None,
    )
}

/// Rewrites a segment under a different compression scheme.
///
/// # Errors
///
/// Will return `Err` on IO errors, an unreadable input, or when the target
/// codec is not compiled in.
pub fn recompress(
    input_path: &Path,
    output_path: &Path,
    new_compression: CompressionType,
) -> Result<u64> {
    filter(input_path, output_path, |_| true, new_compression)
}

fn passes_export(config: &ExportConfig, event: &ReplayEvent) -> bool {
    if config.trades_only && !event.is_trade() {
        return false;
    }
    if config.books_only && event.is_trade() {
        return false;
    }
    config.filter.passes_event(event)
}

fn kind_name(event: &ReplayEvent) -> &'static str {
    match event.kind() {
        EventKind::Trade => "trade",
        EventKind::BookSnapshot => "book_snapshot",
        EventKind::BookDelta => "book_delta",
    }
}

fn csv_line(event: &ReplayEvent, delimiter: char) -> String {
    let d = delimiter;
    match event {
        ReplayEvent::Trade(t) => format!(
            "trade{d}{}{d}{}{d}{}{d}{}{d}{}{d}{}{d}0{d}0",
            t.exchange_ts_ns, t.symbol_id, t.price_raw, t.qty_raw, t.side, t.trade_id
        ),
        ReplayEvent::Book(b) => format!(
            "{}{d}{}{d}{}{d}0{d}0{d}0{d}0{d}{}{d}{}",
            kind_name(event),
            b.header.exchange_ts_ns,
            b.header.symbol_id,
            b.header.bid_count,
            b.header.ask_count
        ),
    }
}

fn json_value(event: &ReplayEvent) -> serde_json::Value {
    match event {
        ReplayEvent::Trade(t) => serde_json::json!({
            "type": "trade",
            "timestamp_ns": t.exchange_ts_ns,
            "symbol_id": t.symbol_id,
            "price_raw": t.price_raw,
            "qty_raw": t.qty_raw,
            "side": t.side,
            "trade_id": t.trade_id,
        }),
        ReplayEvent::Book(b) => serde_json::json!({
            "type": kind_name(event),
            "timestamp_ns": b.header.exchange_ts_ns,
            "symbol_id": b.header.symbol_id,
            "bid_count": b.header.bid_count,
            "ask_count": b.header.ask_count,
        }),
    }
}

/// Exports a segment to a text format (or copies it for
/// [`ExportFormat::Binary`]).
///
/// CSV columns are fixed:
/// `type,timestamp_ns,symbol_id,price,qty,side,trade_id,bid_count,ask_count`.
///
/// # Errors
///
/// Will return `Err` on IO errors or an unreadable input.
pub fn export(input_path: &Path, config: &ExportConfig) -> Result<ExportResult> {
    export_paths(&[input_path.to_path_buf()], config)
}

/// Exports every segment of a directory into one output file.
///
/// # Errors
///
/// Will return `Err` on IO errors or unreadable inputs.
pub fn export_directory(input_dir: &Path, config: &ExportConfig) -> Result<ExportResult> {
    let paths = crate::segment::scan_segments(input_dir)?
        .into_iter()
        .map(|s| s.path)
        .collect::<Vec<_>>();
    export_paths(&paths, config)
}

fn export_paths(input_paths: &[PathBuf], config: &ExportConfig) -> Result<ExportResult> {
    let mut result = ExportResult {
        output_path: config.output_path.clone(),
        ..Default::default()
    };

    if config.format == ExportFormat::Binary {
        // Binary export is a filtered rewrite in the native format
        let output_dir = config.output_path.parent().unwrap_or(Path::new("."));
        let writer = WriterConfig::new(output_dir)
            .output_filename(
                config
                    .output_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default(),
            )
            .max_segment_bytes(u64::MAX)
            .open()?;

        for path in input_paths {
            let mut iter = SegmentIterator::new(path)?;
            while let Some(event) = iter.next_event()? {
                if passes_export(config, &event) {
                    write_event(&writer, &event)?;
                    result.events_exported += 1;
                }
            }
        }

        writer.close()?;
        result.bytes_written = std::fs::metadata(&config.output_path)?.len();
        return Ok(result);
    }

    let file = std::fs::File::create(&config.output_path)?;
    let mut out = BufWriter::new(file);

    if config.format == ExportFormat::Csv && config.include_header {
        let d = config.delimiter;
        writeln!(
            out,
            "type{d}timestamp_ns{d}symbol_id{d}price{d}qty{d}side{d}trade_id{d}bid_count{d}ask_count"
        )?;
    }
    if config.format == ExportFormat::Json {
        writeln!(out, "[")?;
    }

    let mut first = true;

    for path in input_paths {
        let mut iter = SegmentIterator::new(path)?;

        while let Some(event) = iter.next_event()? {
            if !passes_export(config, &event) {
                continue;
            }

            match config.format {
                ExportFormat::Csv => {
                    writeln!(out, "{}", csv_line(&event, config.delimiter))?;
                }
                ExportFormat::JsonLines => {
                    writeln!(out, "{}", json_value(&event))?;
                }
                ExportFormat::Json => {
                    if !first {
                        writeln!(out, ",")?;
                    }
                    let value = json_value(&event);
                    if config.pretty_print {
                        write!(out, "{}", serde_json::to_string_pretty(&value)?)?;
                    } else {
                        write!(out, "{value}")?;
                    }
                }
                ExportFormat::Binary => unreachable!("handled above"),
            }

            first = false;
            result.events_exported += 1;
        }
    }

    if config.format == ExportFormat::Json {
        writeln!(out, "\n]")?;
    }

    out.flush()?;
    result.bytes_written = std::fs::metadata(&config.output_path)?.len();

    log::info!(
        "Exported {} events to {:?}",
        result.events_exported,
        result.output_path
    );

    Ok(result)
}
