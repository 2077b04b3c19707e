// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::Encode,
    compression,
    format::{
        index_entries_crc, segment_flags, BookLevel, BookRecordHeader, CompressedBlockHeader,
        CompressionType, EventKind, FrameHeader, IndexEntry, SegmentHeader, SegmentIndexHeader,
        TradeRecord, BLOCK_HEADER_SIZE, DEFAULT_INDEX_INTERVAL, FRAME_HEADER_SIZE,
        INDEX_ENTRY_SIZE, INDEX_HEADER_SIZE, SEGMENT_EXT, SEGMENT_HEADER_SIZE,
    },
    metadata::RecordingMetadata,
    time_util, HashSet, Result,
};
use std::{
    fs::File,
    io::{BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Names the next segment file: `(output_dir, segment_number) -> path`.
pub type RotationCallback = Box<dyn Fn(&Path, u32) -> PathBuf + Send>;

/// Log writer configuration
pub struct WriterConfig {
    pub(crate) output_dir: PathBuf,
    pub(crate) output_filename: Option<String>,
    pub(crate) max_segment_bytes: u64,
    pub(crate) create_index: bool,
    pub(crate) index_interval: u16,
    pub(crate) compression: CompressionType,
    pub(crate) exchange_id: u8,
    pub(crate) sync_on_rotate: bool,
    pub(crate) rotation_callback: Option<RotationCallback>,
    pub(crate) metadata: Option<RecordingMetadata>,
}

impl WriterConfig {
    /// Creates a new configuration builder writing into `output_dir`.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().into(),
            output_filename: None,
            max_segment_bytes: 256 * 1_024 * 1_024,
            create_index: true,
            index_interval: DEFAULT_INDEX_INTERVAL,
            compression: CompressionType::None,
            exchange_id: 0,
            sync_on_rotate: false,
            rotation_callback: None,
            metadata: None,
        }
    }

    /// Name of the first segment file; later segments go through the
    /// rotation callback or the default timestamp naming.
    #[must_use]
    pub fn output_filename<S: Into<String>>(mut self, name: S) -> Self {
        self.output_filename = Some(name.into());
        self
    }

    /// Sets the rotation threshold.
    ///
    /// A frame is never split across segments; when appending one would
    /// exceed this size, the current segment is sealed first.
    ///
    /// Default = 256 MiB
    #[must_use]
    pub fn max_segment_bytes(mut self, bytes: u64) -> Self {
        self.max_segment_bytes = bytes;
        self
    }

    /// Enables or disables the sparse time index.
    #[must_use]
    pub fn create_index(mut self, create: bool) -> Self {
        self.create_index = create;
        self
    }

    /// Sets the index sampling interval (and compressed block size, in
    /// events).
    ///
    /// Default = 1000
    #[must_use]
    pub fn index_interval(mut self, interval: u16) -> Self {
        self.index_interval = interval.max(1);
        self
    }

    /// Sets the compression scheme for new segments.
    #[must_use]
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn exchange_id(mut self, id: u8) -> Self {
        self.exchange_id = id;
        self
    }

    /// Fsync segment files when sealing them.
    #[must_use]
    pub fn sync_on_rotate(mut self, sync: bool) -> Self {
        self.sync_on_rotate = sync;
        self
    }

    /// Custom naming strategy for rotated segments.
    #[must_use]
    pub fn rotation_callback(mut self, callback: RotationCallback) -> Self {
        self.rotation_callback = Some(callback);
        self
    }

    /// Recording metadata written to `metadata.json` next to the segments
    /// when the writer is closed.
    #[must_use]
    pub fn metadata(mut self, metadata: RecordingMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Opens a [`LogWriter`] with this configuration.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the output directory cannot be created or the
    /// configured compression is not compiled in.
    pub fn open(self) -> Result<LogWriter> {
        LogWriter::new(self)
    }
}

/// Counters accumulated across all segments of one writer.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WriterStats {
    pub segments_created: u64,
    pub events_written: u64,
    pub trades_written: u64,
    pub book_updates_written: u64,
    pub bytes_written: u64,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
    pub blocks_written: u64,
}

#[derive(Default)]
struct OpenSegment {
    file: Option<BufWriter<File>>,
    path: PathBuf,
    header: SegmentHeader,
    bytes: u64,
    index_entries: Vec<IndexEntry>,
    events_since_last_index: u32,
    block_buf: Vec<u8>,
    block_event_count: u16,
    block_first_ts: i64,
    symbols: HashSet<u32>,
}

struct WriterInner {
    current: OpenSegment,
    segment_number: u32,
    stats: WriterStats,
    metadata: Option<RecordingMetadata>,
}

/// Appends framed events to rotating `.floxlog` segments.
///
/// Owned by a single producer; operations are serialized by an internal
/// mutex so a shared reference can be handed to a recording thread. A
/// segment is opened lazily on the first write and sealed (index region,
/// final summary header) on rotation and on [`LogWriter::close`].
pub struct LogWriter {
    config: WriterConfig,
    inner: Mutex<WriterInner>,
}

impl LogWriter {
    /// Creates a writer, eagerly creating the output directory.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory cannot be created or the
    /// configured compression is not compiled in.
    pub fn new(mut config: WriterConfig) -> Result<Self> {
        if !compression::is_available(config.compression) {
            return Err(crate::Error::CompressionUnavailable(config.compression));
        }

        std::fs::create_dir_all(&config.output_dir)?;

        let metadata = config.metadata.take();

        Ok(Self {
            config,
            inner: Mutex::new(WriterInner {
                current: OpenSegment::default(),
                segment_number: 0,
                stats: WriterStats::default(),
                metadata,
            }),
        })
    }

    /// Appends a trade frame.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs; the writer does not retry.
    pub fn write_trade(&self, trade: &TradeRecord) -> Result<()> {
        let payload = trade.encode_into_vec()?;

        let mut inner = self.inner.lock().expect("lock is poisoned");
        self.write_event(
            &mut inner,
            EventKind::Trade,
            &payload,
            trade.exchange_ts_ns,
            trade.symbol_id,
        )?;
        inner.stats.trades_written += 1;

        Ok(())
    }

    /// Appends a book frame (snapshot or delta, depending on the header
    /// subkind). The payload is `[header | bids | asks]`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs; the writer does not retry.
    pub fn write_book(
        &self,
        header: &BookRecordHeader,
        bids: &[BookLevel],
        asks: &[BookLevel],
    ) -> Result<()> {
        debug_assert_eq!(header.bid_count as usize, bids.len());
        debug_assert_eq!(header.ask_count as usize, asks.len());

        let mut payload = Vec::with_capacity(crate::format::book_record_size(
            header.bid_count,
            header.ask_count,
        ));
        header.encode_into(&mut payload)?;
        for level in bids {
            level.encode_into(&mut payload)?;
        }
        for level in asks {
            level.encode_into(&mut payload)?;
        }

        let mut inner = self.inner.lock().expect("lock is poisoned");
        self.write_event(
            &mut inner,
            header.event_kind(),
            &payload,
            header.exchange_ts_ns,
            header.symbol_id,
        )?;
        inner.stats.book_updates_written += 1;

        Ok(())
    }

    /// Flushes buffered bytes to the OS.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("lock is poisoned");
        if let Some(file) = inner.current.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    /// Seals the current segment and writes the metadata sidecar if one was
    /// configured.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("lock is poisoned");
        self.seal_current(&mut inner)?;

        if let Some(metadata) = inner.metadata.as_mut() {
            metadata.recording_end = time_util::format_iso8601(time_util::now_ns());
            metadata.save(RecordingMetadata::metadata_path(&self.config.output_dir))?;
        }

        Ok(())
    }

    /// Writer statistics so far.
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        self.inner.lock().expect("lock is poisoned").stats
    }

    /// Path of the currently open segment, if any.
    #[must_use]
    pub fn current_segment_path(&self) -> Option<PathBuf> {
        let inner = self.inner.lock().expect("lock is poisoned");
        inner
            .current
            .file
            .is_some()
            .then(|| inner.current.path.clone())
    }

    /// Replaces the recording metadata attached to this writer.
    pub fn set_metadata(&self, metadata: RecordingMetadata) {
        self.inner.lock().expect("lock is poisoned").metadata = Some(metadata);
    }

    /// Appends a symbol description to the recording metadata.
    pub fn add_symbol(&self, symbol: crate::metadata::SymbolDescription) {
        let mut inner = self.inner.lock().expect("lock is poisoned");
        inner.metadata.get_or_insert_with(Default::default).symbols.push(symbol);
    }

    fn write_event(
        &self,
        inner: &mut WriterInner,
        kind: EventKind,
        payload: &[u8],
        timestamp_ns: i64,
        symbol_id: u32,
    ) -> Result<()> {
        self.ensure_open(inner)?;

        if self.config.compression == CompressionType::None {
            self.write_frame(inner, kind, payload, timestamp_ns)?;
        } else {
            self.write_frame_to_block(inner, kind, payload, timestamp_ns)?;
        }

        inner.current.symbols.insert(symbol_id);
        inner.stats.events_written += 1;

        Ok(())
    }

    fn write_frame(
        &self,
        inner: &mut WriterInner,
        kind: EventKind,
        payload: &[u8],
        timestamp_ns: i64,
    ) -> Result<()> {
        let frame_size = (FRAME_HEADER_SIZE + payload.len()) as u64;

        if inner.current.bytes + frame_size > self.config.max_segment_bytes {
            self.seal_current(inner)?;
            self.ensure_open(inner)?;
        }

        let frame_offset = inner.current.bytes;

        let header = FrameHeader {
            // NOTE: Payloads are bounded far below u32::MAX
            #[allow(clippy::cast_possible_truncation)]
            size: payload.len() as u32,
            crc32: crc32fast::hash(payload),
            kind: kind as u8,
            rec_version: 1,
            flags: 0,
        };

        let file = inner.current.file.as_mut().expect("segment should be open");
        header.encode_into(file)?;
        file.write_all(payload)?;

        inner.current.bytes += frame_size;
        inner.stats.bytes_written += frame_size;

        Self::track_event(&mut inner.current, timestamp_ns);

        if self.config.create_index {
            if inner.current.index_entries.is_empty()
                || inner.current.events_since_last_index >= u32::from(self.config.index_interval)
            {
                inner.current.index_entries.push(IndexEntry {
                    timestamp_ns,
                    file_offset: frame_offset,
                });
                inner.current.events_since_last_index = 0;
            }
            inner.current.events_since_last_index += 1;
        }

        Ok(())
    }

    fn write_frame_to_block(
        &self,
        inner: &mut WriterInner,
        kind: EventKind,
        payload: &[u8],
        timestamp_ns: i64,
    ) -> Result<()> {
        // Rotation is only legal on a block boundary
        if inner.current.block_event_count == 0
            && inner.current.bytes + BLOCK_HEADER_SIZE as u64 > self.config.max_segment_bytes
        {
            self.seal_current(inner)?;
            self.ensure_open(inner)?;
        }

        let current = &mut inner.current;

        let header = FrameHeader {
            #[allow(clippy::cast_possible_truncation)]
            size: payload.len() as u32,
            crc32: crc32fast::hash(payload),
            kind: kind as u8,
            rec_version: 1,
            flags: 0,
        };
        header.encode_into(&mut current.block_buf)?;
        current.block_buf.extend_from_slice(payload);

        if current.block_event_count == 0 {
            current.block_first_ts = timestamp_ns;
        }
        current.block_event_count += 1;

        Self::track_event(current, timestamp_ns);

        if current.block_event_count >= self.config.index_interval {
            self.flush_block(inner)?;
        }

        Ok(())
    }

    fn flush_block(&self, inner: &mut WriterInner) -> Result<()> {
        let current = &mut inner.current;
        if current.block_buf.is_empty() || current.block_event_count == 0 {
            return Ok(());
        }

        let block_offset = current.bytes;
        let original_size = current.block_buf.len();

        let compressed = compression::compress(self.config.compression, &current.block_buf)?;

        let block_header = CompressedBlockHeader {
            #[allow(clippy::cast_possible_truncation)]
            compressed_size: compressed.len() as u32,
            #[allow(clippy::cast_possible_truncation)]
            original_size: original_size as u32,
            event_count: current.block_event_count,
            ..Default::default()
        };

        let file = current.file.as_mut().expect("segment should be open");
        block_header.encode_into(file)?;
        file.write_all(&compressed)?;

        let total_written = (BLOCK_HEADER_SIZE + compressed.len()) as u64;
        current.bytes += total_written;
        inner.stats.bytes_written += total_written;
        inner.stats.uncompressed_bytes += original_size as u64;
        inner.stats.compressed_bytes += compressed.len() as u64;
        inner.stats.blocks_written += 1;

        if self.config.create_index {
            let current = &mut inner.current;
            current.index_entries.push(IndexEntry {
                timestamp_ns: current.block_first_ts,
                file_offset: block_offset,
            });
        }

        let current = &mut inner.current;
        current.block_buf.clear();
        current.block_event_count = 0;
        current.block_first_ts = 0;

        Ok(())
    }

    fn track_event(current: &mut OpenSegment, timestamp_ns: i64) {
        if current.header.first_event_ns == 0 {
            current.header.first_event_ns = timestamp_ns;
        }
        current.header.last_event_ns = timestamp_ns;
        current.header.event_count += 1;
    }

    fn ensure_open(&self, inner: &mut WriterInner) -> Result<()> {
        if inner.current.file.is_some() {
            return Ok(());
        }

        inner.segment_number += 1;
        let path = self.next_segment_path(inner.segment_number);

        let file = BufWriter::new(File::create(&path)?);

        let mut header = SegmentHeader {
            exchange_id: self.config.exchange_id,
            created_ns: time_util::now_ns(),
            ..Default::default()
        };
        if self.config.compression != CompressionType::None {
            header.flags |= segment_flags::COMPRESSED;
            header.compression = self.config.compression as u8;
        }

        inner.current = OpenSegment {
            file: Some(file),
            path,
            header,
            bytes: SEGMENT_HEADER_SIZE as u64,
            ..Default::default()
        };

        let file = inner.current.file.as_mut().expect("just opened");
        inner.current.header.encode_into(file)?;

        inner.stats.segments_created += 1;
        log::debug!("Opened segment {:?}", inner.current.path);

        Ok(())
    }

    fn next_segment_path(&self, segment_number: u32) -> PathBuf {
        if segment_number == 1 {
            if let Some(name) = &self.config.output_filename {
                return self.config.output_dir.join(name);
            }
        }

        if let Some(callback) = &self.config.rotation_callback {
            return callback(&self.config.output_dir, segment_number);
        }

        let mut ns = time_util::now_ns();
        loop {
            let path = self.config.output_dir.join(format!("{ns}.{SEGMENT_EXT}"));
            if !path.exists() {
                return path;
            }
            ns += 1;
        }
    }

    fn seal_current(&self, inner: &mut WriterInner) -> Result<()> {
        if inner.current.file.is_none() {
            return Ok(());
        }

        if self.config.compression != CompressionType::None {
            self.flush_block(inner)?;
        }

        self.write_index(inner)?;

        let current = &mut inner.current;

        // NOTE: Bounded by the registry's u32 symbol space
        #[allow(clippy::cast_possible_truncation)]
        {
            current.header.symbol_count = current.symbols.len() as u32;
        }

        let mut file = current.file.take().expect("checked above");
        file.flush()?;

        // Rewrite the placeholder header with final stats
        file.seek(SeekFrom::Start(0))?;
        current.header.encode_into(&mut file)?;
        file.flush()?;

        if self.config.sync_on_rotate {
            file.get_ref().sync_all()?;
        }

        log::debug!(
            "Sealed segment {:?} ({} events)",
            current.path,
            current.header.event_count
        );

        inner.current = OpenSegment::default();

        Ok(())
    }

    fn write_index(&self, inner: &mut WriterInner) -> Result<()> {
        let current = &mut inner.current;

        if !self.config.create_index || current.index_entries.is_empty() {
            return Ok(());
        }

        let index_offset = current.bytes;

        let index_header = SegmentIndexHeader {
            interval: self.config.index_interval,
            #[allow(clippy::cast_possible_truncation)]
            entry_count: current.index_entries.len() as u32,
            crc32: index_entries_crc(&current.index_entries),
            first_ts_ns: current.index_entries.first().expect("non-empty").timestamp_ns,
            last_ts_ns: current.index_entries.last().expect("non-empty").timestamp_ns,
            ..Default::default()
        };

        let file = current.file.as_mut().expect("segment should be open");
        index_header.encode_into(file)?;
        for entry in &current.index_entries {
            entry.encode_into(file)?;
        }

        current.bytes +=
            (INDEX_HEADER_SIZE + current.index_entries.len() * INDEX_ENTRY_SIZE) as u64;

        current.header.index_offset = index_offset;
        current.header.flags |= segment_flags::HAS_INDEX;

        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Error closing log writer: {e:?}");
        }
    }
}
