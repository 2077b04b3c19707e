// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Slices a dataset into non-overlapping partitions for parallel work.
//!
//! Partitions carry an optional warmup prefix: a backtest over
//! `[from, to]` may want to observe `[warmup_from, from)` first to build
//! book state without trading on it.

use crate::{
    manifest::{get_or_build_manifest, SegmentManifest},
    segment::SegmentInfo,
    time_util::{NANOS_PER_DAY, NANOS_PER_HOUR},
    Result,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    collections::BTreeSet,
    io::{Cursor, Read},
    path::{Path, PathBuf},
};

/// Calendar slice granularity for [`Partitioner::partition_by_calendar`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalendarUnit {
    Hour,
    Day,
    Week,
    /// Approximated as 30 days
    Month,
}

impl CalendarUnit {
    #[must_use]
    fn slice_ns(self) -> i64 {
        match self {
            Self::Hour => NANOS_PER_HOUR,
            Self::Day => NANOS_PER_DAY,
            Self::Week => 7 * NANOS_PER_DAY,
            Self::Month => 30 * NANOS_PER_DAY,
        }
    }
}

/// A logical, non-overlapping slice of a dataset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Partition {
    pub partition_id: u32,

    pub from_ns: i64,
    pub to_ns: i64,

    /// Warmup prefix start; `warmup_from_ns <= from_ns`
    pub warmup_from_ns: i64,

    /// Segments overlapping `[warmup_from_ns, to_ns]`
    pub segments: Vec<SegmentInfo>,

    /// Symbol subset; empty = all
    pub symbols: BTreeSet<u32>,

    pub estimated_events: u64,
    pub estimated_bytes: u64,
}

impl Partition {
    #[must_use]
    pub fn warmup_duration(&self) -> i64 {
        self.from_ns - self.warmup_from_ns
    }

    #[must_use]
    pub fn processing_duration(&self) -> i64 {
        self.to_ns - self.from_ns
    }

    #[must_use]
    pub fn total_duration(&self) -> i64 {
        self.to_ns - self.warmup_from_ns
    }

    #[must_use]
    pub fn has_warmup(&self) -> bool {
        self.warmup_from_ns < self.from_ns
    }

    #[must_use]
    pub fn has_symbol_filter(&self) -> bool {
        !self.symbols.is_empty()
    }

    /// Length-prefixed binary form for cross-process dispatch.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(64 + self.segments.len() * 64);

        // Infallible: writing into a Vec
        let _ = data.write_u32::<LittleEndian>(self.partition_id);
        let _ = data.write_i64::<LittleEndian>(self.from_ns);
        let _ = data.write_i64::<LittleEndian>(self.to_ns);
        let _ = data.write_i64::<LittleEndian>(self.warmup_from_ns);
        let _ = data.write_u64::<LittleEndian>(self.estimated_events);
        let _ = data.write_u64::<LittleEndian>(self.estimated_bytes);

        #[allow(clippy::cast_possible_truncation)]
        let _ = data.write_u32::<LittleEndian>(self.symbols.len() as u32);
        for symbol in &self.symbols {
            let _ = data.write_u32::<LittleEndian>(*symbol);
        }

        #[allow(clippy::cast_possible_truncation)]
        let _ = data.write_u32::<LittleEndian>(self.segments.len() as u32);
        for segment in &self.segments {
            let path = segment.path.to_string_lossy();
            #[allow(clippy::cast_possible_truncation)]
            let _ = data.write_u32::<LittleEndian>(path.len() as u32);
            data.extend_from_slice(path.as_bytes());
            let _ = data.write_i64::<LittleEndian>(segment.first_event_ns);
            let _ = data.write_i64::<LittleEndian>(segment.last_event_ns);
            let _ = data.write_u32::<LittleEndian>(segment.event_count);
        }

        data
    }

    /// Parses the binary form; `None` on truncated or malformed input.
    #[must_use]
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);

        let mut partition = Self {
            partition_id: cursor.read_u32::<LittleEndian>().ok()?,
            from_ns: cursor.read_i64::<LittleEndian>().ok()?,
            to_ns: cursor.read_i64::<LittleEndian>().ok()?,
            warmup_from_ns: cursor.read_i64::<LittleEndian>().ok()?,
            estimated_events: cursor.read_u64::<LittleEndian>().ok()?,
            estimated_bytes: cursor.read_u64::<LittleEndian>().ok()?,
            ..Default::default()
        };

        let symbol_count = cursor.read_u32::<LittleEndian>().ok()?;
        for _ in 0..symbol_count {
            partition.symbols.insert(cursor.read_u32::<LittleEndian>().ok()?);
        }

        let segment_count = cursor.read_u32::<LittleEndian>().ok()?;
        for _ in 0..segment_count {
            let path_len = cursor.read_u32::<LittleEndian>().ok()? as usize;
            let mut path_buf = vec![0u8; path_len];
            cursor.read_exact(&mut path_buf).ok()?;
            let path = PathBuf::from(String::from_utf8(path_buf).ok()?);

            partition.segments.push(SegmentInfo {
                path,
                first_event_ns: cursor.read_i64::<LittleEndian>().ok()?,
                last_event_ns: cursor.read_i64::<LittleEndian>().ok()?,
                event_count: cursor.read_u32::<LittleEndian>().ok()?,
                ..Default::default()
            });
        }

        Some(partition)
    }

    /// JSON form for human consumption and scripting.
    #[must_use]
    pub fn to_json(&self) -> String {
        let segments: Vec<serde_json::Value> = self
            .segments
            .iter()
            .map(|s| {
                serde_json::json!({
                    "path": s.path.to_string_lossy(),
                    "events": s.event_count,
                })
            })
            .collect();

        serde_json::json!({
            "partition_id": self.partition_id,
            "from_ns": self.from_ns,
            "to_ns": self.to_ns,
            "warmup_from_ns": self.warmup_from_ns,
            "estimated_events": self.estimated_events,
            "estimated_bytes": self.estimated_bytes,
            "symbols": self.symbols,
            "segments": segments,
        })
        .to_string()
    }
}

/// Carves a dataset (via its manifest) into [`Partition`]s.
pub struct Partitioner {
    manifest: SegmentManifest,
}

impl Partitioner {
    #[must_use]
    pub fn new(manifest: SegmentManifest) -> Self {
        Self { manifest }
    }

    /// Builds a partitioner from a dataset directory, reusing a cached
    /// manifest when it is still valid.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the manifest build fails.
    pub fn from_dir(data_dir: &Path) -> Result<Self> {
        Ok(Self::new(get_or_build_manifest(data_dir)?))
    }

    #[must_use]
    pub fn manifest(&self) -> &SegmentManifest {
        &self.manifest
    }

    #[must_use]
    pub fn total_duration(&self) -> i64 {
        self.manifest.last_timestamp() - self.manifest.first_timestamp()
    }

    /// `num_partitions` equal-duration slices of the full time range.
    #[must_use]
    pub fn partition_by_time(&self, num_partitions: u32, warmup_ns: i64) -> Vec<Partition> {
        if num_partitions == 0 || self.manifest.is_empty() {
            return vec![];
        }

        let first_ts = self.manifest.first_timestamp();
        let last_ts = self.manifest.last_timestamp();
        let slice = (last_ts - first_ts) / i64::from(num_partitions);

        (0..num_partitions)
            .map(|i| {
                let from_ns = first_ts + i64::from(i) * slice;
                let to_ns = if i == num_partitions - 1 {
                    last_ts
                } else {
                    first_ts + i64::from(i + 1) * slice
                };

                self.make_partition(i, from_ns, to_ns, warmup_ns, BTreeSet::new())
            })
            .collect()
    }

    /// Fixed-length slices covering the full time range.
    #[must_use]
    pub fn partition_by_duration(&self, slice_duration_ns: i64, warmup_ns: i64) -> Vec<Partition> {
        if slice_duration_ns <= 0 || self.manifest.is_empty() {
            return vec![];
        }

        let first_ts = self.manifest.first_timestamp();
        let last_ts = self.manifest.last_timestamp();

        let mut partitions = vec![];
        let mut current = first_ts;
        let mut id = 0u32;

        while current < last_ts {
            let to_ns = (current + slice_duration_ns).min(last_ts);
            partitions.push(self.make_partition(id, current, to_ns, warmup_ns, BTreeSet::new()));
            id += 1;
            current += slice_duration_ns;
        }

        partitions
    }

    /// Calendar-aligned wrapper over [`Partitioner::partition_by_duration`].
    #[must_use]
    pub fn partition_by_calendar(&self, unit: CalendarUnit, warmup_ns: i64) -> Vec<Partition> {
        self.partition_by_duration(unit.slice_ns(), warmup_ns)
    }

    /// Distributes the symbol universe over `num_partitions` partitions;
    /// every partition spans the whole time range and lists all segments
    /// (the symbol filter applies at read time).
    #[must_use]
    pub fn partition_by_symbol(&self, num_partitions: u32) -> Vec<Partition> {
        if num_partitions == 0 || self.manifest.is_empty() {
            return vec![];
        }

        let symbols: Vec<u32> = self.manifest.symbols().iter().copied().collect();
        if symbols.is_empty() {
            return vec![];
        }

        let per_partition = symbols.len().div_ceil(num_partitions as usize);

        symbols
            .chunks(per_partition)
            .take(num_partitions as usize)
            .enumerate()
            .map(|(i, chunk)| {
                let mut partition = Partition {
                    #[allow(clippy::cast_possible_truncation)]
                    partition_id: i as u32,
                    from_ns: self.manifest.first_timestamp(),
                    to_ns: self.manifest.last_timestamp(),
                    warmup_from_ns: self.manifest.first_timestamp(),
                    segments: self.manifest.segments().to_vec(),
                    symbols: chunk.iter().copied().collect(),
                    ..Default::default()
                };
                self.estimate(&mut partition);
                partition
            })
            .collect()
    }

    /// One partition per symbol, spanning the whole dataset.
    #[must_use]
    pub fn partition_per_symbol(&self) -> Vec<Partition> {
        let symbols = self.manifest.symbols();
        let symbol_count = symbols.len().max(1) as u64;

        symbols
            .iter()
            .enumerate()
            .map(|(i, &symbol)| Partition {
                #[allow(clippy::cast_possible_truncation)]
                partition_id: i as u32,
                from_ns: self.manifest.first_timestamp(),
                to_ns: self.manifest.last_timestamp(),
                warmup_from_ns: self.manifest.first_timestamp(),
                segments: self.manifest.segments().to_vec(),
                symbols: BTreeSet::from([symbol]),
                // Rough per-symbol estimate
                estimated_events: self.manifest.total_events() / symbol_count,
                estimated_bytes: self.manifest.total_bytes() / symbol_count,
            })
            .collect()
    }

    /// Walks segments in order, cutting a partition whenever the running
    /// event total reaches `total / num_partitions`.
    #[must_use]
    pub fn partition_by_event_count(&self, num_partitions: u32) -> Vec<Partition> {
        if num_partitions == 0 || self.manifest.is_empty() {
            return vec![];
        }

        let segments = self.manifest.segments();
        let events_per_partition = self.manifest.total_events() / u64::from(num_partitions);

        let mut partitions = vec![];
        let mut current_events = 0u64;
        let mut start = 0usize;
        let mut id = 0u32;

        for (i, segment) in segments.iter().enumerate() {
            current_events += u64::from(segment.event_count);

            let is_last_segment = i == segments.len() - 1;
            let threshold_reached = current_events >= events_per_partition;
            let is_last_partition = id == num_partitions - 1;

            if (threshold_reached && !is_last_partition) || is_last_segment {
                let slice = &segments[start..=i];
                partitions.push(Partition {
                    partition_id: id,
                    from_ns: slice.first().map_or(0, |s| s.first_event_ns),
                    to_ns: slice.last().map_or(0, |s| s.last_event_ns),
                    warmup_from_ns: slice.first().map_or(0, |s| s.first_event_ns),
                    segments: slice.to_vec(),
                    symbols: BTreeSet::new(),
                    estimated_events: slice.iter().map(|s| u64::from(s.event_count)).sum(),
                    estimated_bytes: slice.iter().map(|s| s.file_size).sum(),
                });
                id += 1;
                start = i + 1;
                current_events = 0;
            }
        }

        partitions
    }

    /// A single custom partition over `[from_ns, to_ns]`.
    #[must_use]
    pub fn create_partition(
        &self,
        from_ns: i64,
        to_ns: i64,
        warmup_ns: i64,
        symbols: BTreeSet<u32>,
    ) -> Partition {
        let mut partition = Partition {
            partition_id: 0,
            from_ns,
            to_ns,
            warmup_from_ns: from_ns - warmup_ns,
            symbols,
            ..Default::default()
        };
        partition.segments = self
            .manifest
            .segments_in_range(partition.warmup_from_ns, partition.to_ns);
        self.estimate(&mut partition);
        partition
    }

    /// Pro-rata event estimate for `[from_ns, to_ns]`, weighting each
    /// overlapping segment by its duration overlap.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn estimate_events_in_range(&self, from_ns: i64, to_ns: i64) -> u64 {
        let mut total = 0u64;

        for segment in self.manifest.segments() {
            if !segment.overlaps(from_ns, to_ns) {
                continue;
            }

            let segment_duration = segment.last_event_ns - segment.first_event_ns;
            if segment_duration > 0 {
                let overlap_start = from_ns.max(segment.first_event_ns);
                let overlap_end = to_ns.min(segment.last_event_ns);
                let ratio = (overlap_end - overlap_start) as f64 / segment_duration as f64;
                total += (f64::from(segment.event_count) * ratio) as u64;
            } else {
                total += u64::from(segment.event_count);
            }
        }

        total
    }

    fn make_partition(
        &self,
        id: u32,
        from_ns: i64,
        to_ns: i64,
        warmup_ns: i64,
        symbols: BTreeSet<u32>,
    ) -> Partition {
        let mut partition = Partition {
            partition_id: id,
            from_ns,
            to_ns,
            warmup_from_ns: self.manifest.first_timestamp().max(from_ns - warmup_ns),
            symbols,
            ..Default::default()
        };
        partition.segments = self
            .manifest
            .segments_in_range(partition.warmup_from_ns, partition.to_ns);
        self.estimate(&mut partition);
        partition
    }

    fn estimate(&self, partition: &mut Partition) {
        partition.estimated_events =
            self.estimate_events_in_range(partition.warmup_from_ns, partition.to_ns);
        partition.estimated_bytes = partition.segments.iter().map(|s| s.file_size).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_binary_roundtrip() {
        let partition = Partition {
            partition_id: 3,
            from_ns: 100,
            to_ns: 200,
            warmup_from_ns: 90,
            segments: vec![SegmentInfo {
                path: PathBuf::from("/data/1.floxlog"),
                first_event_ns: 100,
                last_event_ns: 199,
                event_count: 50,
                ..Default::default()
            }],
            symbols: BTreeSet::from([1, 2, 3]),
            estimated_events: 50,
            estimated_bytes: 4096,
        };

        let bytes = partition.serialize();
        let decoded = Partition::deserialize(&bytes).expect("should parse");

        assert_eq!(partition.partition_id, decoded.partition_id);
        assert_eq!(partition.from_ns, decoded.from_ns);
        assert_eq!(partition.to_ns, decoded.to_ns);
        assert_eq!(partition.warmup_from_ns, decoded.warmup_from_ns);
        assert_eq!(partition.symbols, decoded.symbols);
        assert_eq!(1, decoded.segments.len());
        assert_eq!(partition.segments[0].path, decoded.segments[0].path);
        assert_eq!(50, decoded.segments[0].event_count);
    }

    #[test]
    fn truncated_partition_fails_to_parse() {
        let partition = Partition::default();
        let bytes = partition.serialize();
        assert!(Partition::deserialize(&bytes[..bytes.len() - 2]).is_none());
    }
}
