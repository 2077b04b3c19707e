// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    reader::LogReader,
    segment::{list_segment_paths, scan_segments, SegmentInfo},
    time_util::TimeRange,
    Result,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    collections::BTreeSet,
    io::{Cursor, Read, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

/// "NAMF"
pub const MANIFEST_MAGIC: u32 = 0x464D_414E;

pub const MANIFEST_VERSION: u8 = 1;

/// Manifest file name inside a dataset directory
pub const MANIFEST_FILE: &str = ".manifest";

const ENTRY_FILENAME_LEN: usize = 256;

mod entry_flags {
    pub const HAS_INDEX: u32 = 1 << 0;
    pub const COMPRESSED: u32 = 1 << 1;
}

/// Path of the manifest file for a dataset directory.
#[must_use]
pub fn manifest_path(data_dir: &Path) -> PathBuf {
    data_dir.join(MANIFEST_FILE)
}

/// Atomically rewrites a file
fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let folder = path.parent().expect("should have a parent");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.persist(path)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = std::fs::File::open(path)?;
        file.sync_all()?;
    }

    Ok(())
}

/// Cached per-dataset summary: segment list, time range, symbol universe
/// and byte/event totals.
///
/// The manifest is advisory. It records its own build time (the file's
/// mtime) and must be rebuilt when any listed segment is newer, missing,
/// or a new segment appears — [`SegmentManifest::is_up_to_date`] checks
/// exactly that and [`get_or_build_manifest`] wraps the whole dance.
#[derive(Clone, Debug)]
pub struct SegmentManifest {
    data_dir: PathBuf,
    segments: Vec<SegmentInfo>,
    symbols: BTreeSet<u32>,
    total_events: u64,
    total_bytes: u64,
    first_ts: i64,
    last_ts: i64,
    build_time: Option<SystemTime>,
}

impl SegmentManifest {
    /// Loads a manifest file, returning `None` when it is missing or does
    /// not parse (both simply mean "rebuild me").
    #[must_use]
    pub fn load(manifest_path: &Path) -> Option<Self> {
        let bytes = std::fs::read(manifest_path).ok()?;
        let build_time = std::fs::metadata(manifest_path)
            .and_then(|m| m.modified())
            .ok();

        let data_dir = manifest_path.parent()?.to_path_buf();
        Self::parse(&bytes, data_dir, build_time)
    }

    fn parse(bytes: &[u8], data_dir: PathBuf, build_time: Option<SystemTime>) -> Option<Self> {
        let mut cursor = Cursor::new(bytes);

        let magic = cursor.read_u32::<LittleEndian>().ok()?;
        let version = cursor.read_u8().ok()?;
        if magic != MANIFEST_MAGIC || version != MANIFEST_VERSION {
            return None;
        }

        let mut reserved = [0u8; 3];
        cursor.read_exact(&mut reserved).ok()?;

        let segment_count = cursor.read_u64::<LittleEndian>().ok()?;
        let total_events = cursor.read_u64::<LittleEndian>().ok()?;
        let first_ts = cursor.read_i64::<LittleEndian>().ok()?;
        let last_ts = cursor.read_i64::<LittleEndian>().ok()?;
        let total_bytes = cursor.read_u64::<LittleEndian>().ok()?;
        let symbol_count = cursor.read_u32::<LittleEndian>().ok()?;
        let checksum = cursor.read_u32::<LittleEndian>().ok()?;

        // NOTE: Checksum covers everything after the header
        #[allow(clippy::cast_possible_truncation)]
        let body_start = cursor.position() as usize;
        let computed = crc32fast::hash(bytes.get(body_start..)?);
        if checksum != 0 && checksum != computed {
            log::warn!("Manifest checksum mismatch, discarding");
            return None;
        }

        let mut segments = Vec::with_capacity(segment_count.min(1 << 20) as usize);
        for _ in 0..segment_count {
            let mut name_buf = [0u8; ENTRY_FILENAME_LEN];
            cursor.read_exact(&mut name_buf).ok()?;

            let name_len = name_buf.iter().position(|&b| b == 0).unwrap_or(ENTRY_FILENAME_LEN);
            let filename = std::str::from_utf8(&name_buf[..name_len]).ok()?;

            let first_event_ns = cursor.read_i64::<LittleEndian>().ok()?;
            let last_event_ns = cursor.read_i64::<LittleEndian>().ok()?;
            let event_count = cursor.read_u64::<LittleEndian>().ok()?;
            let file_size = cursor.read_u64::<LittleEndian>().ok()?;
            let flags = cursor.read_u32::<LittleEndian>().ok()?;
            let _reserved = cursor.read_u32::<LittleEndian>().ok()?;

            segments.push(SegmentInfo {
                path: data_dir.join(filename),
                first_event_ns,
                last_event_ns,
                #[allow(clippy::cast_possible_truncation)]
                event_count: event_count as u32,
                has_index: (flags & entry_flags::HAS_INDEX) != 0,
                compressed: (flags & entry_flags::COMPRESSED) != 0,
                index_offset: 0,
                file_size,
            });
        }

        let mut symbols = BTreeSet::new();
        for _ in 0..symbol_count {
            symbols.insert(cursor.read_u32::<LittleEndian>().ok()?);
        }

        Some(Self {
            data_dir,
            segments,
            symbols,
            total_events,
            total_bytes,
            first_ts,
            last_ts,
            build_time,
        })
    }

    /// Builds a manifest by scanning the dataset (headers plus one full
    /// event pass for the symbol universe).
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directory scan fails.
    pub fn build(data_dir: &Path) -> Result<Self> {
        let segments = scan_segments(data_dir)?;
        let summary = LogReader::inspect_with_symbols(data_dir)?;

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            segments,
            symbols: summary.symbols.iter().copied().collect(),
            total_events: summary.total_events,
            total_bytes: summary.total_bytes,
            first_ts: summary.first_event_ns,
            last_ts: summary.last_event_ns,
            build_time: Some(SystemTime::now()),
        })
    }

    /// Builds and immediately persists a manifest.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the scan or the save fails.
    pub fn build_and_save(data_dir: &Path) -> Result<Self> {
        let manifest = Self::build(data_dir)?;
        manifest.save()?;
        Ok(manifest)
    }

    /// Persists to `<data_dir>/.manifest`, atomically.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn save(&self) -> Result<()> {
        self.save_to(&manifest_path(&self.data_dir))
    }

    /// Persists to an explicit path, atomically.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        log::trace!("Writing segment manifest to {}", path.display());

        let mut body = Vec::new();

        for segment in &self.segments {
            let mut name_buf = [0u8; ENTRY_FILENAME_LEN];
            let filename = segment
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .as_bytes();
            let len = filename.len().min(ENTRY_FILENAME_LEN - 1);
            name_buf[..len].copy_from_slice(&filename[..len]);
            body.write_all(&name_buf)?;

            body.write_i64::<LittleEndian>(segment.first_event_ns)?;
            body.write_i64::<LittleEndian>(segment.last_event_ns)?;
            body.write_u64::<LittleEndian>(u64::from(segment.event_count))?;
            body.write_u64::<LittleEndian>(segment.file_size)?;

            let mut flags = 0u32;
            if segment.has_index {
                flags |= entry_flags::HAS_INDEX;
            }
            if segment.compressed {
                flags |= entry_flags::COMPRESSED;
            }
            body.write_u32::<LittleEndian>(flags)?;
            body.write_u32::<LittleEndian>(0)?; // reserved
        }

        for symbol in &self.symbols {
            body.write_u32::<LittleEndian>(*symbol)?;
        }

        let mut bytes = Vec::with_capacity(56 + body.len());
        bytes.write_u32::<LittleEndian>(MANIFEST_MAGIC)?;
        bytes.write_u8(MANIFEST_VERSION)?;
        bytes.write_all(&[0u8; 3])?;
        bytes.write_u64::<LittleEndian>(self.segments.len() as u64)?;
        bytes.write_u64::<LittleEndian>(self.total_events)?;
        bytes.write_i64::<LittleEndian>(self.first_ts)?;
        bytes.write_i64::<LittleEndian>(self.last_ts)?;
        bytes.write_u64::<LittleEndian>(self.total_bytes)?;
        #[allow(clippy::cast_possible_truncation)]
        bytes.write_u32::<LittleEndian>(self.symbols.len() as u32)?;
        bytes.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
        bytes.extend_from_slice(&body);

        rewrite_atomic(path, &bytes)?;
        Ok(())
    }

    /// Whether the manifest still reflects the directory: every listed
    /// segment exists with mtime not newer than the manifest, and no
    /// unlisted segment file is present.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        if self.segments.is_empty() {
            return false;
        }

        let Some(build_time) = self.build_time else {
            return false;
        };

        for segment in &self.segments {
            let Ok(meta) = std::fs::metadata(&segment.path) else {
                return false; // segment deleted
            };
            if meta.modified().is_ok_and(|mtime| mtime > build_time) {
                return false; // segment modified
            }
        }

        let Ok(paths) = list_segment_paths(&self.data_dir) else {
            return false;
        };
        for path in paths {
            if !self.segments.iter().any(|s| s.path == path) {
                return false; // new segment appeared
            }
        }

        true
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn segment_count(&self) -> u64 {
        self.segments.len() as u64
    }

    #[must_use]
    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    #[must_use]
    pub fn first_timestamp(&self) -> i64 {
        self.first_ts
    }

    #[must_use]
    pub fn last_timestamp(&self) -> i64 {
        self.last_ts
    }

    #[must_use]
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.first_ts, self.last_ts)
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.time_range().duration_seconds()
    }

    #[must_use]
    pub fn symbols(&self) -> &BTreeSet<u32> {
        &self.symbols
    }

    #[must_use]
    pub fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Segments whose `[first, last]` range intersects `[from_ns, to_ns]`.
    #[must_use]
    pub fn segments_in_range(&self, from_ns: i64, to_ns: i64) -> Vec<SegmentInfo> {
        self.segments
            .iter()
            .filter(|s| s.overlaps(from_ns, to_ns))
            .cloned()
            .collect()
    }
}

/// Returns a valid cached manifest or builds and saves a fresh one.
///
/// # Errors
///
/// Will return `Err` if the rebuild fails.
pub fn get_or_build_manifest(data_dir: &Path) -> Result<SegmentManifest> {
    let path = manifest_path(data_dir);

    if let Some(manifest) = SegmentManifest::load(&path) {
        if manifest.is_up_to_date() {
            log::debug!("Using cached manifest for {data_dir:?}");
            return Ok(manifest);
        }
        log::debug!("Manifest for {data_dir:?} is stale, rebuilding");
    }

    SegmentManifest::build_and_save(data_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use test_log::test;

    #[test]
    fn test_atomic_rewrite() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let path = dir.path().join("test.txt");
        {
            let mut file = File::create(&path)?;
            write!(file, "asdasdasdasdasd")?;
        }

        rewrite_atomic(&path, b"newcontent")?;

        let content = std::fs::read_to_string(&path)?;
        assert_eq!("newcontent", content);

        Ok(())
    }

    #[test]
    fn corrupt_manifest_loads_as_none() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = manifest_path(dir.path());

        std::fs::write(&path, b"not a manifest")?;
        assert!(SegmentManifest::load(&path).is_none());

        assert!(SegmentManifest::load(&manifest_path(&dir.path().join("missing"))).is_none());

        Ok(())
    }
}
