// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod iterator;
pub mod mmap;
pub mod writer;

use crate::{
    coding::{Decode, DecodeError},
    format::{SegmentHeader, SEGMENT_EXT},
    Error, Result,
};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

/// Summary of one sealed segment, taken from its header during a directory
/// scan. Cheap to copy around; holds no open file handle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentInfo {
    pub path: PathBuf,
    pub first_event_ns: i64,
    pub last_event_ns: i64,
    pub event_count: u32,
    pub has_index: bool,
    pub compressed: bool,
    pub index_offset: u64,
    pub file_size: u64,
}

impl SegmentInfo {
    /// Whether `[first_event_ns, last_event_ns]` intersects `[from, to]`.
    #[must_use]
    pub fn overlaps(&self, from_ns: i64, to_ns: i64) -> bool {
        self.first_event_ns <= to_ns && self.last_event_ns >= from_ns
    }
}

/// Reads and validates the summary header of a segment file.
pub fn read_segment_header(path: &Path) -> Result<SegmentHeader> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = SegmentHeader::decode_from(&mut reader)?;

    if header.magic != crate::format::SEGMENT_MAGIC {
        return Err(Error::Decode(DecodeError::InvalidHeader("Segment")));
    }
    if header.version != crate::format::FORMAT_VERSION {
        return Err(Error::InvalidVersion(Some(header.version)));
    }

    Ok(header)
}

/// Reads a segment header into a [`SegmentInfo`], including the file size.
pub fn read_segment_info(path: &Path) -> Result<SegmentInfo> {
    let header = read_segment_header(path)?;
    let file_size = std::fs::metadata(path)?.len();

    Ok(SegmentInfo {
        path: path.to_path_buf(),
        first_event_ns: header.first_event_ns,
        last_event_ns: header.last_event_ns,
        event_count: header.event_count,
        has_index: header.has_index(),
        compressed: header.is_compressed(),
        index_offset: header.index_offset,
        file_size,
    })
}

/// Lists all `*.floxlog` files in a directory, sorted by file name.
pub fn list_segment_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = vec![];

    for dirent in std::fs::read_dir(dir)? {
        let dirent = dirent?;

        if !dirent.file_type()?.is_file() {
            continue;
        }

        let path = dirent.path();
        if path.extension().is_some_and(|ext| ext == SEGMENT_EXT) {
            paths.push(path);
        }
    }

    paths.sort();

    Ok(paths)
}

/// Scans a dataset directory, returning per-segment summaries sorted by
/// first event timestamp. Unreadable files are skipped with a warning.
pub fn scan_segments(dir: &Path) -> Result<Vec<SegmentInfo>> {
    let mut segments = vec![];

    for path in list_segment_paths(dir)? {
        match read_segment_info(&path) {
            Ok(info) => segments.push(info),
            Err(e) => {
                log::warn!("Skipping unreadable segment {path:?}: {e:?}");
            }
        }
    }

    segments.sort_by_key(|info| info.first_event_ns);

    Ok(segments)
}
