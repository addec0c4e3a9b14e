//! Time-entry catalog.
//!
//! The catalog is the sorted, time-keyed list of capture files backing one
//! archive. It is built by a scan, persisted as a versioned binary blob,
//! restored on startup, and replaced wholesale on refresh — readers only
//! ever see an immutable snapshot.
//!
//! Blob layout (bincode, little-endian):
//! ```text
//! magic: [u8; 4] = "BVTC"
//! version: u16
//! entries: Vec<{ path, secs: i64, nanos: u32, size: u64, offsets }>
//! ```
//! Timestamps are stored as explicit second/nanosecond pairs so that the
//! format stays portable across implementations.

use crate::archive::error::{ArchiveError, ArchiveResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

const BLOB_MAGIC: [u8; 4] = *b"BVTC";
const BLOB_VERSION: u16 = 1;

/// One sampled `(timestamp, byte offset)` pair inside a capture file. The
/// offset points at the start of the record *after* the sampled one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryOffset {
    pub value: DateTime<Utc>,
    pub offset: u64,
}

/// Catalog entry for one capture file.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchEntry {
    pub path: PathBuf,
    /// Timestamp of the file's first record, UTC second precision.
    pub sdate: DateTime<Utc>,
    pub size: u64,
    /// Sparse intra-file index, if one has been generated.
    pub offsets: Option<Vec<EntryOffset>>,
}

impl ArchEntry {
    pub fn new(path: impl Into<PathBuf>, sdate: DateTime<Utc>, size: u64) -> Self {
        ArchEntry {
            path: path.into(),
            sdate,
            size,
            offsets: None,
        }
    }
}

impl fmt::Display for ArchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[path:{} date:{} size:{}]",
            self.path.display(),
            self.sdate,
            self.size
        )
    }
}

/// Sorted sequence of [`ArchEntry`], ordered by `sdate` with path as the
/// tie-break. Paths are unique within a catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    entries: Vec<ArchEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: ArchEntry) {
        self.entries.push(entry);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ArchEntry> {
        self.entries.iter()
    }

    pub fn entries_mut(&mut self) -> std::slice::IterMut<'_, ArchEntry> {
        self.entries.iter_mut()
    }

    pub fn as_slice(&self) -> &[ArchEntry] {
        &self.entries
    }

    pub fn first(&self) -> Option<&ArchEntry> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&ArchEntry> {
        self.entries.last()
    }

    /// Timestamp of the newest entry.
    pub fn last_date(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|e| e.sdate)
    }

    /// Restore the sorted order after appending entries.
    pub fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| a.sdate.cmp(&b.sdate).then_with(|| a.path.cmp(&b.path)));
    }

    /// Resolve `[ta, tb]` to the half-open span of entries that may contain
    /// matching records.
    ///
    /// `delta` is the archive's rotation interval: an entry is keyed by its
    /// *first* record, so records inside it extend up to `delta` later. The
    /// lower bound backs off by `delta + 1s` (the extra second absorbs
    /// truncation); the scan re-filters record-by-record, so including an
    /// adjacent file is harmless.
    pub fn range(
        &self,
        ta: DateTime<Utc>,
        tb: DateTime<Utc>,
        delta: Duration,
    ) -> ArchiveResult<(usize, usize)> {
        if self.entries.is_empty() {
            return Err(ArchiveError::Empty);
        }
        let first = self.entries[0].sdate;
        let last = self.entries[self.entries.len() - 1].sdate;
        if tb < first || ta > last + delta {
            return Err(ArchiveError::OutOfRange);
        }
        let low = ta - delta - Duration::seconds(1);
        let i = self.entries.partition_point(|e| e.sdate <= low);
        let j = self.entries.partition_point(|e| e.sdate <= tb);
        Ok((i, j))
    }

    /// `"first - last\n"`, or a placeholder when the catalog is empty.
    pub fn date_range_string(&self) -> String {
        match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) => format!("{} - {}\n", first.sdate, last.sdate),
            _ => "archive is empty".to_string(),
        }
    }

    /// Serialize the catalog to `path`.
    pub fn to_blob(&self, path: &Path) -> ArchiveResult<()> {
        let blob = BlobFile {
            magic: BLOB_MAGIC,
            version: BLOB_VERSION,
            entries: self.entries.iter().map(BlobEntry::from).collect(),
        };
        let bytes = bincode::serialize(&blob)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Restore a catalog from `path`.
    pub fn from_blob(path: &Path) -> ArchiveResult<Self> {
        let bytes = std::fs::read(path)?;
        let blob: BlobFile = bincode::deserialize(&bytes)?;
        if blob.magic != BLOB_MAGIC {
            return Err(ArchiveError::Blob(format!(
                "bad magic {:?} in {}",
                blob.magic,
                path.display()
            )));
        }
        if blob.version != BLOB_VERSION {
            return Err(ArchiveError::Blob(format!(
                "unsupported catalog version {}",
                blob.version
            )));
        }
        let entries = blob
            .entries
            .into_iter()
            .map(BlobEntry::into_entry)
            .collect::<ArchiveResult<Vec<_>>>()?;
        Ok(Catalog { entries })
    }
}

#[derive(Serialize, Deserialize)]
struct BlobFile {
    magic: [u8; 4],
    version: u16,
    entries: Vec<BlobEntry>,
}

#[derive(Serialize, Deserialize)]
struct BlobEntry {
    path: String,
    secs: i64,
    nanos: u32,
    size: u64,
    offsets: Option<Vec<BlobOffset>>,
}

#[derive(Serialize, Deserialize)]
struct BlobOffset {
    secs: i64,
    nanos: u32,
    offset: u64,
}

impl From<&ArchEntry> for BlobEntry {
    fn from(entry: &ArchEntry) -> Self {
        BlobEntry {
            path: entry.path.to_string_lossy().into_owned(),
            secs: entry.sdate.timestamp(),
            nanos: entry.sdate.timestamp_subsec_nanos(),
            size: entry.size,
            offsets: entry.offsets.as_ref().map(|offsets| {
                offsets
                    .iter()
                    .map(|o| BlobOffset {
                        secs: o.value.timestamp(),
                        nanos: o.value.timestamp_subsec_nanos(),
                        offset: o.offset,
                    })
                    .collect()
            }),
        }
    }
}

impl BlobEntry {
    fn into_entry(self) -> ArchiveResult<ArchEntry> {
        let sdate = blob_time(self.secs, self.nanos)?;
        let offsets = match self.offsets {
            None => None,
            Some(raw) => Some(
                raw.into_iter()
                    .map(|o| {
                        Ok(EntryOffset {
                            value: blob_time(o.secs, o.nanos)?,
                            offset: o.offset,
                        })
                    })
                    .collect::<ArchiveResult<Vec<_>>>()?,
            ),
        };
        Ok(ArchEntry {
            path: PathBuf::from(self.path),
            sdate,
            size: self.size,
            offsets,
        })
    }
}

fn blob_time(secs: i64, nanos: u32) -> ArchiveResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| ArchiveError::Blob(format!("timestamp {secs}.{nanos} out of range")))
}
