//! Filesystem scanner.
//!
//! Walks an archive's directory tree and turns capture files into catalog
//! entries keyed by their first record's timestamp. Collectors lay files out
//! under `YYYY.MM` directories, which lets an incremental rescan prune whole
//! months that predate the newest indexed file.
//!
//! A file is admitted only if its path contains the archive's discriminator
//! (e.g. "updates" vs "ribs" under the same collector root).

use crate::archive::catalog::{ArchEntry, Catalog};
use crate::mrt::{open_record_reader, MrtError, MRT_COMMON_HEADER_LEN};
use chrono::{DateTime, Datelike, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Scanner over one archive root.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    discriminator: String,
    debug: bool,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, discriminator: impl Into<String>, debug: bool) -> Self {
        Scanner {
            root: root.into(),
            discriminator: discriminator.into(),
            debug,
        }
    }

    /// Full walk from scratch: every admissible file becomes an entry.
    pub fn full_scan(&self) -> Catalog {
        let mut catalog = Catalog::new();
        self.walk(None, &mut catalog);
        catalog.sort();
        catalog
    }

    /// Incremental walk: append files newer than `last` to `catalog`.
    /// Year-month directories wholly older than `last`'s month are skipped
    /// without descending.
    pub fn rescan(&self, last: DateTime<Utc>, catalog: &mut Catalog) {
        self.walk(Some(last), catalog);
        catalog.sort();
    }

    fn walk(&self, last: Option<DateTime<Utc>>, catalog: &mut Catalog) {
        let mut it = WalkDir::new(&self.root).into_iter();
        while let Some(item) = it.next() {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "walk error, skipping");
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                if let (Some(last), Some(name)) = (last, entry.file_name().to_str()) {
                    if let Some((year, month)) = year_month_dir(name) {
                        if self.debug {
                            tracing::debug!(dir = name, year, month, "year-month directory");
                        }
                        if year < last.year() || (year == last.year() && month < last.month()) {
                            if self.debug {
                                tracing::debug!(dir = name, "older than last entry, pruning");
                            }
                            it.skip_current_dir();
                        }
                    }
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !path.to_string_lossy().contains(&self.discriminator) {
                if self.debug {
                    tracing::debug!(
                        path = %path.display(),
                        discriminator = %self.discriminator,
                        "discriminator not in path, ignoring"
                    );
                }
                continue;
            }

            let sdate = match first_record_time(path) {
                Ok(t) => t,
                Err(err) => {
                    if self.debug {
                        tracing::debug!(path = %path.display(), error = %err,
                            "failed to read first record, ignoring");
                    }
                    continue;
                }
            };
            if let Some(last) = last {
                // Only files strictly newer than the newest indexed entry.
                if sdate <= last {
                    continue;
                }
            }
            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "stat failed, skipping");
                    continue;
                }
            };

            tracing::info!(path = %path.display(), date = %sdate, "adding file to archive");
            catalog.push(ArchEntry::new(path, sdate, size));
        }
    }
}

/// Read the timestamp of the first framed record in a capture file.
pub fn first_record_time(path: &Path) -> Result<DateTime<Utc>, MrtError> {
    let mut reader = open_record_reader(path)?;
    match reader.next_record()? {
        Some(record) => Ok(record.header.time()),
        None => Err(MrtError::Truncated {
            name: "first record",
            expected: MRT_COMMON_HEADER_LEN,
            found: 0,
        }),
    }
}

/// Parse a directory basename of the form `YYYY.MM` (month 01-12).
fn year_month_dir(name: &str) -> Option<(i32, u32)> {
    let (year, month) = name.split_once('.')?;
    if year.len() != 4 || month.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mrt::{testutil, BGP4MP};
    use std::fs;
    use tempfile::TempDir;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    /// Write an uncompressed capture file whose records start at `start` and
    /// step one second apart.
    fn write_capture(dir: &Path, name: &str, start: u32, count: u32) -> PathBuf {
        let mut data = Vec::new();
        for i in 0..count {
            data.extend(testutil::record(start + i, BGP4MP, 1, &[0u8; 16]));
        }
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    /// routeviews-style tree:
    /// root/2019.04/{updates.x, rib.x}, root/2019.05/updates.y
    fn sample_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let apr = tmp.path().join("2019.04");
        let may = tmp.path().join("2019.05");
        fs::create_dir_all(&apr).unwrap();
        fs::create_dir_all(&may).unwrap();

        // 2019-04-01T00:00:00Z = 1554076800, 2019-05-01T00:00:00Z = 1556668800
        write_capture(&apr, "updates.20190401.0000", 1554076800, 3);
        write_capture(&apr, "rib.20190401.0000", 1554076800, 3);
        write_capture(&may, "updates.20190501.0000", 1556668800, 3);
        tmp
    }

    #[test]
    fn test_full_scan_discriminator() {
        let tmp = sample_tree();
        let scanner = Scanner::new(tmp.path(), "updates", false);
        let catalog = scanner.full_scan();

        assert_eq!(catalog.len(), 2);
        for pair in catalog.as_slice().windows(2) {
            assert!(pair[0].sdate <= pair[1].sdate);
        }
        assert!(catalog
            .iter()
            .all(|e| e.path.to_string_lossy().contains("updates")));
        assert_eq!(catalog.first().unwrap().sdate, ts(1554076800));
    }

    #[test]
    fn test_rescan_skips_old_months_and_old_files() {
        let tmp = sample_tree();
        let scanner = Scanner::new(tmp.path(), "updates", false);
        let mut catalog = scanner.full_scan();
        let last = catalog.last_date().unwrap();
        assert_eq!(last, ts(1556668800 + 2));

        // Nothing new on disk: rescan must add nothing (the April dir is
        // pruned outright, the May file fails the per-file comparison).
        let before = catalog.len();
        scanner.rescan(last, &mut catalog);
        assert_eq!(catalog.len(), before);

        // A newer file in the current month is picked up.
        write_capture(
            &tmp.path().join("2019.05"),
            "updates.20190501.0015",
            1556668800 + 900,
            3,
        );
        scanner.rescan(last, &mut catalog);
        assert_eq!(catalog.len(), before + 1);
        assert_eq!(catalog.last_date().unwrap(), ts(1556668800 + 900));

        // A new file in a pruned month is never visited.
        write_capture(
            &tmp.path().join("2019.04"),
            "updates.20190402.0000",
            1554163200,
            3,
        );
        let before = catalog.len();
        scanner.rescan(catalog.last_date().unwrap(), &mut catalog);
        assert_eq!(catalog.len(), before);
    }

    #[test]
    fn test_scan_ignores_undecodable_files() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("2020.01");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("updates.garbage"), b"short").unwrap();
        write_capture(&dir, "updates.20200101.0000", 1577836800, 1);

        let scanner = Scanner::new(tmp.path(), "updates", true);
        let catalog = scanner.full_scan();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_first_record_time() {
        let tmp = TempDir::new().unwrap();
        let path = write_capture(tmp.path(), "updates.plain", 1357344000, 2);
        assert_eq!(first_record_time(&path).unwrap(), ts(1357344000));

        let empty = tmp.path().join("updates.empty");
        fs::write(&empty, b"").unwrap();
        assert!(first_record_time(&empty).is_err());
    }

    #[test]
    fn test_year_month_dir() {
        assert_eq!(year_month_dir("2019.04"), Some((2019, 4)));
        assert_eq!(year_month_dir("2019.12"), Some((2019, 12)));
        assert_eq!(year_month_dir("2019.13"), None);
        assert_eq!(year_month_dir("2019.00"), None);
        assert_eq!(year_month_dir("201.04"), None);
        assert_eq!(year_month_dir("2019.4"), None);
        assert_eq!(year_month_dir("updates"), None);
        assert_eq!(year_month_dir("2019."), None);
    }
}
