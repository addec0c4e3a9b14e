//! Streaming query engines.
//!
//! A query resolves a `[ta, tb]` window to a span of catalog entries, then
//! walks those files record by record, filtering on each record's embedded
//! timestamp. Producers run on blocking tasks and push replies through a
//! bounded channel; the HTTP layer drains the channel, so a slow client
//! applies backpressure and a vanished client (dropped receiver) cancels the
//! producer.
//!
//! Both engines share range resolution and file iteration and differ only in
//! what they emit per record: raw mode forwards the record bytes, stats mode
//! folds them into per-second tallies.

pub mod raw;
pub mod stats;

pub use raw::spawn_raw_query;
pub use stats::{spawn_stats_query, BgpStats};

use crate::archive::catalog::Catalog;
use crate::archive::error::ArchiveError;
use crate::mrt::{open_record_reader, RawRecord};
use bytes::Bytes;
use std::ops::ControlFlow;
use std::time::Instant;
use tokio::sync::mpsc;

/// One streamed reply: a chunk of payload bytes, or an error surfaced to the
/// client.
pub type Reply = Result<Bytes, ArchiveError>;

/// Iterate the records of catalog entries `[i, j)` in order, invoking
/// `per_record` for each.
///
/// Files that fail to open are logged and skipped. A record whose header is
/// rejected emits one error reply and the scan resumes at the next record of
/// the same file — the reader has already consumed the record's declared
/// length, so the stream is still on a frame boundary. Only errors with no
/// boundary to return to (I/O failure, truncation) end a file's iteration
/// early, after emitting their reply. The closure returns `Break` to stop
/// the whole scan, which it does when the consumer has gone away.
pub(crate) fn scan_files<F>(
    catalog: &Catalog,
    i: usize,
    j: usize,
    debug: bool,
    tx: &mpsc::Sender<Reply>,
    mut per_record: F,
) where
    F: FnMut(&RawRecord) -> ControlFlow<()>,
{
    for entry in &catalog.as_slice()[i..j] {
        if debug {
            tracing::debug!(path = %entry.path.display(), "opening");
        }
        let mut reader = match open_record_reader(&entry.path) {
            Ok(reader) => reader,
            Err(err) => {
                tracing::warn!(path = %entry.path.display(), error = %err,
                    "failed opening file, skipping");
                continue;
            }
        };

        let started = Instant::now();
        loop {
            match reader.next_record() {
                Ok(Some(record)) => {
                    if per_record(&record).is_break() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(path = %entry.path.display(), error = %err,
                        "record decode error");
                    let recoverable = err.is_recoverable();
                    if tx.blocking_send(Err(err.into())).is_err() {
                        return;
                    }
                    if !recoverable {
                        break;
                    }
                }
            }
        }
        tracing::info!(
            path = %entry.path.display(),
            size = entry.size,
            elapsed = ?started.elapsed(),
            "finished scanning file"
        );
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::archive::catalog::Catalog;
    use crate::archive::scanner::Scanner;
    use crate::mrt::{bgp, testutil as mrt_testutil, BGP4MP};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// A record carrying a BGP UPDATE: `withdrawn`/`announced` are prefix
    /// bit-lengths, `attr_types` become path attributes.
    pub fn update_record(
        timestamp: u32,
        withdrawn: &[u8],
        attr_types: &[u8],
        announced: &[u8],
    ) -> Vec<u8> {
        let body = bgp::testutil::update_body(withdrawn, attr_types, announced);
        mrt_testutil::record(timestamp, BGP4MP, 1, &body)
    }

    pub fn write_file(dir: &Path, name: &str, records: &[Vec<u8>]) -> PathBuf {
        let data: Vec<u8> = records.iter().flatten().copied().collect();
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    /// Build a two-file archive tree and its catalog. File one holds records
    /// at `start..start+3`s, file two at `start+900..start+903`s.
    pub fn two_file_catalog(start: u32) -> (TempDir, Catalog) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("2013.01");
        std::fs::create_dir_all(&dir).unwrap();

        let first: Vec<Vec<u8>> = (0..3)
            .map(|i| update_record(start + i, &[24], &[], &[16]))
            .collect();
        let second: Vec<Vec<u8>> = (0..3)
            .map(|i| update_record(start + 900 + i, &[24], &[], &[16]))
            .collect();
        write_file(&dir, "updates.20130101.0000", &first);
        write_file(&dir, "updates.20130101.0015", &second);

        let catalog = Scanner::new(tmp.path(), "updates", false).full_scan();
        assert_eq!(catalog.len(), 2);
        (tmp, catalog)
    }
}
