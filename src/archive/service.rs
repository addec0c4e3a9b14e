//! Per-archive service task.
//!
//! Each archive is owned by exactly one long-lived task. The task accepts
//! commands on a channel, rescans on a periodic tick, and is the only writer
//! of the live catalog, which it publishes through a watch channel as an
//! `Arc` snapshot. Readers capture a snapshot at query start and keep it for
//! the query's duration, so a refresh never disturbs a running scan.
//!
//! The command channel is bounded at one slot and handles submit with
//! `try_send`: while a scan occupies the loop a second scan command finds
//! the channel full and is dropped with a log line.

use crate::archive::catalog::Catalog;
use crate::archive::scanner::Scanner;
use crate::config::ArchiveConfig;
use crate::query::{spawn_raw_query, spawn_stats_query, Reply};
use crate::session::{SessionHandle, SessionManager};
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Commands accepted by an archive service task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveCommand {
    /// Full walk from an empty staging catalog.
    Scan,
    /// Incremental walk appending files newer than the current last entry.
    Rescan,
    /// Log the current catalog entries.
    DumpEntries,
    /// Stop the ticker and end the task.
    Stop,
}

/// Cloneable handle to a running archive service.
#[derive(Clone)]
pub struct ArchiveHandle {
    pub collector: String,
    pub discriminator: String,
    delta: Duration,
    debug: bool,
    cmd_tx: mpsc::Sender<ArchiveCommand>,
    catalog_rx: watch::Receiver<Arc<Catalog>>,
    sessions: SessionHandle,
}

impl ArchiveHandle {
    /// Capture the current catalog snapshot.
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.catalog_rx.borrow().clone()
    }

    /// The archive's rotation interval (how far one file's records may
    /// extend past its first record).
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn sessions(&self) -> &SessionHandle {
        &self.sessions
    }

    /// Submit a command without waiting. A full channel means a scan is in
    /// flight; the command is dropped.
    pub fn command(&self, cmd: ArchiveCommand) {
        match self.cmd_tx.try_send(cmd) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                tracing::warn!(?cmd, collector = %self.collector,
                    "archive busy scanning, dropping command");
            }
            Err(mpsc::error::TrySendError::Closed(cmd)) => {
                tracing::warn!(?cmd, collector = %self.collector,
                    "archive service stopped, dropping command");
            }
        }
    }

    /// Stop the service, waiting for any in-flight scan to finish first.
    pub async fn stop(&self) {
        if self.cmd_tx.send(ArchiveCommand::Stop).await.is_err() {
            tracing::debug!(collector = %self.collector, "archive service already stopped");
        }
    }

    /// Stream raw records for `[ta, tb]` into `tx`.
    pub fn query_raw(&self, ta: DateTime<Utc>, tb: DateTime<Utc>, tx: mpsc::Sender<Reply>) {
        spawn_raw_query(self.snapshot(), self.delta, ta, tb, tx, self.debug);
    }

    /// Stream one aggregated-statistics reply for `[ta, tb]` into `tx`.
    pub fn query_stats(&self, ta: DateTime<Utc>, tb: DateTime<Utc>, tx: mpsc::Sender<Reply>) {
        spawn_stats_query(self.snapshot(), self.delta, ta, tb, tx, self.debug);
    }
}

/// Spawn the service task for one configured archive. Returns the handle and
/// the task's join handle; the catalog is restored from its saved blob when
/// one exists, otherwise built by an initial full scan.
pub fn spawn_archive(config: ArchiveConfig) -> (ArchiveHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(1);
    let (catalog_tx, catalog_rx) = watch::channel(Arc::new(Catalog::new()));
    let sessions = SessionManager::spawn();

    let handle = ArchiveHandle {
        collector: config.collector.clone(),
        discriminator: config.discriminator.clone(),
        delta: Duration::minutes(config.rotation_minutes as i64),
        debug: config.debug,
        cmd_tx,
        catalog_rx,
        sessions,
    };

    let service = ArchiveService {
        scanner: Scanner::new(config.root.clone(), config.discriminator.clone(), config.debug),
        blob_path: config
            .save_dir
            .join(format!("{}-{}", config.discriminator, config.collector)),
        collector: config.collector,
        refresh_minutes: config.refresh_minutes,
        catalog_tx,
    };
    let task = tokio::spawn(service.run(cmd_rx));

    (handle, task)
}

struct ArchiveService {
    scanner: Scanner,
    blob_path: PathBuf,
    collector: String,
    refresh_minutes: u64,
    catalog_tx: watch::Sender<Arc<Catalog>>,
}

impl ArchiveService {
    async fn run(self, mut cmd_rx: mpsc::Receiver<ArchiveCommand>) {
        match Catalog::from_blob(&self.blob_path) {
            Ok(catalog) => {
                tracing::info!(collector = %self.collector, entries = catalog.len(),
                    path = %self.blob_path.display(), "restored catalog from blob");
                self.install(catalog);
            }
            Err(err) => {
                tracing::info!(collector = %self.collector, error = %err,
                    "no usable saved catalog, scanning");
                self.scan(false).await;
            }
        }

        let period = std::time::Duration::from_secs(60 * self.refresh_minutes.max(1));
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tracing::info!(collector = %self.collector, ?period, "rescanning periodically");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ArchiveCommand::Scan) => {
                        tracing::info!(collector = %self.collector, "scanning");
                        self.scan(false).await;
                    }
                    Some(ArchiveCommand::Rescan) => {
                        tracing::info!(collector = %self.collector, "rescanning");
                        self.scan(true).await;
                        self.persist();
                    }
                    Some(ArchiveCommand::DumpEntries) => self.dump_entries(),
                    Some(ArchiveCommand::Stop) | None => break,
                },
                _ = tick.tick() => {
                    tracing::info!(collector = %self.collector, "periodic rescan");
                    self.scan(true).await;
                    self.persist();
                }
            }
        }
        tracing::info!(collector = %self.collector, "archive service stopping");
    }

    /// Run a scan to completion on a blocking thread, then swap the catalog.
    /// The loop waits here, so at most one scan per archive ever runs.
    async fn scan(&self, incremental: bool) {
        let scanner = self.scanner.clone();
        let previous = self.catalog_tx.borrow().clone();

        let result = tokio::task::spawn_blocking(move || match previous.last_date() {
            Some(last) if incremental => {
                let mut staging = (*previous).clone();
                scanner.rescan(last, &mut staging);
                staging
            }
            _ => scanner.full_scan(),
        })
        .await;

        match result {
            Ok(catalog) => self.install(catalog),
            Err(err) => tracing::error!(collector = %self.collector, error = %err, "scan panicked"),
        }
    }

    fn install(&self, catalog: Catalog) {
        tracing::info!(collector = %self.collector, entries = catalog.len(), "catalog installed");
        let _ = self.catalog_tx.send(Arc::new(catalog));
    }

    fn persist(&self) {
        let catalog = self.catalog_tx.borrow().clone();
        match catalog.to_blob(&self.blob_path) {
            Ok(()) => tracing::info!(path = %self.blob_path.display(),
                "rewrote serialized catalog"),
            Err(err) => tracing::error!(path = %self.blob_path.display(), error = %err,
                "failed writing serialized catalog"),
        }
    }

    fn dump_entries(&self) {
        let catalog = self.catalog_tx.borrow().clone();
        tracing::info!(collector = %self.collector, entries = catalog.len(), "dumping entries");
        for entry in catalog.iter() {
            tracing::info!("{entry}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::testutil;
    use tempfile::TempDir;

    const START: u32 = 1356998400; // 2013-01-01T00:00:00Z

    fn archive_config(root: &std::path::Path, save: &std::path::Path) -> ArchiveConfig {
        ArchiveConfig {
            collector: "routeviews2".to_string(),
            root: root.to_path_buf(),
            discriminator: "updates".to_string(),
            save_dir: save.to_path_buf(),
            refresh_minutes: 30,
            rotation_minutes: 15,
            debug: false,
        }
    }

    fn sample_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("2013.01");
        std::fs::create_dir_all(&dir).unwrap();
        let records: Vec<Vec<u8>> = (0..3)
            .map(|i| testutil::update_record(START + i, &[24], &[], &[16]))
            .collect();
        testutil::write_file(&dir, "updates.20130101.0000", &records);
        tmp
    }

    async fn wait_for_entries(handle: &ArchiveHandle, want: usize) {
        for _ in 0..100 {
            if handle.snapshot().len() == want {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!(
            "catalog never reached {want} entries (has {})",
            handle.snapshot().len()
        );
    }

    #[tokio::test]
    async fn test_initial_scan_and_snapshot() {
        let tree = sample_tree();
        let save = TempDir::new().unwrap();
        let (handle, task) = spawn_archive(archive_config(tree.path(), save.path()));

        wait_for_entries(&handle, 1).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.first().unwrap().sdate.timestamp(), START as i64);

        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rescan_persists_blob_and_restores() {
        let tree = sample_tree();
        let save = TempDir::new().unwrap();
        let config = archive_config(tree.path(), save.path());
        let blob = save.path().join("updates-routeviews2");

        let (handle, task) = spawn_archive(config.clone());
        wait_for_entries(&handle, 1).await;

        // Add a later file, then rescan: the catalog grows and the blob is
        // rewritten.
        let records: Vec<Vec<u8>> = (0..3)
            .map(|i| testutil::update_record(START + 900 + i, &[24], &[], &[16]))
            .collect();
        testutil::write_file(
            &tree.path().join("2013.01"),
            "updates.20130101.0015",
            &records,
        );
        handle.command(ArchiveCommand::Rescan);
        wait_for_entries(&handle, 2).await;
        handle.stop().await;
        task.await.unwrap();
        assert!(blob.exists());

        // A fresh service restores from the blob without scanning anew.
        let (handle, task) = spawn_archive(config);
        wait_for_entries(&handle, 2).await;
        handle.stop().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_query_through_handle() {
        let tree = sample_tree();
        let save = TempDir::new().unwrap();
        let (handle, task) = spawn_archive(archive_config(tree.path(), save.path()));
        wait_for_entries(&handle, 1).await;

        let (tx, mut rx) = mpsc::channel(16);
        let ta = DateTime::from_timestamp(START as i64, 0).unwrap();
        let tb = DateTime::from_timestamp(START as i64 + 10, 0).unwrap();
        handle.query_raw(ta, tb, tx);

        let mut count = 0;
        while let Some(reply) = rx.recv().await {
            assert!(reply.is_ok());
            count += 1;
        }
        assert_eq!(count, 3);

        handle.stop().await;
        task.await.unwrap();
    }
}
