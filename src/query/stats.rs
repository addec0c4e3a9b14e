//! Per-second statistics over a time range.
//!
//! Walks the same record stream as raw mode but folds BGP UPDATE contents
//! into one-second buckets: message totals, withdrawn-route and NLRI prefix
//! counts, and MP_REACH/MP_UNREACH attribute counts. The reply is a single
//! JSON document.

use crate::archive::catalog::Catalog;
use crate::mrt::bgp::{
    parse_bgp4mp, Bgp4Mp, BgpMessage, BgpUpdate, ATTR_MP_REACH_NLRI, ATTR_MP_UNREACH_NLRI,
};
use crate::query::{scan_files, Reply};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;

const TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Aggregated statistics for one query window.
///
/// The five arrays are parallel, one element per flushed one-second bucket
/// (empty seconds between messages are zero-filled). Field names are part of
/// the wire format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BgpStats {
    #[serde(rename = "StartTime")]
    pub start_time: String,
    #[serde(rename = "EndTime")]
    pub end_time: String,
    #[serde(rename = "Delta_sec")]
    pub delta_sec: i32,
    #[serde(rename = "TotalMsgs")]
    pub total_msgs: i64,
    #[serde(rename = "TotalPerDelta")]
    pub total_per_delta: Vec<i64>,
    #[serde(rename = "Withdrawn")]
    pub withdrawn: Vec<i64>,
    #[serde(rename = "NLRI")]
    pub nlri: Vec<i64>,
    #[serde(rename = "MPReach")]
    pub mp_reach: Vec<i64>,
    #[serde(rename = "MPUnreach")]
    pub mp_unreach: Vec<i64>,
}

// Counters for the bucket currently accumulating.
#[derive(Debug, Default)]
struct Bucket {
    total: i64,
    withdrawn: i64,
    nlri: i64,
    reach: i64,
    unreach: i64,
}

impl Bucket {
    fn add(&mut self, update: &BgpUpdate) {
        self.total += 1;
        self.withdrawn += update.withdrawn_routes.len() as i64;
        self.nlri += update.announced_prefixes.len() as i64;
        for attr in &update.attributes {
            match attr.attr_type {
                ATTR_MP_REACH_NLRI => self.reach += 1,
                ATTR_MP_UNREACH_NLRI => self.unreach += 1,
                _ => {}
            }
        }
    }
}

impl BgpStats {
    fn flush(&mut self, bucket: &Bucket) {
        self.total_per_delta.push(bucket.total);
        self.withdrawn.push(bucket.withdrawn);
        self.nlri.push(bucket.nlri);
        self.mp_reach.push(bucket.reach);
        self.mp_unreach.push(bucket.unreach);
    }

    fn flush_empty(&mut self, count: i64) {
        for _ in 0..count {
            self.flush(&Bucket::default());
        }
    }
}

/// Spawn a producer that aggregates `[ta, tb]` into per-second buckets and
/// emits one JSON [`BgpStats`] reply.
///
/// The bucket still accumulating when the last file ends is intentionally
/// not flushed; its messages appear in `TotalMsgs` but not in the arrays.
pub fn spawn_stats_query(
    catalog: Arc<Catalog>,
    delta: Duration,
    ta: DateTime<Utc>,
    tb: DateTime<Utc>,
    tx: mpsc::Sender<Reply>,
    debug: bool,
) {
    tokio::task::spawn_blocking(move || {
        tracing::info!(start = %ta, end = %tb, "stats query");
        let (i, j) = match catalog.range(ta, tb, delta) {
            Ok(span) => span,
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return;
            }
        };
        let lo = ta - Duration::seconds(1);
        let hi = tb + Duration::seconds(1);

        let mut stats = BgpStats {
            delta_sec: 1,
            ..BgpStats::default()
        };
        let mut bucket = Bucket::default();
        // Bucket time base: the window start until the first flush.
        let mut last_time = ta;

        scan_files(&catalog, i, j, debug, &tx, |record| {
            let t = record.header.time();
            if !(t > lo && t < hi) {
                return ControlFlow::Continue(());
            }
            stats.total_msgs += 1;
            if record.message_bytes.is_empty() || !record.header.is_bgp4mp() {
                return ControlFlow::Continue(());
            }
            let update = match parse_bgp4mp(record.header.entry_subtype, &record.message_bytes) {
                Ok(Bgp4Mp::Message(msg)) => match msg.bgp_message {
                    BgpMessage::Update(update) => update,
                    other => {
                        tracing::debug!(?other, "BGP4MP without an UPDATE, ignoring");
                        return ControlFlow::Continue(());
                    }
                },
                Ok(Bgp4Mp::StateChange) => return ControlFlow::Continue(()),
                Err(_) => return ControlFlow::Continue(()),
            };

            let secs_from_last = (t - last_time).num_seconds();
            if secs_from_last < 0 {
                tracing::warn!(secs_from_last, "message earlier than bucket time, ignoring");
            } else if secs_from_last == 0 {
                bucket.add(&update);
            } else {
                stats.flush(&bucket);
                bucket = Bucket::default();
                if secs_from_last > 1 {
                    stats.flush_empty(secs_from_last - 1);
                }
                bucket.add(&update);
                last_time = t;
            }
            ControlFlow::Continue(())
        });

        stats.start_time = ta.format(TIME_FORMAT).to_string();
        stats.end_time = tb.format(TIME_FORMAT).to_string();

        match serde_json::to_vec(&stats) {
            Ok(body) => {
                let _ = tx.blocking_send(Ok(Bytes::from(body)));
            }
            Err(err) => {
                tracing::error!(error = %err, "stats serialization failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::error::ArchiveError;
    use crate::archive::scanner::Scanner;
    use crate::mrt::bgp::testutil::keepalive_body;
    use crate::mrt::{testutil as mrt_testutil, BGP4MP};
    use crate::query::testutil;
    use tempfile::TempDir;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    const START: u32 = 1356998400; // 2013-01-01T00:00:00Z

    async fn run_stats(catalog: Catalog, ta: DateTime<Utc>, tb: DateTime<Utc>) -> BgpStats {
        let (tx, mut rx) = mpsc::channel(4);
        spawn_stats_query(Arc::new(catalog), Duration::minutes(15), ta, tb, tx, false);
        let reply = rx.recv().await.unwrap().unwrap();
        assert!(rx.recv().await.is_none());
        serde_json::from_slice(&reply).unwrap()
    }

    fn catalog_of(records: &[Vec<u8>]) -> (TempDir, Catalog) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("2013.01");
        std::fs::create_dir_all(&dir).unwrap();
        testutil::write_file(&dir, "updates.20130101.0000", records);
        let catalog = Scanner::new(tmp.path(), "updates", false).full_scan();
        (tmp, catalog)
    }

    #[tokio::test]
    async fn test_buckets_with_gap() {
        // Two updates at t, one at t+3s: one flushed bucket of two, two
        // zero-filled gap buckets, and the final bucket left unflushed.
        let records = vec![
            testutil::update_record(START, &[24], &[], &[16, 8]),
            testutil::update_record(START, &[], &[ATTR_MP_REACH_NLRI], &[24]),
            testutil::update_record(START + 3, &[24], &[], &[]),
        ];
        let (_tmp, catalog) = catalog_of(&records);
        let stats = run_stats(catalog, ts(START as i64), ts(START as i64 + 10)).await;

        assert_eq!(stats.total_msgs, 3);
        assert_eq!(stats.total_per_delta, vec![2, 0, 0]);
        assert_eq!(stats.withdrawn, vec![1, 0, 0]);
        assert_eq!(stats.nlri, vec![3, 0, 0]);
        assert_eq!(stats.mp_reach, vec![1, 0, 0]);
        assert_eq!(stats.mp_unreach, vec![0, 0, 0]);
        assert_eq!(stats.delta_sec, 1);
        assert_eq!(stats.start_time, "20130101000000");
        assert_eq!(stats.end_time, "20130101000010");
    }

    #[tokio::test]
    async fn test_array_lengths_equal() {
        let records: Vec<Vec<u8>> = (0..6)
            .map(|i| testutil::update_record(START + i, &[24], &[], &[16]))
            .collect();
        let (_tmp, catalog) = catalog_of(&records);
        let stats = run_stats(catalog, ts(START as i64), ts(START as i64 + 30)).await;

        let n = stats.total_per_delta.len();
        assert_eq!(stats.withdrawn.len(), n);
        assert_eq!(stats.nlri.len(), n);
        assert_eq!(stats.mp_reach.len(), n);
        assert_eq!(stats.mp_unreach.len(), n);
        // Six records one second apart: five flushed buckets, the sixth
        // still accumulating.
        assert_eq!(n, 5);
        assert_eq!(stats.total_msgs, 6);
    }

    #[tokio::test]
    async fn test_non_update_messages_counted_but_not_bucketed() {
        let records = vec![
            mrt_testutil::record(START, BGP4MP, 1, &keepalive_body()),
            mrt_testutil::record(START, 13, 2, &[0u8; 16]), // TABLE_DUMP_V2
            testutil::update_record(START + 1, &[24], &[], &[]),
        ];
        let (_tmp, catalog) = catalog_of(&records);
        let stats = run_stats(catalog, ts(START as i64), ts(START as i64 + 5)).await;

        // All three records are counted. The UPDATE at +1s flushes the
        // (empty) first-second bucket and then accumulates in a bucket that
        // is never flushed.
        assert_eq!(stats.total_msgs, 3);
        assert_eq!(stats.total_per_delta, vec![0]);
        assert_eq!(stats.nlri, vec![0]);
    }

    #[tokio::test]
    async fn test_out_of_range_error_reply() {
        let (_tmp, catalog) = testutil::two_file_catalog(START);
        let (tx, mut rx) = mpsc::channel(4);
        spawn_stats_query(
            Arc::new(catalog),
            Duration::minutes(15),
            ts(0),
            ts(100),
            tx,
            false,
        );
        let reply = rx.recv().await.unwrap();
        assert!(matches!(reply, Err(ArchiveError::OutOfRange)));
        assert!(rx.recv().await.is_none());
    }
}
