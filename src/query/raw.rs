//! Raw-record range queries.

use crate::archive::catalog::Catalog;
use crate::query::{scan_files, Reply};
use chrono::{DateTime, Duration, Utc};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Spawn a producer that streams every record whose embedded timestamp falls
/// within one second of `[ta, tb]` into `tx`, in catalog order.
///
/// The ±1s slack tolerates the catalog's coarse, second-precision index
/// without over-delivering far outside the request. Emitted payloads are
/// freshly copied record bytes. Range-resolution failures produce a single
/// error reply; the channel closes when the producer drops its sender.
pub fn spawn_raw_query(
    catalog: Arc<Catalog>,
    delta: Duration,
    ta: DateTime<Utc>,
    tb: DateTime<Utc>,
    tx: mpsc::Sender<Reply>,
    debug: bool,
) {
    tokio::task::spawn_blocking(move || {
        tracing::info!(start = %ta, end = %tb, "raw range query");
        let (i, j) = match catalog.range(ta, tb, delta) {
            Ok(span) => span,
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return;
            }
        };
        let lo = ta - Duration::seconds(1);
        let hi = tb + Duration::seconds(1);

        scan_files(&catalog, i, j, debug, &tx, |record| {
            let t = record.header.time();
            if t > lo && t < hi && tx.blocking_send(Ok(record.raw_bytes())).is_err() {
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
    });
}
