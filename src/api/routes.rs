//! HTTP route handlers.
//!
//! The handlers are a thin dispatcher: they parse query parameters, pick the
//! engine, and stream the reply channel to the socket. Time-validation
//! failures and engine errors travel inside the reply stream as text lines,
//! so a request that has started streaming always carries status 200; only
//! routing-level failures (unknown archive) get an error status.
//!
//! Continuous-pull requests return the rotated session ID in the
//! `Next-Pull-ID` response header.

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
};
use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::archive::{ArchiveError, ArchiveHandle};
use crate::query::Reply;

/// Wire format for request timestamps.
pub const TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Next-pull session ID response header.
pub const NEXT_PULL_HEADER: &str = "Next-Pull-ID";

// Reply channel depth; bounds producer read-ahead while a client drains.
const REPLY_CHANNEL_DEPTH: usize = 64;

type Params = Vec<(String, String)>;

/// GET /archive/help
pub async fn help(State(state): State<Arc<AppState>>) -> String {
    let mut body = String::from(
        "bgpvault: historical BGP data and statistics archive.\n\
         Endpoints, relative to /archive/mrt/{collector}/{kind}:\n\
         ?start=YYYYMMDDHHMMSS&end=YYYYMMDDHHMMSS   raw MRT records for the range (max 24h)\n\
         ?continuous=begin[&start=...]              open a continuous pull session\n\
         ?continuous={id}                           pull everything since the previous pull\n\
         /conf?range                                first and last date in the archive\n\
         /conf?files                                files backing the archive\n\
         /stats?start=...&end=...                   per-second statistics as JSON\n\
         Continuous sessions expire after 30 idle minutes; each reply carries\n\
         the next session ID in the Next-Pull-ID header.\n\
         Served archives:\n",
    );
    for handle in state.archives() {
        body.push_str(&format!(
            " archive: {}/{}\trange: {}",
            handle.collector,
            handle.discriminator,
            handle.snapshot().date_range_string()
        ));
        if !body.ends_with('\n') {
            body.push('\n');
        }
    }
    body
}

/// GET /archive/mrt/:collector/:kind
///
/// Raw range query, or continuous-pull session traffic when the
/// `continuous` parameter is present.
pub async fn raw_query(
    State(state): State<Arc<AppState>>,
    Path((collector, kind)): Path<(String, String)>,
    Query(params): Query<Params>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<Response> {
    let archive = state.archive(&collector, &kind)?;
    let ip = addr.ip().to_string();

    let (tx, rx) = mpsc::channel::<Reply>(REPLY_CHANNEL_DEPTH);
    let next_pull_id = match dispatch_raw(archive, &params, &ip, &tx).await {
        Ok(id) => id,
        Err(err) => {
            tracing::warn!(%collector, %kind, error = %err, "raw query rejected");
            let _ = tx.send(Err(err)).await;
            None
        }
    };
    drop(tx);

    stream_response(rx, "application/octet-stream", next_pull_id)
}

/// GET /archive/mrt/:collector/:kind/stats
pub async fn stats_query(
    State(state): State<Arc<AppState>>,
    Path((collector, kind)): Path<(String, String)>,
    Query(params): Query<Params>,
) -> ApiResult<Response> {
    let archive = state.archive(&collector, &kind)?;

    let (tx, rx) = mpsc::channel::<Reply>(REPLY_CHANNEL_DEPTH);
    match range_from_params(&params) {
        Ok((ta, tb)) => archive.query_stats(ta, tb, tx.clone()),
        Err(err) => {
            tracing::warn!(%collector, %kind, error = %err, "stats query rejected");
            let _ = tx.send(Err(err)).await;
        }
    }
    drop(tx);

    stream_response(rx, "application/json", None)
}

/// GET /archive/mrt/:collector/:kind/conf
///
/// `?range` reports the archive's date span, `?files` lists the backing
/// files one basename per line.
pub async fn conf(
    State(state): State<Arc<AppState>>,
    Path((collector, kind)): Path<(String, String)>,
    Query(params): Query<Params>,
) -> ApiResult<Response> {
    let archive = state.archive(&collector, &kind)?;
    let snapshot = archive.snapshot();

    let body = if has_key(&params, "range") {
        if snapshot.is_empty() {
            return Err(ApiError::Archive(ArchiveError::Empty));
        }
        snapshot.date_range_string()
    } else if has_key(&params, "files") {
        let mut listing = String::new();
        for entry in snapshot.iter() {
            if let Some(name) = entry.path.file_name() {
                listing.push_str(&name.to_string_lossy());
                listing.push('\n');
            }
        }
        listing
    } else {
        String::new()
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

// Route a raw request: plain time range, session open, or session pull.
// Returns the session ID to advertise, if any.
async fn dispatch_raw(
    archive: &ArchiveHandle,
    params: &Params,
    ip: &str,
    tx: &mpsc::Sender<Reply>,
) -> Result<Option<String>, ArchiveError> {
    let continuous = single(params, "continuous")?;
    let start = single(params, "start")?;
    let end = single(params, "end")?;

    let Some(continuous) = continuous else {
        let (ta, tb) = validate_range(start, end)?;
        archive.query_raw(ta, tb, tx.clone());
        return Ok(None);
    };

    // Continuous goes alone or with a start time, never with an end.
    if end.is_some() {
        return Err(ArchiveError::BadRequest);
    }

    if continuous == "begin" {
        let session = archive.sessions().add(ip).await?;
        tracing::info!(ip, id = %session.id, "continuous pull registered");
        if let Some(start) = start {
            // The session is open either way; a bad range only fails the
            // accompanying query, and the header still carries the ID.
            let range = parse_time(start).and_then(|ta| {
                let tb = Utc::now();
                check_window(ta, tb).map(|()| (ta, tb))
            });
            match range {
                Ok((ta, tb)) => archive.query_raw(ta, tb, tx.clone()),
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                }
            }
        }
        Ok(Some(session.id))
    } else {
        let session = archive.sessions().pull(ip, continuous).await?;
        tracing::info!(ip, id = %session.id, "continuous pull resumed");
        if let Some(t2) = session.t2 {
            archive.query_raw(session.t1, t2, tx.clone());
        }
        Ok(Some(session.id))
    }
}

fn range_from_params(params: &Params) -> Result<(DateTime<Utc>, DateTime<Utc>), ArchiveError> {
    let start = single(params, "start")?;
    let end = single(params, "end")?;
    validate_range(start, end)
}

fn validate_range(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ArchiveError> {
    let (Some(start), Some(end)) = (start, end) else {
        return Err(ArchiveError::BadRequest);
    };
    let ta = parse_time(start)?;
    let tb = parse_time(end)?;
    check_window(ta, tb)?;
    Ok((ta, tb))
}

fn check_window(ta: DateTime<Utc>, tb: DateTime<Utc>) -> Result<(), ArchiveError> {
    if tb < ta {
        return Err(ArchiveError::BadDate);
    }
    if tb - ta > Duration::hours(24) {
        return Err(ArchiveError::TooLarge);
    }
    Ok(())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, ArchiveError> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| ArchiveError::BadDate)
}

// Exactly zero or one occurrence of `key`; repeats are malformed.
fn single<'a>(params: &'a Params, key: &str) -> Result<Option<&'a str>, ArchiveError> {
    let mut matches = params.iter().filter(|(k, _)| k == key);
    let first = matches.next();
    if matches.next().is_some() {
        return Err(ArchiveError::BadRequest);
    }
    Ok(first.map(|(_, v)| v.as_str()))
}

fn has_key(params: &Params, key: &str) -> bool {
    params.iter().any(|(k, _)| k == key)
}

// Drain the reply channel into the response body. Payload chunks stream
// as-is; an error reply becomes its message followed by a newline, after
// which the producer side closes the channel.
fn stream_response(
    rx: mpsc::Receiver<Reply>,
    content_type: &'static str,
    next_pull_id: Option<String>,
) -> ApiResult<Response> {
    let stream = ReceiverStream::new(rx).map(|reply| match reply {
        Ok(bytes) => Ok::<Bytes, Infallible>(bytes),
        Err(err) => Ok(Bytes::from(format!("{err}\n"))),
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type);
    if let Some(id) = next_pull_id {
        builder = builder.header(NEXT_PULL_HEADER, id);
    }
    builder
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        let t = parse_time("20130101000000").unwrap();
        assert_eq!(t.timestamp(), 1356998400);
        assert!(parse_time("2013-01-01").is_err());
        assert!(parse_time("20131301000000").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(matches!(
            validate_range(None, Some("20130101000000")),
            Err(ArchiveError::BadRequest)
        ));
        assert!(matches!(
            validate_range(Some("20130101010000"), Some("20130101000000")),
            Err(ArchiveError::BadDate)
        ));
        // 25 hours.
        assert!(matches!(
            validate_range(Some("20130101000000"), Some("20130102010000")),
            Err(ArchiveError::TooLarge)
        ));
        // Exactly 24 hours is allowed.
        assert!(validate_range(Some("20130101000000"), Some("20130102000000")).is_ok());
    }

    #[test]
    fn test_single_rejects_repeats() {
        let params = vec![
            ("start".to_string(), "a".to_string()),
            ("start".to_string(), "b".to_string()),
        ];
        assert!(matches!(
            single(&params, "start"),
            Err(ArchiveError::BadRequest)
        ));
        assert_eq!(single(&params, "end").unwrap(), None);
    }
}
