//! Continuous-pull session manager.
//!
//! A continuous pull lets a client repeatedly fetch "everything since my
//! last pull" without restating timestamps. Each pull rotates the session's
//! opaque ID: the ID returned by a request is the only one valid for the
//! next request. Idle sessions expire after 30 minutes.
//!
//! One manager task owns the session tables; all mutation flows through a
//! request channel with oneshot replies, so there is no shared state to
//! lock. Every live session has a timer task that either fires into the
//! manager's expiry channel or exits quietly when canceled by a rotation.

use crate::archive::error::{ArchiveError, ArchiveResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Maximum number of live sessions per client IP.
pub const MAX_SESSIONS_PER_IP: usize = 100;

/// Idle lifetime of a session.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Snapshot of one continuous-pull session as returned to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub ip: String,
    /// The ID valid for the *next* pull (32 hex characters).
    pub id: String,
    /// Start of the window the next pull will cover.
    pub t1: DateTime<Utc>,
    /// End of the covered window; `None` until the first pull.
    pub t2: Option<DateTime<Utc>>,
}

enum SessionRequest {
    Add {
        ip: String,
        reply: oneshot::Sender<ArchiveResult<Session>>,
    },
    Pull {
        ip: String,
        id: String,
        reply: oneshot::Sender<ArchiveResult<Session>>,
    },
}

struct SessionState {
    session: Session,
    cancel: oneshot::Sender<()>,
}

/// Handle for talking to the session manager task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
}

impl SessionHandle {
    /// Register a new session for `ip` and start its expiry timer.
    pub async fn add(&self, ip: impl Into<String>) -> ArchiveResult<Session> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Add {
                ip: ip.into(),
                reply,
            })
            .await
            .map_err(|_| ArchiveError::Internal("session manager gone".into()))?;
        rx.await
            .map_err(|_| ArchiveError::Internal("session manager dropped reply".into()))?
    }

    /// Rotate the session identified by `id` and return its replacement;
    /// the pull window is `t1..t2` of the returned session.
    pub async fn pull(&self, ip: impl Into<String>, id: impl Into<String>) -> ArchiveResult<Session> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionRequest::Pull {
                ip: ip.into(),
                id: id.into(),
                reply,
            })
            .await
            .map_err(|_| ArchiveError::Internal("session manager gone".into()))?;
        rx.await
            .map_err(|_| ArchiveError::Internal("session manager dropped reply".into()))?
    }
}

/// Session manager task state.
pub struct SessionManager {
    by_ip: HashMap<String, Vec<String>>,
    by_id: HashMap<String, SessionState>,
    expire_tx: mpsc::Sender<String>,
}

impl SessionManager {
    /// Spawn the manager task and return its handle. The task ends when the
    /// last handle is dropped.
    pub fn spawn() -> SessionHandle {
        let (tx, mut req_rx) = mpsc::channel::<SessionRequest>(16);
        let (expire_tx, mut expire_rx) = mpsc::channel::<String>(16);

        let mut manager = SessionManager {
            by_ip: HashMap::new(),
            by_id: HashMap::new(),
            expire_tx,
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    request = req_rx.recv() => {
                        match request {
                            Some(SessionRequest::Add { ip, reply }) => {
                                let _ = reply.send(manager.add(ip));
                            }
                            Some(SessionRequest::Pull { ip, id, reply }) => {
                                let _ = reply.send(manager.pull(ip, id));
                            }
                            None => break,
                        }
                    }
                    Some(id) = expire_rx.recv() => {
                        tracing::info!(%id, "session expired, removing");
                        manager.remove(&id);
                    }
                }
            }
            tracing::debug!("session manager stopped");
        });

        SessionHandle { tx }
    }

    fn add(&mut self, ip: String) -> ArchiveResult<Session> {
        let ids = self.by_ip.entry(ip.clone()).or_default();
        if ids.len() >= MAX_SESSIONS_PER_IP {
            return Err(ArchiveError::SessionFull);
        }

        let session = Session {
            ip: ip.clone(),
            id: fresh_id(),
            t1: Utc::now(),
            t2: None,
        };
        ids.push(session.id.clone());

        let cancel = start_timer(session.id.clone(), self.expire_tx.clone());
        self.by_id.insert(
            session.id.clone(),
            SessionState {
                session: session.clone(),
                cancel,
            },
        );
        tracing::info!(ip = %session.ip, id = %session.id, "session registered");
        Ok(session)
    }

    fn pull(&mut self, ip: String, id: String) -> ArchiveResult<Session> {
        let Some(state) = self.by_id.remove(&id) else {
            if self.by_ip.contains_key(&ip) {
                let ids = self.by_ip.get(&ip).cloned().unwrap_or_default();
                return Err(ArchiveError::StrayId(ids));
            }
            return Err(ArchiveError::UnknownSession);
        };

        // Stop the old timer before the ID is reused; the timer task exits
        // quietly on cancellation.
        let _ = state.cancel.send(());

        let old = state.session;
        let rotated = Session {
            ip: old.ip.clone(),
            id: fresh_id(),
            // First pull covers from registration; later pulls resume where
            // the previous window ended.
            t1: old.t2.unwrap_or(old.t1),
            t2: Some(Utc::now()),
        };

        if let Some(ids) = self.by_ip.get_mut(&old.ip) {
            if let Some(slot) = ids.iter_mut().find(|known| **known == old.id) {
                *slot = rotated.id.clone();
            }
        }

        let cancel = start_timer(rotated.id.clone(), self.expire_tx.clone());
        self.by_id.insert(
            rotated.id.clone(),
            SessionState {
                session: rotated.clone(),
                cancel,
            },
        );
        tracing::info!(old_id = %old.id, id = %rotated.id, "session rotated");
        Ok(rotated)
    }

    fn remove(&mut self, id: &str) {
        let Some(state) = self.by_id.remove(id) else {
            return;
        };
        if let Some(ids) = self.by_ip.get_mut(&state.session.ip) {
            ids.retain(|known| known != id);
            if ids.is_empty() {
                self.by_ip.remove(&state.session.ip);
            }
        }
    }
}

fn fresh_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn start_timer(id: String, expire_tx: mpsc::Sender<String>) -> oneshot::Sender<()> {
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(SESSION_TIMEOUT) => {
                let _ = expire_tx.send(id).await;
            }
            _ = &mut cancel_rx => {
                tracing::debug!(%id, "session timer canceled");
            }
        }
    });
    cancel_tx
}
