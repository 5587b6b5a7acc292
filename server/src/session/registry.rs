//! Admin registry of all drone sessions
//!
//! The session tasks are the only writers. Monitoring code gets an
//! [`AdminView`], which can read snapshots but has no write path.

use dronesim_shared::{now_ms, CrashCause, Telemetry};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

type SessionMap = Arc<RwLock<HashMap<String, SessionInfo>>>;

/// Lifecycle of a session as seen from the admin surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Crashed { cause: CrashCause },
    Faulted { reason: String },
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// Last known state of one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub addr: SocketAddr,
    pub connected_at_ms: u64,
    pub last_activity_ms: u64,
    pub terminated_at_ms: Option<u64>,
    pub status: SessionStatus,
    pub telemetry: Telemetry,
}

impl SessionInfo {
    pub fn new(session_id: String, addr: SocketAddr) -> Self {
        let now = now_ms();
        Self {
            session_id,
            addr,
            connected_at_ms: now,
            last_activity_ms: now,
            terminated_at_ms: None,
            status: SessionStatus::Active,
            telemetry: Telemetry::default(),
        }
    }
}

/// Process-wide directory of drone sessions
pub struct AdminRegistry {
    sessions: SessionMap,
}

impl AdminRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Read-only handle for monitoring surfaces
    pub fn view(&self) -> AdminView {
        AdminView {
            sessions: self.sessions.clone(),
        }
    }

    /// Register a new session
    pub async fn register(&self, info: SessionInfo) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(info.session_id.clone(), info);
    }

    /// Remove a session
    pub async fn unregister(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
    }

    /// Store a fresh telemetry snapshot after a tick
    pub async fn record_tick(&self, session_id: &str, telemetry: Telemetry) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.telemetry = telemetry;
            entry.last_activity_ms = now_ms();
        }
    }

    /// Note activity that did not change telemetry (e.g. a rejected command)
    pub async fn touch(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_activity_ms = now_ms();
        }
    }

    /// Mark a session as crashed with its final telemetry
    pub async fn mark_crashed(&self, session_id: &str, cause: CrashCause, telemetry: Telemetry) {
        self.terminate(session_id, SessionStatus::Crashed { cause }, Some(telemetry))
            .await;
    }

    /// Mark a session as faulted by an internal error
    pub async fn mark_faulted(&self, session_id: &str, reason: impl Into<String>) {
        self.terminate(
            session_id,
            SessionStatus::Faulted {
                reason: reason.into(),
            },
            None,
        )
        .await;
    }

    async fn terminate(&self, session_id: &str, status: SessionStatus, telemetry: Option<Telemetry>) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(session_id) {
            let now = now_ms();
            entry.status = status;
            entry.last_activity_ms = now;
            entry.terminated_at_ms = Some(now);
            if let Some(telemetry) = telemetry {
                entry.telemetry = telemetry;
            }
        }
    }

    /// Remove terminated sessions older than `retention` and return their IDs
    pub async fn prune_terminated(&self, retention: Duration) -> Vec<String> {
        let now = now_ms();
        let retention_ms = retention.as_millis() as u64;

        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .values()
            .filter(|info| {
                info.terminated_at_ms
                    .is_some_and(|at| now.saturating_sub(at) >= retention_ms)
            })
            .map(|info| info.session_id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
        }
        expired
    }
}

impl Default for AdminRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view over the registry
#[derive(Clone)]
pub struct AdminView {
    sessions: SessionMap,
}

impl AdminView {
    /// Snapshot of one session
    pub async fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Snapshot of all sessions, oldest connection first
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut all: Vec<SessionInfo> = self.sessions.read().await.values().cloned().collect();
        all.sort_by(|a, b| {
            a.connected_at_ms
                .cmp(&b.connected_at_ms)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        all
    }

    /// Number of registered sessions, terminated ones included
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of sessions still flying
    pub async fn active_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|info| !info.status.is_terminal())
            .count()
    }
}
