//! Read-only admin listener
//!
//! Each admin connection receives one JSON frame with every registered
//! session and is then closed. Anything the client sends is ignored.

use crate::session::{AdminView, SessionInfo, SessionStatus};
use anyhow::Result;
use dronesim_shared::{codec, now_ms};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Registry snapshot sent to monitoring clients
#[derive(Debug, Serialize)]
pub struct AdminSnapshot {
    pub generated_at_ms: u64,
    pub active: usize,
    pub sessions: Vec<SessionInfo>,
}

impl AdminSnapshot {
    pub async fn capture(view: &AdminView) -> Self {
        let sessions = view.list().await;
        let active = sessions
            .iter()
            .filter(|info| info.status == SessionStatus::Active)
            .count();
        Self {
            generated_at_ms: now_ms(),
            active,
            sessions,
        }
    }
}

/// Serves registry snapshots over TCP
pub struct AdminListener {
    view: AdminView,
}

impl AdminListener {
    pub fn new(view: AdminView) -> Self {
        Self { view }
    }

    /// Accept admin connections until the listener fails
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, addr) = listener.accept().await?;
            if let Err(e) = self.serve(socket, addr).await {
                warn!(%addr, error = %e, "admin client failed");
            }
        }
    }

    async fn serve(&self, mut socket: TcpStream, addr: SocketAddr) -> Result<()> {
        let snapshot = AdminSnapshot::capture(&self.view).await;
        debug!(%addr, sessions = snapshot.sessions.len(), "serving admin snapshot");

        let encoded = codec::encode(&snapshot)?;
        socket.write_all(&encoded).await?;
        socket.shutdown().await?;
        Ok(())
    }
}
