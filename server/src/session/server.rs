//! Session server: one task per pilot connection

use super::connection::DroneConnection;
use super::flight::{FlightSession, Outcome};
use super::registry::{AdminRegistry, SessionInfo};
use crate::config::ServerConfig;
use dronesim_shared::{Response, TelemetryBackend};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Accepts pilot connections and runs one flight session per connection
pub struct SessionServer {
    config: ServerConfig,
    registry: Arc<AdminRegistry>,
    backend: Arc<dyn TelemetryBackend>,
}

impl SessionServer {
    pub fn new(config: ServerConfig, registry: Arc<AdminRegistry>, backend: Arc<dyn TelemetryBackend>) -> Self {
        Self {
            config,
            registry,
            backend,
        }
    }

    /// Accept connections until the listener fails
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (socket, addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                server.serve(socket, addr).await;
            });
        }
    }

    /// Drive one connection from greeting to termination
    pub async fn serve(&self, socket: TcpStream, addr: SocketAddr) {
        let session_id = Uuid::new_v4().to_string();
        info!(session = %session_id, %addr, "pilot connected");

        self.run_session(socket, addr, &session_id).await;
        self.release(&session_id);
    }

    async fn run_session(&self, socket: TcpStream, addr: SocketAddr, session_id: &str) {
        let session_id = session_id.to_string();
        let mut conn = DroneConnection::new(socket, addr, session_id.clone());
        self.registry
            .register(SessionInfo::new(session_id.clone(), addr))
            .await;

        let mut flight = match FlightSession::open(
            &session_id,
            self.backend.clone(),
            &self.config.flight,
            self.config.seed,
        ) {
            Ok(flight) => flight,
            Err(e) => {
                error!(session = %session_id, error = %e, "failed to open telemetry");
                self.registry.mark_faulted(&session_id, e.to_string()).await;
                let _ = conn
                    .send(&Response::internal(format!("Session terminated: {}", e)))
                    .await;
                let _ = conn.close().await;
                return;
            }
        };
        self.registry
            .record_tick(&session_id, flight.telemetry())
            .await;

        if let Err(e) = conn.send(&Response::connected(&session_id)).await {
            warn!(session = %session_id, error = %e, "failed to greet pilot");
            self.registry.unregister(&session_id).await;
            return;
        }

        self.session_loop(&mut conn, &mut flight).await;
    }

    /// Drop the telemetry record of a finished session unless the backend keeps it
    fn release(&self, session_id: &str) {
        if self.backend.retains_records() {
            return;
        }
        if let Err(e) = self.backend.remove(session_id) {
            warn!(session = %session_id, error = %e, "failed to drop telemetry record");
        }
    }

    async fn session_loop(&self, conn: &mut DroneConnection, flight: &mut FlightSession) {
        let session_id = conn.session_id().to_string();

        loop {
            let reply = match timeout(self.config.idle_timeout, conn.recv()).await {
                Err(_) => {
                    warn!(
                        session = %session_id,
                        idle_secs = self.config.idle_timeout.as_secs(),
                        "pilot idle, forcing timeout crash"
                    );
                    flight.timeout()
                }
                Ok(Ok(Some(frame))) => flight.handle_frame(&frame),
                Ok(Ok(None)) => {
                    info!(session = %session_id, addr = %conn.addr(), "pilot disconnected");
                    self.registry.unregister(&session_id).await;
                    return;
                }
                Ok(Err(e)) => {
                    warn!(session = %session_id, error = %e, "connection error");
                    self.registry.unregister(&session_id).await;
                    return;
                }
            };

            match &reply.outcome {
                Outcome::Applied => {
                    self.registry
                        .record_tick(&session_id, flight.telemetry())
                        .await;
                }
                Outcome::Rejected => self.registry.touch(&session_id).await,
                Outcome::Crashed(cause) | Outcome::Terminated(cause) => {
                    self.registry
                        .mark_crashed(&session_id, *cause, flight.telemetry())
                        .await;
                }
                Outcome::Faulted(reason) => {
                    self.registry.mark_faulted(&session_id, reason.clone()).await;
                }
            }

            if let Err(e) = conn.send(&reply.response).await {
                warn!(session = %session_id, error = %e, "failed to send response");
                if !reply.closes() {
                    self.registry.unregister(&session_id).await;
                }
                return;
            }

            if reply.closes() {
                debug!(
                    session = %session_id,
                    outcome = ?reply.outcome,
                    state = ?flight.state(),
                    "closing session"
                );
                let _ = conn.close().await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::registry::{AdminView, SessionStatus};
    use dronesim_shared::{CrashCause, ErrorKind, JsonFileBackend, MemoryBackend};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

    struct Pilot {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Pilot {
        async fn connect(addr: SocketAddr) -> (Self, String) {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, writer) = stream.into_split();
            let mut pilot = Self {
                lines: BufReader::new(reader).lines(),
                writer,
            };
            let session_id = match pilot.recv().await.unwrap() {
                Response::Connected { session_id, .. } => session_id,
                other => panic!("expected greeting, got {:?}", other),
            };
            (pilot, session_id)
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn recv(&mut self) -> Option<Response> {
            let line = self.lines.next_line().await.unwrap()?;
            Some(serde_json::from_str(&line).unwrap())
        }
    }

    async fn start(config: ServerConfig) -> (SocketAddr, AdminView) {
        start_with(config, Arc::new(MemoryBackend::new())).await
    }

    async fn start_with(config: ServerConfig, backend: Arc<dyn TelemetryBackend>) -> (SocketAddr, AdminView) {
        let registry = Arc::new(AdminRegistry::new());
        let view = registry.view();
        let server = Arc::new(SessionServer::new(config, registry, backend));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.run(listener));
        (addr, view)
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            seed: Some(11),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fly_and_disconnect() {
        let (addr, view) = start(test_config()).await;
        let (mut pilot, session_id) = Pilot::connect(addr).await;

        pilot.send(r#"{"speed": 3, "altitude": 10, "movement": "fwd"}"#).await;
        match pilot.recv().await.unwrap() {
            Response::Success { telemetry, metrics } => {
                assert_eq!(telemetry.x_position, 3);
                assert_eq!(metrics.iterations, 1);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        pilot.send(r#"{"speed": 7, "altitude": 0, "movement": "fwd"}"#).await;
        assert!(matches!(
            pilot.recv().await.unwrap(),
            Response::Error { kind: ErrorKind::Validation, .. }
        ));

        let info = view.get(&session_id).await.unwrap();
        assert_eq!(info.telemetry.iterations, 1);
        assert_eq!(info.status, SessionStatus::Active);

        // Disconnect tears down the registry entry without a crash payload
        drop(pilot);
        for _ in 0..50 {
            if view.get(&session_id).await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session was not unregistered after disconnect");
    }

    #[tokio::test]
    async fn test_crash_closes_session() {
        let (addr, view) = start(test_config()).await;
        let (mut pilot, session_id) = Pilot::connect(addr).await;

        pilot.send(r#"{"speed": 0, "altitude": -5, "movement": "fwd"}"#).await;
        match pilot.recv().await.unwrap() {
            Response::Crashed { crash_cause, telemetry, .. } => {
                assert_eq!(crash_cause, CrashCause::AltitudeNegative);
                assert_eq!(telemetry.altitude, -5);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        // Server closes the stream after the crash payload
        assert!(pilot.recv().await.is_none());

        let info = view.get(&session_id).await.unwrap();
        assert_eq!(
            info.status,
            SessionStatus::Crashed {
                cause: CrashCause::AltitudeNegative
            }
        );
    }

    #[tokio::test]
    async fn test_idle_timeout_crash() {
        let config = ServerConfig {
            idle_timeout: Duration::from_millis(100),
            ..test_config()
        };
        let (addr, view) = start(config).await;
        let (mut pilot, session_id) = Pilot::connect(addr).await;

        match pilot.recv().await.unwrap() {
            Response::Crashed { crash_cause, .. } => assert_eq!(crash_cause, CrashCause::OperatorTimeout),
            other => panic!("unexpected response: {:?}", other),
        }
        assert!(pilot.recv().await.is_none());
        assert!(view.get(&session_id).await.unwrap().status.is_terminal());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let (addr, view) = start(test_config()).await;
        let (mut a, id_a) = Pilot::connect(addr).await;
        let (mut b, id_b) = Pilot::connect(addr).await;
        assert_ne!(id_a, id_b);

        a.send(r#"{"speed": 5, "altitude": 10, "movement": "fwd"}"#).await;
        a.recv().await.unwrap();
        a.send(r#"{"speed": 5, "altitude": 0, "movement": "fwd"}"#).await;
        a.recv().await.unwrap();

        b.send(r#"{"speed": 1, "altitude": 10, "movement": "rev"}"#).await;
        match b.recv().await.unwrap() {
            Response::Success { telemetry, metrics } => {
                assert_eq!(telemetry.x_position, -1);
                assert_eq!(metrics.iterations, 1);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        assert_eq!(view.get(&id_a).await.unwrap().telemetry.x_position, 10);
        assert_eq!(view.active_count().await, 2);
    }

    async fn wait_until_empty(backend: &MemoryBackend) {
        for _ in 0..100 {
            if backend.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} telemetry records left after teardown", backend.len());
    }

    #[tokio::test]
    async fn test_memory_records_dropped_after_disconnect() {
        let backend = Arc::new(MemoryBackend::new());
        let (addr, view) = start_with(test_config(), backend.clone()).await;

        let mut ids = std::collections::HashSet::new();
        for _ in 0..20 {
            let (mut pilot, session_id) = Pilot::connect(addr).await;
            pilot.send(r#"{"speed": 1, "altitude": 5, "movement": "fwd"}"#).await;
            assert!(matches!(pilot.recv().await.unwrap(), Response::Success { .. }));
            ids.insert(session_id);
        }
        assert_eq!(ids.len(), 20);

        wait_until_empty(&backend).await;
        assert_eq!(view.count().await, 0);
    }

    #[tokio::test]
    async fn test_memory_record_dropped_after_crash() {
        let backend = Arc::new(MemoryBackend::new());
        let (addr, view) = start_with(test_config(), backend.clone()).await;
        let (mut pilot, session_id) = Pilot::connect(addr).await;

        pilot.send(r#"{"speed": 0, "altitude": -1, "movement": "rev"}"#).await;
        assert!(matches!(pilot.recv().await.unwrap(), Response::Crashed { .. }));
        assert!(pilot.recv().await.is_none());

        wait_until_empty(&backend).await;
        // The registry still reports the crash until the retention sweep
        assert!(view.get(&session_id).await.unwrap().status.is_terminal());
    }

    #[tokio::test]
    async fn test_file_records_outlive_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(JsonFileBackend::new(dir.path()).unwrap());
        let (addr, view) = start_with(test_config(), backend.clone()).await;
        let (mut pilot, session_id) = Pilot::connect(addr).await;

        pilot.send(r#"{"speed": 2, "altitude": 5, "movement": "fwd"}"#).await;
        pilot.recv().await.unwrap();
        drop(pilot);

        for _ in 0..50 {
            if view.get(&session_id).await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let record = backend.load(&session_id).unwrap().unwrap();
        assert_eq!(record.iterations, 1);
        assert_eq!(record.x_position, 2);
    }

    #[tokio::test]
    async fn test_pipelined_commands_apply_in_order() {
        let (addr, _view) = start(test_config()).await;
        let (mut pilot, _) = Pilot::connect(addr).await;

        pilot
            .writer
            .write_all(
                b"{\"speed\": 2, \"altitude\": 5, \"movement\": \"fwd\"}\n\
                  {\"speed\": 3, \"altitude\": 5, \"movement\": \"fwd\"}\n",
            )
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            match pilot.recv().await.unwrap() {
                Response::Success { telemetry, metrics } => {
                    seen.push((metrics.iterations, telemetry.x_position, telemetry.altitude));
                }
                other => panic!("unexpected response: {:?}", other),
            }
        }
        assert_eq!(seen, vec![(1, 2, 5), (2, 5, 10)]);
    }
}
