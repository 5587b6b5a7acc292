//! Per-session flight core: validate, apply, persist, respond

use dronesim_shared::{
    CrashCause, DroneStateMachine, EnvironmentGenerator, FlightConfig, FlightState, Response,
    StoreError, Telemetry, TelemetryBackend, TelemetryStore, TickOutcome,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a handled frame did to the session
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Command rejected; nothing changed
    Rejected,
    /// Tick applied and persisted
    Applied,
    /// Tick ended in a crash
    Crashed(CrashCause),
    /// Command arrived after the session had already crashed
    Terminated(CrashCause),
    /// Internal fault; the session is being torn down
    Faulted(String),
}

/// Response to send plus what happened
#[derive(Debug, Clone)]
pub struct Reply {
    pub response: Response,
    pub outcome: Outcome,
}

impl Reply {
    /// Whether the connection closes after this reply
    pub fn closes(&self) -> bool {
        !matches!(self.outcome, Outcome::Rejected | Outcome::Applied)
    }
}

/// One drone's state machine and telemetry store
pub struct FlightSession {
    fsm: DroneStateMachine,
    store: TelemetryStore,
}

impl FlightSession {
    /// Open a session, restoring persisted telemetry when present
    ///
    /// Without a seed the environment is seeded from entropy.
    pub fn open(
        session_id: &str,
        backend: Arc<dyn TelemetryBackend>,
        config: &FlightConfig,
        seed: Option<u64>,
    ) -> Result<Self, StoreError> {
        let store = TelemetryStore::open(session_id, backend)?;

        let environment = match seed {
            Some(seed) => EnvironmentGenerator::new(seed, config.environment.clone()),
            None => EnvironmentGenerator::from_entropy(config.environment.clone()),
        };

        let fsm = if store.is_restored() {
            info!(
                session = %session_id,
                iterations = store.current().iterations,
                "resuming persisted flight"
            );
            DroneStateMachine::resume(config.clone(), environment, store.current())
        } else {
            DroneStateMachine::new(config.clone(), environment)
        };
        debug!(session = %session_id, seed = fsm.environment().seed(), "environment seeded");

        Ok(Self { fsm, store })
    }

    pub fn session_id(&self) -> &str {
        self.store.session_id()
    }

    pub fn state(&self) -> FlightState {
        self.fsm.state()
    }

    /// Copy of the current telemetry
    pub fn telemetry(&self) -> Telemetry {
        self.store.snapshot()
    }

    /// Handle one raw command frame
    pub fn handle_frame(&mut self, frame: &[u8]) -> Reply {
        // A crashed session replays its crash whatever the command says
        if let FlightState::Crashed(cause) = self.fsm.state() {
            return self.replay_crash(cause);
        }

        let command = match self.fsm.config().command_limits.parse(frame) {
            Ok(command) => command,
            Err(e) => {
                debug!(session = %self.session_id(), error = %e, "command rejected");
                return Reply {
                    response: Response::validation(&e),
                    outcome: Outcome::Rejected,
                };
            }
        };

        match self.fsm.apply(self.store.current(), &command) {
            Ok(outcome) => self.commit(outcome),
            Err(terminated) => Reply {
                response: terminated.to_response(),
                outcome: Outcome::Terminated(terminated.cause),
            },
        }
    }

    /// Force the operator-timeout crash after an idle window
    pub fn timeout(&mut self) -> Reply {
        match self.fsm.force_crash(self.store.current(), CrashCause::OperatorTimeout) {
            Ok(outcome) => self.commit(outcome),
            Err(terminated) => Reply {
                response: terminated.to_response(),
                outcome: Outcome::Terminated(terminated.cause),
            },
        }
    }

    fn commit(&mut self, outcome: TickOutcome) -> Reply {
        let response = outcome.to_response();
        let cause = outcome.crash_cause();

        if let Err(e) = self.store.commit(outcome.telemetry().clone()) {
            error!(session = %self.session_id(), error = %e, "failed to persist telemetry");
            return Reply {
                response: Response::internal(format!("Session terminated: {}", e)),
                outcome: Outcome::Faulted(e.to_string()),
            };
        }

        match cause {
            Some(cause) => {
                warn!(session = %self.session_id(), cause = %cause, "session crashed");
                Reply {
                    response,
                    outcome: Outcome::Crashed(cause),
                }
            }
            None => Reply {
                response,
                outcome: Outcome::Applied,
            },
        }
    }

    fn replay_crash(&self, cause: CrashCause) -> Reply {
        Reply {
            response: Response::crashed(self.store.current(), cause),
            outcome: Outcome::Terminated(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dronesim_shared::{ErrorKind, MemoryBackend};

    fn open(backend: Arc<MemoryBackend>) -> FlightSession {
        FlightSession::open("s1", backend, &FlightConfig::default(), Some(7)).unwrap()
    }

    fn cmd(speed: i64, altitude: i64, movement: &str) -> Vec<u8> {
        format!(
            r#"{{"speed": {}, "altitude": {}, "movement": "{}"}}"#,
            speed, altitude, movement
        )
        .into_bytes()
    }

    #[test]
    fn test_invalid_command_changes_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = open(backend.clone());

        let reply = session.handle_frame(&cmd(7, 0, "fwd"));
        assert_eq!(reply.outcome, Outcome::Rejected);
        assert!(!reply.closes());
        assert!(matches!(
            reply.response,
            Response::Error { kind: ErrorKind::Validation, ref field, .. } if field.as_deref() == Some("speed")
        ));
        assert_eq!(session.telemetry(), Telemetry::default());
        assert!(backend.is_empty());
    }

    #[test]
    fn test_two_ticks_accumulate_and_persist() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = open(backend.clone());

        let first = session.handle_frame(&cmd(2, 10, "fwd"));
        assert_eq!(first.outcome, Outcome::Applied);
        let second = session.handle_frame(&cmd(3, 5, "fwd"));
        assert_eq!(second.outcome, Outcome::Applied);

        match second.response {
            Response::Success { telemetry, metrics } => {
                assert_eq!(metrics.iterations, 2);
                assert_eq!(metrics.total_distance, 5.0);
                assert_eq!(telemetry.x_position, 5);
                assert_eq!(telemetry.altitude, 15);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let persisted = backend.load("s1").unwrap().unwrap();
        assert_eq!(persisted, session.telemetry());
    }

    #[test]
    fn test_crash_then_replay() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = open(backend);

        let reply = session.handle_frame(&cmd(0, -5, "fwd"));
        assert_eq!(reply.outcome, Outcome::Crashed(CrashCause::AltitudeNegative));
        assert!(reply.closes());
        let crashed = reply.response.clone();

        // Even an invalid command gets the stored crash payload
        let again = session.handle_frame(&cmd(9, 0, "up"));
        assert_eq!(again.outcome, Outcome::Terminated(CrashCause::AltitudeNegative));
        assert_eq!(again.response, crashed);
        assert_eq!(session.telemetry().iterations, 1);
    }

    #[test]
    fn test_timeout_crash() {
        let backend = Arc::new(MemoryBackend::new());
        let mut session = open(backend);
        session.handle_frame(&cmd(1, 3, "fwd"));

        let reply = session.timeout();
        assert_eq!(reply.outcome, Outcome::Crashed(CrashCause::OperatorTimeout));
        assert!(matches!(
            reply.response,
            Response::Crashed { crash_cause: CrashCause::OperatorTimeout, .. }
        ));
        assert_eq!(session.state(), FlightState::Crashed(CrashCause::OperatorTimeout));
    }

    #[test]
    fn test_resume_persisted_flight() {
        let backend = Arc::new(MemoryBackend::new());
        {
            let mut session = open(backend.clone());
            session.handle_frame(&cmd(4, 20, "fwd"));
        }

        let mut resumed = open(backend);
        assert_eq!(resumed.telemetry().iterations, 1);
        let reply = resumed.handle_frame(&cmd(1, 0, "rev"));
        match reply.response {
            Response::Success { telemetry, metrics } => {
                assert_eq!(metrics.iterations, 2);
                assert_eq!(telemetry.x_position, 3);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_restore_fails_open() {
        let backend = Arc::new(MemoryBackend::new());
        let bad = Telemetry {
            battery: f64::NAN,
            ..Default::default()
        };
        backend.save("s1", &bad).unwrap();

        let result = FlightSession::open("s1", backend, &FlightConfig::default(), None);
        assert!(matches!(result, Err(StoreError::Malformed { .. })));
    }

    struct FailingBackend;

    impl TelemetryBackend for FailingBackend {
        fn load(&self, _: &str) -> Result<Option<Telemetry>, StoreError> {
            Ok(None)
        }

        fn save(&self, _: &str, _: &Telemetry) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }

        fn remove(&self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_persistence_failure_faults_session() {
        let mut session =
            FlightSession::open("s1", Arc::new(FailingBackend), &FlightConfig::default(), Some(1)).unwrap();

        let reply = session.handle_frame(&cmd(1, 1, "fwd"));
        assert!(matches!(reply.outcome, Outcome::Faulted(_)));
        assert!(reply.closes());
        assert!(matches!(
            reply.response,
            Response::Error { kind: ErrorKind::Internal, .. }
        ));
        assert_eq!(session.telemetry().iterations, 0);
    }
}
