//! Drone State Machine
//!
//! Applies a validated command plus the current environment reading to a
//! telemetry record, then evaluates the crash predicates. A session is
//! `Active` until a predicate matches; `Crashed` is terminal.

use thiserror::Error;
use tracing::{debug, warn};

use crate::environment::{EnvironmentConfig, EnvironmentGenerator, EnvironmentReading};
use crate::limits;
use crate::protocol::{Command, CrashCause, Response, SensorStatus, Telemetry};
use crate::validator::CommandLimits;

/// Lifecycle of a drone session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Active,
    Crashed(CrashCause),
}

/// Check if a transition from one state to another is allowed
pub fn is_valid_transition(from: FlightState, to: FlightState) -> bool {
    matches!(
        (from, to),
        (FlightState::Active, FlightState::Active) | (FlightState::Active, FlightState::Crashed(_))
    )
}

/// Battery drain coefficients
///
/// `drain = (base + per_speed * speed + per_climb * |altitude_delta|)
///          * altitude_factor * dust_factor`
///
/// The altitude factor falls linearly from `ground_factor` at altitude 0 to
/// `ceiling_factor` at `ceiling_altitude` and stays flat above it. The dust
/// factor rises linearly from 1 to `1 + dust_penalty` at maximum dust.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrainModel {
    pub base: f64,
    pub per_speed: f64,
    pub per_climb: f64,
    pub ground_factor: f64,
    pub ceiling_factor: f64,
    pub ceiling_altitude: i64,
    pub dust_penalty: f64,
}

impl Default for DrainModel {
    fn default() -> Self {
        Self {
            base: limits::DRAIN_BASE,
            per_speed: limits::DRAIN_PER_SPEED,
            per_climb: limits::DRAIN_PER_CLIMB,
            ground_factor: limits::DRAIN_GROUND_FACTOR,
            ceiling_factor: limits::DRAIN_CEILING_FACTOR,
            ceiling_altitude: limits::DRAIN_CEILING_ALTITUDE,
            dust_penalty: limits::DRAIN_DUST_PENALTY,
        }
    }
}

impl DrainModel {
    /// Battery percentage consumed by one tick
    pub fn drain(&self, command: &Command, altitude: i64, dust_level: u32, max_dust: u32) -> f64 {
        let work = self.base
            + self.per_speed * f64::from(command.speed)
            + self.per_climb * command.altitude_delta.unsigned_abs() as f64;

        let band = altitude.clamp(0, self.ceiling_altitude.max(1)) as f64 / self.ceiling_altitude.max(1) as f64;
        let altitude_factor = self.ground_factor + (self.ceiling_factor - self.ground_factor) * band;

        let dust = f64::from(dust_level.min(max_dust)) / f64::from(max_dust.max(1));
        let dust_factor = 1.0 + self.dust_penalty * dust;

        work * altitude_factor * dust_factor
    }
}

/// Tunables for one drone
#[derive(Debug, Clone, PartialEq)]
pub struct FlightConfig {
    /// Largest absolute x/y coordinate before `BOUNDARY_EXCEEDED`
    pub max_position: i64,
    pub command_limits: CommandLimits,
    pub environment: EnvironmentConfig,
    pub drain: DrainModel,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            max_position: limits::MAX_POSITION,
            command_limits: CommandLimits::default(),
            environment: EnvironmentConfig::default(),
            drain: DrainModel::default(),
        }
    }
}

/// Result of one applied tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Success(Telemetry),
    Crashed { telemetry: Telemetry, cause: CrashCause },
}

impl TickOutcome {
    pub fn telemetry(&self) -> &Telemetry {
        match self {
            TickOutcome::Success(telemetry) => telemetry,
            TickOutcome::Crashed { telemetry, .. } => telemetry,
        }
    }

    pub fn crash_cause(&self) -> Option<CrashCause> {
        match self {
            TickOutcome::Success(_) => None,
            TickOutcome::Crashed { cause, .. } => Some(*cause),
        }
    }

    pub fn to_response(&self) -> Response {
        match self {
            TickOutcome::Success(telemetry) => Response::success(telemetry),
            TickOutcome::Crashed { telemetry, cause } => Response::crashed(telemetry, *cause),
        }
    }
}

/// A command arrived after the session crashed
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Session terminated: {cause}")]
pub struct SessionTerminated {
    pub cause: CrashCause,
    pub telemetry: Telemetry,
}

impl SessionTerminated {
    /// The stored crash payload, replayed to the client
    pub fn to_response(&self) -> Response {
        Response::crashed(&self.telemetry, self.cause)
    }
}

/// The flight state machine for one drone session
#[derive(Debug)]
pub struct DroneStateMachine {
    config: FlightConfig,
    environment: EnvironmentGenerator,
    state: FlightState,
    final_telemetry: Option<Telemetry>,
}

impl DroneStateMachine {
    /// Create a state machine in `Active` state
    pub fn new(config: FlightConfig, environment: EnvironmentGenerator) -> Self {
        Self {
            config,
            environment,
            state: FlightState::Active,
            final_telemetry: None,
        }
    }

    /// Create a state machine for a restored record
    ///
    /// A record that already satisfies a crash predicate starts `Crashed`.
    pub fn resume(config: FlightConfig, environment: EnvironmentGenerator, telemetry: &Telemetry) -> Self {
        let mut fsm = Self::new(config, environment);
        if let Some(cause) = fsm.check_crash(telemetry) {
            fsm.state = FlightState::Crashed(cause);
            fsm.final_telemetry = Some(telemetry.clone());
        }
        fsm
    }

    /// Get current state
    pub fn state(&self) -> FlightState {
        self.state
    }

    pub fn config(&self) -> &FlightConfig {
        &self.config
    }

    pub fn environment(&self) -> &EnvironmentGenerator {
        &self.environment
    }

    /// Apply one validated command to `current` and return the next record
    pub fn apply(&mut self, current: &Telemetry, command: &Command) -> Result<TickOutcome, SessionTerminated> {
        self.ensure_active()?;

        let tick = current.iterations + 1;
        let reading = self.environment.sample(tick);
        let next = self.step(current, command, &reading);

        debug!(
            tick,
            speed = command.speed,
            altitude_delta = command.altitude_delta,
            movement = %command.movement,
            x = next.x_position,
            altitude = next.altitude,
            battery = next.battery,
            wind = reading.wind_speed,
            dust = reading.dust_level,
            "tick applied"
        );

        Ok(self.settle(next))
    }

    /// Force a terminal crash, e.g. on operator inactivity
    pub fn force_crash(&mut self, current: &Telemetry, cause: CrashCause) -> Result<TickOutcome, SessionTerminated> {
        self.ensure_active()?;
        Ok(self.crash(current.clone(), cause))
    }

    /// Evaluate the crash predicates in priority order
    pub fn check_crash(&self, t: &Telemetry) -> Option<CrashCause> {
        if t.battery <= 0.0 {
            return Some(CrashCause::BatteryDepleted);
        }
        if t.altitude < 0 {
            return Some(CrashCause::AltitudeNegative);
        }
        let max = self.config.max_position.unsigned_abs();
        if t.x_position.unsigned_abs() > max || t.y_position.unsigned_abs() > max {
            return Some(CrashCause::BoundaryExceeded);
        }
        None
    }

    fn ensure_active(&self) -> Result<(), SessionTerminated> {
        match self.state {
            FlightState::Active => Ok(()),
            FlightState::Crashed(cause) => Err(SessionTerminated {
                cause,
                telemetry: self.final_telemetry.clone().unwrap_or_default(),
            }),
        }
    }

    fn step(&self, current: &Telemetry, command: &Command, reading: &EnvironmentReading) -> Telemetry {
        let mut next = current.clone();

        let drain = self.config.drain.drain(
            command,
            current.altitude,
            reading.dust_level,
            self.config.environment.max_reading,
        );
        next.battery = (current.battery - drain).clamp(0.0, limits::BATTERY_FULL);

        let displacement = i64::from(command.speed) * command.movement.sign();
        next.x_position = current.x_position.saturating_add(displacement);
        next.total_distance = current.total_distance + displacement.unsigned_abs() as f64;

        next.altitude = current.altitude.saturating_add(command.altitude_delta);

        next.gyroscope = gyro_drift(&current.gyroscope, next.altitude, reading, self.config.environment.max_reading);
        next.wind_speed = reading.wind_speed;
        next.dust_level = reading.dust_level;
        next.sensor_status = reading.sensor_status.worst(gyro_status(next.gyro_magnitude()));

        next.iterations = current.iterations + 1;
        next
    }

    fn settle(&mut self, next: Telemetry) -> TickOutcome {
        match self.check_crash(&next) {
            Some(cause) => self.crash(next, cause),
            None => TickOutcome::Success(next),
        }
    }

    fn crash(&mut self, telemetry: Telemetry, cause: CrashCause) -> TickOutcome {
        debug_assert!(is_valid_transition(self.state, FlightState::Crashed(cause)));
        warn!(
            cause = %cause,
            iterations = telemetry.iterations,
            battery = telemetry.battery,
            altitude = telemetry.altitude,
            x = telemetry.x_position,
            "drone crashed"
        );
        self.state = FlightState::Crashed(cause);
        self.final_telemetry = Some(telemetry.clone());
        TickOutcome::Crashed { telemetry, cause }
    }
}

/// Next gyroscope drift
///
/// The previous drift decays by `GYRO_DAMPING`; each axis then receives a
/// turbulence kick scaled by wind and by altitude (full effect at
/// `GYRO_CEILING_ALTITUDE`, a quarter of it on the ground). Sandstorm gusts
/// add a pitch disturbance on axis 1.
fn gyro_drift(previous: &[f64; 3], altitude: i64, reading: &EnvironmentReading, max_reading: u32) -> [f64; 3] {
    let wind = f64::from(reading.wind_speed.min(max_reading)) / f64::from(max_reading.max(1));
    let height = altitude.clamp(0, limits::GYRO_CEILING_ALTITUDE) as f64 / limits::GYRO_CEILING_ALTITUDE as f64;
    let kick = limits::GYRO_MAX_KICK * wind * (0.25 + 0.75 * height);

    let mut next = [0.0; 3];
    for (axis, value) in next.iter_mut().enumerate() {
        *value = previous[axis] * limits::GYRO_DAMPING + reading.turbulence[axis] * kick;
    }
    next[1] += f64::from(reading.gust) * limits::GYRO_GUST_PITCH * wind;

    next.map(|v| v.clamp(-limits::GYRO_LIMIT, limits::GYRO_LIMIT))
}

fn gyro_status(magnitude: f64) -> SensorStatus {
    if magnitude > limits::GYRO_RED {
        SensorStatus::Red
    } else if magnitude > limits::GYRO_YELLOW {
        SensorStatus::Yellow
    } else {
        SensorStatus::Green
    }
}
