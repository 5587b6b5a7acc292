//! Drone Simulator Shared Types
//!
//! This crate provides the protocol types, command validation, environment
//! generation, flight state machine, telemetry persistence and line codec
//! shared by the simulator server and the pilot client.

pub mod codec;
pub mod environment;
pub mod protocol;
pub mod state_machine;
pub mod store;
pub mod validator;

use std::time::{SystemTime, UNIX_EPOCH};

pub use environment::{EnvironmentConfig, EnvironmentGenerator, EnvironmentReading};
pub use protocol::*;
pub use state_machine::{DroneStateMachine, FlightConfig, FlightState, SessionTerminated, TickOutcome};
pub use store::{JsonFileBackend, MemoryBackend, StoreError, TelemetryBackend, TelemetryStore};
pub use validator::{CommandLimits, ValidationError};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Simulation limits and default coefficients
pub mod limits {
    /// Maximum absolute x/y coordinate before the drone is out of bounds
    pub const MAX_POSITION: i64 = 100_000;

    /// Highest accepted command speed
    pub const MAX_SPEED: i64 = 5;

    /// Largest accepted single-tick altitude change (either direction)
    pub const MAX_ALTITUDE_DELTA: i64 = 1000;

    /// Full battery charge
    pub const BATTERY_FULL: f64 = 100.0;

    /// Drain applied on every tick regardless of the command
    pub const DRAIN_BASE: f64 = 0.5;

    /// Additional drain per unit of speed
    pub const DRAIN_PER_SPEED: f64 = 0.5;

    /// Additional drain per metre of altitude change
    pub const DRAIN_PER_CLIMB: f64 = 0.005;

    /// Drain multiplier at ground level
    pub const DRAIN_GROUND_FACTOR: f64 = 1.5;

    /// Drain multiplier at or above `DRAIN_CEILING_ALTITUDE`
    pub const DRAIN_CEILING_FACTOR: f64 = 0.75;

    /// Altitude at which the thin-air drain factor bottoms out
    pub const DRAIN_CEILING_ALTITUDE: i64 = 100;

    /// Extra drain fraction at maximum dust (0.5 = +50%)
    pub const DRAIN_DUST_PENALTY: f64 = 0.5;

    /// Upper bound for wind speed and dust level readings
    pub const ENV_MAX_READING: u32 = 100;

    /// Probability that a tick falls inside a sandstorm
    pub const STORM_PROBABILITY: f64 = 0.4;

    /// Wind and dust boost applied during a sandstorm
    pub const STORM_BOOST: u32 = 60;

    /// Dust level above which sensors degrade to YELLOW
    pub const DUST_YELLOW: u32 = 60;

    /// Dust level above which sensors degrade to RED
    pub const DUST_RED: u32 = 90;

    /// Fraction of the previous gyroscope drift kept each tick
    pub const GYRO_DAMPING: f64 = 0.5;

    /// Largest per-axis turbulence kick at full wind and ceiling altitude
    pub const GYRO_MAX_KICK: f64 = 1.0;

    /// Altitude at which wind tilt reaches its full effect
    pub const GYRO_CEILING_ALTITUDE: i64 = 200;

    /// Pitch disturbance from a sandstorm gust at full wind
    pub const GYRO_GUST_PITCH: f64 = 1.0;

    /// Absolute per-axis limit for reported gyroscope drift
    pub const GYRO_LIMIT: f64 = 3.0;

    /// Gyroscope magnitude above which sensors degrade to YELLOW
    pub const GYRO_YELLOW: f64 = 1.0;

    /// Gyroscope magnitude above which sensors degrade to RED
    pub const GYRO_RED: f64 = 2.0;
}
