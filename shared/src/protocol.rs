//! Wire and record types
//!
//! Commands arrive as `{ "speed": 3, "altitude": -2, "movement": "fwd" }` and
//! every reply is a JSON object tagged by `status`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::limits;
use crate::validator::ValidationError;

/// Direction of travel along the forward axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Movement {
    #[serde(rename = "fwd")]
    Forward,
    #[serde(rename = "rev")]
    Reverse,
}

impl Movement {
    /// Parse a movement token, case-insensitive
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "fwd" | "forward" => Some(Movement::Forward),
            "rev" | "reverse" => Some(Movement::Reverse),
            _ => None,
        }
    }

    /// Canonical wire token
    pub fn as_str(&self) -> &'static str {
        match self {
            Movement::Forward => "fwd",
            Movement::Reverse => "rev",
        }
    }

    /// Sign applied to the forward-axis displacement
    pub fn sign(&self) -> i64 {
        match self {
            Movement::Forward => 1,
            Movement::Reverse => -1,
        }
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated pilot command, one per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub speed: u8,
    #[serde(rename = "altitude")]
    pub altitude_delta: i64,
    pub movement: Movement,
}

impl Command {
    pub fn new(speed: u8, altitude_delta: i64, movement: Movement) -> Self {
        Self {
            speed,
            altitude_delta,
            movement,
        }
    }
}

/// Sensor health, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorStatus {
    #[default]
    Green,
    Yellow,
    Red,
}

impl SensorStatus {
    /// Combine two degradation sources, keeping the worst
    pub fn worst(self, other: SensorStatus) -> SensorStatus {
        self.max(other)
    }
}

/// The full flight record of one drone session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub x_position: i64,
    pub y_position: i64,
    pub altitude: i64,
    pub battery: f64,
    pub gyroscope: [f64; 3],
    pub wind_speed: u32,
    pub dust_level: u32,
    pub sensor_status: SensorStatus,
    pub iterations: u64,
    pub total_distance: f64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            x_position: 0,
            y_position: 0,
            altitude: 0,
            battery: limits::BATTERY_FULL,
            gyroscope: [0.0; 3],
            wind_speed: 0,
            dust_level: 0,
            sensor_status: SensorStatus::Green,
            iterations: 0,
            total_distance: 0.0,
        }
    }
}

impl Telemetry {
    /// Euclidean magnitude of the gyroscope drift vector
    pub fn gyro_magnitude(&self) -> f64 {
        self.gyroscope.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

/// The `telemetry` object of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub x_position: i64,
    pub y_position: i64,
    pub altitude: i64,
    pub battery: f64,
    pub gyroscope: [f64; 3],
    pub wind_speed: u32,
    pub dust_level: u32,
    pub sensor_status: SensorStatus,
}

impl From<&Telemetry> for TelemetryReport {
    fn from(t: &Telemetry) -> Self {
        Self {
            x_position: t.x_position,
            y_position: t.y_position,
            altitude: t.altitude,
            battery: t.battery,
            gyroscope: t.gyroscope,
            wind_speed: t.wind_speed,
            dust_level: t.dust_level,
            sensor_status: t.sensor_status,
        }
    }
}

/// The `metrics` object of a response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub iterations: u64,
    pub total_distance: f64,
}

impl From<&Telemetry> for Metrics {
    fn from(t: &Telemetry) -> Self {
        Self {
            iterations: t.iterations,
            total_distance: t.total_distance,
        }
    }
}

/// Why a drone crashed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrashCause {
    BatteryDepleted,
    AltitudeNegative,
    BoundaryExceeded,
    OperatorTimeout,
}

impl CrashCause {
    /// Human-readable crash message sent alongside the cause
    pub fn message(&self) -> &'static str {
        match self {
            CrashCause::BatteryDepleted => "Drone has crashed due to battery depletion.",
            CrashCause::AltitudeNegative => "Drone has crashed due to negative altitude.",
            CrashCause::BoundaryExceeded => "Drone has crashed due to exceeding max position.",
            CrashCause::OperatorTimeout => "Drone has crashed due to operator inactivity.",
        }
    }
}

impl fmt::Display for CrashCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            CrashCause::BatteryDepleted => "BATTERY_DEPLETED",
            CrashCause::AltitudeNegative => "ALTITUDE_NEGATIVE",
            CrashCause::BoundaryExceeded => "BOUNDARY_EXCEEDED",
            CrashCause::OperatorTimeout => "OPERATOR_TIMEOUT",
        };
        f.write_str(token)
    }
}

/// Category of an `error` response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The command was rejected; the session is still active
    Validation,
    /// The session hit an internal fault and is being closed
    Internal,
}

/// Server to client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Greeting sent once when a session opens
    Connected { session_id: String, message: String },
    /// Tick applied
    Success {
        telemetry: TelemetryReport,
        metrics: Metrics,
    },
    /// Terminal crash; the connection closes after this message
    Crashed {
        telemetry: TelemetryReport,
        metrics: Metrics,
        crash_cause: CrashCause,
        message: String,
    },
    /// Rejected command or session fault
    Error {
        kind: ErrorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        message: String,
    },
}

impl Response {
    pub fn connected(session_id: impl Into<String>) -> Self {
        Response::Connected {
            session_id: session_id.into(),
            message: "Welcome to the Drone Simulator! Send commands to control your drone.".into(),
        }
    }

    pub fn success(telemetry: &Telemetry) -> Self {
        Response::Success {
            telemetry: telemetry.into(),
            metrics: telemetry.into(),
        }
    }

    pub fn crashed(telemetry: &Telemetry, cause: CrashCause) -> Self {
        Response::Crashed {
            telemetry: telemetry.into(),
            metrics: telemetry.into(),
            crash_cause: cause,
            message: cause.message().into(),
        }
    }

    pub fn validation(err: &ValidationError) -> Self {
        Response::Error {
            kind: ErrorKind::Validation,
            field: err.field().map(str::to_string),
            message: err.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Response::Error {
            kind: ErrorKind::Internal,
            field: None,
            message: message.into(),
        }
    }
}
