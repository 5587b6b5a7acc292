//! Command validation
//!
//! Raw frames are checked field by field before anything touches flight
//! state. A rejected command never mutates telemetry.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::limits;
use crate::protocol::{Command, Movement};

const FIELDS: [&str; 3] = ["speed", "altitude", "movement"];

/// Why an inbound command was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid JSON format: {0}")]
    Malformed(String),

    #[error("Command must be a JSON object")]
    NotAnObject,

    #[error("Missing required key: {0}")]
    MissingField(&'static str),

    #[error("Unknown key: {0}")]
    UnknownField(String),

    #[error("'{field}' {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ValidationError {
    /// Name of the offending field, if the error is tied to one
    pub fn field(&self) -> Option<&str> {
        match self {
            ValidationError::MissingField(field) => Some(*field),
            ValidationError::UnknownField(field) => Some(field.as_str()),
            ValidationError::InvalidField { field, .. } => Some(*field),
            ValidationError::Malformed(_) | ValidationError::NotAnObject => None,
        }
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Range limits applied to every command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLimits {
    pub max_speed: i64,
    pub max_altitude_delta: i64,
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self {
            max_speed: limits::MAX_SPEED,
            max_altitude_delta: limits::MAX_ALTITUDE_DELTA,
        }
    }
}

impl CommandLimits {
    /// Decode and validate one raw frame
    pub fn parse(&self, raw: &[u8]) -> Result<Command, ValidationError> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        self.validate(&value)
    }

    /// Validate an already-decoded JSON value
    pub fn validate(&self, value: &Value) -> Result<Command, ValidationError> {
        let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

        if let Some(unknown) = object.keys().find(|k| !FIELDS.contains(&k.as_str())) {
            return Err(ValidationError::UnknownField(unknown.clone()));
        }

        let speed = integer_field(object, "speed")?;
        // Commands carry speed as a u8, so larger limits are capped there
        let max_speed = self.max_speed.min(i64::from(u8::MAX));
        let speed = u8::try_from(speed)
            .ok()
            .filter(|s| i64::from(*s) <= max_speed)
            .ok_or_else(|| {
                ValidationError::invalid(
                    "speed",
                    format!("must be between 0 and {}, got {}", max_speed, speed),
                )
            })?;

        let altitude_delta = integer_field(object, "altitude")?;
        if altitude_delta.unsigned_abs() > self.max_altitude_delta.unsigned_abs() {
            return Err(ValidationError::invalid(
                "altitude",
                format!(
                    "must be within ±{}, got {}",
                    self.max_altitude_delta, altitude_delta
                ),
            ));
        }

        let movement = match object.get("movement") {
            None => return Err(ValidationError::MissingField("movement")),
            Some(Value::String(token)) => Movement::parse(token).ok_or_else(|| {
                ValidationError::invalid(
                    "movement",
                    format!("must be one of ['fwd', 'rev'], got '{}'", token),
                )
            })?,
            Some(other) => {
                return Err(ValidationError::invalid(
                    "movement",
                    format!("must be a string, got {}", type_name(other)),
                ))
            }
        };

        Ok(Command {
            speed,
            altitude_delta,
            movement,
        })
    }
}

fn integer_field(object: &Map<String, Value>, field: &'static str) -> Result<i64, ValidationError> {
    let value = object.get(field).ok_or(ValidationError::MissingField(field))?;
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| {
            if n.is_u64() {
                ValidationError::invalid(field, "is out of range")
            } else {
                ValidationError::invalid(field, "must be an integer, got float")
            }
        }),
        other => Err(ValidationError::invalid(
            field,
            format!("must be an integer, got {}", type_name(other)),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(value: Value) -> Result<Command, ValidationError> {
        CommandLimits::default().validate(&value)
    }

    #[test]
    fn test_valid_command() {
        let cmd = check(json!({"speed": 5, "altitude": 1, "movement": "fwd"})).unwrap();
        assert_eq!(cmd, Command::new(5, 1, Movement::Forward));
    }

    #[test]
    fn test_movement_is_canonicalized() {
        let cmd = check(json!({"speed": 0, "altitude": 0, "movement": "REVERSE"})).unwrap();
        assert_eq!(cmd.movement, Movement::Reverse);
        let encoded = serde_json::to_value(cmd).unwrap();
        assert_eq!(encoded["movement"], "rev");
        assert_eq!(encoded["altitude"], 0);
    }

    #[test]
    fn test_speed_out_of_range() {
        let err = check(json!({"speed": 7, "altitude": 0, "movement": "fwd"})).unwrap_err();
        assert_eq!(err.field(), Some("speed"));
        assert_eq!(err.to_string(), "'speed' must be between 0 and 5, got 7");

        let err = check(json!({"speed": -1, "altitude": 0, "movement": "fwd"})).unwrap_err();
        assert_eq!(err.field(), Some("speed"));
    }

    #[test]
    fn test_type_errors_name_the_field() {
        let err = check(json!({"speed": "fast", "altitude": 0, "movement": "fwd"})).unwrap_err();
        assert_eq!(err.to_string(), "'speed' must be an integer, got str");

        let err = check(json!({"speed": 1, "altitude": 1.5, "movement": "fwd"})).unwrap_err();
        assert_eq!(err.to_string(), "'altitude' must be an integer, got float");

        let err = check(json!({"speed": 1, "altitude": 1, "movement": 3})).unwrap_err();
        assert_eq!(err.field(), Some("movement"));
    }

    #[test]
    fn test_bad_movement_token() {
        let err = check(json!({"speed": 5, "altitude": 1, "movement": "up"})).unwrap_err();
        assert_eq!(err.to_string(), "'movement' must be one of ['fwd', 'rev'], got 'up'");
    }

    #[test]
    fn test_altitude_jump_rejected() {
        let err = check(json!({"speed": 1, "altitude": -1001, "movement": "fwd"})).unwrap_err();
        assert_eq!(err.field(), Some("altitude"));
        assert!(check(json!({"speed": 1, "altitude": -1000, "movement": "fwd"})).is_ok());
    }

    #[test]
    fn test_missing_and_unknown_fields() {
        assert_eq!(check(json!({})).unwrap_err(), ValidationError::MissingField("speed"));
        assert_eq!(
            check(json!({"speed": 1, "altitude": 0})).unwrap_err(),
            ValidationError::MissingField("movement")
        );
        let err = check(json!({"speed": 1, "altitude": 0, "movement": "fwd", "boost": true})).unwrap_err();
        assert_eq!(err.field(), Some("boost"));
    }

    #[test]
    fn test_non_object_and_malformed() {
        assert_eq!(check(json!([1, 2])).unwrap_err(), ValidationError::NotAnObject);
        let err = CommandLimits::default().parse(b"{not json").unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
        assert_eq!(err.field(), None);
    }

    #[test]
    fn test_custom_limits() {
        let limits = CommandLimits {
            max_speed: 2,
            max_altitude_delta: 10,
        };
        assert!(limits.validate(&json!({"speed": 3, "altitude": 0, "movement": "fwd"})).is_err());
        assert!(limits.validate(&json!({"speed": 2, "altitude": 11, "movement": "fwd"})).is_err());
        assert!(limits.parse(br#"{"speed": 2, "altitude": 10, "movement": "rev"}"#).is_ok());
    }

    #[test]
    fn test_speed_beyond_command_width_is_rejected() {
        let limits = CommandLimits {
            max_speed: 1000,
            max_altitude_delta: 10,
        };
        let cmd = limits.validate(&json!({"speed": 255, "altitude": 0, "movement": "fwd"})).unwrap();
        assert_eq!(cmd.speed, 255);

        let err = limits.validate(&json!({"speed": 300, "altitude": 0, "movement": "fwd"})).unwrap_err();
        assert_eq!(err.field(), Some("speed"));
        assert_eq!(err.to_string(), "'speed' must be between 0 and 255, got 300");
    }
}
