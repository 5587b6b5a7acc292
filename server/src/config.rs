//! Server configuration
//!
//! Built from defaults, then overridden by `DRONESIM_*` environment
//! variables. A malformed override is a startup error.

use anyhow::{Context, Result};
use dronesim_shared::FlightConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the session server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address pilots connect to
    pub bind_addr: String,
    /// Address of the read-only admin listener
    pub admin_addr: String,
    /// Idle window before a session is crashed with OPERATOR_TIMEOUT
    pub idle_timeout: Duration,
    /// How long terminated sessions stay visible in the admin registry
    pub registry_retention: Duration,
    /// How often the registry is swept for expired sessions
    pub sweep_interval: Duration,
    /// Directory for per-session telemetry files (None = in-memory)
    pub telemetry_dir: Option<PathBuf>,
    /// Fixed environment seed for reproducible runs (None = per-session entropy)
    pub seed: Option<u64>,
    pub flight: FlightConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8765".into(),
            admin_addr: "127.0.0.1:8766".into(),
            idle_timeout: Duration::from_secs(120),
            registry_retention: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
            telemetry_dir: None,
            seed: None,
            flight: FlightConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden from the process environment
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(addr) = lookup("DRONESIM_BIND") {
            self.bind_addr = addr;
        }
        if let Some(addr) = lookup("DRONESIM_ADMIN_BIND") {
            self.admin_addr = addr;
        }
        if let Some(secs) = parse::<u64>(&lookup, "DRONESIM_IDLE_TIMEOUT_SECS")? {
            anyhow::ensure!(secs > 0, "DRONESIM_IDLE_TIMEOUT_SECS must be positive");
            self.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, "DRONESIM_RETENTION_SECS")? {
            self.registry_retention = Duration::from_secs(secs);
        }
        if let Some(dir) = lookup("DRONESIM_TELEMETRY_DIR") {
            self.telemetry_dir = Some(PathBuf::from(dir));
        }
        if let Some(seed) = parse::<u64>(&lookup, "DRONESIM_SEED")? {
            self.seed = Some(seed);
        }
        if let Some(max) = parse::<i64>(&lookup, "DRONESIM_MAX_POSITION")? {
            anyhow::ensure!(max > 0, "DRONESIM_MAX_POSITION must be positive");
            self.flight.max_position = max;
        }
        Ok(self)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {}: {:?}", key, raw))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.flight.max_position, 100_000);
        assert!(config.telemetry_dir.is_none());
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::default()
            .with_overrides(lookup(&[
                ("DRONESIM_BIND", "127.0.0.1:9000"),
                ("DRONESIM_IDLE_TIMEOUT_SECS", "5"),
                ("DRONESIM_SEED", " 42 "),
                ("DRONESIM_TELEMETRY_DIR", "/tmp/drones"),
                ("DRONESIM_MAX_POSITION", "500"),
            ]))
            .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.telemetry_dir, Some(PathBuf::from("/tmp/drones")));
        assert_eq!(config.flight.max_position, 500);
    }

    #[test]
    fn test_malformed_override_is_an_error() {
        let err = ServerConfig::default()
            .with_overrides(lookup(&[("DRONESIM_SEED", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("DRONESIM_SEED"));

        assert!(ServerConfig::default()
            .with_overrides(lookup(&[("DRONESIM_IDLE_TIMEOUT_SECS", "0")]))
            .is_err());
    }
}
