//! Pilot configuration

use crate::pilot::FlightPlan;
use crate::transport::RetryPolicy;
use anyhow::{Context, Result};
use std::time::Duration;

/// Configuration for the pilot client
#[derive(Debug, Clone)]
pub struct PilotConfig {
    /// Simulator server address
    pub server_addr: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// How long to wait for each response
    pub response_timeout: Duration,
    /// Stop after this many commands even if still flying
    pub max_ticks: u64,
    pub retry: RetryPolicy,
    pub plan: FlightPlan,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8765".into(),
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(10),
            max_ticks: 500,
            retry: RetryPolicy::default(),
            plan: FlightPlan::default(),
        }
    }
}

impl PilotConfig {
    /// Defaults overridden by `DRONESIM_SERVER` and `DRONESIM_MAX_TICKS`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("DRONESIM_SERVER") {
            config.server_addr = addr;
        }
        if let Ok(raw) = std::env::var("DRONESIM_MAX_TICKS") {
            config.max_ticks = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid value for DRONESIM_MAX_TICKS: {:?}", raw))?;
        }
        Ok(config)
    }
}
