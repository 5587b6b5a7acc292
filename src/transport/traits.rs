//! Transport trait abstraction for pluggable network backends

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

/// Factory for creating transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// The stream type this connector produces
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Attempt to connect, returning a stream on success
    async fn connect(&self) -> Result<Self::Stream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Reconnection backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total connection attempts before giving up
    pub attempts: u32,
    /// Reconnection delay (initial)
    pub initial_delay: Duration,
    /// Maximum reconnection delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Connect with exponential backoff between failed attempts
pub async fn connect_with_retry<C: TransportConnector>(connector: &C, policy: &RetryPolicy) -> Result<C::Stream> {
    let mut delay = policy.initial_delay;
    let mut last_error = None;

    for attempt in 1..=policy.attempts.max(1) {
        match connector.connect().await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                warn!(
                    "{} connect attempt {}/{} failed: {}",
                    connector.name(),
                    attempt,
                    policy.attempts,
                    e
                );
                last_error = Some(e);
            }
        }

        if attempt < policy.attempts {
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, policy.max_delay);
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("{} never attempted a connection", connector.name())))
}
