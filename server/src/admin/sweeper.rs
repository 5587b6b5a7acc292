//! Retention sweeper for terminated sessions

use crate::session::AdminRegistry;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, info};

/// Periodically removes crashed and faulted sessions from the registry
pub struct RetentionSweeper {
    registry: Arc<AdminRegistry>,
    check_interval: Duration,
    retention: Duration,
}

impl RetentionSweeper {
    /// Create a new sweeper
    pub fn new(registry: Arc<AdminRegistry>, check_interval: Duration, retention: Duration) -> Self {
        Self {
            registry,
            check_interval,
            retention,
        }
    }

    /// Run one sweep and return the pruned session IDs
    pub async fn sweep(&self) -> Vec<String> {
        let pruned = self.registry.prune_terminated(self.retention).await;
        for id in &pruned {
            debug!(session = %id, "pruned terminated session");
        }
        pruned
    }

    /// Start the sweep loop
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);

        loop {
            ticker.tick().await;

            let pruned = self.sweep().await;
            if !pruned.is_empty() {
                let active = self.registry.view().active_count().await;
                info!(pruned = pruned.len(), active, "registry sweep");
            }
        }
    }
}
