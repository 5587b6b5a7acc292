//! Admin monitoring surface
//!
//! This module handles:
//! - Serving read-only registry snapshots to monitoring clients
//! - Pruning terminated sessions after the retention window

mod listener;
mod sweeper;

pub use listener::AdminListener;
pub use sweeper::RetentionSweeper;
