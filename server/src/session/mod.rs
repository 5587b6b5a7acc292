//! Session management for connected drones
//!
//! This module handles:
//! - Accepting pilot connections, one task per session
//! - The receive-validate-apply-respond loop
//! - Idle timeout and crash termination
//! - The admin registry of session snapshots

mod connection;
mod flight;
mod registry;
mod server;

pub use registry::{AdminRegistry, AdminView, SessionInfo, SessionStatus};
pub use server::SessionServer;
