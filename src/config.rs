//! Runtime configuration for the chat server

use std::time::Duration;

use crate::history::HISTORY_CAPACITY;

/// Number of entries returned by the `!history` command
pub const HISTORY_WINDOW: usize = 10;

/// How long shutdown waits for connection tasks to flush and exit
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Tunables shared by every session
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum records kept in the in-memory history ring
    pub history_capacity: usize,
    /// Records shown by `!history`
    pub history_window: usize,
    /// Drain period after the shutdown sweep
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            history_capacity: HISTORY_CAPACITY,
            history_window: HISTORY_WINDOW,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}
