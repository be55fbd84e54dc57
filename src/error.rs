//! Error types for the chat server
//!
//! Defines application-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (sent back to the offending client as an `ERROR:` line).
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server no longer accepts sessions
    #[error("Server is shutting down")]
    ShuttingDown,

    /// Handshake line was not `!username <name>`
    #[error("Please choose a username first: !username <name>")]
    UsernameRequired,

    /// Candidate username failed validation
    #[error("Invalid username: {0}")]
    InvalidUsername(&'static str),

    /// Username already claimed by another session
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),

    /// Rename to the name the session already holds
    #[error("You are already known as {0}")]
    SameUsername(String),

    /// Command word not recognized
    #[error("Unknown command '{0}'. Type !commands for a list of commands")]
    UnknownCommand(String),

    /// Missing or malformed command arguments
    #[error("Usage: {0}")]
    Usage(&'static str),

    /// Moderator-only command invoked by a regular user
    #[error("You must be a moderator to use this command")]
    NotModerator,

    /// No active session holds the given username
    #[error("User '{0}' not found")]
    UserNotFound(String),

    /// A moderator tried to kick their own session
    #[error("You cannot kick yourself")]
    CannotKickSelf,
}

/// Message send errors
///
/// Occurs when attempting to queue lines for a session whose writer has gone away.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}
