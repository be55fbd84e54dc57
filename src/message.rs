//! Line protocol definitions
//!
//! Everything the server writes to a client is a single text line. This
//! module holds the outbound queue item and the formatting of every
//! server-originated line so the wire format lives in one place.

use crate::error::AppError;

/// Prefix of the line that tells a client it has been kicked.
///
/// Chat lines always start with `[`, so no user can forge this prefix.
pub const KICK_NOTICE_PREFIX: &str = "%%KICKED%%";

/// Handshake command word (without the sigil)
pub const USERNAME_COMMAND: &str = "username";

/// Command sigil
pub const COMMAND_SIGIL: char = '!';

/// Item queued on a session's outbound channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A line to write (terminator added by the writer)
    Line(String),
    /// Flush pending lines and close the connection
    Close,
}

/// Convert AppError to an `ERROR:` reply line
impl From<AppError> for Outbound {
    fn from(err: AppError) -> Self {
        Outbound::Line(error_line(&err))
    }
}

/// Why a session ended, rendered into the departure announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepartureReason {
    /// Connection closed, read failed, or `!quit`
    Left,
    /// Removed by a moderator or the operator
    Kicked { by: String, reason: String },
    /// Server-wide shutdown sweep
    Shutdown,
}

impl std::fmt::Display for DepartureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepartureReason::Left => write!(f, "left the chat"),
            DepartureReason::Kicked { by, reason } => {
                write!(f, "was kicked by {} ({})", by, reason)
            }
            DepartureReason::Shutdown => write!(f, "disconnected (server is shutting down)"),
        }
    }
}

pub fn welcome_line(username: &str) -> String {
    format!("OK: Welcome {}!", username)
}

pub fn error_line(err: &AppError) -> String {
    format!("ERROR: {}", err)
}

pub fn chat_line(username: &str, content: &str) -> String {
    format!("[{}]: {}", username, content)
}

/// Wrap announcement text as `* text *`
pub fn announcement(text: &str) -> String {
    format!("* {} *", text)
}

pub fn whisper_from_line(sender: &str, content: &str) -> String {
    format!("[whisper from {}]: {}", sender, content)
}

pub fn whisper_to_line(target: &str, content: &str) -> String {
    format!("[whisper to {}]: {}", target, content)
}

pub fn kick_notice_line(by: &str, reason: &str) -> String {
    format!("{} You were kicked by {} ({})", KICK_NOTICE_PREFIX, by, reason)
}

/// Check whether a received line is the kick notice
pub fn is_kick_notice(line: &str) -> bool {
    line.starts_with(KICK_NOTICE_PREFIX)
}

/// Render a duration in seconds as `<h>h <m>m <s>s`
pub fn format_uptime(secs: u64) -> String {
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}
