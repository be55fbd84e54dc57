//! Command parsing
//!
//! A command line is the sigil followed by up to three whitespace-delimited
//! tokens: the command word, a first argument, and a trailing argument that
//! may itself contain spaces.

use crate::error::AppError;
use crate::message::{COMMAND_SIGIL, USERNAME_COMMAND};

/// Default kick reason when none is supplied
pub const DEFAULT_KICK_REASON: &str = "no reason given";

/// Static text for `!about`
pub const ABOUT_TEXT: &str =
    "chat_relay: a line-based multi-user chat server. Type !commands for help.";

/// A recognized client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List available commands
    Commands,
    /// List claimed usernames
    Who,
    /// Static server information
    About,
    /// Private message to one user (`!whisper` / `!w`)
    Whisper { target: String, message: String },
    /// Change own username
    Rename { username: String },
    /// Liveness check
    Ping,
    /// User/moderator counts and uptime
    Stats,
    /// Disconnect a user (moderator only)
    Kick {
        target: String,
        reason: Option<String>,
    },
    /// Recent history (moderator only)
    History,
    /// Leave the chat
    Quit,
}

/// Split `!word arg1 rest...` into its tokens
///
/// Returns None if the line does not start with the sigil.
pub fn tokenize(line: &str) -> Option<(&str, Option<&str>, Option<&str>)> {
    let body = line.strip_prefix(COMMAND_SIGIL)?;

    let (word, rest) = split_first(body);
    let (arg1, rest) = split_first(rest);
    let arg2 = rest.trim();

    Some((
        word,
        (!arg1.is_empty()).then_some(arg1),
        (!arg2.is_empty()).then_some(arg2),
    ))
}

fn split_first(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    }
}

/// Whether a line is a command line (sigil in the first column)
pub fn is_command(line: &str) -> bool {
    line.starts_with(COMMAND_SIGIL)
}

/// Extract the requested name from a `!username <name>` handshake line
///
/// Everything after the command word is returned so that validation can
/// reject interior whitespace with a descriptive error.
pub fn parse_username_request(line: &str) -> Result<&str, AppError> {
    let body = line
        .strip_prefix(COMMAND_SIGIL)
        .ok_or(AppError::UsernameRequired)?;
    let (word, rest) = split_first(body);

    if !word.eq_ignore_ascii_case(USERNAME_COMMAND) {
        return Err(AppError::UsernameRequired);
    }

    let name = rest.trim();
    if name.is_empty() {
        return Err(AppError::Usage("!username <name>"));
    }
    Ok(name)
}

impl Command {
    /// Parse a command line
    pub fn parse(line: &str) -> Result<Command, AppError> {
        let Some((word, arg1, arg2)) = tokenize(line) else {
            return Err(AppError::UnknownCommand(line.trim().to_string()));
        };

        match word.to_ascii_lowercase().as_str() {
            "commands" | "help" => Ok(Command::Commands),
            "who" => Ok(Command::Who),
            "about" => Ok(Command::About),
            "ping" => Ok(Command::Ping),
            "stats" => Ok(Command::Stats),
            "history" => Ok(Command::History),
            "quit" => Ok(Command::Quit),
            "whisper" | "w" => match (arg1, arg2) {
                (Some(target), Some(message)) => Ok(Command::Whisper {
                    target: target.to_string(),
                    message: message.to_string(),
                }),
                _ => Err(AppError::Usage("!whisper <user> <message>")),
            },
            "user" => match (arg1, arg2) {
                (Some(username), None) => Ok(Command::Rename {
                    username: username.to_string(),
                }),
                _ => Err(AppError::Usage("!user <newname>")),
            },
            "kick" => match arg1 {
                Some(target) => Ok(Command::Kick {
                    target: target.to_string(),
                    reason: arg2.map(str::to_string),
                }),
                None => Err(AppError::Usage("!kick <user> [reason]")),
            },
            _ => Err(AppError::UnknownCommand(word.to_string())),
        }
    }

    /// Whether the command needs moderator status
    pub fn requires_moderator(&self) -> bool {
        matches!(self, Command::Kick { .. } | Command::History)
    }
}

/// Lines listing the commands available to a session
pub fn command_list(is_moderator: bool) -> Vec<String> {
    let mut lines = vec![
        "Commands: !commands, !who, !about, !whisper <user> <message> (alias !w), \
         !user <newname>, !ping, !stats, !quit"
            .to_string(),
    ];
    if is_moderator {
        lines.push("Moderator commands: !kick <user> [reason], !history".to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("!who"), Some(("who", None, None)));
        assert_eq!(
            tokenize("!w  bob   hello there  "),
            Some(("w", Some("bob"), Some("hello there")))
        );
        assert_eq!(tokenize("hello"), None);
        assert_eq!(tokenize("  !who"), None);
    }

    #[test]
    fn test_sigil_must_lead_the_line() {
        assert!(is_command("!who"));
        assert!(is_command("!"));
        assert!(!is_command("   !who"));
        assert!(!is_command("\t!kick bob"));
        assert!(!is_command("hello !who"));
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("!who").unwrap(), Command::Who);
        assert_eq!(Command::parse("!PING").unwrap(), Command::Ping);
        assert_eq!(Command::parse("!commands").unwrap(), Command::Commands);
        assert_eq!(Command::parse("!quit").unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_whisper() {
        assert_eq!(
            Command::parse("!whisper bob hi there").unwrap(),
            Command::Whisper {
                target: "bob".to_string(),
                message: "hi there".to_string(),
            }
        );
        assert!(Command::parse("!w bob").is_err());
        assert!(matches!(
            Command::parse("!whisper").unwrap_err(),
            AppError::Usage(_)
        ));
    }

    #[test]
    fn test_parse_kick() {
        assert_eq!(
            Command::parse("!kick bob being rude").unwrap(),
            Command::Kick {
                target: "bob".to_string(),
                reason: Some("being rude".to_string()),
            }
        );
        assert_eq!(
            Command::parse("!kick bob").unwrap(),
            Command::Kick {
                target: "bob".to_string(),
                reason: None,
            }
        );
        assert!(Command::parse("!kick bob").unwrap().requires_moderator());
    }

    #[test]
    fn test_parse_rename() {
        assert_eq!(
            Command::parse("!user alice2").unwrap(),
            Command::Rename {
                username: "alice2".to_string(),
            }
        );
        assert!(Command::parse("!user").is_err());
        assert!(Command::parse("!user two words").is_err());
    }

    #[test]
    fn test_unknown_command() {
        let err = Command::parse("!dance now").unwrap_err();
        assert!(matches!(err, AppError::UnknownCommand(ref w) if w == "dance"));
    }

    #[test]
    fn test_parse_username_request() {
        assert_eq!(parse_username_request("!username alice").unwrap(), "alice");
        assert_eq!(parse_username_request("!username   bob  ").unwrap(), "bob");
        assert!(matches!(
            parse_username_request("  !username bob").unwrap_err(),
            AppError::UsernameRequired
        ));
        assert_eq!(parse_username_request("!username al ice").unwrap(), "al ice");
        assert!(matches!(
            parse_username_request("hello").unwrap_err(),
            AppError::UsernameRequired
        ));
        assert!(matches!(
            parse_username_request("!who").unwrap_err(),
            AppError::UsernameRequired
        ));
        assert!(matches!(
            parse_username_request("!username").unwrap_err(),
            AppError::Usage(_)
        ));
    }

    #[test]
    fn test_command_list_moderator_section() {
        assert_eq!(command_list(false).len(), 1);
        let lines = command_list(true);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("!kick"));
    }
}
