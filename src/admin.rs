//! Operator control loop
//!
//! Reads one command per line from a control channel (stdin in the binary)
//! and executes them serially. Output is plain human-readable text.

use std::io::{self, Read};
use std::sync::Arc;
use std::thread;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::framer::LineReader;
use crate::server::{ChatServer, SERVER_NAME};

/// Usage hint printed for unknown input
pub const ADMIN_USAGE: &str =
    "Admin commands: mods | mod <user> | kick <user> [reason] | who | say <message> | shutdown";

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// List moderators
    Mods,
    /// Toggle a user's moderator flag
    Mod(String),
    /// Kick a user
    Kick {
        target: String,
        reason: Option<String>,
    },
    /// List claimed usernames
    Who,
    /// Announce a message to everyone
    Say(String),
    /// Terminate every session and stop the server
    Shutdown,
    /// Print usage
    Help,
}

impl AdminCommand {
    /// Parse a control line; None for blank lines
    pub fn parse(line: &str) -> Option<Result<AdminCommand, AppError>> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let (arg, tail) = match rest.split_once(char::is_whitespace) {
            Some((arg, tail)) => (arg, Some(tail.trim()).filter(|t| !t.is_empty())),
            None => (rest, None),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "mods" => Ok(AdminCommand::Mods),
            "who" => Ok(AdminCommand::Who),
            "shutdown" => Ok(AdminCommand::Shutdown),
            "help" => Ok(AdminCommand::Help),
            "mod" if !arg.is_empty() && tail.is_none() => Ok(AdminCommand::Mod(arg.to_string())),
            "kick" if !arg.is_empty() => Ok(AdminCommand::Kick {
                target: arg.to_string(),
                reason: tail.map(str::to_string),
            }),
            "say" if !rest.is_empty() => Ok(AdminCommand::Say(rest.to_string())),
            "mod" => Err(AppError::Usage("mod <user>")),
            "kick" => Err(AppError::Usage("kick <user> [reason]")),
            "say" => Err(AppError::Usage("say <message>")),
            _ => Err(AppError::UnknownCommand(word.to_string())),
        };
        Some(command)
    }
}

/// Feed a blocking reader into the runtime through an in-memory pipe
///
/// The reader runs on its own thread, so a read that never returns (an idle
/// terminal) parks only that thread and cannot hold up runtime shutdown.
/// The thread ends at end of input or once the pipe's reading side is gone.
/// Must be called from within a Tokio runtime.
pub fn spawn_console_reader<R>(mut input: R) -> io::Result<DuplexStream>
where
    R: Read + Send + 'static,
{
    let (pipe, mut writer) = tokio::io::duplex(1024);
    let handle = Handle::current();

    thread::Builder::new()
        .name("admin-console".to_string())
        .spawn(move || {
            let mut buf = [0u8; 1024];
            loop {
                let n = match input.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                };
                if handle.block_on(writer.write_all(&buf[..n])).is_err() {
                    break;
                }
            }
            debug!("Console reader thread finished");
        })?;

    Ok(pipe)
}

/// Run the control loop until `shutdown`, server shutdown, or end of input
///
/// Returns true if the loop ended because the server shut down, whether by
/// this console or from elsewhere (e.g. Ctrl+C).
pub async fn run_admin_loop<R, W>(
    input: R,
    mut output: W,
    server: Arc<ChatServer>,
) -> Result<bool, AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = LineReader::new(input);
    let mut shutdown_rx = server.subscribe_shutdown();
    info!("Admin console ready");

    loop {
        if *shutdown_rx.borrow_and_update() {
            info!("Admin console closed by server shutdown");
            return Ok(true);
        }

        let line = tokio::select! {
            line = reader.next_line() => line?,
            // Value changed (or the sender is gone): re-check at the top
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    return Ok(true);
                }
                continue;
            }
        };
        let Some(line) = line else {
            break;
        };

        let Some(parsed) = AdminCommand::parse(&line) else {
            continue;
        };

        let command = match parsed {
            Ok(command) => command,
            Err(AppError::UnknownCommand(_)) => {
                write_line(&mut output, ADMIN_USAGE).await?;
                continue;
            }
            Err(err) => {
                write_line(&mut output, &err.to_string()).await?;
                continue;
            }
        };

        if command == AdminCommand::Shutdown {
            let closed = server.shutdown();
            write_line(
                &mut output,
                &format!("Server shutting down ({} sessions closed)", closed),
            )
            .await?;
            return Ok(true);
        }

        let reply = execute(&server, command);
        write_line(&mut output, &reply).await?;
    }

    warn!("Admin console input closed");
    Ok(false)
}

fn execute(server: &ChatServer, command: AdminCommand) -> String {
    match command {
        AdminCommand::Mods => {
            let mods = server.moderators();
            if mods.is_empty() {
                "Moderators: (none)".to_string()
            } else {
                format!("Moderators: {}", mods.join(", "))
            }
        }
        AdminCommand::Mod(username) => match server.toggle_moderator(&username) {
            Ok(true) => format!("{} is now a moderator", username),
            Ok(false) => format!("{} is no longer a moderator", username),
            Err(err) => err.to_string(),
        },
        AdminCommand::Kick { target, reason } => {
            match server.kick(&target, SERVER_NAME, reason.as_deref(), None) {
                Ok(name) => format!("Kicked {}", name),
                Err(err) => err.to_string(),
            }
        }
        AdminCommand::Who => {
            let users = server.who();
            if users.is_empty() {
                "Online users: (none)".to_string()
            } else {
                format!("Online users ({}): {}", users.len(), users.join(", "))
            }
        }
        AdminCommand::Say(text) => {
            server.announce(&format!("[{}]: {}", SERVER_NAME, text), None);
            "Announcement sent".to_string()
        }
        AdminCommand::Help => ADMIN_USAGE.to_string(),
        // Handled by the loop
        AdminCommand::Shutdown => String::new(),
    }
}

async fn write_line<W>(output: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::ServerConfig;
    use crate::message::Outbound;

    fn server() -> Arc<ChatServer> {
        Arc::new(ChatServer::in_memory(ServerConfig::default()))
    }

    fn join(server: &ChatServer, name: &str) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = server.connect(tx).unwrap();
        server.join(id, name).unwrap();
        rx
    }

    async fn run(server: &Arc<ChatServer>, input: &str) -> (bool, String) {
        let mut output = Vec::new();
        let shut_down = run_admin_loop(input.as_bytes(), &mut output, Arc::clone(server))
            .await
            .unwrap();
        (shut_down, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_parse() {
        assert_eq!(AdminCommand::parse("mods").unwrap().unwrap(), AdminCommand::Mods);
        assert_eq!(
            AdminCommand::parse("mod alice").unwrap().unwrap(),
            AdminCommand::Mod("alice".to_string())
        );
        assert_eq!(
            AdminCommand::parse("kick bob spamming links").unwrap().unwrap(),
            AdminCommand::Kick {
                target: "bob".to_string(),
                reason: Some("spamming links".to_string()),
            }
        );
        assert_eq!(
            AdminCommand::parse("say hello all").unwrap().unwrap(),
            AdminCommand::Say("hello all".to_string())
        );
        assert!(AdminCommand::parse("   ").is_none());
        assert!(AdminCommand::parse("mod").unwrap().is_err());
        assert!(AdminCommand::parse("launch").unwrap().is_err());
    }

    #[tokio::test]
    async fn test_mod_toggle_and_list() {
        let server = server();
        let _rx = join(&server, "alice");

        let (shut_down, output) = run(&server, "mod alice\nmods\n").await;

        assert!(!shut_down);
        assert!(output.contains("alice is now a moderator"));
        assert!(output.contains("Moderators: alice"));
        assert!(server.moderators().contains(&"alice".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_input_prints_usage() {
        let server = server();

        let (_, output) = run(&server, "frobnicate\nmods\n").await;

        assert!(output.starts_with(ADMIN_USAGE));
        assert!(output.contains("Moderators: (none)"));
    }

    #[tokio::test]
    async fn test_kick_not_found() {
        let server = server();
        let _rx = join(&server, "alice");

        let (_, output) = run(&server, "kick ghost\n").await;

        assert!(output.contains("User 'ghost' not found"));
        assert_eq!(server.who(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_kick_by_operator() {
        let server = server();
        let _alice = join(&server, "alice");
        let mut bob = join(&server, "bob");

        let (_, output) = run(&server, "kick bob flooding\n").await;

        assert!(output.contains("Kicked bob"));
        let mut saw_notice = false;
        while let Ok(item) = bob.try_recv() {
            if let Outbound::Line(line) = item {
                saw_notice |= line.contains("kicked by Server (flooding)");
            }
        }
        assert!(saw_notice);
        assert_eq!(server.who(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_external_shutdown_ends_loop_with_input_open() {
        let server = server();
        let _rx = join(&server, "alice");
        let (console, _keep_open) = tokio::io::duplex(64);

        let admin = tokio::spawn(run_admin_loop(console, tokio::io::sink(), Arc::clone(&server)));
        tokio::task::yield_now().await;
        server.shutdown();

        let shut_down = tokio::time::timeout(std::time::Duration::from_secs(2), admin)
            .await
            .expect("admin loop kept waiting for input")
            .unwrap()
            .unwrap();
        assert!(shut_down);
    }

    /// Blocks in `read` until the sender side supplies data or goes away
    struct StalledInput(std::sync::mpsc::Receiver<Vec<u8>>);

    impl Read for StalledInput {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(data) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                Err(_) => Ok(0),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_console_reader_forwards_lines() {
        let server = server();
        let _rx = join(&server, "alice");
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(b"who\nshutdown\n".to_vec()).unwrap();
        let console = spawn_console_reader(StalledInput(rx)).unwrap();

        let mut output = Vec::new();
        let shut_down = run_admin_loop(console, &mut output, Arc::clone(&server))
            .await
            .unwrap();

        assert!(shut_down);
        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("Online users (1): alice"));
        assert!(output.contains("1 sessions closed"));
        drop(tx);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_console_does_not_delay_shutdown() {
        let server = server();
        let (tx, rx) = std::sync::mpsc::channel::<Vec<u8>>();
        let console = spawn_console_reader(StalledInput(rx)).unwrap();

        let admin = tokio::spawn(run_admin_loop(console, tokio::io::sink(), Arc::clone(&server)));
        server.shutdown();

        let shut_down = tokio::time::timeout(std::time::Duration::from_secs(2), admin)
            .await
            .expect("admin loop kept waiting for input")
            .unwrap()
            .unwrap();
        assert!(shut_down);
        // The reader thread is still parked; releasing it lets it exit
        drop(tx);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let server = server();
        let _rx = join(&server, "alice");

        let (shut_down, output) = run(&server, "shutdown\nmods\n").await;

        assert!(shut_down);
        assert!(output.contains("1 sessions closed"));
        assert!(!output.contains("Moderators"));
        assert!(server.is_shutting_down());
    }
}
