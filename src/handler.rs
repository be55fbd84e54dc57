//! Connection handler
//!
//! Handles individual client connections: the username handshake, the
//! chat/command loop, and the writer task that drains the session's
//! outbound queue to the socket.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::{self, Command, ABOUT_TEXT};
use crate::error::AppError;
use crate::framer::{frame, LineReader};
use crate::message::{self, DepartureReason, Outbound};
use crate::server::ChatServer;
use crate::types::{ClientId, MessageKind};

/// Handle a new TCP connection
pub async fn handle_connection(stream: TcpStream, server: Arc<ChatServer>) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);
    handle_stream(stream, &peer_addr, server).await
}

/// Drive one session over any byte stream
///
/// Returns once the session has been terminated and its writer has flushed.
pub async fn handle_stream<S>(stream: S, peer: &str, server: Arc<ChatServer>) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);

    // Create channel for server -> client lines
    let (msg_tx, msg_rx) = mpsc::unbounded_channel::<Outbound>();

    let client_id = match server.connect(msg_tx.clone()) {
        Ok(id) => id,
        Err(err) => {
            info!("Refusing connection from {}: {}", peer, err);
            write_half
                .write_all(frame(&message::error_line(&err)).as_bytes())
                .await?;
            write_half.shutdown().await?;
            return Ok(());
        }
    };
    info!("Client {} connected from {}", client_id, peer);

    let mut write_task = tokio::spawn(write_loop(write_half, msg_rx, client_id));

    let session = Session {
        id: client_id,
        server: Arc::clone(&server),
        outbound: msg_tx,
    };

    // Wait for the read side to finish or the writer to close
    let writer_finished = tokio::select! {
        reason = session.run(LineReader::new(read_half)) => {
            server.terminate(client_id, reason);
            false
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", client_id);
            server.terminate(client_id, DepartureReason::Left);
            true
        }
    };

    if !writer_finished {
        // Let queued lines (farewells, errors) reach the peer
        let _ = write_task.await;
    }

    info!("Client {} disconnected", client_id);
    Ok(())
}

/// Drain the outbound queue to the socket until `Close` or a write error
async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Outbound>, client_id: ClientId)
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Line(line) => {
                if let Err(e) = writer.write_all(frame(&line).as_bytes()).await {
                    debug!("Write to {} failed: {}", client_id, e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = writer.shutdown().await;
    debug!("Write task ended for {}", client_id);
}

/// Whether the active loop keeps reading
enum Flow {
    Continue,
    Quit,
}

/// Per-connection protocol state machine
struct Session {
    id: ClientId,
    server: Arc<ChatServer>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Session {
    fn reply(&self, line: impl Into<String>) {
        let _ = self.outbound.send(Outbound::Line(line.into()));
    }

    fn reply_error(&self, err: AppError) {
        let _ = self.outbound.send(err.into());
    }

    /// Handshake, then the chat/command loop
    async fn run<R>(&self, mut reader: LineReader<R>) -> DepartureReason
    where
        R: AsyncRead + Unpin,
    {
        if !self.handshake(&mut reader).await {
            return DepartureReason::Left;
        }

        loop {
            let line = match reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Client {} closed the connection", self.id);
                    return DepartureReason::Left;
                }
                Err(e) => {
                    warn!("Read error for {}: {}", self.id, e);
                    return DepartureReason::Left;
                }
            };

            if let Flow::Quit = self.handle_line(&line) {
                return DepartureReason::Left;
            }
        }
    }

    /// Read lines until a username is claimed
    ///
    /// Returns false if the connection should end (EOF, name collision or
    /// shutdown).
    async fn handshake<R>(&self, reader: &mut LineReader<R>) -> bool
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let line = match reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return false,
                Err(e) => {
                    warn!("Read error for {} during handshake: {}", self.id, e);
                    return false;
                }
            };

            let name = match command::parse_username_request(&line) {
                Ok(name) => name,
                Err(err) => {
                    self.reply_error(err);
                    continue;
                }
            };

            match self.server.join(self.id, name) {
                Ok(_) => return true,
                Err(err @ AppError::UsernameTaken(_)) => {
                    info!("Client {} rejected: {}", self.id, err);
                    self.reply_error(err);
                    return false;
                }
                Err(AppError::ShuttingDown) => return false,
                Err(err) => self.reply_error(err),
            }
        }
    }

    fn handle_line(&self, line: &str) -> Flow {
        if line.trim().is_empty() {
            return Flow::Continue;
        }

        if command::is_command(line) {
            return self.dispatch(line);
        }

        if let Err(err) = self.server.chat(self.id, line) {
            self.reply_error(err);
        }
        Flow::Continue
    }

    fn dispatch(&self, line: &str) -> Flow {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(err) => {
                self.reply_error(err);
                return Flow::Continue;
            }
        };

        if command.requires_moderator() && !self.server.is_moderator(self.id) {
            self.reply_error(AppError::NotModerator);
            return Flow::Continue;
        }

        // Whispers are logged by the server with their own kind
        if !matches!(command, Command::Whisper { .. }) {
            if let Some(username) = self.server.username_of(self.id) {
                self.server
                    .history()
                    .append(&username, line.trim(), MessageKind::Command);
            }
        }

        match self.execute(command) {
            Ok(flow) => flow,
            Err(err) => {
                self.reply_error(err);
                Flow::Continue
            }
        }
    }

    fn execute(&self, command: Command) -> Result<Flow, AppError> {
        match command {
            Command::Commands => {
                for line in command::command_list(self.server.is_moderator(self.id)) {
                    self.reply(line);
                }
            }
            Command::Who => {
                let users = self.server.who();
                if users.is_empty() {
                    self.reply("Online users: (none)");
                } else {
                    self.reply(format!("Online users ({}): {}", users.len(), users.join(", ")));
                }
            }
            Command::About => self.reply(ABOUT_TEXT),
            Command::Whisper { target, message } => {
                self.server.whisper(self.id, &target, &message)?;
            }
            Command::Rename { username } => {
                self.server.rename(self.id, &username)?;
            }
            Command::Ping => self.reply("pong"),
            Command::Stats => self.reply(self.server.stats().to_string()),
            Command::Kick { target, reason } => {
                let by = self
                    .server
                    .username_of(self.id)
                    .ok_or(AppError::UsernameRequired)?;
                self.server
                    .kick(&target, &by, reason.as_deref(), Some(self.id))?;
            }
            Command::History => {
                let window = self.server.config().history_window;
                let records = self.server.history().recent(window);
                if records.is_empty() {
                    self.reply("History: (empty)");
                } else {
                    self.reply(format!("History (last {}):", records.len()));
                    for record in records {
                        self.reply(record.render());
                    }
                }
            }
            Command::Quit => {
                self.reply("Goodbye!");
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }
}
