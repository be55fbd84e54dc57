//! ChatServer shared state
//!
//! Owns the client table, the username registry and the history log, and
//! implements broadcast, whisper, moderation and the terminal actions of a
//! session. Every connection task and the admin loop share one
//! `Arc<ChatServer>`.
//!
//! Lock order is client table, then registry. No lock is ever held while
//! queueing lines for delivery.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::client::Client;
use crate::config::ServerConfig;
use crate::error::AppError;
use crate::history::History;
use crate::lock;
use crate::message::{self, DepartureReason, Outbound};
use crate::registry::UsernameRegistry;
use crate::types::{ClientId, MessageKind};
use crate::validation::validate_username;

/// Name used for announcements and operator-issued kicks
pub const SERVER_NAME: &str = "Server";

/// Client table guarded together with the "no new sessions" flag
#[derive(Debug, Default)]
struct ClientTable {
    clients: HashMap<ClientId, Client>,
    closed: bool,
}

/// Snapshot returned by `!stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub users: usize,
    pub moderators: usize,
    pub uptime_secs: u64,
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Users online: {} | Moderators: {} | Uptime: {}",
            self.users,
            self.moderators,
            message::format_uptime(self.uptime_secs)
        )
    }
}

/// The shared chat server state
pub struct ChatServer {
    table: Mutex<ClientTable>,
    registry: UsernameRegistry,
    history: History,
    config: ServerConfig,
    started_at: Instant,
    shutdown_tx: watch::Sender<bool>,
}

impl ChatServer {
    /// Create a server from its collaborators
    pub fn new(registry: UsernameRegistry, history: History, config: ServerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            table: Mutex::new(ClientTable::default()),
            registry,
            history,
            config,
            started_at: Instant::now(),
            shutdown_tx,
        }
    }

    /// Server with an empty registry and an in-memory history
    pub fn in_memory(config: ServerConfig) -> Self {
        let history = History::in_memory(config.history_capacity);
        Self::new(UsernameRegistry::new(), history, config)
    }

    pub fn registry(&self) -> &UsernameRegistry {
        &self.registry
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a new connection (before its username is known)
    pub fn connect(&self, sender: mpsc::UnboundedSender<Outbound>) -> Result<ClientId, AppError> {
        let mut table = lock(&self.table);
        if table.closed {
            return Err(AppError::ShuttingDown);
        }

        let client_id = ClientId::new();
        table.clients.insert(client_id, Client::new(client_id, sender));
        debug!("Client {} registered, total clients: {}", client_id, table.clients.len());
        Ok(client_id)
    }

    /// Complete the handshake for a session
    ///
    /// Validates and claims `name`, welcomes the caller and announces the
    /// join to everyone else. Returns the claimed name.
    pub fn join(&self, client_id: ClientId, name: &str) -> Result<String, AppError> {
        let name = validate_username(name)?;

        let client = {
            let mut table = lock(&self.table);
            let client = table
                .clients
                .get_mut(&client_id)
                .ok_or(AppError::ShuttingDown)?;
            if !self.registry.claim(name) {
                return Err(AppError::UsernameTaken(name.to_string()));
            }
            client.username = Some(name.to_string());
            client.clone()
        };

        info!("Client {} joined as '{}'", client_id, name);
        let _ = client.send_line(message::welcome_line(name));
        self.announce(&format!("{} joined the chat", name), Some(client_id));
        Ok(name.to_string())
    }

    /// Run a session's terminal actions
    ///
    /// Removes the session from the table, releases its username, closes
    /// its connection and announces the departure if it had a name. Only the
    /// first call for a given session does anything; later calls return false.
    pub fn terminate(&self, client_id: ClientId, reason: DepartureReason) -> bool {
        self.terminate_with(client_id, reason, None)
    }

    /// Like `terminate`, queueing `farewell` just before the close
    fn terminate_with(
        &self,
        client_id: ClientId,
        reason: DepartureReason,
        farewell: Option<String>,
    ) -> bool {
        let client = {
            let mut table = lock(&self.table);
            match self.remove_locked(&mut table, client_id) {
                Some(client) => client,
                None => return false,
            }
        };

        self.finish_termination(client, reason, farewell);
        true
    }

    /// Take a session out of the table and release its name
    ///
    /// Caller holds the table lock.
    fn remove_locked(&self, table: &mut ClientTable, client_id: ClientId) -> Option<Client> {
        let client = table.clients.remove(&client_id)?;
        if let Some(name) = &client.username {
            self.registry.release(name);
        }
        Some(client)
    }

    /// Close a removed session and announce its departure
    fn finish_termination(&self, client: Client, reason: DepartureReason, farewell: Option<String>) {
        if let Some(line) = farewell {
            let _ = client.send_line(line);
        }
        let _ = client.send(Outbound::Close);

        info!("Client {} terminated ({})", client.id, reason);

        if let Some(name) = &client.username {
            self.announce(&format!("{} {}", name, reason), None);
        }
    }

    /// Send a line to every active session except `exclude`
    ///
    /// The recipient list is a snapshot; write failures are ignored since each
    /// session notices its own disconnect. Returns the number of recipients.
    pub fn broadcast(&self, line: &str, exclude: Option<ClientId>) -> usize {
        let recipients: Vec<Client> = {
            let table = lock(&self.table);
            table
                .clients
                .values()
                .filter(|c| c.has_username() && Some(c.id) != exclude)
                .cloned()
                .collect()
        };

        info!("{}", line);

        for client in &recipients {
            if client.send_line(line).is_err() {
                debug!("Broadcast to {} dropped (queue closed)", client.id);
            }
        }
        recipients.len()
    }

    /// Log and broadcast a `* text *` announcement
    pub fn announce(&self, text: &str, exclude: Option<ClientId>) {
        self.history.append(SERVER_NAME, text, MessageKind::System);
        self.broadcast(&message::announcement(text), exclude);
    }

    /// Broadcast a chat line from a session to everyone including the sender
    pub fn chat(&self, client_id: ClientId, content: &str) -> Result<(), AppError> {
        let username = self.username_of(client_id).ok_or(AppError::UsernameRequired)?;
        self.history.append(&username, content, MessageKind::Chat);
        self.broadcast(&message::chat_line(&username, content), None);
        Ok(())
    }

    /// Deliver a private message
    pub fn whisper(&self, from: ClientId, target: &str, content: &str) -> Result<(), AppError> {
        let sender = self.client(from).ok_or(AppError::UsernameRequired)?;
        let sender_name = sender
            .username
            .clone()
            .ok_or(AppError::UsernameRequired)?;
        let recipient = self
            .find_by_username(target)
            .ok_or_else(|| AppError::UserNotFound(target.to_string()))?;
        let recipient_name = recipient.display_name().to_string();

        if recipient
            .send_line(message::whisper_from_line(&sender_name, content))
            .is_err()
        {
            debug!("Whisper to {} dropped (queue closed)", recipient.id);
        }
        let _ = sender.send_line(message::whisper_to_line(&recipient_name, content));

        self.history.append(
            &sender_name,
            &format!("-> {}: {}", recipient_name, content),
            MessageKind::Whisper,
        );
        Ok(())
    }

    /// Change a session's username and announce it
    ///
    /// Returns the previous name.
    pub fn rename(&self, client_id: ClientId, new_name: &str) -> Result<String, AppError> {
        let new_name = validate_username(new_name)?;

        let old_name = {
            let mut table = lock(&self.table);
            let client = table
                .clients
                .get_mut(&client_id)
                .ok_or(AppError::UsernameRequired)?;
            let old_name = client.username.clone().ok_or(AppError::UsernameRequired)?;
            if old_name == new_name {
                return Err(AppError::SameUsername(old_name));
            }
            self.registry.rename(&old_name, new_name)?;
            client.username = Some(new_name.to_string());
            old_name
        };

        info!("Client {} renamed '{}' -> '{}'", client_id, old_name, new_name);
        self.announce(&format!("{} is now known as {}", old_name, new_name), None);
        Ok(old_name)
    }

    /// Flip a user's moderator flag and announce the change
    ///
    /// Returns the new flag value.
    pub fn toggle_moderator(&self, username: &str) -> Result<bool, AppError> {
        let (name, is_moderator) = {
            let mut table = lock(&self.table);
            let client = table
                .clients
                .values_mut()
                .find(|c| c.is_named(username))
                .ok_or_else(|| AppError::UserNotFound(username.to_string()))?;
            client.is_moderator = !client.is_moderator;
            (client.display_name().to_string(), client.is_moderator)
        };

        let text = if is_moderator {
            format!("{} is now a moderator", name)
        } else {
            format!("{} is no longer a moderator", name)
        };
        self.announce(&text, None);
        Ok(is_moderator)
    }

    /// Kick a user by name
    ///
    /// `invoker` is the kicking session, or None for the operator. The target
    /// receives the kick notice, then its terminal actions run. Returns the
    /// target's display name.
    pub fn kick(
        &self,
        target: &str,
        by: &str,
        reason: Option<&str>,
        invoker: Option<ClientId>,
    ) -> Result<String, AppError> {
        let not_found = || AppError::UserNotFound(target.to_string());

        // Lookup and removal under one lock
        let client = {
            let mut table = lock(&self.table);
            let client_id = table
                .clients
                .values()
                .find(|c| c.is_named(target))
                .map(|c| c.id)
                .ok_or_else(not_found)?;
            if Some(client_id) == invoker {
                return Err(AppError::CannotKickSelf);
            }
            self.remove_locked(&mut table, client_id)
                .ok_or_else(not_found)?
        };

        let reason = reason.unwrap_or(crate::command::DEFAULT_KICK_REASON);
        let notice = message::kick_notice_line(by, reason);
        let departure = DepartureReason::Kicked {
            by: by.to_string(),
            reason: reason.to_string(),
        };

        let name = client.display_name().to_string();
        self.finish_termination(client, departure, Some(notice));
        Ok(name)
    }

    /// Terminate every session and refuse new ones
    ///
    /// Returns the number of sessions this sweep terminated.
    pub fn shutdown(&self) -> usize {
        let client_ids: Vec<ClientId> = {
            let mut table = lock(&self.table);
            table.closed = true;
            table.clients.keys().copied().collect()
        };

        info!("Shutting down, terminating {} sessions", client_ids.len());

        let terminated = client_ids
            .into_iter()
            .filter(|id| self.terminate(*id, DepartureReason::Shutdown))
            .count();

        self.shutdown_tx.send_replace(true);
        terminated
    }

    /// Receiver that flips to `true` once shutdown has run
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.table).closed
    }

    /// Snapshot of a session
    pub fn client(&self, client_id: ClientId) -> Option<Client> {
        lock(&self.table).clients.get(&client_id).cloned()
    }

    /// Case-insensitive lookup of an active session
    pub fn find_by_username(&self, username: &str) -> Option<Client> {
        lock(&self.table)
            .clients
            .values()
            .find(|c| c.is_named(username))
            .cloned()
    }

    pub fn username_of(&self, client_id: ClientId) -> Option<String> {
        lock(&self.table)
            .clients
            .get(&client_id)
            .and_then(|c| c.username.clone())
    }

    pub fn is_moderator(&self, client_id: ClientId) -> bool {
        lock(&self.table)
            .clients
            .get(&client_id)
            .is_some_and(|c| c.is_moderator)
    }

    /// Claimed usernames, sorted
    pub fn who(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Moderator usernames, sorted
    pub fn moderators(&self) -> Vec<String> {
        let mut mods: Vec<String> = lock(&self.table)
            .clients
            .values()
            .filter(|c| c.is_moderator)
            .filter_map(|c| c.username.clone())
            .collect();
        mods.sort();
        mods
    }

    /// Number of connections in the table (handshake complete or not)
    pub fn connection_count(&self) -> usize {
        lock(&self.table).clients.len()
    }

    pub fn stats(&self) -> Stats {
        let table = lock(&self.table);
        let users = table.clients.values().filter(|c| c.has_username()).count();
        let moderators = table
            .clients
            .values()
            .filter(|c| c.has_username() && c.is_moderator)
            .count();
        Stats {
            users,
            moderators,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl std::fmt::Debug for ChatServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatServer")
            .field("connections", &self.connection_count())
            .field("registry", &self.registry)
            .field("history", &self.history)
            .finish()
    }
}
