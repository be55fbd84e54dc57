//! Client struct definition
//!
//! Represents a connected session with its state and outbound channel.

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::Outbound;
use crate::types::ClientId;

/// Connected session information
///
/// Holds all state related to a connection: its identity, claimed
/// username, moderator flag, connect time and the outbound line queue.
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Username (None until the handshake completes)
    pub username: Option<String>,
    /// Moderator flag (only the admin loop flips it)
    pub is_moderator: bool,
    /// When the connection was accepted
    pub connected_at: DateTime<Local>,
    /// Server → client line queue, drained by the writer task
    pub sender: mpsc::UnboundedSender<Outbound>,
}

impl Client {
    /// Create a new client with the given ID and sender channel
    pub fn new(id: ClientId, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            username: None,
            is_moderator: false,
            connected_at: Local::now(),
            sender,
        }
    }

    /// Queue a line for this client
    ///
    /// Returns an error if the writer has gone away (client disconnected).
    pub fn send_line(&self, line: impl Into<String>) -> Result<(), SendError> {
        self.send(Outbound::Line(line.into()))
    }

    /// Queue an outbound item for this client
    pub fn send(&self, item: Outbound) -> Result<(), SendError> {
        self.sender.send(item).map_err(|_| SendError::ChannelClosed)
    }

    /// Get the display name for this client
    ///
    /// Returns the username if set, otherwise "Unknown".
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or("Unknown")
    }

    /// Check if this client has completed the handshake
    pub fn has_username(&self) -> bool {
        self.username.is_some()
    }

    /// Case-insensitive username match
    pub fn is_named(&self, name: &str) -> bool {
        self.username
            .as_deref()
            .is_some_and(|u| u.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = Client::new(ClientId::new(), tx);

        assert!(client.username.is_none());
        assert!(!client.is_moderator);
        assert_eq!(client.display_name(), "Unknown");
    }

    #[test]
    fn test_client_username() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = Client::new(ClientId::new(), tx);

        assert!(!client.has_username());

        client.username = Some("Alice".to_string());

        assert!(client.has_username());
        assert_eq!(client.display_name(), "Alice");
        assert!(client.is_named("alice"));
        assert!(!client.is_named("bob"));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Client::new(ClientId::new(), tx);
        drop(rx);

        assert!(client.send_line("hello").is_err());
    }

    #[tokio::test]
    async fn test_send_line_queues() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = Client::new(ClientId::new(), tx);

        client.send_line("hello").unwrap();

        assert_eq!(rx.recv().await, Some(Outbound::Line("hello".to_string())));
    }
}
