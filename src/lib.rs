//! Line-oriented multi-user chat server library
//!
//! A TCP chat server speaking a plain-text line protocol, built on tokio.
//!
//! # Features
//! - Username handshake (`!username <name>`) with case-insensitive uniqueness
//! - Chat broadcast to every participant
//! - Whispers, renames, status queries
//! - Moderators (promoted by the operator) who can kick and read history
//! - Operator console: moderator toggling, kicks, orderly shutdown
//! - Bounded in-memory history mirrored to an append-only log file
//!
//! # Architecture
//! - `ChatServer` owns the client table, username registry and history,
//!   each behind its own mutex; it is shared as `Arc<ChatServer>`
//! - Each connection runs a reader task (the session protocol) and a
//!   writer task draining an unbounded line queue, so no lock is ever held
//!   during network I/O
//! - The operator loop and the accept loop run alongside the sessions
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use chat_relay::{serve, ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let server = Arc::new(ChatServer::in_memory(ServerConfig::default()));
//!
//!     let console = chat_relay::spawn_console_reader(std::io::stdin()).unwrap();
//!     tokio::spawn(chat_relay::run_admin_loop(
//!         console,
//!         tokio::io::stdout(),
//!         Arc::clone(&server),
//!     ));
//!     serve(listener, server).await.unwrap();
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod admin;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod framer;
pub mod handler;
pub mod history;
pub mod listener;
pub mod message;
pub mod registry;
pub mod server;
pub mod types;
pub mod validation;

// Re-export main types for convenience
pub use admin::{run_admin_loop, spawn_console_reader, AdminCommand};
pub use client::Client;
pub use command::Command;
pub use config::ServerConfig;
pub use error::{AppError, SendError};
pub use handler::{handle_connection, handle_stream};
pub use history::{ChatMessage, FileSink, History, HistorySink, NullSink};
pub use listener::serve;
pub use message::{DepartureReason, Outbound, KICK_NOTICE_PREFIX};
pub use registry::UsernameRegistry;
pub use server::{ChatServer, Stats};
pub use types::{ClientId, MessageKind};
pub use validation::validate_username;

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
