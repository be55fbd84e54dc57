//! Accept loop
//!
//! Accepts connections and spawns a handler task for each until the server
//! shuts down, then gives open sessions a grace period to flush and exit.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::handler::handle_connection;
use crate::server::ChatServer;

/// Serve connections from `listener` until shutdown
pub async fn serve(listener: TcpListener, server: Arc<ChatServer>) -> Result<(), AppError> {
    let mut shutdown_rx = server.subscribe_shutdown();
    let mut connections = JoinSet::new();

    loop {
        if *shutdown_rx.borrow_and_update() {
            break;
        }

        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let server = Arc::clone(&server);
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, server).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    warn!("Connection task failed: {}", e);
                }
            }
        }
    }

    drop(listener);
    info!("Stopped accepting connections");

    let grace = server.config().shutdown_grace;
    let drained = timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            "{} connections still open after {:?}, aborting",
            connections.len(),
            grace
        );
        connections.abort_all();
    } else {
        debug!("All connection tasks finished");
    }

    Ok(())
}
