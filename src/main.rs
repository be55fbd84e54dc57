//! Line-oriented chat server - Entry Point
//!
//! Parses the command line, opens the per-run history log, starts the
//! operator console on stdin and serves connections until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chat_relay::{
    run_admin_loop, serve, spawn_console_reader, ChatServer, FileSink, History, HistorySink,
    NullSink, ServerConfig, UsernameRegistry,
};

#[derive(Parser, Debug)]
#[command(name = "chat_relay")]
#[command(about = "Line-oriented multi-user chat server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Chat history log file (defaults to chat_<timestamp>.log)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Use RUST_LOG env var to override, e.g. RUST_LOG=chat_relay=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("chat_relay={}", args.log_level))),
        )
        .init();

    let config = ServerConfig::default();

    let log_path = args.log_file.unwrap_or_else(|| {
        PathBuf::from(format!("chat_{}.log", Local::now().format("%Y%m%d_%H%M%S")))
    });
    let sink: Box<dyn HistorySink> = match FileSink::open(&log_path) {
        Ok(sink) => {
            info!("Writing chat history to {}", log_path.display());
            Box::new(sink)
        }
        Err(e) => {
            error!("Cannot open history log {}: {}", log_path.display(), e);
            Box::new(NullSink)
        }
    };

    let history = History::new(config.history_capacity, sink);
    let server = Arc::new(ChatServer::new(UsernameRegistry::new(), history, config));

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("Chat server listening on {}", listener.local_addr()?);

    // Operator console; stdin is read off the runtime so shutdown never waits on it
    let console = spawn_console_reader(std::io::stdin())?;
    let admin_server = Arc::clone(&server);
    let admin_task = tokio::spawn(async move {
        if let Err(e) = run_admin_loop(console, tokio::io::stdout(), admin_server).await {
            error!("Admin console error: {}", e);
        }
    });

    // Ctrl+C behaves like the `shutdown` admin command; a second one exits at once
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            return;
        }
        info!("Interrupt received");
        signal_server.shutdown();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt, exiting immediately");
            std::process::exit(130);
        }
    });

    serve(listener, server).await?;
    // The console notices shutdown on its own
    let _ = admin_task.await;
    info!("Server stopped");

    Ok(())
}
