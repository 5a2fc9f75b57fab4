//! # listd - a collaborative shared-list service
//!
//! This is the main entry point for the listd server. It hosts a persistent
//! doubly-linked list that many clients edit concurrently over gRPC streams.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

use listd::server::{ListdServer, ServerConfig};

/// A collaborative shared-list service.
///
/// listd hosts a persistent doubly-linked list of version-stamped nodes.
/// Connected clients insert and delete nodes concurrently; the server
/// resolves write races with optimistic locking and fans out every committed
/// change to all attached sessions.
#[derive(Parser, Debug)]
#[command(
    name = "listd",
    version = "0.1.0",
    about = "A collaborative shared-list service",
    long_about = "listd hosts a persistent doubly-linked list that many clients edit concurrently over bidirectional gRPC streams, with optimistic concurrency control and change fan-out."
)]
struct Args {
    /// Human-readable name for this instance.
    /// This is used to identify the instance in logs and monitoring.
    #[arg(long, default_value = "default")]
    name: String,

    /// Path to the data directory where listd stores the node collection.
    #[arg(long, default_value = "default.listd")]
    data_dir: String,

    /// List of URLs to listen on for client traffic.
    /// Multiple URLs can be specified comma-separated; the first is used as
    /// the primary listener.
    /// Format: http://host:port[,http://host:port,...]
    #[arg(long, default_value = "http://localhost:4020")]
    listen_client_urls: String,

    /// Comma-separated list of origins accepted on session attach.
    /// Clients present their origin as request metadata; an empty list
    /// accepts every origin.
    #[arg(long, default_value = "")]
    allowed_origins: String,

    /// Number of attempts the retry driver gives each mutation before
    /// giving up with a conflict. Raising this helps under heavy contention
    /// on the same node at the cost of request latency.
    #[arg(long, default_value_t = 10)]
    max_txn_retries: u32,

    /// Backend page cache size in megabytes.
    /// Higher values improve read performance but consume more memory.
    #[arg(long, default_value_t = 64)]
    cache_size_mb: u64,

    /// Log level - 'trace', 'debug', 'info', 'warn', or 'error'.
    /// 'info' is recommended for production.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    initialize_tracing(&args.log_level)?;

    print_startup_banner(&args);

    let config = build_server_config(&args);

    let server = ListdServer::new(config)?;

    let shutdown = setup_signal_handlers();

    info!("Starting listd server...");
    match server.run(shutdown).await {
        Ok(()) => {
            info!("Server shut down gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Server error: {:?}", e);
            Err(e)
        }
    }
}

/// Initialize the tracing/logging system with the specified log level.
fn initialize_tracing(log_level: &str) -> anyhow::Result<()> {
    let env_filter = match log_level {
        "trace" => EnvFilter::new("trace"),
        "debug" => EnvFilter::new("debug"),
        "info" => EnvFilter::new("info"),
        "warn" => EnvFilter::new("warn"),
        "error" => EnvFilter::new("error"),
        _ => {
            eprintln!("Invalid log level: {}. Using 'info'", log_level);
            EnvFilter::new("info")
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Print the startup banner with version and configuration info.
fn print_startup_banner(args: &Args) {
    let version = env!("CARGO_PKG_VERSION");
    println!("listd v{} - collaborative shared-list service", version);
    println!();
    println!("Configuration:");
    println!("  Name:              {}", args.name);
    println!("  Data directory:    {}", args.data_dir);
    println!("  Client URLs:       {}", args.listen_client_urls);
    println!(
        "  Allowed origins:   {}",
        if args.allowed_origins.is_empty() {
            "(any)"
        } else {
            args.allowed_origins.as_str()
        }
    );
    println!("  Max txn retries:   {}", args.max_txn_retries);
    println!("  Log level:         {}", args.log_level);
    println!();
}

/// Build ServerConfig from CLI arguments.
fn build_server_config(args: &Args) -> ServerConfig {
    ServerConfig {
        name: args.name.clone(),
        data_dir: PathBuf::from(&args.data_dir),
        listen_client_urls: parse_list(&args.listen_client_urls),
        allowed_origins: parse_list(&args.allowed_origins),
        max_txn_retries: args.max_txn_retries,
        cache_size_mb: args.cache_size_mb,
    }
}

/// Parse a comma-separated flag value into a vector, trimming whitespace.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Set up signal handlers for graceful shutdown (SIGTERM, SIGINT).
fn setup_signal_handlers() -> impl std::future::Future<Output = ()> {
    async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT signal");
            }
        }
    }
}
