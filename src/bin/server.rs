//! StrataKV Server Binary
//!
//! Starts the HTTP server for StrataKV. Ctrl-C or SIGTERM stops accepting,
//! lets open requests finish, then flushes and closes the engine.

use std::sync::Arc;

use clap::Parser;
use stratakv::{Config, Engine, Server, WalSyncStrategy};
use tracing_subscriber::{fmt, EnvFilter};

const MB: usize = 1024 * 1024;

/// StrataKV Server
#[derive(Parser, Debug)]
#[command(name = "stratakv-server")]
#[command(about = "Key-value server with an HTTP entity API")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./stratakv_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Requests allowed to run engine calls at once
    #[arg(short, long, default_value = "8")]
    workers: usize,

    /// Requests allowed to wait for a worker before 503
    #[arg(short, long, default_value = "64")]
    queue_depth: usize,

    /// Memory ceiling in MB
    #[arg(long, default_value = "128")]
    memory_mb: usize,

    /// MemTable size limit in MB before flush
    #[arg(short = 'm', long, default_value = "16")]
    memtable_mb: usize,

    /// Budget for buffered request/response bytes in MB
    #[arg(long, default_value = "32")]
    buffered_mb: usize,

    /// Largest accepted request body in MB
    #[arg(long, default_value = "4")]
    max_body_mb: usize,

    /// SSTable count that triggers compaction (0 disables)
    #[arg(long, default_value = "4")]
    compaction_trigger: usize,

    /// WAL sync strategy: every-write or every-n:<count>
    #[arg(long, default_value = "every-write")]
    sync: WalSyncStrategy,

    /// Deadline for a request head, including keep-alive idle (milliseconds)
    #[arg(long, default_value = "30000")]
    idle_timeout_ms: u64,

    /// Deadline for a request body (milliseconds)
    #[arg(long, default_value = "10000")]
    request_timeout_ms: u64,
}

#[tokio::main]
async fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stratakv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("StrataKV Server v{}", stratakv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    // Build config from args
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .worker_threads(args.workers)
        .queue_depth(args.queue_depth)
        .memory_limit(args.memory_mb * MB)
        .memtable_size_limit(args.memtable_mb * MB)
        .max_buffered_bytes(args.buffered_mb * MB)
        .max_body_bytes(args.max_body_mb * MB)
        .compaction_trigger(args.compaction_trigger)
        .wal_sync_strategy(args.sync)
        .idle_timeout_ms(args.idle_timeout_ms)
        .request_timeout_ms(args.request_timeout_ms)
        .build();

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // Open engine
    let engine = match Engine::open(config.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Engine initialized successfully");

    // Start server
    let server = match Server::bind(config, engine).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to bind: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.serve_until(shutdown_signal()).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
