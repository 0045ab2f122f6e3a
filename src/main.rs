//! heartbeat-echo: A WebSocket echo server with liveness detection
//!
//! Every data frame a client sends is written straight back. Each session
//! pings its peer on a fixed interval and drops peers that stop answering.
//!
//! Features:
//! - Text and binary echo over `/ws`
//! - Ping/pong heartbeat with a sliding read deadline
//! - Bounded number of concurrent sessions
//! - Configuration via CLI arguments or TOML file

mod config;
mod liveness;
mod registry;
mod server;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let workers = config.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    info!(
        listen = %config.listen,
        workers,
        max_sessions = config.max_sessions,
        heartbeat_interval_ms = config.heartbeat.interval.as_millis() as u64,
        ack_window_ms = config.heartbeat.ack_window.as_millis() as u64,
        "Starting heartbeat-echo server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("heartbeat-echo-worker")
        .enable_all()
        .build()?;

    runtime.block_on(Server::new(config).run())
}
