//! netframe: a framed TCP command server
//!
//! Single-threaded, non-blocking, readiness-based. Clients send
//! length-prefixed frames carrying ASCII commands (PING, ECHO, STATS,
//! CLOSE, SHUTDOWN); replies use the same framing.
//!
//! SIGINT/SIGTERM trigger a graceful shutdown; SIGUSR1 dumps the metrics
//! counters to stdout.

use std::process::ExitCode;

use netframe::config::Config;
use netframe::runtime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging. Diagnostics go to stderr; stdout is reserved for
    // the SIGUSR1 metrics dump.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!(
        port = config.port,
        max_connections = config.max_connections,
        backlog = config.backlog,
        recv_buffer = config.recv_buffer,
        send_buffer = config.send_buffer,
        "Starting netframe server"
    );

    match runtime::run(&config) {
        Ok(()) => {
            info!("Clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Fatal runtime error");
            ExitCode::FAILURE
        }
    }
}
