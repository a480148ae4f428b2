//! The readiness-based server runtime.
//!
//! Pieces of the engine:
//! - `buffer`: per-connection byte queues with cheap front-consume
//! - `connection`: per-client record and frame-rate limiter
//! - `listener`: listening-socket factory
//! - `signals`: SIGINT/SIGTERM/SIGUSR1 as poll events
//! - `event_loop`: the single-threaded engine itself

pub mod buffer;
pub mod connection;
pub mod event_loop;
pub mod listener;
pub mod signals;

pub use event_loop::Server;

use crate::config::Config;

/// Bind and run the server until graceful shutdown.
pub fn run(config: &Config) -> std::io::Result<()> {
    let mut server = Server::bind(config)?;
    server.run()
}
