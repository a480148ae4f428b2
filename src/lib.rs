//! # netframe - a framed TCP command server
//!
//! A single-process, single-threaded, non-blocking TCP server. Clients speak
//! a length-prefixed binary frame protocol (4-byte big-endian length followed
//! by that many payload bytes) carrying a small set of ASCII commands:
//!
//! - `PING` → `PONG`
//! - `ECHO <rest>` → `<rest>`
//! - `STATS` → multi-line counter block
//! - `CLOSE` → `OK` (the peer is expected to close)
//! - `SHUTDOWN` → `OK`, then the server drains and exits
//!
//! The core is a readiness-based event loop (epoll on Linux, kqueue on
//! macOS, via mio): level-triggered interest, per-connection read/write
//! buffering, a framing state machine, write high-water backpressure, a
//! per-connection frame-rate limiter, a 30-second idle sweep, and graceful
//! shutdown on SIGINT/SIGTERM. SIGUSR1 dumps the counters to stdout.
//!
//! ## Module Overview
//!
//! - [`config`]: CLI arguments, optional TOML file, validation
//! - [`metrics`]: process-wide counters and the STATS reply
//! - [`protocol`]: frame decoder/encoder and the command table
//! - [`runtime`]: the event loop and its supporting pieces

pub mod config;
pub mod metrics;
pub mod protocol;
pub mod runtime;
