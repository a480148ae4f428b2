//! The event-driven connection engine.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. Uses epoll on Linux, kqueue
//! on macOS. Single-threaded; the readiness wait is the only place the
//! loop blocks.
//!
//! One iteration: idle sweep, metrics-dump check, readiness wait, event
//! dispatch (accept burst, signal drain, or per-connection read/write).
//! Every per-connection failure is a tagged `CloseReason`; the dispatch
//! layer is the only place a connection is closed, so each descriptor is
//! closed exactly once with the first accurate reason.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::protocol::framing::{self, DecodeResult};
use crate::protocol::{command, Command, FrameError};
use crate::runtime::connection::{Connection, WRITE_HIGH_WATER};
use crate::runtime::listener;
use crate::runtime::signals::{SignalEvent, SignalSource};

const LISTENER: Token = Token(usize::MAX);
const SIGNALS: Token = Token(usize::MAX - 1);

/// Events fetched per readiness wait.
const EVENT_BATCH: usize = 64;

/// Read chunk size on the read path.
const READ_CHUNK: usize = 4096;

/// Per-connection write budget per tick, so one connection cannot starve
/// the rest of the loop.
const MAX_WRITE_PER_TICK: usize = 64 * 1024;

/// Inactivity window after which a connection is closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a connection was terminated.
#[derive(Debug)]
enum CloseReason {
    PeerFin,
    PeerHangup,
    Protocol(FrameError),
    WriteOverflow,
    FrameFlood,
    IdleTimeout,
    Shutdown,
    Io(io::Error),
}

impl CloseReason {
    fn tag(&self) -> &'static str {
        match self {
            CloseReason::WriteOverflow => "[BACKPRESSURE]",
            CloseReason::FrameFlood => "[ABUSE]",
            CloseReason::Shutdown => "[CONTROL]",
            _ => "[CLOSE]",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::PeerFin => write!(f, "client fin"),
            CloseReason::PeerHangup => write!(f, "peer hangup"),
            CloseReason::Protocol(e) => write!(f, "protocol violation: {e}"),
            CloseReason::WriteOverflow => write!(f, "write buffer overflow"),
            CloseReason::FrameFlood => write!(f, "frame flood"),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
            CloseReason::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

/// The server: poller, listener, signal source, connection map, counters.
pub struct Server {
    poll: Poll,
    listener: Option<TcpListener>,
    signals: SignalSource,
    connections: Slab<Connection>,
    metrics: Metrics,
    max_connections: usize,
    running: bool,
    dump_requested: bool,
}

impl Server {
    /// Bind the listening socket and set up the poll registry.
    pub fn bind(config: &Config) -> io::Result<Server> {
        let poll = Poll::new()?;

        let std_listener = listener::create_listener(config)?;
        let mut listener = TcpListener::from_std(std_listener);
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let mut signals = SignalSource::new()?;
        signals.register(poll.registry(), SIGNALS)?;

        Ok(Server {
            poll,
            listener: Some(listener),
            signals,
            connections: Slab::with_capacity(config.max_connections),
            metrics: Metrics::default(),
            max_connections: config.max_connections,
            running: true,
            dump_requested: false,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "listener closed",
            )),
        }
    }

    /// Run the event loop until shutdown, then drain.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENT_BATCH);

        while self.running {
            let now = Instant::now();
            self.sweep_idle(now);

            if self.dump_requested {
                self.dump_requested = false;
                self.metrics.dump(self.connections.len());
            }

            // Indefinite wait while the map is empty; otherwise bounded by
            // the nearest idle deadline so the sweep cannot be starved.
            let timeout = self.poll_timeout(now);
            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_burst(),
                    SIGNALS => self.handle_signals(),
                    Token(id) => self.dispatch_event(id, event),
                }
            }
        }

        self.drain();
        Ok(())
    }

    fn poll_timeout(&self, now: Instant) -> Option<Duration> {
        self.connections
            .iter()
            .map(|(_, conn)| IDLE_TIMEOUT.saturating_sub(conn.idle_for(now)))
            .min()
    }

    fn handle_signals(&mut self) {
        for event in self.signals.drain() {
            match event {
                SignalEvent::Stop => self.initiate_shutdown("signal"),
                SignalEvent::DumpMetrics => self.dump_requested = true,
            }
        }
    }

    /// Stop accepting and let the loop exit after the current iteration.
    fn initiate_shutdown(&mut self, origin: &str) {
        if !self.running {
            return;
        }
        self.running = false;

        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.poll.registry().deregister(&mut listener) {
                debug!(error = %e, "listener deregister failed");
            }
            // Dropping the listener closes it; no further accepts.
        }

        info!("[CONTROL] shutdown requested via {origin}");
    }

    /// Accept until the kernel reports would-block.
    fn accept_burst(&mut self) {
        loop {
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => return,
            };

            match accepted {
                Ok((stream, peer)) => {
                    // Admission check before any other per-connection work.
                    if self.connections.len() >= self.max_connections {
                        warn!(
                            "[CONTROL] rejecting {peer}: connection limit {} reached",
                            self.max_connections
                        );
                        drop(stream);
                        continue;
                    }

                    let id = self.connections.insert(Connection::new(stream, Instant::now()));
                    let conn = &mut self.connections[id];
                    if let Err(e) = self.poll.registry().register(
                        &mut conn.stream,
                        Token(id),
                        Interest::READABLE,
                    ) {
                        error!(error = %e, "failed to register accepted connection");
                        self.connections.remove(id);
                        continue;
                    }

                    self.metrics.connections_accepted += 1;
                    debug!(id, peer = %peer, "accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Handle one readiness event for a connection.
    fn dispatch_event(&mut self, id: usize, event: &Event) {
        if !self.connections.contains(id) {
            // Stale event for a connection closed earlier in this batch.
            return;
        }

        if event.is_error() || event.is_read_closed() || event.is_write_closed() {
            self.close(id, CloseReason::PeerHangup);
            return;
        }

        if event.is_readable() {
            if let Err(reason) = self.handle_readable(id) {
                self.close(id, reason);
                return;
            }
        }

        if !self.connections.contains(id) {
            return;
        }

        if event.is_writable() {
            if let Err(reason) = self.handle_writable(id) {
                self.close(id, reason);
            }
        }
    }

    /// Read to would-block, running the framing loop after each chunk.
    fn handle_readable(&mut self, id: usize) -> Result<(), CloseReason> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let n = {
                let conn = &mut self.connections[id];
                match conn.stream.read(&mut chunk) {
                    Ok(0) => return Err(CloseReason::PeerFin),
                    Ok(n) => n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(CloseReason::Io(e)),
                }
            };

            let conn = &mut self.connections[id];
            conn.read_buf.extend_from_slice(&chunk[..n]);
            conn.touch(Instant::now());

            self.decode_frames(id)?;
        }
    }

    /// Drain completed frames from the read buffer into the dispatcher.
    fn decode_frames(&mut self, id: usize) -> Result<(), CloseReason> {
        loop {
            let payload = {
                let conn = &mut self.connections[id];
                let step = conn
                    .decoder
                    .decode(conn.read_buf.as_slice())
                    .map_err(CloseReason::Protocol)?;
                match step {
                    DecodeResult::Frame { payload, consumed } => {
                        conn.read_buf.consume(consumed);
                        payload
                    }
                    DecodeResult::Incomplete { consumed } => {
                        conn.read_buf.consume(consumed);
                        return Ok(());
                    }
                }
            };

            self.metrics.frames_received += 1;
            self.metrics.bytes_read += payload.len() as u64;

            if !self.connections[id].admit_frame(Instant::now()) {
                return Err(CloseReason::FrameFlood);
            }

            self.dispatch_command(id, payload)?;
        }
    }

    /// Interpret one frame payload and enqueue its reply.
    fn dispatch_command(&mut self, id: usize, payload: Vec<u8>) -> Result<(), CloseReason> {
        let cmd = command::parse(&payload);
        let shutdown = cmd == Command::Shutdown;

        let reply = match cmd {
            Command::Ping => b"PONG".to_vec(),
            Command::Echo(rest) => rest,
            Command::Stats => self
                .metrics
                .stats_reply(self.connections.len())
                .into_bytes(),
            // CLOSE is acknowledged but the peer initiates the FIN.
            Command::Close | Command::Shutdown => b"OK".to_vec(),
            Command::Unknown => command::ERR_UNKNOWN.to_vec(),
        };

        self.enqueue_reply(id, &reply)?;

        if shutdown {
            self.initiate_shutdown("SHUTDOWN command");
        }

        Ok(())
    }

    /// Encode a reply into the write buffer and arm WRITABLE.
    fn enqueue_reply(&mut self, id: usize, payload: &[u8]) -> Result<(), CloseReason> {
        let conn = &mut self.connections[id];
        conn.write_buf.extend_from_slice(&framing::encode(payload));

        if conn.write_buf.len() > WRITE_HIGH_WATER {
            return Err(CloseReason::WriteOverflow);
        }

        if !conn.writable_armed {
            self.poll
                .registry()
                .reregister(
                    &mut conn.stream,
                    Token(id),
                    Interest::READABLE | Interest::WRITABLE,
                )
                .map_err(CloseReason::Io)?;
            conn.writable_armed = true;
        }

        Ok(())
    }

    /// Write until empty, would-block, or the per-tick budget is spent.
    fn handle_writable(&mut self, id: usize) -> Result<(), CloseReason> {
        let mut written_this_tick = 0usize;

        loop {
            let conn = &mut self.connections[id];
            if conn.write_buf.is_empty() {
                break;
            }
            if written_this_tick >= MAX_WRITE_PER_TICK {
                // Budget spent; WRITABLE stays armed for the next tick.
                return Ok(());
            }

            let len = conn.write_buf.len().min(MAX_WRITE_PER_TICK - written_this_tick);
            match conn.stream.write(&conn.write_buf.as_slice()[..len]) {
                Ok(0) => {
                    return Err(CloseReason::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write returned 0",
                    )))
                }
                Ok(n) => {
                    conn.write_buf.consume(n);
                    conn.touch(Instant::now());
                    written_this_tick += n;
                    self.metrics.bytes_written += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CloseReason::Io(e)),
            }
        }

        // Buffer drained; drop WRITABLE interest.
        let conn = &mut self.connections[id];
        if conn.writable_armed {
            self.poll
                .registry()
                .reregister(&mut conn.stream, Token(id), Interest::READABLE)
                .map_err(CloseReason::Io)?;
            conn.writable_armed = false;
        }

        Ok(())
    }

    /// Close connections that exceeded the inactivity window.
    fn sweep_idle(&mut self, now: Instant) {
        let expired: Vec<usize> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.idle_for(now) > IDLE_TIMEOUT)
            .map(|(id, _)| id)
            .collect();

        for id in expired {
            self.close(id, CloseReason::IdleTimeout);
        }
    }

    /// Terminate a connection: deregister, close the descriptor, erase the
    /// map entry, count it, log the reason. No-op for unknown ids.
    fn close(&mut self, id: usize, reason: CloseReason) {
        let Some(mut conn) = self.connections.try_remove(id) else {
            return;
        };

        if let Err(e) = self.poll.registry().deregister(&mut conn.stream) {
            debug!(id, error = %e, "deregister failed");
        }

        self.metrics.connections_closed += 1;

        let fd = conn.stream.as_raw_fd();
        match &reason {
            CloseReason::Protocol(_) | CloseReason::WriteOverflow | CloseReason::FrameFlood => {
                warn!("{} fd={} reason={}", reason.tag(), fd, reason);
            }
            CloseReason::Shutdown => {
                info!("{} fd={} reason={}", reason.tag(), fd, reason);
            }
            _ => {
                debug!("{} fd={} reason={}", reason.tag(), fd, reason);
            }
        }
        // Dropping the stream closes the descriptor, exactly once.
    }

    /// Close every remaining connection. The listener was already released
    /// when shutdown was initiated; the poller closes when the server drops.
    fn drain(&mut self) {
        info!(
            connections = self.connections.len(),
            "[CONTROL] draining remaining connections"
        );

        let ids: Vec<usize> = self.connections.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.flush_best_effort(id);
            self.close(id, CloseReason::Shutdown);
        }
    }

    /// One non-blocking write pass so already-queued replies (the OK for
    /// SHUTDOWN in particular) reach well-behaved peers before the close.
    fn flush_best_effort(&mut self, id: usize) {
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        if conn.write_buf.is_empty() {
            return;
        }
        if let Ok(n) = conn.stream.write(conn.write_buf.as_slice()) {
            conn.write_buf.consume(n);
            self.metrics.bytes_written += n as u64;
        }
    }
}
