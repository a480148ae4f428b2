//! ASCII command table.
//!
//! A decoded frame payload is matched against the command table after
//! trimming trailing whitespace (space, CR, LF). Commands are
//! case-sensitive; anything unrecognized maps to `Unknown` and is answered
//! with an error reply rather than a close.

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness probe; answered with `PONG`.
    Ping,
    /// Echo the bytes after `ECHO ` back verbatim.
    Echo(Vec<u8>),
    /// Request the metrics block.
    Stats,
    /// Acknowledged with `OK`; the peer is expected to close.
    Close,
    /// Acknowledged with `OK`, then the server shuts down gracefully.
    Shutdown,
    /// Anything else; answered with `ERR unknown command`.
    Unknown,
}

/// Reply payload for unrecognized commands.
pub const ERR_UNKNOWN: &[u8] = b"ERR unknown command";

/// Parse a frame payload into a command.
pub fn parse(payload: &[u8]) -> Command {
    // Bytes after `ECHO ` are echoed verbatim, so the rest is sliced from
    // the untrimmed payload; trailing whitespace that belongs to it
    // survives.
    if payload.len() > 5 && payload.starts_with(b"ECHO ") {
        return Command::Echo(payload[5..].to_vec());
    }

    match trim_trailing(payload) {
        b"PING" => Command::Ping,
        b"STATS" => Command::Stats,
        b"CLOSE" => Command::Close,
        b"SHUTDOWN" => Command::Shutdown,
        _ => Command::Unknown,
    }
}

/// Strip trailing space, CR and LF bytes.
fn trim_trailing(payload: &[u8]) -> &[u8] {
    let mut end = payload.len();
    while end > 0 && matches!(payload[end - 1], b' ' | b'\r' | b'\n') {
        end -= 1;
    }
    &payload[..end]
}
