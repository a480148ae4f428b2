//! Process-wide counters.
//!
//! All counters are mutated on the loop thread only, so they are plain
//! u64s. The STATS command renders them as a reply frame; SIGUSR1 renders
//! them as a one-line dump on stdout.

/// Monotonic server counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Metrics {
    pub connections_accepted: u64,
    pub connections_closed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub frames_received: u64,
}

impl Metrics {
    /// Render the STATS reply payload.
    ///
    /// LF-separated, no trailing newline; `connections` is the live
    /// connection count at the time of the request.
    pub fn stats_reply(&self, connections: usize) -> String {
        format!(
            "connections={}\naccepted={}\nclosed={}\nframes={}\nbytes_read={}\nbytes_written={}",
            connections,
            self.connections_accepted,
            self.connections_closed,
            self.frames_received,
            self.bytes_read,
            self.bytes_written,
        )
    }

    /// Write the one-line summary requested via SIGUSR1 to stdout.
    pub fn dump(&self, connections: usize) {
        println!(
            "[METRICS] connections={} accepted={} closed={} frames={} bytes_read={} bytes_written={}",
            connections,
            self.connections_accepted,
            self.connections_closed,
            self.frames_received,
            self.bytes_read,
            self.bytes_written,
        );
    }
}
