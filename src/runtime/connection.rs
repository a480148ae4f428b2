//! Per-client connection state.
//!
//! Each accepted client gets one `Connection`: the stream, read/write
//! buffers, framing state, an activity timestamp for the idle sweep, and
//! a sliding-window frame counter for flood protection.

use std::time::{Duration, Instant};

use mio::net::TcpStream;

use crate::protocol::FrameDecoder;
use crate::runtime::buffer::ByteBuffer;

/// Outbound bytes above this close the connection (write buffer overflow).
pub const WRITE_HIGH_WATER: usize = 512 * 1024;

/// Reserved for pause/resume of reads; not currently used to gate reads.
#[allow(dead_code)]
pub const WRITE_LOW_WATER: usize = 128 * 1024;

/// Frames allowed per connection per rolling second.
pub const MAX_FRAMES_PER_SEC: u32 = 1000;

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub read_buf: ByteBuffer,
    pub write_buf: ByteBuffer,
    pub decoder: FrameDecoder,
    /// Updated on every successful read or write; drives the idle sweep.
    pub last_activity: Instant,
    /// Whether WRITABLE interest is currently registered.
    pub writable_armed: bool,
    limiter: FrameRateLimiter,
}

impl Connection {
    pub fn new(stream: TcpStream, now: Instant) -> Self {
        Self {
            stream,
            read_buf: ByteBuffer::new(),
            write_buf: ByteBuffer::new(),
            decoder: FrameDecoder::new(),
            last_activity: now,
            writable_armed: false,
            limiter: FrameRateLimiter::new(now),
        }
    }

    /// Record read/write activity.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Time since the last successful read or write.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_activity)
    }

    /// Count a delivered frame; `false` means the flood limit was hit.
    pub fn admit_frame(&mut self, now: Instant) -> bool {
        self.limiter.admit(now)
    }
}

/// Sliding one-second frame counter.
#[derive(Debug)]
struct FrameRateLimiter {
    frames_in_window: u32,
    window_start: Instant,
}

impl FrameRateLimiter {
    fn new(now: Instant) -> Self {
        Self {
            frames_in_window: 0,
            window_start: now,
        }
    }

    fn admit(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) > Duration::from_secs(1) {
            self.frames_in_window = 0;
            self.window_start = now;
        }

        self.frames_in_window += 1;
        self.frames_in_window <= MAX_FRAMES_PER_SEC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_admits_up_to_cap() {
        let now = Instant::now();
        let mut limiter = FrameRateLimiter::new(now);

        for _ in 0..MAX_FRAMES_PER_SEC {
            assert!(limiter.admit(now));
        }
        assert!(!limiter.admit(now));
    }

    #[test]
    fn test_limiter_window_resets() {
        let now = Instant::now();
        let mut limiter = FrameRateLimiter::new(now);

        for _ in 0..MAX_FRAMES_PER_SEC {
            assert!(limiter.admit(now));
        }
        assert!(!limiter.admit(now));

        // A new window admits again.
        let later = now + Duration::from_millis(1100);
        assert!(limiter.admit(later));
    }

    #[test]
    fn test_limiter_counts_across_same_window() {
        let now = Instant::now();
        let mut limiter = FrameRateLimiter::new(now);

        // Half a second in, the window has not reset.
        let mid = now + Duration::from_millis(500);
        for _ in 0..MAX_FRAMES_PER_SEC {
            assert!(limiter.admit(mid));
        }
        assert!(!limiter.admit(mid));
    }
}
