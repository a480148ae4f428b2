//! Wire protocol: length-prefixed framing and the ASCII command table.
//!
//! Every message on the wire is a frame: a 4-byte big-endian length
//! followed by that many payload bytes. Request payloads are ASCII
//! commands; replies reuse the same framing.

pub mod command;
pub mod framing;

pub use command::Command;
pub use framing::{FrameDecoder, FrameError, MAX_FRAME_LEN};
