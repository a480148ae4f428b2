//! Length-prefixed frame codec.
//!
//! The decoder is an explicit two-state machine: awaiting a 4-byte
//! big-endian length, or awaiting that many body bytes. It operates on a
//! borrowed input slice and reports how many bytes it consumed, so the
//! same byte stream yields the same frame sequence no matter how it is
//! split across reads.

/// Largest accepted frame payload (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Size of the length prefix.
pub const LEN_PREFIX: usize = 4;

/// Decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for the 4-byte length prefix.
    AwaitingLen,
    /// Length parsed; waiting for `expected` body bytes.
    AwaitingBody { expected: u32 },
}

/// Protocol violations that close the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Length prefix of zero.
    ZeroLength,
    /// Length prefix above `MAX_FRAME_LEN`.
    Oversized(u32),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::ZeroLength => write!(f, "zero-length frame"),
            FrameError::Oversized(len) => {
                write!(f, "frame length {len} exceeds limit {MAX_FRAME_LEN}")
            }
        }
    }
}

/// One step of decoding.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeResult {
    /// Not enough input for the next frame; `consumed` bytes (a parsed
    /// length prefix) should still be dropped from the input.
    Incomplete { consumed: usize },
    /// A complete frame payload and the bytes consumed producing it.
    Frame { payload: Vec<u8>, consumed: usize },
}

/// Streaming frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::AwaitingLen,
        }
    }

    /// Attempt to decode the next frame from `input`.
    ///
    /// The caller must drop `consumed` bytes from the front of its buffer
    /// after every call, including `Incomplete` results (a length prefix
    /// is consumed as soon as it parses).
    pub fn decode(&mut self, input: &[u8]) -> Result<DecodeResult, FrameError> {
        let mut consumed = 0;

        let expected = match self.state {
            DecodeState::AwaitingLen => {
                if input.len() < LEN_PREFIX {
                    return Ok(DecodeResult::Incomplete { consumed: 0 });
                }

                let mut len_bytes = [0u8; LEN_PREFIX];
                len_bytes.copy_from_slice(&input[..LEN_PREFIX]);
                let expected = u32::from_be_bytes(len_bytes);
                consumed += LEN_PREFIX;

                if expected == 0 {
                    return Err(FrameError::ZeroLength);
                }
                if expected as usize > MAX_FRAME_LEN {
                    return Err(FrameError::Oversized(expected));
                }

                self.state = DecodeState::AwaitingBody { expected };
                expected
            }
            DecodeState::AwaitingBody { expected } => expected,
        };

        let body = &input[consumed..];
        if body.len() < expected as usize {
            return Ok(DecodeResult::Incomplete { consumed });
        }

        let payload = body[..expected as usize].to_vec();
        consumed += expected as usize;
        self.state = DecodeState::AwaitingLen;

        Ok(DecodeResult::Frame { payload, consumed })
    }
}

/// Encode a reply payload as a frame.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_PREFIX + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        encode(payload)
    }

    /// Drive the decoder over `input`, consuming as the contract requires.
    fn decode_all(decoder: &mut FrameDecoder, mut input: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        loop {
            match decoder.decode(input).unwrap() {
                DecodeResult::Frame { payload, consumed } => {
                    frames.push(payload);
                    input = &input[consumed..];
                }
                DecodeResult::Incomplete { consumed } => {
                    input = &input[consumed..];
                    assert!(input.len() < LEN_PREFIX || consumed > 0);
                    return frames;
                }
            }
        }
    }

    #[test]
    fn test_decode_single_frame() {
        let mut decoder = FrameDecoder::new();
        match decoder.decode(&frame(b"PING")).unwrap() {
            DecodeResult::Frame { payload, consumed } => {
                assert_eq!(payload, b"PING");
                assert_eq!(consumed, 8);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_decode_coalesced_frames_in_order() {
        let mut input = frame(b"PING");
        input.extend_from_slice(&frame(b"ECHO hi"));

        let mut decoder = FrameDecoder::new();
        let frames = decode_all(&mut decoder, &input);
        assert_eq!(frames, vec![b"PING".to_vec(), b"ECHO hi".to_vec()]);
    }

    #[test]
    fn test_decode_split_arbitrarily() {
        // A frame delivered one byte at a time must decode identically.
        let input = frame(b"ECHO test");
        let mut decoder = FrameDecoder::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut frames = Vec::new();

        for &byte in &input {
            pending.push(byte);
            match decoder.decode(&pending).unwrap() {
                DecodeResult::Frame { payload, consumed } => {
                    frames.push(payload);
                    pending.drain(..consumed);
                }
                DecodeResult::Incomplete { consumed } => {
                    pending.drain(..consumed);
                }
            }
        }

        assert_eq!(frames, vec![b"ECHO test".to_vec()]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_prefix_consumed_before_body_arrives() {
        let mut decoder = FrameDecoder::new();
        // Length prefix for a 9-byte body, body not yet delivered.
        match decoder.decode(&9u32.to_be_bytes()).unwrap() {
            DecodeResult::Incomplete { consumed } => assert_eq!(consumed, LEN_PREFIX),
            other => panic!("unexpected: {other:?}"),
        }

        // The body alone now completes the frame.
        match decoder.decode(b"ECHO test").unwrap() {
            DecodeResult::Frame { payload, consumed } => {
                assert_eq!(payload, b"ECHO test");
                assert_eq!(consumed, 9);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(
            decoder.decode(&0u32.to_be_bytes()),
            Err(FrameError::ZeroLength)
        );
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut decoder = FrameDecoder::new();
        let len = (MAX_FRAME_LEN as u32) + 1;
        assert_eq!(
            decoder.decode(&len.to_be_bytes()),
            Err(FrameError::Oversized(len))
        );
    }

    #[test]
    fn test_max_length_accepted() {
        let payload = vec![0x42u8; MAX_FRAME_LEN];
        let input = frame(&payload);

        let mut decoder = FrameDecoder::new();
        match decoder.decode(&input).unwrap() {
            DecodeResult::Frame { payload: p, .. } => assert_eq!(p.len(), MAX_FRAME_LEN),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_encode_decode_identity() {
        let payload = b"STATS".to_vec();
        let mut decoder = FrameDecoder::new();
        let frames = decode_all(&mut decoder, &frame(&payload));
        assert_eq!(frames, vec![payload]);
    }
}
