//! Line-delimited JSON codec for TCP framing
//!
//! All messages are framed as:
//! ```text
//! [ N bytes: UTF-8 JSON document ][ '\n' ]
//! ```
//!
//! A trailing `\r` before the newline is tolerated and blank lines are
//! skipped, so a terminal client can talk to the server directly.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum frame size (64 KiB) to prevent memory exhaustion
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("JSON decode error: {0}")]
    DecodeError(#[source] serde_json::Error),

    #[error("JSON encode error: {0}")]
    EncodeError(#[source] serde_json::Error),
}

/// Encode a message into a newline-terminated frame
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a message directly into a provided buffer
pub fn encode_into<T: Serialize>(message: &T, buf: &mut BytesMut) -> Result<(), CodecError> {
    let json = serde_json::to_vec(message).map_err(CodecError::EncodeError)?;

    if json.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(json.len()));
    }

    buf.reserve(json.len() + 1);
    buf.put_slice(&json);
    buf.put_u8(b'\n');
    Ok(())
}

/// Try to split one frame off the front of a buffer
///
/// Returns:
/// - `Ok(Some(frame))` if a complete frame was found (newline stripped)
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the pending frame exceeds `MAX_FRAME_SIZE`
pub fn decode(buf: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
    loop {
        let Some(newline) = buf.iter().position(|b| *b == b'\n') else {
            if buf.len() > MAX_FRAME_SIZE {
                return Err(CodecError::FrameTooLarge(buf.len()));
            }
            return Ok(None);
        };

        if newline > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(newline));
        }

        let mut line = buf.split_to(newline + 1);
        line.truncate(newline);
        if line.last() == Some(&b'\r') {
            line.truncate(newline - 1);
        }

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        return Ok(Some(line.freeze()));
    }
}

/// Decode a frame as a JSON message
pub fn decode_json<T: DeserializeOwned>(frame: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(frame).map_err(CodecError::DecodeError)
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Bytes>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Response, Telemetry};

    #[test]
    fn test_encode_appends_newline() {
        let encoded = encode(&Response::success(&Telemetry::default())).expect("encode failed");
        assert_eq!(encoded.last(), Some(&b'\n'));
        assert_eq!(encoded.iter().filter(|b| **b == b'\n').count(), 1);

        let decoded: Response = decode_json(&encoded[..encoded.len() - 1]).expect("decode failed");
        assert!(matches!(decoded, Response::Success { .. }));
    }

    #[test]
    fn test_partial_decode() {
        let mut buf = BytesMut::from(&b"{\"speed\": 1"[..]);
        let result = decode(&mut buf).expect("decode should not fail on partial data");
        assert!(result.is_none(), "should return None for partial data");

        // Buffer should be unchanged (data not consumed)
        assert_eq!(buf.len(), 11);
    }

    #[test]
    fn test_frame_decoder() {
        let mut decoder = FrameDecoder::new();

        // Feed data in chunks
        decoder.extend(b"{\"speed\": 1, ");
        assert!(decoder.decode_next().expect("decode error").is_none());

        decoder.extend(b"\"altitude\": 0, \"movement\": \"fwd\"}\r\n");
        let frame = decoder
            .decode_next()
            .expect("decode error")
            .expect("should have frame");

        assert_eq!(&frame[..], &b"{\"speed\": 1, \"altitude\": 0, \"movement\": \"fwd\"}"[..]);
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_multiple_frames_and_blank_lines() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"{\"a\":1}\n\n  \n{\"b\":2}\n{\"c\"");

        assert_eq!(&decoder.decode_next().unwrap().unwrap()[..], b"{\"a\":1}");
        assert_eq!(&decoder.decode_next().unwrap().unwrap()[..], b"{\"b\":2}");
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.buffer_len(), 4);
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_bytes(b'x', MAX_FRAME_SIZE + 1);

        let result = decode(&mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge(_))));
    }
}
