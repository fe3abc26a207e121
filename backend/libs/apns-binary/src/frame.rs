//! Simple notification format frames
//!
//! ```text
//! | command (u8) = 0 | token length (u16 BE) = 32 | token (32 bytes) |
//! | payload length (u16 BE) | payload |
//! ```

use crate::error::{FrameError, FrameResult};
use crate::payload::MAX_PAYLOAD_SIZE;

pub const COMMAND: u8 = 0;
pub const TOKEN_LENGTH: usize = 32;
/// Bytes before the payload
pub const HEADER_LENGTH: usize = 1 + 2 + TOKEN_LENGTH + 2;

/// Decodes a 64 character hex device token into its 32 raw bytes
pub fn decode_token(token: &str) -> FrameResult<[u8; TOKEN_LENGTH]> {
    let bytes = hex::decode(token).map_err(|_| FrameError::InvalidToken(token_prefix(token)))?;

    bytes
        .try_into()
        .map_err(|_| FrameError::InvalidToken(token_prefix(token)))
}

fn token_prefix(token: &str) -> String {
    token.chars().take(8).collect()
}

/// Packs one payload for one device
pub fn pack(payload: &[u8], token: &str) -> FrameResult<Vec<u8>> {
    if payload.is_empty() {
        return Err(FrameError::EmptyPayload);
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let token = decode_token(token)?;

    let mut frame = Vec::with_capacity(HEADER_LENGTH + payload.len());
    frame.push(COMMAND);
    frame.extend_from_slice(&(TOKEN_LENGTH as u16).to_be_bytes());
    frame.extend_from_slice(&token);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u8,
    pub token: [u8; TOKEN_LENGTH],
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn token_hex(&self) -> String {
        hex::encode(self.token)
    }
}

/// Parses the frame at the start of `bytes`, returning it and the bytes consumed
pub fn unpack(bytes: &[u8]) -> FrameResult<(Frame, usize)> {
    if bytes.len() < HEADER_LENGTH {
        return Err(FrameError::Truncated {
            expected: HEADER_LENGTH,
            actual: bytes.len(),
        });
    }

    let command = bytes[0];
    if command != COMMAND {
        return Err(FrameError::UnexpectedCommand(command));
    }

    let token_len = u16::from_be_bytes([bytes[1], bytes[2]]);
    if token_len as usize != TOKEN_LENGTH {
        return Err(FrameError::UnexpectedTokenLength(token_len));
    }

    let mut token = [0u8; TOKEN_LENGTH];
    token.copy_from_slice(&bytes[3..3 + TOKEN_LENGTH]);

    let payload_len = u16::from_be_bytes([bytes[35], bytes[36]]) as usize;
    let total = HEADER_LENGTH + payload_len;
    if bytes.len() < total {
        return Err(FrameError::Truncated {
            expected: total,
            actual: bytes.len(),
        });
    }

    let frame = Frame {
        command,
        token,
        payload: bytes[HEADER_LENGTH..total].to_vec(),
    };
    Ok((frame, total))
}

/// Splits a stream of back to back frames
pub fn unpack_all(mut bytes: &[u8]) -> FrameResult<Vec<Frame>> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let (frame, used) = unpack(bytes)?;
        frames.push(frame);
        bytes = &bytes[used..];
    }
    Ok(frames)
}
