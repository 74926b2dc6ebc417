//! Frame boundaries on the wire
//!
//! The engine endpoint decides how one message is delimited on the socket.
//! Two conventions are supported:
//! - `LineFraming`: one message per newline-terminated line
//! - `UnrealCvFraming`: 4-byte magic, 4-byte little-endian length, payload

use placer_core::{PlacerError, Result};

/// Maximum accepted payload size (64MB)
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Splits a byte stream into message payloads and wraps payloads for sending
pub trait Framing: Send + Sync {
    /// Wrap a payload into a complete frame
    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>>;

    /// Take one complete payload off the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a frame; the
    /// caller keeps reading and calls again.
    fn decode(&self, buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>>;
}

/// Newline-delimited frames. A trailing `\r` is stripped.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFraming;

impl Framing for LineFraming {
    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.contains(&b'\n') {
            return Err(PlacerError::Protocol(
                "line-framed payload contains a newline".into(),
            ));
        }
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.extend_from_slice(payload);
        frame.push(b'\n');
        Ok(frame)
    }

    fn decode(&self, buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>> {
        let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
            if buf.len() > MAX_FRAME_LEN {
                buf.clear();
                return Err(PlacerError::Protocol(format!(
                    "Line exceeds {} bytes without delimiter",
                    MAX_FRAME_LEN
                )));
            }
            return Ok(None);
        };

        let mut line: Vec<u8> = buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}

/// UnrealCV server framing
#[derive(Debug, Clone, Copy, Default)]
pub struct UnrealCvFraming;

impl UnrealCvFraming {
    /// Frame marker preceding every message
    pub const MAGIC: u32 = 0x9E2B_83C1;
    const HEADER_LEN: usize = 8;
}

impl Framing for UnrealCvFraming {
    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(PlacerError::Protocol(format!(
                "Message too large: {} bytes",
                payload.len()
            )));
        }
        let mut frame = Vec::with_capacity(Self::HEADER_LEN + payload.len());
        frame.extend_from_slice(&Self::MAGIC.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    fn decode(&self, buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != Self::MAGIC {
            // The stream is out of sync; drop what we have and start over
            buf.clear();
            return Err(PlacerError::Protocol(format!(
                "Bad frame magic: {:#010x}",
                magic
            )));
        }

        if buf.len() < Self::HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        if len > MAX_FRAME_LEN {
            buf.clear();
            return Err(PlacerError::Protocol(format!(
                "Message too large: {} bytes",
                len
            )));
        }

        if buf.len() < Self::HEADER_LEN + len {
            return Ok(None);
        }

        let payload = buf[Self::HEADER_LEN..Self::HEADER_LEN + len].to_vec();
        buf.drain(..Self::HEADER_LEN + len);
        Ok(Some(payload))
    }
}
