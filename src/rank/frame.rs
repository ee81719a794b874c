use std::io::{self, Read};

use crate::error::TransportError;
use crate::rank::Token;

/// Encoded frame length: `sender: u32 LE | token: u64 LE`.
pub const FRAME_LEN: usize = 12;

/// One token message with its transport-level sender envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Rank that sent the frame.
    pub sender: u32,
    /// Payload: the successor rank.
    pub token: Token,
}

impl Frame {
    /// Encode to the fixed wire layout.
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[..4].copy_from_slice(&self.sender.to_le_bytes());
        buf[4..].copy_from_slice(&self.token.to_le_bytes());
        buf
    }

    /// Decode from exactly [`FRAME_LEN`] bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, TransportError> {
        if buf.len() != FRAME_LEN {
            return Err(TransportError::Frame(format!(
                "expected {FRAME_LEN} bytes, got {}",
                buf.len()
            )));
        }
        let mut sender = [0u8; 4];
        let mut token = [0u8; 8];
        sender.copy_from_slice(&buf[..4]);
        token.copy_from_slice(&buf[4..]);
        Ok(Self {
            sender: u32::from_le_bytes(sender),
            token: Token::from_le_bytes(token),
        })
    }

    /// Read one frame from a stream.
    pub fn read_from(r: &mut impl Read) -> Result<Self, TransportError> {
        let mut buf = [0u8; FRAME_LEN];
        r.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => TransportError::Frame("truncated frame".into()),
            _ => TransportError::Io {
                path: "<stream>".into(),
                source: e,
            },
        })?;
        Self::decode(&buf)
    }
}
