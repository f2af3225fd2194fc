use thiserror::Error;

/// Protocol decoding errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed signaling message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),
    #[error("packet too short: expected at least {expected} bytes, got {got}")]
    PacketTooShort { expected: usize, got: usize },
    #[error("malformed discovery reply: {0}")]
    MalformedDiscoveryReply(&'static str),
    #[error("invalid secret key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}
