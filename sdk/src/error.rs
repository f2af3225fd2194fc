use thiserror::Error;
use voicegate_protocol::ProtocolError;

/// Errors surfaced by the voice transport.
///
/// `Configuration` and `ConnectionFailed` are fatal for the current
/// handshake; `Decrypt` and `Decode` are per-packet and recoverable.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("disconnected from voice server")]
    Disconnected,
    #[error("ip discovery failed: {0}")]
    Discovery(String),
    #[error("packet decryption failed: {0}")]
    Decrypt(String),
    #[error("audio decode failed: {0}")]
    Decode(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
