pub mod crypto;
pub mod decoder;
pub mod error;
pub mod event;
pub mod session;
mod signaling;
mod transport;

pub use crypto::PacketCipher;
pub use decoder::AudioDecoder;
pub use error::VoiceError;
pub use event::VoiceEvent;
pub use session::{VoiceConfig, VoiceSession};
pub use transport::MediaTransport;
