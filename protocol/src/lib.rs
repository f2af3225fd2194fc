pub mod discovery;
pub mod error;
pub mod media;
pub mod opcode;
pub mod signaling;

pub use error::ProtocolError;
pub use opcode::Opcode;
pub use signaling::{
    GatewayMessage, Hello, Identify, Ready, SelectProtocol, SelectProtocolData,
    SessionDescription, ENCRYPTION_MODE,
};

pub use discovery::{decode_reply, encode_probe, PROBE_LEN};
pub use media::{split_packet, strip_frame, HEADER_LEN};
