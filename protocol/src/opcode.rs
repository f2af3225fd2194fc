use crate::error::ProtocolError;

/// Signaling opcodes for the voice gateway.
///
/// The numeric values are part of the wire contract and must not change.
/// `Speaking`, `Resume` and `Resumed` are defined by the gateway but not
/// used during the connect handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Opcode {
    Identify = 0,
    SelectProtocol = 1,
    Ready = 2,
    Heartbeat = 3,
    SessionDescription = 4,
    Speaking = 5,
    HeartbeatAck = 6,
    Resume = 7,
    Hello = 8,
    Resumed = 9,
    Disconnect = 13,
}

impl Opcode {
    /// Returns the wire value of this opcode.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a wire value back into an opcode.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Identify),
            1 => Ok(Self::SelectProtocol),
            2 => Ok(Self::Ready),
            3 => Ok(Self::Heartbeat),
            4 => Ok(Self::SessionDescription),
            5 => Ok(Self::Speaking),
            6 => Ok(Self::HeartbeatAck),
            7 => Ok(Self::Resume),
            8 => Ok(Self::Hello),
            9 => Ok(Self::Resumed),
            13 => Ok(Self::Disconnect),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}
