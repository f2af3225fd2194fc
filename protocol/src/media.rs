use crate::error::ProtocolError;

/// Length of the media packet header preceding the sealed payload. Its
/// first 12 bytes also seed the 24-byte decryption nonce.
pub const HEADER_LEN: usize = 12;

/// CSRC count mask in header byte 0 (low nibble).
const CSRC_COUNT_MASK: u8 = 0b1111;

/// Extension-header flag in header byte 0.
const EXTENSION_FLAG: u8 = 0b1_0000;

/// Splits an inbound media datagram into its 12-byte header and the sealed
/// payload (ciphertext plus authentication tag).
pub fn split_packet(packet: &[u8]) -> Result<(&[u8], &[u8]), ProtocolError> {
    if packet.len() < HEADER_LEN {
        return Err(ProtocolError::PacketTooShort {
            expected: HEADER_LEN,
            got: packet.len(),
        });
    }
    Ok(packet.split_at(HEADER_LEN))
}

/// Trims transport framing from a decrypted payload, leaving one Opus frame.
///
/// The low nibble of header byte 0 is the CSRC count; each CSRC entry is 4
/// bytes at the front of the plaintext. Bit 4 marks an extension header: a
/// big-endian u16 word count at offset 2, the extension spanning
/// `4 + count * 4` bytes, followed by zero padding. A malformed skip region
/// is a per-packet error, not a stream failure.
pub fn strip_frame(header_byte0: u8, plaintext: &[u8]) -> Result<&[u8], ProtocolError> {
    let mut data = plaintext;

    let csrc_count = usize::from(header_byte0 & CSRC_COUNT_MASK);
    if csrc_count > 0 {
        let skip = csrc_count * 4;
        data = data.get(skip..).ok_or(ProtocolError::PacketTooShort {
            expected: skip,
            got: data.len(),
        })?;
    }

    if header_byte0 & EXTENSION_FLAG != 0 {
        if data.len() < 4 {
            return Err(ProtocolError::PacketTooShort {
                expected: 4,
                got: data.len(),
            });
        }
        let words = usize::from(u16::from_be_bytes([data[2], data[3]]));
        let mut index = 4 + words * 4;
        if index > data.len() {
            return Err(ProtocolError::PacketTooShort {
                expected: index,
                got: data.len(),
            });
        }
        while index < data.len() && data[index] == 0 {
            index += 1;
        }
        data = &data[index..];
    }

    Ok(data)
}
