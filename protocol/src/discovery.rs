use crate::error::ProtocolError;

/// Size of the discovery probe datagram.
pub const PROBE_LEN: usize = 70;

/// Minimum size of a parseable reply: ssrc echo, one ip byte, terminator,
/// and the trailing port.
const MIN_REPLY_LEN: usize = 4 + 1 + 1 + 2;

/// Builds the discovery probe: ssrc as big-endian u32, zero-padded to 70
/// bytes. The media server echoes back our externally visible address.
#[must_use]
pub fn encode_probe(ssrc: u32) -> [u8; PROBE_LEN] {
    let mut probe = [0u8; PROBE_LEN];
    probe[..4].copy_from_slice(&ssrc.to_be_bytes());
    probe
}

/// Parses the discovery reply: a NUL-terminated ASCII IP string starting at
/// byte 4, and the external port as big-endian u16 in the last two bytes.
pub fn decode_reply(reply: &[u8]) -> Result<(String, u16), ProtocolError> {
    if reply.len() < MIN_REPLY_LEN {
        return Err(ProtocolError::PacketTooShort {
            expected: MIN_REPLY_LEN,
            got: reply.len(),
        });
    }

    let ip_region = &reply[4..reply.len() - 2];
    let ip_len = ip_region
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::MalformedDiscoveryReply(
            "ip string is not NUL-terminated",
        ))?;
    let ip = std::str::from_utf8(&ip_region[..ip_len])
        .map_err(|_| ProtocolError::MalformedDiscoveryReply("ip string is not ascii"))?
        .to_string();
    if ip.is_empty() {
        return Err(ProtocolError::MalformedDiscoveryReply("ip string is empty"));
    }

    let port_bytes: [u8; 2] = reply[reply.len() - 2..]
        .try_into()
        .map_err(|_| ProtocolError::MalformedDiscoveryReply("missing port bytes"))?;
    let port = u16::from_be_bytes(port_bytes);

    Ok((ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_encodes_ssrc_big_endian() {
        let probe = encode_probe(777);
        assert_eq!(probe.len(), 70);
        assert_eq!(&probe[..4], &[0x00, 0x00, 0x03, 0x09]);
        assert!(probe[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn probe_encodes_max_ssrc() {
        let probe = encode_probe(u32::MAX);
        assert_eq!(&probe[..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn reply_parses_ip_and_port() {
        let mut reply = vec![0u8; 70];
        reply[4..12].copy_from_slice(b"9.9.9.9\0");
        reply[68..70].copy_from_slice(&50004u16.to_be_bytes());

        let (ip, port) = decode_reply(&reply).expect("parse reply");
        assert_eq!(ip, "9.9.9.9");
        assert_eq!(port, 50004);
    }

    #[test]
    fn reply_too_short_is_rejected() {
        assert!(matches!(
            decode_reply(&[0u8; 4]),
            Err(ProtocolError::PacketTooShort { .. })
        ));
    }

    #[test]
    fn reply_without_terminator_is_rejected() {
        let mut reply = vec![0u8; 16];
        reply[4..14].fill(b'1');
        assert!(matches!(
            decode_reply(&reply),
            Err(ProtocolError::MalformedDiscoveryReply(_))
        ));
    }

    #[test]
    fn reply_with_empty_ip_is_rejected() {
        let reply = vec![0u8; 16];
        assert!(matches!(
            decode_reply(&reply),
            Err(ProtocolError::MalformedDiscoveryReply(_))
        ));
    }
}
