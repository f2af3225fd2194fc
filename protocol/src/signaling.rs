use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::opcode::Opcode;

/// Encryption mode negotiated in SELECT_PROTOCOL.
pub const ENCRYPTION_MODE: &str = "xsalsa20_poly1305";

/// Envelope for every message on the signaling channel.
///
/// `op` is the raw opcode value, `s` is the server-assigned sequence number
/// (present on some inbound messages, advisory only) and `d` is the
/// opcode-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default)]
    pub d: Value,
}

impl GatewayMessage {
    /// Builds a message from an opcode and a serializable payload.
    pub fn new<T: Serialize>(opcode: Opcode, payload: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            op: opcode.as_u8(),
            s: None,
            d: serde_json::to_value(payload)?,
        })
    }

    /// Parses a message from its JSON text form.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serializes the message to its JSON text form.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the typed opcode, rejecting values outside the table.
    pub fn opcode(&self) -> Result<Opcode, ProtocolError> {
        Opcode::from_u8(self.op)
    }

    /// Deserializes the payload into an opcode-specific type.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_value(self.d.clone())?)
    }

    /// Outbound IDENTIFY, opening the handshake.
    pub fn identify(
        server_id: &str,
        user_id: &str,
        session_id: &str,
        token: &str,
    ) -> Result<Self, ProtocolError> {
        Self::new(
            Opcode::Identify,
            &Identify {
                server_id: server_id.to_string(),
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
                token: token.to_string(),
            },
        )
    }

    /// Outbound SELECT_PROTOCOL carrying the discovered external address.
    pub fn select_protocol(address: &str, port: u16) -> Result<Self, ProtocolError> {
        Self::new(
            Opcode::SelectProtocol,
            &SelectProtocol {
                protocol: "udp".to_string(),
                data: SelectProtocolData {
                    address: address.to_string(),
                    port,
                    mode: ENCRYPTION_MODE.to_string(),
                },
            },
        )
    }

    /// Outbound HEARTBEAT with an opaque nonce.
    pub fn heartbeat(nonce: u64) -> Result<Self, ProtocolError> {
        Self::new(Opcode::Heartbeat, &nonce)
    }
}

/// IDENTIFY payload: credentials for one guild voice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identify {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

/// SELECT_PROTOCOL payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectProtocol {
    pub protocol: String,
    pub data: SelectProtocolData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

/// HELLO payload: tells the client how often to heartbeat.
#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

/// READY payload: the media server address and this client's ssrc.
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

/// SESSION_DESCRIPTION payload: the symmetric media key.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDescription {
    #[serde(default)]
    pub mode: Option<String>,
    pub secret_key: Vec<u8>,
}

impl SessionDescription {
    /// Returns the key as a fixed 32-byte array, rejecting other lengths.
    pub fn key(&self) -> Result<[u8; 32], ProtocolError> {
        self.secret_key
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::InvalidKeyLength(self.secret_key.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_serializes_expected_fields() {
        let message = GatewayMessage::identify("guild-1", "user-2", "session-3", "token-4")
            .expect("build identify");
        assert_eq!(message.op, 0);

        let json = message.encode().expect("encode");
        let value: Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["op"], 0);
        assert_eq!(value["d"]["server_id"], "guild-1");
        assert_eq!(value["d"]["user_id"], "user-2");
        assert_eq!(value["d"]["session_id"], "session-3");
        assert_eq!(value["d"]["token"], "token-4");
        // The sequence field is outbound-omitted entirely.
        assert!(value.get("s").is_none());
    }

    #[test]
    fn select_protocol_carries_mode_and_address() {
        let message = GatewayMessage::select_protocol("9.9.9.9", 50004).expect("build");
        let json = message.encode().expect("encode");
        let value: Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["op"], 1);
        assert_eq!(value["d"]["protocol"], "udp");
        assert_eq!(value["d"]["data"]["address"], "9.9.9.9");
        assert_eq!(value["d"]["data"]["port"], 50004);
        assert_eq!(value["d"]["data"]["mode"], "xsalsa20_poly1305");
    }

    #[test]
    fn parses_hello_with_sequence() {
        let message =
            GatewayMessage::parse(r#"{"op":8,"s":1,"d":{"heartbeat_interval":41250}}"#)
                .expect("parse");
        assert_eq!(message.opcode().expect("opcode"), Opcode::Hello);
        assert_eq!(message.s, Some(1));
        let hello: Hello = message.payload().expect("payload");
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn parses_ready_payload() {
        let message = GatewayMessage::parse(
            r#"{"op":2,"d":{"ssrc":777,"ip":"1.2.3.4","port":5000,"modes":["xsalsa20_poly1305"]}}"#,
        )
        .expect("parse");
        let ready: Ready = message.payload().expect("payload");
        assert_eq!(ready.ssrc, 777);
        assert_eq!(ready.ip, "1.2.3.4");
        assert_eq!(ready.port, 5000);
        assert_eq!(ready.modes, vec!["xsalsa20_poly1305".to_string()]);
    }

    #[test]
    fn session_description_key_must_be_32_bytes() {
        let description = SessionDescription {
            mode: None,
            secret_key: vec![7u8; 32],
        };
        assert_eq!(description.key().expect("valid key"), [7u8; 32]);

        let short = SessionDescription {
            mode: None,
            secret_key: vec![7u8; 16],
        };
        assert!(matches!(
            short.key(),
            Err(ProtocolError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn unknown_opcode_surfaces_from_envelope() {
        let message = GatewayMessage::parse(r#"{"op":42,"d":{}}"#).expect("parse");
        assert!(matches!(
            message.opcode(),
            Err(ProtocolError::UnknownOpcode(42))
        ));
    }
}
