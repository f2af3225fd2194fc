/// Observable events emitted over the session's broadcast channel.
///
/// Gateway-level events reflect the signaling lifecycle; `PacketDropped`
/// and `DecodeFailed` are per-packet media conditions that leave the
/// session state untouched.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum VoiceEvent {
    /// The signaling socket is open; the handshake is underway.
    GatewayConnected,
    /// READY received; the media stream identity is known.
    Ready { ssrc: u32 },
    /// The session key arrived and the media receive loop is running.
    Active,
    /// The signaling channel ended, normally or otherwise.
    GatewayClosed { reason: Option<String> },
    /// A fatal handshake or transport failure.
    GatewayError(String),
    /// The server told us to go away (DISCONNECT opcode).
    Disconnected,
    /// One inbound datagram was discarded (bad auth, malformed framing).
    PacketDropped { reason: String },
    /// A decrypted frame failed Opus decode; the stream continues.
    DecodeFailed { reason: String },
}
