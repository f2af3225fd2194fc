use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voicegate_protocol::{discovery, media};

use crate::crypto::{PacketCipher, KEY_LEN, MAC_LEN};
use crate::decoder::AudioDecoder;
use crate::error::VoiceError;
use crate::event::VoiceEvent;

const RECV_BUF_LEN: usize = 4096;

/// The encrypted media transport for one voice session.
///
/// Cheaply cloneable handle; the signaling task drives `discover` and
/// `start`, the owning session drives `close`. The transport moves through
/// an explicit state: the socket exists only after discovery, and the
/// packet cipher exists only inside the active receive loop, so a packet
/// can never be decrypted before the session key has arrived.
#[derive(Clone)]
pub struct MediaTransport {
    inner: Arc<Inner>,
}

struct Inner {
    pcm_tx: broadcast::Sender<Vec<f32>>,
    opus_tx: broadcast::Sender<Vec<u8>>,
    event_tx: broadcast::Sender<VoiceEvent>,
    state: Mutex<TransportState>,
}

enum TransportState {
    Idle,
    Discovered { socket: Arc<UdpSocket>, ssrc: u32 },
    Active { recv_task: JoinHandle<()> },
    Closed,
}

impl MediaTransport {
    pub(crate) fn new(
        pcm_tx: broadcast::Sender<Vec<f32>>,
        opus_tx: broadcast::Sender<Vec<u8>>,
        event_tx: broadcast::Sender<VoiceEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pcm_tx,
                opus_tx,
                event_tx,
                state: Mutex::new(TransportState::Idle),
            }),
        }
    }

    /// Performs external address discovery against the media server.
    ///
    /// Binds the UDP socket, sends the 70-byte ssrc probe and waits for the
    /// single reply carrying our externally visible `(ip, port)`, which the
    /// signaling channel reports back in SELECT_PROTOCOL.
    pub async fn discover(
        &self,
        ip: &str,
        port: u16,
        ssrc: u32,
    ) -> Result<(String, u16), VoiceError> {
        {
            let state = self.lock_state();
            match *state {
                TransportState::Idle => {}
                TransportState::Closed => return Err(VoiceError::Disconnected),
                _ => {
                    return Err(VoiceError::Configuration(
                        "ip discovery already performed".to_string(),
                    ))
                }
            }
        }

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| VoiceError::Discovery(format!("UDP bind failed: {e}")))?;
        socket
            .connect((ip, port))
            .await
            .map_err(|e| VoiceError::Discovery(format!("UDP connect failed: {e}")))?;

        let probe = discovery::encode_probe(ssrc);
        socket
            .send(&probe)
            .await
            .map_err(|e| VoiceError::Discovery(format!("probe send failed: {e}")))?;

        // Only the first reply is consumed; this is a one-shot probe, not a
        // request/response protocol.
        let mut reply = [0u8; 128];
        let n = socket
            .recv(&mut reply)
            .await
            .map_err(|e| VoiceError::Discovery(format!("probe reply failed: {e}")))?;
        let (external_ip, external_port) = discovery::decode_reply(&reply[..n])?;

        info!(
            "discovered external address {}:{} (ssrc {})",
            external_ip, external_port, ssrc
        );

        let mut state = self.lock_state();
        match *state {
            TransportState::Closed => Err(VoiceError::Disconnected),
            _ => {
                *state = TransportState::Discovered {
                    socket: Arc::new(socket),
                    ssrc,
                };
                Ok((external_ip, external_port))
            }
        }
    }

    /// Activates the receive loop with the session key from
    /// SESSION_DESCRIPTION. Valid only after discovery; codec construction
    /// failure is fatal for the transport.
    pub fn start(&self, secret_key: [u8; KEY_LEN]) -> Result<(), VoiceError> {
        let mut state = self.lock_state();
        let (socket, ssrc) = match &*state {
            TransportState::Discovered { socket, ssrc } => (Arc::clone(socket), *ssrc),
            TransportState::Idle => {
                return Err(VoiceError::Configuration(
                    "media transport started before ip discovery".to_string(),
                ))
            }
            TransportState::Active { .. } => {
                return Err(VoiceError::Configuration(
                    "media transport already active".to_string(),
                ))
            }
            TransportState::Closed => return Err(VoiceError::Disconnected),
        };

        let cipher = PacketCipher::new(&secret_key);
        let decoder = AudioDecoder::new()?;

        debug!("activating media receive loop (ssrc {})", ssrc);

        let recv_task = tokio::spawn(recv_loop(
            socket,
            cipher,
            decoder,
            self.inner.pcm_tx.clone(),
            self.inner.opus_tx.clone(),
            self.inner.event_tx.clone(),
        ));
        *state = TransportState::Active { recv_task };
        Ok(())
    }

    /// Stops the receive loop and drops the socket. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if let TransportState::Active { recv_task } =
            std::mem::replace(&mut *state, TransportState::Closed)
        {
            recv_task.abort();
            debug!("media transport closed");
        }
    }

    #[cfg(test)]
    pub(crate) fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TransportState> {
        // Lock poisoning cannot outlive a panic we care about here; recover
        // the guard either way.
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    cipher: PacketCipher,
    mut decoder: AudioDecoder,
    pcm_tx: broadcast::Sender<Vec<f32>>,
    opus_tx: broadcast::Sender<Vec<u8>>,
    event_tx: broadcast::Sender<VoiceEvent>,
) {
    let mut buf = vec![0u8; RECV_BUF_LEN];

    loop {
        match socket.recv(&mut buf).await {
            Ok(n) => match decrypt_frame(&cipher, &buf[..n]) {
                Ok(frame) => {
                    let _ = opus_tx.send(frame.clone());
                    match decoder.decode(&frame) {
                        Ok(pcm) => {
                            let _ = pcm_tx.send(pcm);
                        }
                        Err(e) => {
                            debug!("dropping undecodable frame: {}", e);
                            let _ = event_tx.send(VoiceEvent::DecodeFailed {
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                Err(e) => {
                    debug!("dropping media packet: {}", e);
                    let _ = event_tx.send(VoiceEvent::PacketDropped {
                        reason: e.to_string(),
                    });
                }
            },
            Err(e) => {
                warn!("media socket receive error: {}", e);
                break;
            }
        }
    }

    debug!("media receive loop stopped");
}

/// Decrypts one inbound datagram and trims transport framing, leaving the
/// Opus frame. Every failure here is per-packet and recoverable.
fn decrypt_frame(cipher: &PacketCipher, datagram: &[u8]) -> Result<Vec<u8>, VoiceError> {
    let (header, sealed) = media::split_packet(datagram)?;
    if sealed.len() < MAC_LEN {
        return Err(VoiceError::Decrypt(
            "sealed payload shorter than authentication tag".to_string(),
        ));
    }
    let plaintext = cipher.open(header, sealed)?;
    let frame = media::strip_frame(header[0], &plaintext)?;
    Ok(frame.to_vec())
}
