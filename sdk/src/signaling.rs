use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use voicegate_protocol::{GatewayMessage, Hello, Opcode, Ready, SessionDescription};

use crate::error::VoiceError;
use crate::event::VoiceEvent;
use crate::session::VoiceConfig;
use crate::transport::MediaTransport;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Handle to the signaling task for one endpoint.
///
/// The task owns the WebSocket and the heartbeat timer; dropping or
/// closing the handle winds the task down, which cancels the heartbeat on
/// every exit path.
pub(crate) struct SignalingChannel {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SignalingChannel {
    /// Opens the signaling connection and spawns the task that drives the
    /// handshake to completion.
    pub(crate) fn open(
        endpoint: String,
        config: Arc<VoiceConfig>,
        transport: MediaTransport,
        event_tx: broadcast::Sender<VoiceEvent>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(endpoint, config, transport, event_tx, shutdown_rx));
        Self {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Requests shutdown. Idempotent; the task sends a close frame and
    /// stops its heartbeat before exiting.
    pub(crate) fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Derives the gateway URL from a voice endpoint.
///
/// Bare `host:port` endpoints become `wss://host/?v=4` (the gateway port
/// in endpoint strings is not the WebSocket port). Endpoints that already
/// carry a scheme are used verbatim, which is what self-hosted and test
/// gateways rely on.
fn gateway_url(endpoint: &str) -> Result<String, VoiceError> {
    if endpoint.is_empty() {
        return Err(VoiceError::Configuration(
            "voice gateway opened before an endpoint was assigned".to_string(),
        ));
    }
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_string());
    }
    let host = endpoint.split(':').next().unwrap_or(endpoint);
    Ok(format!("wss://{host}/?v=4"))
}

/// Handshake progress of the signaling channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    AwaitingHello,
    AwaitingReady,
    SelectingProtocol,
    AwaitingSessionDescription,
    Active,
}

enum Flow {
    Continue,
    Stop,
}

struct Handshake {
    config: Arc<VoiceConfig>,
    transport: MediaTransport,
    event_tx: broadcast::Sender<VoiceEvent>,
    state: HandshakeState,
    // Advisory only; recorded for diagnostics, no resume logic.
    last_seq: Option<u64>,
}

async fn run(
    endpoint: String,
    config: Arc<VoiceConfig>,
    transport: MediaTransport,
    event_tx: broadcast::Sender<VoiceEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let url = match gateway_url(&endpoint) {
        Ok(url) => url,
        Err(e) => {
            warn!("signaling configuration error: {}", e);
            let _ = event_tx.send(VoiceEvent::GatewayError(e.to_string()));
            return;
        }
    };

    debug!("connecting voice gateway {}", url);
    let ws = tokio::select! {
        _ = &mut shutdown_rx => return,
        connected = connect_async(url.as_str()) => match connected {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!("voice gateway connect failed: {}", e);
                let _ = event_tx.send(VoiceEvent::GatewayError(format!(
                    "gateway connect failed: {e}"
                )));
                return;
            }
        },
    };

    info!("voice gateway connected");
    let _ = event_tx.send(VoiceEvent::GatewayConnected);

    let (mut sink, mut stream) = ws.split();
    let mut heartbeat: Option<Interval> = None;
    let mut handshake = Handshake {
        config,
        transport,
        event_tx: event_tx.clone(),
        state: HandshakeState::AwaitingHello,
        last_seq: None,
    };
    let mut close_reason = None;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            _ = tick(&mut heartbeat), if heartbeat.is_some() => {
                if let Err(e) = send_heartbeat(&mut sink).await {
                    warn!("heartbeat send failed: {}", e);
                    close_reason = Some(e.to_string());
                    break;
                }
            }

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    // The handler awaits ip discovery and gateway sends;
                    // shutdown must win against a stalled peer in there
                    // too, dropping the discovery socket with the future.
                    let handled = tokio::select! {
                        _ = &mut shutdown_rx => {
                            let _ = sink.send(Message::Close(None)).await;
                            Ok(Flow::Stop)
                        }
                        handled = handshake.handle(&mut sink, text.as_str(), &mut heartbeat) => handled,
                    };
                    match handled {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => break,
                        Err(e) => {
                            warn!("voice handshake failed: {}", e);
                            let _ = event_tx.send(VoiceEvent::GatewayError(e.to_string()));
                            close_reason = Some(e.to_string());
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("voice gateway closed by server: {:?}", frame);
                    close_reason = frame.map(|f| f.reason.to_string());
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("voice gateway socket error: {}", e);
                    close_reason = Some(e.to_string());
                    break;
                }
                None => {
                    debug!("voice gateway stream ended");
                    break;
                }
            },
        }
    }

    // Heartbeat interval and socket are dropped with the task. The media
    // transport never outlives its signaling channel.
    debug!(
        "voice gateway closed in state {:?} (last seq {:?})",
        handshake.state, handshake.last_seq
    );
    handshake.transport.close();
    let _ = event_tx.send(VoiceEvent::GatewayClosed {
        reason: close_reason,
    });
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        // Unreachable behind the select guard.
        None => std::future::pending().await,
    }
}

async fn send_json(sink: &mut WsSink, message: &GatewayMessage) -> Result<(), VoiceError> {
    let text = message.encode()?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| VoiceError::ConnectionFailed(format!("gateway send failed: {e}")))
}

async fn send_heartbeat(sink: &mut WsSink) -> Result<(), VoiceError> {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    debug!("sending voice heartbeat");
    send_json(sink, &GatewayMessage::heartbeat(nonce)?).await
}

impl Handshake {
    async fn handle(
        &mut self,
        sink: &mut WsSink,
        text: &str,
        heartbeat: &mut Option<Interval>,
    ) -> Result<Flow, VoiceError> {
        let message = match GatewayMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("ignoring malformed gateway message: {}", e);
                return Ok(Flow::Continue);
            }
        };
        if message.s.is_some() {
            self.last_seq = message.s;
        }
        let opcode = match message.opcode() {
            Ok(opcode) => opcode,
            Err(e) => {
                debug!("ignoring gateway message: {}", e);
                return Ok(Flow::Continue);
            }
        };
        debug!("gateway message {:?} in state {:?}", opcode, self.state);

        match (opcode, self.state) {
            (Opcode::Hello, HandshakeState::AwaitingHello) => {
                let hello: Hello = message.payload()?;
                let period = Duration::from_millis(hello.heartbeat_interval.max(1));
                // First beat after one full period, not immediately.
                *heartbeat = Some(interval_at(Instant::now() + period, period));
                info!(
                    "voice gateway hello, heartbeat every {}ms",
                    hello.heartbeat_interval
                );

                let identify = GatewayMessage::identify(
                    &self.config.guild_id,
                    &self.config.user_id,
                    &self.config.session_id,
                    &self.config.token,
                )?;
                send_json(sink, &identify).await?;
                self.state = HandshakeState::AwaitingReady;
                Ok(Flow::Continue)
            }

            (Opcode::Ready, HandshakeState::AwaitingReady) => {
                let ready: Ready = message.payload()?;
                let _ = self.event_tx.send(VoiceEvent::Ready { ssrc: ready.ssrc });
                self.state = HandshakeState::SelectingProtocol;

                let (external_ip, external_port) = self
                    .transport
                    .discover(&ready.ip, ready.port, ready.ssrc)
                    .await?;

                let select = GatewayMessage::select_protocol(&external_ip, external_port)?;
                send_json(sink, &select).await?;
                self.state = HandshakeState::AwaitingSessionDescription;
                Ok(Flow::Continue)
            }

            (Opcode::SessionDescription, HandshakeState::AwaitingSessionDescription) => {
                let description: SessionDescription = message.payload()?;
                self.transport.start(description.key()?)?;
                self.state = HandshakeState::Active;
                info!("voice session active");
                let _ = self.event_tx.send(VoiceEvent::Active);
                Ok(Flow::Continue)
            }

            (Opcode::HeartbeatAck, _) => {
                debug!("heartbeat acknowledged");
                Ok(Flow::Continue)
            }

            (Opcode::Disconnect, _) => {
                info!("voice gateway requested disconnect");
                let _ = self.event_tx.send(VoiceEvent::Disconnected);
                Ok(Flow::Stop)
            }

            (opcode, state) => {
                // Out-of-order or unused opcodes are not validated
                // defensively; log and carry on.
                debug!("ignoring opcode {:?} in state {:?}", opcode, state);
                Ok(Flow::Continue)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    #[test]
    fn gateway_url_strips_port_and_uses_wss() {
        assert_eq!(
            gateway_url("v1.voice.example:443").expect("url"),
            "wss://v1.voice.example/?v=4"
        );
        assert_eq!(
            gateway_url("v1.voice.example").expect("url"),
            "wss://v1.voice.example/?v=4"
        );
    }

    #[test]
    fn gateway_url_passes_explicit_schemes_through() {
        assert_eq!(
            gateway_url("ws://127.0.0.1:9000").expect("url"),
            "ws://127.0.0.1:9000"
        );
        assert_eq!(
            gateway_url("wss://gateway.example/?v=4").expect("url"),
            "wss://gateway.example/?v=4"
        );
    }

    #[test]
    fn empty_endpoint_is_a_configuration_error() {
        assert!(matches!(
            gateway_url(""),
            Err(VoiceError::Configuration(_))
        ));
    }

    fn test_config() -> Arc<VoiceConfig> {
        Arc::new(VoiceConfig {
            guild_id: "guild-1".to_string(),
            user_id: "user-2".to_string(),
            session_id: "session-3".to_string(),
            token: "token-4".to_string(),
        })
    }

    fn test_transport() -> (MediaTransport, broadcast::Sender<VoiceEvent>) {
        let (pcm_tx, _) = broadcast::channel(16);
        let (opus_tx, _) = broadcast::channel(16);
        let (event_tx, _) = broadcast::channel(16);
        (
            MediaTransport::new(pcm_tx, opus_tx, event_tx.clone()),
            event_tx,
        )
    }

    #[tokio::test]
    async fn hello_starts_heartbeat_and_close_stops_it() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let (transport, event_tx) = test_transport();
        let mut channel = SignalingChannel::open(
            format!("ws://{addr}"),
            test_config(),
            transport,
            event_tx,
        );

        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(tcp).await.expect("ws accept");

        ws.send(Message::Text(
            r#"{"op":8,"d":{"heartbeat_interval":50}}"#.into(),
        ))
        .await
        .expect("send hello");

        // IDENTIFY arrives with the session credentials.
        let identify = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("identify timed out")
            .expect("stream open")
            .expect("frame");
        let value: Value =
            serde_json::from_str(identify.to_text().expect("text frame")).expect("json");
        assert_eq!(value["op"], 0);
        assert_eq!(value["d"]["server_id"], "guild-1");
        assert_eq!(value["d"]["user_id"], "user-2");
        assert_eq!(value["d"]["session_id"], "session-3");
        assert_eq!(value["d"]["token"], "token-4");

        // The heartbeat timer fires with the HELLO interval.
        let beat = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("heartbeat timed out")
            .expect("stream open")
            .expect("frame");
        let value: Value = serde_json::from_str(beat.to_text().expect("text frame")).expect("json");
        assert_eq!(value["op"], 3);

        // Closing the channel terminates the connection; the timer lives
        // inside the task, so it cannot fire again.
        channel.close();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match timeout(Duration::from_secs(5), ws.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => break,
                Ok(Some(Ok(_))) => {
                    assert!(Instant::now() < deadline, "connection did not close");
                }
                Err(_) => panic!("connection did not close"),
            }
        }

        timeout(Duration::from_secs(5), async {
            while !channel.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("signaling task did not finish");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (transport, event_tx) = test_transport();
        let mut channel =
            SignalingChannel::open("ws://127.0.0.1:1".to_string(), test_config(), transport, event_tx);
        channel.close();
        channel.close();
    }
}
