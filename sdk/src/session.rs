use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::event::VoiceEvent;
use crate::signaling::SignalingChannel;
use crate::transport::MediaTransport;

const CHANNEL_CAPACITY: usize = 100;

/// Handshake credentials for one guild voice session. Supplied by the
/// platform's gateway (voice state update + voice server update) and
/// immutable for the session's life.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub guild_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

/// Top-level handle for one guild's voice connection.
///
/// Owns exactly one signaling channel and one media transport at a time.
/// Assigning an endpoint opens the pair; reassigning it (voice server
/// migration) tears the previous pair down completely before opening a
/// fresh one, so a stale socket can never feed this session again — not
/// with frames and not with events. Each pair emits into its own channel,
/// forwarded to subscribers only while the pair is current.
pub struct VoiceSession {
    config: Arc<VoiceConfig>,
    endpoint: Option<String>,
    active: bool,
    sockets: Option<SocketPair>,
    event_tx: broadcast::Sender<VoiceEvent>,
    pcm_tx: broadcast::Sender<Vec<f32>>,
    opus_tx: broadcast::Sender<Vec<u8>>,
}

struct SocketPair {
    signaling: SignalingChannel,
    transport: MediaTransport,
    // Drains the pair's event channel into the session's. Aborted on
    // teardown, which detaches whatever the old tasks still emit.
    forwarder: JoinHandle<()>,
}

impl VoiceSession {
    #[must_use]
    pub fn new(config: VoiceConfig) -> Self {
        let (event_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (pcm_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (opus_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        Self {
            config: Arc::new(config),
            endpoint: None,
            active: false,
            sockets: None,
            event_tx,
            pcm_tx,
            opus_tx,
        }
    }

    /// Assigns the voice server endpoint and (re)starts the handshake.
    ///
    /// A repeated assignment of the unchanged endpoint is a no-op, to
    /// absorb duplicate server notifications. Failures never surface here;
    /// they arrive asynchronously on the event stream.
    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        if self.endpoint.as_deref() == Some(endpoint.as_str()) {
            debug!("endpoint unchanged, ignoring: {}", endpoint);
            return;
        }

        self.close_pair();
        self.active = true;
        info!("voice endpoint assigned: {}", endpoint);

        let (pair_tx, pair_rx) = broadcast::channel(CHANNEL_CAPACITY);
        let forwarder = tokio::spawn(forward_events(pair_rx, self.event_tx.clone()));

        let transport = MediaTransport::new(
            self.pcm_tx.clone(),
            self.opus_tx.clone(),
            pair_tx.clone(),
        );
        let signaling = SignalingChannel::open(
            endpoint.clone(),
            Arc::clone(&self.config),
            transport.clone(),
            pair_tx,
        );

        self.endpoint = Some(endpoint);
        self.sockets = Some(SocketPair {
            signaling,
            transport,
            forwarder,
        });
    }

    /// Subscribes to session and transport events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<VoiceEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribes to decoded audio: interleaved stereo f32 PCM at 48kHz,
    /// one frame per inbound packet, for the life of the session.
    #[must_use]
    pub fn pcm_frames(&self) -> broadcast::Receiver<Vec<f32>> {
        self.pcm_tx.subscribe()
    }

    /// Subscribes to the still-encoded Opus frames.
    #[must_use]
    pub fn opus_frames(&self) -> broadcast::Receiver<Vec<u8>> {
        self.opus_tx.subscribe()
    }

    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// True once an endpoint has ever been assigned.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Tears down the signaling channel and media transport. Idempotent;
    /// the session can be reused by assigning a new endpoint.
    pub fn close(&mut self) {
        if self.sockets.is_some() {
            info!("closing voice session");
        }
        self.close_pair();
        self.endpoint = None;
    }

    fn close_pair(&mut self) {
        if let Some(mut pair) = self.sockets.take() {
            pair.signaling.close();
            pair.transport.close();
            pair.forwarder.abort();
        }
    }
}

async fn forward_events(
    mut pair_rx: broadcast::Receiver<VoiceEvent>,
    session_tx: broadcast::Sender<VoiceEvent>,
) {
    loop {
        match pair_rx.recv().await {
            Ok(event) => {
                let _ = session_tx.send(event);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("event forwarder lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.close_pair();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> VoiceSession {
        VoiceSession::new(VoiceConfig {
            guild_id: "guild-1".to_string(),
            user_id: "user-2".to_string(),
            session_id: "session-3".to_string(),
            token: "token-4".to_string(),
        })
    }

    #[tokio::test]
    async fn session_starts_inactive_without_sockets() {
        let session = session();
        assert!(!session.is_active());
        assert!(session.endpoint().is_none());
        assert!(session.sockets.is_none());
    }

    #[tokio::test]
    async fn first_endpoint_marks_active_and_opens_pair() {
        let mut session = session();
        session.set_endpoint("ws://127.0.0.1:1");
        assert!(session.is_active());
        assert_eq!(session.endpoint(), Some("ws://127.0.0.1:1"));
        assert!(session.sockets.is_some());
    }

    #[tokio::test]
    async fn unchanged_endpoint_is_a_noop() {
        let mut session = session();
        session.set_endpoint("ws://127.0.0.1:1");
        let first = session
            .sockets
            .as_ref()
            .map(|pair| pair.transport.clone())
            .expect("pair exists");

        session.set_endpoint("ws://127.0.0.1:1");
        let second = session
            .sockets
            .as_ref()
            .map(|pair| pair.transport.clone())
            .expect("pair exists");

        assert!(first.same_handle(&second), "pair must not be recreated");
    }

    #[tokio::test]
    async fn endpoint_change_replaces_the_pair() {
        let mut session = session();
        session.set_endpoint("ws://127.0.0.1:1");
        let first = session
            .sockets
            .as_ref()
            .map(|pair| pair.transport.clone())
            .expect("pair exists");

        session.set_endpoint("ws://127.0.0.1:2");
        let second = session
            .sockets
            .as_ref()
            .map(|pair| pair.transport.clone())
            .expect("pair exists");

        assert!(!first.same_handle(&second), "pair must be replaced");
        assert_eq!(session.endpoint(), Some("ws://127.0.0.1:2"));
        // The replaced transport is closed: activation attempts fail.
        assert!(first.start([0u8; 32]).is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_clears_endpoint() {
        let mut session = session();
        session.set_endpoint("ws://127.0.0.1:1");
        session.close();
        session.close();
        assert!(session.sockets.is_none());
        assert!(session.endpoint().is_none());
        // Still marked active: an endpoint was assigned during its life.
        assert!(session.is_active());
    }
}
