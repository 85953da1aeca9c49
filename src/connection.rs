//! Voice connection state machine.
//!
//! Orchestrates the WebSocket session, UDP transport, and playback for one
//! guild's voice connection, following the state diagram: `Connecting →
//! AwaitingReady → DiscoveringIp → AwaitingSessionDescription → Ready →
//! {Playing, Idle-connected} ⇄ Ready → Closing → Closed`. A connection is
//! only ever constructed once its [`PendingConnection`] triple is complete.

use crate::crypto::VoiceCrypto;
use crate::error::VoiceError;
use crate::opus::ApplicationMode;
use crate::payload::{EncryptionMode, SpeakingFlags};
use crate::player::Player;
use crate::source::AudioSource;
use crate::udp::VoiceUdp;
use crate::ws::{VoiceCommand, VoiceEvent, VoiceWebSocket};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A partial `{endpoint, session_id, token}` triple, filled in as
/// voice-server-update and voice-state-update events arrive. Consumed
/// (moved into a [`VoiceConnection`]) exactly once all three are present.
#[derive(Debug, Clone)]
pub struct PendingConnection {
    /// Channel this connection is joining; known up front, unlike the
    /// three fields below which arrive asynchronously.
    pub channel_id: u64,
    /// Voice server endpoint from VOICE_SERVER_UPDATE.
    pub endpoint: Option<String>,
    /// Session ID from VOICE_STATE_UPDATE.
    pub session_id: Option<String>,
    /// Token from VOICE_SERVER_UPDATE.
    pub token: Option<String>,
}

impl PendingConnection {
    /// Start a new pending entry for a channel join.
    pub fn new(channel_id: u64) -> Self {
        Self {
            channel_id,
            endpoint: None,
            session_id: None,
            token: None,
        }
    }

    /// Whether all three fields have arrived.
    pub fn is_complete(&self) -> bool {
        self.endpoint.is_some() && self.session_id.is_some() && self.token.is_some()
    }

    /// Consume this entry into its `(endpoint, session_id, token)` triple,
    /// or `None` if any field is still missing.
    pub fn into_complete(self) -> Option<(String, String, String)> {
        Some((self.endpoint?, self.session_id?, self.token?))
    }
}

/// State of an active [`VoiceConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoiceState {
    /// WebSocket dial in progress.
    Connecting = 0,
    /// IDENTIFY sent, awaiting READY.
    AwaitingReady = 1,
    /// READY received, UDP socket open, IP discovery in flight.
    DiscoveringIp = 2,
    /// External address known, SELECT_PROTOCOL sent, awaiting the secret key.
    AwaitingSessionDescription = 3,
    /// Fully established; playback may begin.
    Ready = 4,
    /// Tearing down.
    Closing = 5,
    /// Fully torn down.
    Closed = 6,
}

impl From<u8> for VoiceState {
    fn from(value: u8) -> Self {
        match value {
            0 => VoiceState::Connecting,
            1 => VoiceState::AwaitingReady,
            2 => VoiceState::DiscoveringIp,
            3 => VoiceState::AwaitingSessionDescription,
            4 => VoiceState::Ready,
            5 => VoiceState::Closing,
            _ => VoiceState::Closed,
        }
    }
}

/// Configuration for one connection attempt.
#[derive(Debug, Clone)]
pub struct VoiceConnectionConfig {
    /// Guild this connection belongs to.
    pub guild_id: u64,
    /// Channel this connection is joining.
    pub channel_id: u64,
    /// This client's user ID, sent in IDENTIFY.
    pub user_id: u64,
    /// Session ID from VOICE_STATE_UPDATE.
    pub session_id: String,
    /// Voice server endpoint from VOICE_SERVER_UPDATE.
    pub endpoint: String,
    /// Token from VOICE_SERVER_UPDATE.
    pub token: String,
    /// Opus application tuning.
    pub application_mode: ApplicationMode,
    /// Bound on the IP discovery round trip.
    pub ip_discovery_timeout: Duration,
    /// Bound on waiting for READY after the socket opens.
    pub hello_timeout: Duration,
    /// Bound on waiting for SESSION_DESCRIPTION after SELECT_PROTOCOL.
    pub ready_timeout: Duration,
}

/// An active connection to a Discord voice server.
pub struct VoiceConnection {
    config: VoiceConnectionConfig,
    state: AtomicU8,
    udp: AsyncRwLock<Option<Arc<VoiceUdp>>>,
    ssrc: RwLock<Option<u32>>,
    command_tx: RwLock<Option<mpsc::Sender<VoiceCommand>>>,
    player: AsyncMutex<Option<Player>>,
    ready_notify: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl VoiceConnection {
    /// Construct a connection. Call [`VoiceConnection::connect`] to start it.
    pub fn new(config: VoiceConnectionConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(VoiceState::Connecting as u8),
            udp: AsyncRwLock::new(None),
            ssrc: RwLock::new(None),
            command_tx: RwLock::new(None),
            player: AsyncMutex::new(None),
            ready_notify: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Current state.
    pub fn state(&self) -> VoiceState {
        VoiceState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: VoiceState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Whether this connection has completed its handshake.
    pub fn is_ready(&self) -> bool {
        self.state() == VoiceState::Ready
    }

    /// Guild this connection belongs to.
    pub fn guild_id(&self) -> u64 {
        self.config.guild_id
    }

    /// Channel this connection is joined to.
    pub fn channel_id(&self) -> u64 {
        self.config.channel_id
    }

    /// Open the WebSocket session and drive the handshake to completion in
    /// the background. Returns once the session and event-dispatch tasks
    /// are spawned; does not wait for readiness (use
    /// [`VoiceConnection::wait_until_ready`] for that).
    pub fn connect(self: &Arc<Self>) -> Result<(), VoiceError> {
        let ws = VoiceWebSocket::new(&self.config.endpoint);
        let (event_tx, event_rx) = mpsc::channel(128);
        let (command_tx, command_rx) = mpsc::channel(128);
        *self.command_tx.write() = Some(command_tx);

        let guild_id = self.config.guild_id;
        let user_id = self.config.user_id;
        let session_id = self.config.session_id.clone();
        let token = self.config.token.clone();

        info!(guild_id, channel_id = self.config.channel_id, "connecting to voice");
        self.set_state(VoiceState::Connecting);

        let ws_task = tokio::spawn(async move {
            if let Err(e) = ws
                .connect_and_run(guild_id, user_id, session_id, token, event_tx, command_rx)
                .await
            {
                error!(?e, "voice websocket session ended with an error");
            }
        });

        let this = Arc::clone(self);
        let dispatch_task = tokio::spawn(this.dispatch_events(event_rx));

        let mut tasks = self.tasks.lock();
        tasks.push(ws_task);
        tasks.push(dispatch_task);

        self.set_state(VoiceState::AwaitingReady);
        Ok(())
    }

    async fn dispatch_events(self: Arc<Self>, mut event_rx: mpsc::Receiver<VoiceEvent>) {
        loop {
            let timeout = match self.state() {
                VoiceState::AwaitingReady => Some(self.config.hello_timeout),
                VoiceState::AwaitingSessionDescription => Some(self.config.ready_timeout),
                _ => None,
            };

            let event = match timeout {
                Some(bound) => match tokio::time::timeout(bound, event_rx.recv()).await {
                    Ok(event) => event,
                    Err(_) => {
                        error!(guild_id = self.config.guild_id, "voice handshake timed out");
                        self.set_state(VoiceState::Closing);
                        break;
                    }
                },
                None => event_rx.recv().await,
            };

            match event {
                Some(VoiceEvent::Ready(info)) => {
                    if let Err(e) = self.handle_ready(info).await {
                        error!(?e, "failed to handle READY");
                        self.set_state(VoiceState::Closing);
                        break;
                    }
                }
                Some(VoiceEvent::SessionDescription(desc)) => {
                    if let Err(e) = self.handle_session_description(desc).await {
                        error!(?e, "failed to handle SESSION_DESCRIPTION");
                        self.set_state(VoiceState::Closing);
                        break;
                    }
                }
                Some(VoiceEvent::Resumed) => info!("voice session resumed"),
                Some(VoiceEvent::Closed { code, reason }) => {
                    info!(code, %reason, "voice connection closed");
                    break;
                }
                None => {
                    debug!("voice event channel closed");
                    break;
                }
            }
        }

        self.set_state(VoiceState::Closed);
    }

    async fn handle_ready(&self, info: crate::ws::VoiceReadyInfo) -> Result<(), VoiceError> {
        *self.ssrc.write() = Some(info.ssrc);
        self.set_state(VoiceState::DiscoveringIp);

        let udp = Arc::new(VoiceUdp::connect(&info.ip, info.port, info.ssrc).await?);
        let (external_ip, external_port) = udp.discover_ip(self.config.ip_discovery_timeout).await?;
        *self.udp.write().await = Some(udp);

        let mode = EncryptionMode::select_preferred(&info.modes)
            .ok_or_else(|| VoiceError::EncryptionModeNotSupported(info.modes.clone()))?;

        self.set_state(VoiceState::AwaitingSessionDescription);

        let tx = self.command_tx.read().clone();
        if let Some(tx) = tx {
            tx.send(VoiceCommand::SelectProtocol {
                address: external_ip,
                port: external_port,
                mode: mode.to_string(),
            })
            .await?;
        }

        info!(mode = %mode, "encryption mode negotiated");
        Ok(())
    }

    async fn handle_session_description(
        &self,
        desc: crate::ws::VoiceSessionDescription,
    ) -> Result<(), VoiceError> {
        let mode = EncryptionMode::parse_mode(&desc.mode)
            .ok_or_else(|| VoiceError::ProtocolError(format!("unknown encryption mode {}", desc.mode)))?;
        let crypto = VoiceCrypto::from_slice(&desc.secret_key, mode)?;

        let udp = self
            .udp
            .read()
            .await
            .clone()
            .ok_or(VoiceError::NotConnected)?;
        let ssrc = (*self.ssrc.read()).ok_or(VoiceError::NotConnected)?;
        let command_tx = self
            .command_tx
            .read()
            .clone()
            .ok_or(VoiceError::NotConnected)?;

        let player = Player::new(udp, crypto, ssrc, command_tx, self.config.application_mode);
        *self.player.lock().await = Some(player);

        self.set_state(VoiceState::Ready);
        self.ready_notify.notify_waiters();
        info!(guild_id = self.config.guild_id, "voice connection ready");

        Ok(())
    }

    /// Wait until the handshake completes (or has already completed).
    pub async fn wait_until_ready(&self) {
        if self.is_ready() {
            return;
        }
        self.ready_notify.notified().await;
    }

    /// Play a local file, replacing any current playback. Returns once
    /// playback has started.
    pub async fn play_file(&self, path: &str) -> Result<(), VoiceError> {
        self.wait_until_ready_or_closed().await?;
        let source = AudioSource::file(path).await?;
        self.play(source).await
    }

    /// Play a remote URL through `ffmpeg`, replacing any current playback.
    pub async fn play_web(&self, url: &str) -> Result<(), VoiceError> {
        self.wait_until_ready_or_closed().await?;
        let source = AudioSource::web(url).await?;
        self.play(source).await
    }

    /// Play silence, replacing any current playback.
    pub async fn play_silence(&self) -> Result<(), VoiceError> {
        self.wait_until_ready_or_closed().await?;
        self.play(AudioSource::silence()).await
    }

    async fn play(&self, source: AudioSource) -> Result<(), VoiceError> {
        let mut guard = self.player.lock().await;
        let player = guard.as_mut().ok_or(VoiceError::NotConnected)?;
        player.play(source).await
    }

    async fn wait_until_ready_or_closed(&self) -> Result<(), VoiceError> {
        match self.state() {
            VoiceState::Ready => Ok(()),
            VoiceState::Closing | VoiceState::Closed => Err(VoiceError::NotConnected),
            _ => {
                self.wait_until_ready().await;
                Ok(())
            }
        }
    }

    /// Stop any current playback without tearing down the connection.
    pub async fn stop(&self) -> Result<(), VoiceError> {
        let mut guard = self.player.lock().await;
        if let Some(player) = guard.as_mut() {
            player.stop().await?;
        }
        Ok(())
    }

    /// Tear down this connection: stop playback, abort background tasks,
    /// close the UDP transport. Idempotent.
    pub async fn close(&self) {
        if self.state() == VoiceState::Closed {
            return;
        }
        self.set_state(VoiceState::Closing);

        if let Some(player) = self.player.lock().await.as_mut() {
            if let Err(e) = player.stop().await {
                warn!(?e, "failed to stop player during close");
            }
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        *self.udp.write().await = None;
        self.set_state(VoiceState::Closed);
        info!(guild_id = self.config.guild_id, "voice connection closed");
    }

    /// Issue a SPEAKING update directly, bypassing the player. Used by the
    /// client for explicit speaking-state control outside of playback.
    pub async fn set_speaking(&self, speaking: bool) -> Result<(), VoiceError> {
        let tx = self.command_tx.read().clone().ok_or(VoiceError::NotConnected)?;
        let ssrc = (*self.ssrc.read()).ok_or(VoiceError::NotConnected)?;
        tx.send(VoiceCommand::Speaking {
            speaking: if speaking {
                SpeakingFlags::MICROPHONE
            } else {
                SpeakingFlags::NONE
            },
            delay: 0,
            ssrc,
        })
        .await?;
        Ok(())
    }
}

impl Drop for VoiceConnection {
    fn drop(&mut self) {
        if self.state() != VoiceState::Closed {
            warn!(guild_id = self.config.guild_id, "VoiceConnection dropped without closing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_connection_completeness() {
        let mut pending = PendingConnection::new(42);
        assert!(!pending.is_complete());

        pending.endpoint = Some("voice.example.com".to_string());
        pending.token = Some("tok".to_string());
        assert!(!pending.is_complete());

        pending.session_id = Some("sess".to_string());
        assert!(pending.is_complete());
    }

    #[test]
    fn test_voice_state_roundtrip() {
        assert_eq!(VoiceState::from(0), VoiceState::Connecting);
        assert_eq!(VoiceState::from(4), VoiceState::Ready);
        assert_eq!(VoiceState::from(255), VoiceState::Closed);
    }

    fn test_config() -> VoiceConnectionConfig {
        VoiceConnectionConfig {
            guild_id: 1,
            channel_id: 2,
            user_id: 3,
            session_id: "sess".to_string(),
            endpoint: "voice.example.com".to_string(),
            token: "tok".to_string(),
            application_mode: ApplicationMode::Audio,
            ip_discovery_timeout: Duration::from_secs(5),
            hello_timeout: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_new_connection_starts_connecting_and_not_ready() {
        let conn = VoiceConnection::new(test_config());
        assert_eq!(conn.state(), VoiceState::Connecting);
        assert!(!conn.is_ready());
    }

    #[tokio::test]
    async fn test_play_before_ready_fails_without_blocking_forever() {
        let conn = Arc::new(VoiceConnection::new(test_config()));
        // Connection never reaches Ready without a live websocket; simulate
        // a closed connection so play_* fails fast instead of hanging.
        conn.set_state(VoiceState::Closed);
        let err = conn.play_silence().await.unwrap_err();
        assert!(matches!(err, VoiceError::NotConnected));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let conn = Arc::new(VoiceConnection::new(test_config()));
        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), VoiceState::Closed);
    }
}
