//! Per-process voice client: a `guild_id` registry of pending and active
//! connections.
//!
//! Grounded in the promotion-race guard from the native Python binding's
//! `VoiceClient._try_connection`: a pending entry is removed from the map
//! *before* the active connection is constructed, so a voice-server-update
//! and a voice-state-update racing to complete the same pending triple
//! can never both promote it.

use crate::connection::{PendingConnection, VoiceConnection, VoiceConnectionConfig};
use crate::error::VoiceError;
use crate::opus::ApplicationMode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Per-client defaults applied to every connection unless overridden.
#[derive(Debug, Clone)]
pub struct VoiceClientConfig {
    /// Opus application tuning applied to every connection's encoder.
    pub application_mode: ApplicationMode,
    /// Default self-deafen state used by [`VoiceClient::connect`].
    pub default_deaf: bool,
    /// Default self-mute state used by [`VoiceClient::connect`].
    pub default_mute: bool,
    /// Bound on the IP discovery round trip.
    pub ip_discovery_timeout: Duration,
    /// Bound on waiting for READY after the socket opens.
    pub hello_timeout: Duration,
    /// Bound on waiting for SESSION_DESCRIPTION after SELECT_PROTOCOL.
    pub ready_timeout: Duration,
}

impl Default for VoiceClientConfig {
    fn default() -> Self {
        Self {
            application_mode: ApplicationMode::Audio,
            default_deaf: true,
            default_mute: false,
            ip_discovery_timeout: Duration::from_secs(5),
            hello_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

/// Callback through which the client asks the surrounding bot framework to
/// update this process's voice state — the only way a voice-server-update
/// or voice-server change is ever actually triggered.
pub trait VoiceStateUpdater: Send + Sync {
    /// Request a voice state update: join `channel_id` (or leave, if
    /// `None`) in `guild_id` with the given mute/deaf flags.
    fn update_voice_state(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Per-process registry mapping `guild_id` to pending and active voice
/// connections, driven by voice-server-update/voice-state-update events.
pub struct VoiceClient {
    user_id: u64,
    config: VoiceClientConfig,
    updater: Arc<dyn VoiceStateUpdater>,
    pending: Mutex<HashMap<u64, PendingConnection>>,
    active: Mutex<HashMap<u64, Arc<VoiceConnection>>>,
}

impl VoiceClient {
    /// Build a new client. `user_id` is this bot's own snowflake, used to
    /// IDENTIFY and to filter voice-state-update events to ones about us.
    pub fn new(user_id: u64, config: VoiceClientConfig, updater: Arc<dyn VoiceStateUpdater>) -> Self {
        Self {
            user_id,
            config,
            updater,
            pending: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Join `channel_id` in `guild_id`. Records a pending connection and
    /// asks the bot framework to update voice state; the actual WebSocket
    /// handshake starts once the corresponding voice-server-update and
    /// voice-state-update events arrive.
    pub async fn connect(
        &self,
        guild_id: u64,
        channel_id: u64,
        mute: Option<bool>,
        deaf: Option<bool>,
    ) -> Result<(), VoiceError> {
        if self.active.lock().contains_key(&guild_id) {
            return Err(VoiceError::ConnectionAlreadyEstablished);
        }

        self.pending
            .lock()
            .insert(guild_id, PendingConnection::new(channel_id));

        let mute = mute.unwrap_or(self.config.default_mute);
        let deaf = deaf.unwrap_or(self.config.default_deaf);
        self.updater
            .update_voice_state(guild_id, Some(channel_id), mute, deaf)
            .await;

        info!(guild_id, channel_id, mute, deaf, "connecting to voice channel");
        Ok(())
    }

    /// Leave the voice channel in `guild_id`, tearing down the active
    /// connection.
    pub async fn disconnect(&self, guild_id: u64) -> Result<(), VoiceError> {
        let connection = self
            .active
            .lock()
            .remove(&guild_id)
            .ok_or(VoiceError::ConnectionNotEstablished)?;

        self.updater.update_voice_state(guild_id, None, false, false).await;
        connection.close().await;

        info!(guild_id, "disconnected from voice channel");
        Ok(())
    }

    /// Play a local file in `guild_id`'s active connection.
    pub async fn play_file(&self, guild_id: u64, path: &str) -> Result<(), VoiceError> {
        self.connection_for(guild_id)?.play_file(path).await
    }

    /// Play a remote URL in `guild_id`'s active connection.
    pub async fn play_web(&self, guild_id: u64, url: &str) -> Result<(), VoiceError> {
        self.connection_for(guild_id)?.play_web(url).await
    }

    /// Play silence in `guild_id`'s active connection.
    pub async fn play_silence(&self, guild_id: u64) -> Result<(), VoiceError> {
        self.connection_for(guild_id)?.play_silence().await
    }

    /// Stop playback in `guild_id`'s active connection without disconnecting.
    pub async fn stop(&self, guild_id: u64) -> Result<(), VoiceError> {
        self.connection_for(guild_id)?.stop().await
    }

    fn connection_for(&self, guild_id: u64) -> Result<Arc<VoiceConnection>, VoiceError> {
        self.active
            .lock()
            .get(&guild_id)
            .cloned()
            .ok_or(VoiceError::ConnectionNotEstablished)
    }

    /// Feed a voice-server-update event (endpoint + token) into the
    /// pending registry and attempt promotion.
    pub async fn handle_voice_server_update(&self, guild_id: u64, endpoint: String, token: String) {
        if self.active.lock().contains_key(&guild_id) {
            return;
        }

        {
            let mut pending = self.pending.lock();
            let Some(entry) = pending.get_mut(&guild_id) else {
                return;
            };
            entry.endpoint = Some(endpoint);
            entry.token = Some(token);
        }

        debug!(guild_id, "voice server update received");
        self.try_promote(guild_id).await;
    }

    /// Feed a voice-state-update event (session ID) into the pending
    /// registry and attempt promotion. Ignored unless `user_id` is this
    /// client's own ID — every other voice state change in the guild is
    /// irrelevant to this client's own connection.
    pub async fn handle_voice_state_update(&self, guild_id: u64, user_id: u64, session_id: String) {
        if user_id != self.user_id {
            return;
        }
        if self.active.lock().contains_key(&guild_id) {
            return;
        }

        {
            let mut pending = self.pending.lock();
            let Some(entry) = pending.get_mut(&guild_id) else {
                return;
            };
            entry.session_id = Some(session_id);
        }

        debug!(guild_id, "voice state update received");
        self.try_promote(guild_id).await;
    }

    async fn try_promote(&self, guild_id: u64) {
        let pending = {
            let mut guard = self.pending.lock();
            match guard.get(&guild_id) {
                Some(entry) if entry.is_complete() => guard.remove(&guild_id),
                _ => None,
            }
        };

        let Some(pending) = pending else { return };
        let channel_id = pending.channel_id;
        let Some((endpoint, session_id, token)) = pending.into_complete() else {
            return;
        };

        let config = VoiceConnectionConfig {
            guild_id,
            channel_id,
            user_id: self.user_id,
            session_id,
            endpoint,
            token,
            application_mode: self.config.application_mode,
            ip_discovery_timeout: self.config.ip_discovery_timeout,
            hello_timeout: self.config.hello_timeout,
            ready_timeout: self.config.ready_timeout,
        };

        let connection = Arc::new(VoiceConnection::new(config));
        self.active.lock().insert(guild_id, Arc::clone(&connection));

        if let Err(e) = connection.connect() {
            debug!(guild_id, ?e, "failed to start voice connection");
            self.active.lock().remove(&guild_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopUpdater {
        calls: AtomicUsize,
    }

    impl VoiceStateUpdater for NoopUpdater {
        fn update_voice_state(
            &self,
            _guild_id: u64,
            _channel_id: Option<u64>,
            _self_mute: bool,
            _self_deaf: bool,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn client() -> VoiceClient {
        VoiceClient::new(
            1,
            VoiceClientConfig::default(),
            Arc::new(NoopUpdater {
                calls: AtomicUsize::new(0),
            }),
        )
    }

    #[tokio::test]
    async fn test_connect_records_pending_entry() {
        let client = client();
        client.connect(10, 20, None, None).await.unwrap();
        assert!(client.pending.lock().contains_key(&10));
    }

    #[tokio::test]
    async fn test_connect_twice_fails_while_active() {
        let client = client();
        client
            .active
            .lock()
            .insert(10, Arc::new(VoiceConnection::new(VoiceConnectionConfig {
                guild_id: 10,
                channel_id: 20,
                user_id: 1,
                session_id: "s".to_string(),
                endpoint: "e".to_string(),
                token: "t".to_string(),
                application_mode: ApplicationMode::Audio,
                ip_discovery_timeout: Duration::from_secs(1),
                hello_timeout: Duration::from_secs(1),
                ready_timeout: Duration::from_secs(1),
            })));

        let err = client.connect(10, 20, None, None).await.unwrap_err();
        assert!(matches!(err, VoiceError::ConnectionAlreadyEstablished));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_fails() {
        let client = client();
        let err = client.disconnect(999).await.unwrap_err();
        assert!(matches!(err, VoiceError::ConnectionNotEstablished));
    }

    #[tokio::test]
    async fn test_state_update_for_other_user_is_ignored() {
        let client = client();
        client.connect(10, 20, None, None).await.unwrap();
        client
            .handle_voice_state_update(10, 999, "sess".to_string())
            .await;

        let pending = client.pending.lock();
        assert!(pending.get(&10).unwrap().session_id.is_none());
    }

    #[tokio::test]
    async fn test_promotion_waits_for_all_three_fields() {
        let client = client();
        client.connect(10, 20, None, None).await.unwrap();

        client
            .handle_voice_server_update(10, "endpoint".to_string(), "token".to_string())
            .await;
        assert!(client.pending.lock().contains_key(&10));
        assert!(!client.active.lock().contains_key(&10));

        client
            .handle_voice_state_update(10, 1, "session".to_string())
            .await;
        assert!(!client.pending.lock().contains_key(&10));
        assert!(client.active.lock().contains_key(&10));
    }
}
