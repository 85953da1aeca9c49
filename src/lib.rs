//! Discord Voice Gateway client.
//!
//! Joins a voice channel, authenticates to the voice node assigned for that
//! guild, and streams locally-produced audio to it as encrypted RTP-over-UDP.
//! Consumed as an embedded library: the surrounding bot process supplies
//! gateway events (voice-server-update, voice-state-update) through
//! [`VoiceClient`] and hands it file paths or byte sources to play.
//!
//! # Architecture
//!
//! - [`VoiceClient`] — per-process `guild_id` registry; turns gateway events
//!   into connection attempts.
//! - [`connection::VoiceConnection`] — per-guild state machine driving the
//!   handshake and owning the player.
//! - [`ws::VoiceWebSocket`] — the control-plane WebSocket: handshake,
//!   heartbeat, opcode dispatch.
//! - [`udp::VoiceUdp`] — the UDP transport and IP-discovery exchange.
//! - [`crypto::VoiceCrypto`] — AEAD/secretbox packet encryption.
//! - [`player::Player`] — paces encoded Opus frames onto the transport.
//! - [`source::AudioSource`] — file, web, and silence PCM producers.
//! - [`opus::OpusEncoder`] — PCM → Opus frame encoding.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use discord_voice::{VoiceClient, VoiceClientConfig};
//!
//! let client = VoiceClient::new(bot_user_id, VoiceClientConfig::default(), updater);
//!
//! // Fed from the gateway:
//! client.handle_voice_server_update(guild_id, endpoint, token).await;
//! client.handle_voice_state_update(guild_id, bot_user_id, session_id).await;
//!
//! client.play_file(guild_id, "track.mp3").await?;
//! ```
#![deny(unsafe_code)]

pub mod client;
pub mod clock;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod opcode;
pub mod opus;
pub mod payload;
pub mod player;
pub mod source;
pub mod udp;
pub mod ws;

// Re-exports
pub use client::{VoiceClient, VoiceClientConfig, VoiceStateUpdater};
pub use clock::{FrameClock, FRAME_INTERVAL};
pub use connection::{PendingConnection, VoiceConnection, VoiceConnectionConfig, VoiceState};
pub use crypto::{
    build_rtp_header, parse_rtp_header, VoiceCrypto, KEY_SIZE, NONCE_SIZE, RTP_HEADER_SIZE,
    TAG_SIZE,
};
pub use error::{VoiceCloseCode, VoiceError};
pub use opcode::VoiceOpCode;
pub use opus::{ApplicationMode, OpusEncoder, CHANNELS, FRAME_SIZE, PCM_FRAME_BYTES};
pub use payload::{
    EncryptionMode, HelloPayload, IdentifyPayload, ReadyPayload, ResumePayload,
    SelectProtocolPayload, SessionDescriptionPayload, SpeakingFlags, SpeakingPayload,
};
pub use player::Player;
pub use source::AudioSource;
pub use udp::VoiceUdp;
pub use ws::{VoiceEvent, VoiceReadyInfo, VoiceSessionDescription, VoiceWebSocket};
