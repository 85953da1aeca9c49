//! Voice Gateway payloads.

use crate::opcode::VoiceOpCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Voice Gateway payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoicePayload<D> {
    /// Opcode.
    pub op: VoiceOpCode,
    /// Payload data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<D>,
}

impl<D: Serialize> VoicePayload<D> {
    /// Create a new payload.
    pub fn new(op: VoiceOpCode, data: D) -> Self {
        Self { op, d: Some(data) }
    }
}

/// Raw payload for initial parsing.
#[derive(Debug, Clone, Deserialize)]
pub struct RawVoicePayload {
    /// Opcode.
    pub op: VoiceOpCode,
    /// Raw payload data.
    pub d: Option<serde_json::Value>,
    /// Server-assigned sequence number, present on most inbound payloads.
    #[serde(default)]
    pub s: Option<u64>,
}

/// Hello payload (op 8).
#[derive(Debug, Clone, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval: f64,
}

/// Identify payload (op 0).
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyPayload {
    /// Server ID (guild ID).
    pub server_id: String,
    /// User ID.
    pub user_id: String,
    /// Session ID from VOICE_STATE_UPDATE.
    pub session_id: String,
    /// Token from VOICE_SERVER_UPDATE.
    pub token: String,
}

/// Ready payload (op 2).
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    /// SSRC for this connection.
    pub ssrc: u32,
    /// IP address of the voice server.
    pub ip: String,
    /// UDP port of the voice server.
    pub port: u16,
    /// Available encryption modes.
    pub modes: Vec<String>,
}

/// Select Protocol payload (op 1).
#[derive(Debug, Clone, Serialize)]
pub struct SelectProtocolPayload {
    /// Protocol to use (always "udp").
    pub protocol: String,
    /// Protocol data.
    pub data: SelectProtocolData,
}

/// Data for Select Protocol.
#[derive(Debug, Clone, Serialize)]
pub struct SelectProtocolData {
    /// Our external IP address.
    pub address: String,
    /// Our external port.
    pub port: u16,
    /// Encryption mode.
    pub mode: String,
}

impl SelectProtocolPayload {
    /// Create a new Select Protocol payload.
    pub fn new(address: String, port: u16, mode: EncryptionMode) -> Self {
        Self {
            protocol: "udp".to_string(),
            data: SelectProtocolData {
                address,
                port,
                mode: mode.to_string(),
            },
        }
    }
}

/// Session Description payload (op 4).
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDescriptionPayload {
    /// Encryption mode.
    pub mode: String,
    /// Secret key for encryption (32 bytes).
    pub secret_key: Vec<u8>,
}

/// Speaking payload (op 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakingPayload {
    /// Speaking flags.
    pub speaking: u8,
    /// Delay (always 0).
    pub delay: u32,
    /// SSRC.
    pub ssrc: u32,
}

/// Speaking flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeakingFlags(u8);

impl SpeakingFlags {
    /// Not speaking.
    pub const NONE: SpeakingFlags = SpeakingFlags(0);
    /// Normal voice speaking.
    pub const MICROPHONE: SpeakingFlags = SpeakingFlags(1 << 0);
    /// Soundshare/application audio.
    pub const SOUNDSHARE: SpeakingFlags = SpeakingFlags(1 << 1);
    /// Priority speaker.
    pub const PRIORITY: SpeakingFlags = SpeakingFlags(1 << 2);

    /// Get the raw value.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Check if a flag is set.
    pub fn contains(self, other: SpeakingFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SpeakingFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        SpeakingFlags(self.0 | rhs.0)
    }
}

/// Resume payload (op 7).
#[derive(Debug, Clone, Serialize)]
pub struct ResumePayload {
    /// Server ID.
    pub server_id: String,
    /// Session ID.
    pub session_id: String,
    /// Token.
    pub token: String,
}

/// Heartbeat payload (op 3).
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPayload {
    /// Nonce (usually current timestamp).
    #[serde(rename = "t")]
    pub nonce: u64,
    /// Sequence number (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq_ack: Option<u64>,
}

/// Supported encryption modes.
///
/// The first two are mandatory per the voice protocol; the rest are
/// deprecated but still occasionally offered by older voice nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMode {
    /// AES-256-GCM, AAD = header, nonce = first 12 bytes of header.
    #[default]
    AeadAes256GcmRtpsize,
    /// XChaCha20-Poly1305, AAD = header, nonce = 24-byte counter.
    AeadXChaCha20Poly1305Rtpsize,
    /// AES-256-GCM, 12-byte counter nonce appended after the tag.
    AeadAes256Gcm,
    /// XSalsa20-Poly1305, nonce = header right-padded to 24 bytes.
    XSalsa20Poly1305,
    /// XSalsa20-Poly1305, nonce = 20 zero bytes ‖ 32-bit counter.
    XSalsa20Poly1305Lite,
    /// XSalsa20-Poly1305, nonce = 4-byte counter prefix ‖ 20 zero bytes.
    XSalsa20Poly1305LiteRtpsize,
    /// XSalsa20-Poly1305, nonce = 24 random bytes appended to ciphertext.
    XSalsa20Poly1305Suffix,
}

/// Preference order used when negotiating with a server's `modes[]`.
const PREFERENCE_ORDER: [(&str, EncryptionMode); 7] = [
    (
        "aead_aes256_gcm_rtpsize",
        EncryptionMode::AeadAes256GcmRtpsize,
    ),
    (
        "aead_xchacha20_poly1305_rtpsize",
        EncryptionMode::AeadXChaCha20Poly1305Rtpsize,
    ),
    ("aead_aes256_gcm", EncryptionMode::AeadAes256Gcm),
    (
        "xsalsa20_poly1305_lite_rtpsize",
        EncryptionMode::XSalsa20Poly1305LiteRtpsize,
    ),
    (
        "xsalsa20_poly1305_lite",
        EncryptionMode::XSalsa20Poly1305Lite,
    ),
    (
        "xsalsa20_poly1305_suffix",
        EncryptionMode::XSalsa20Poly1305Suffix,
    ),
    ("xsalsa20_poly1305", EncryptionMode::XSalsa20Poly1305),
];

impl EncryptionMode {
    /// Parse from the wire string.
    pub fn parse_mode(s: &str) -> Option<Self> {
        PREFERENCE_ORDER
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, mode)| *mode)
    }

    /// Select the most-preferred mode this client implements from the
    /// server-offered list, preferring the two mandatory rtpsize schemes.
    pub fn select_preferred(modes: &[String]) -> Option<Self> {
        PREFERENCE_ORDER
            .iter()
            .find(|(name, _)| modes.iter().any(|m| m == name))
            .map(|(_, mode)| *mode)
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = PREFERENCE_ORDER
            .iter()
            .find(|(_, mode)| mode == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown");
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_preferred_prefers_rtpsize() {
        let modes = vec![
            "xsalsa20_poly1305".to_string(),
            "aead_xchacha20_poly1305_rtpsize".to_string(),
            "aead_aes256_gcm_rtpsize".to_string(),
        ];
        assert_eq!(
            EncryptionMode::select_preferred(&modes),
            Some(EncryptionMode::AeadAes256GcmRtpsize)
        );
    }

    #[test]
    fn test_select_preferred_falls_back() {
        let modes = vec!["xsalsa20_poly1305_lite".to_string()];
        assert_eq!(
            EncryptionMode::select_preferred(&modes),
            Some(EncryptionMode::XSalsa20Poly1305Lite)
        );
    }

    #[test]
    fn test_select_preferred_none() {
        let modes = vec!["unknown_x".to_string()];
        assert_eq!(EncryptionMode::select_preferred(&modes), None);
    }

    #[test]
    fn test_parse_and_display_roundtrip() {
        for (name, mode) in PREFERENCE_ORDER {
            assert_eq!(EncryptionMode::parse_mode(name), Some(mode));
            assert_eq!(mode.to_string(), name);
        }
    }
}

