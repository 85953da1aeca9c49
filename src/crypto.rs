//! Voice packet encryption.
//!
//! The voice gateway negotiates one of seven schemes built on three
//! primitives (AES-256-GCM, XChaCha20-Poly1305, XSalsa20-Poly1305/secretbox).
//! Each scheme has its own nonce discipline and packet body layout; see the
//! match arms below for the exact byte layout per scheme.

use crate::error::VoiceError;
use crate::payload::EncryptionMode;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit};
use byteorder::{BigEndian, ByteOrder};
use chacha20poly1305::XChaCha20Poly1305;
use rand::Rng;
use xsalsa20poly1305::XSalsa20Poly1305;

/// Size of the encryption key.
pub const KEY_SIZE: usize = 32;

/// Size of the XSalsa20/XChaCha20 nonce.
pub const NONCE_SIZE: usize = 24;

/// Size of the AES-GCM nonce.
pub const AES_GCM_NONCE_SIZE: usize = 12;

/// Size of the Poly1305/GCM authentication tag.
pub const TAG_SIZE: usize = 16;

/// RTP header size.
pub const RTP_HEADER_SIZE: usize = 12;

#[derive(Clone)]
enum InnerCipher {
    XSalsa20(XSalsa20Poly1305),
    Aes256Gcm(Box<Aes256Gcm>),
    XChaCha20(XChaCha20Poly1305),
}

/// Voice packet encryptor/decryptor bound to one negotiated scheme.
///
/// Owns the per-scheme nonce counter; counters are strictly monotonic for
/// the lifetime of the connection regardless of which scheme is active.
#[derive(Clone)]
pub struct VoiceCrypto {
    cipher: InnerCipher,
    mode: EncryptionMode,
    nonce_counter: u64,
}

impl VoiceCrypto {
    /// Create a new voice crypto instance from a 32-byte secret key.
    pub fn new(secret_key: &[u8; KEY_SIZE], mode: EncryptionMode) -> Self {
        let cipher = match mode {
            EncryptionMode::XSalsa20Poly1305
            | EncryptionMode::XSalsa20Poly1305Lite
            | EncryptionMode::XSalsa20Poly1305LiteRtpsize
            | EncryptionMode::XSalsa20Poly1305Suffix => {
                InnerCipher::XSalsa20(XSalsa20Poly1305::new(secret_key.into()))
            }
            EncryptionMode::AeadAes256Gcm | EncryptionMode::AeadAes256GcmRtpsize => {
                InnerCipher::Aes256Gcm(Box::new(Aes256Gcm::new(secret_key.into())))
            }
            EncryptionMode::AeadXChaCha20Poly1305Rtpsize => {
                InnerCipher::XChaCha20(XChaCha20Poly1305::new(secret_key.into()))
            }
        };

        Self {
            cipher,
            mode,
            nonce_counter: 0,
        }
    }

    /// Construct from a secret key of unchecked length, per §4.1: rejected
    /// with `InvalidSecretKey` unless exactly 32 bytes.
    pub fn from_slice(secret_key: &[u8], mode: EncryptionMode) -> Result<Self, VoiceError> {
        if secret_key.len() != KEY_SIZE {
            return Err(VoiceError::InvalidSecretKey(secret_key.len()));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(secret_key);
        Ok(Self::new(&key, mode))
    }

    /// Encrypt an audio frame.
    ///
    /// # Arguments
    /// * `rtp_header` - The 12-byte RTP header.
    /// * `audio` - The Opus-encoded audio data.
    ///
    /// # Returns
    /// The complete packet body (scheme-specific layout; does not include
    /// the RTP header, which the caller prepends separately on the wire).
    pub fn encrypt(
        &mut self,
        rtp_header: &[u8; RTP_HEADER_SIZE],
        audio: &[u8],
    ) -> Result<Vec<u8>, VoiceError> {
        match self.mode {
            EncryptionMode::AeadAes256GcmRtpsize => self.encrypt_aes256_gcm_rtpsize(rtp_header, audio),
            EncryptionMode::AeadXChaCha20Poly1305Rtpsize => {
                self.encrypt_xchacha20_rtpsize(rtp_header, audio)
            }
            EncryptionMode::AeadAes256Gcm => self.encrypt_aes256_gcm(audio),
            EncryptionMode::XSalsa20Poly1305 => self.encrypt_normal(rtp_header, audio),
            EncryptionMode::XSalsa20Poly1305Lite => self.encrypt_lite(audio),
            EncryptionMode::XSalsa20Poly1305LiteRtpsize => self.encrypt_lite_rtpsize(audio),
            EncryptionMode::XSalsa20Poly1305Suffix => self.encrypt_suffix(audio),
        }
    }

    /// Decrypt a packet body (the RTP header has already been stripped and
    /// is passed separately since the AEAD schemes use it as AAD).
    pub fn decrypt(
        &self,
        rtp_header: &[u8; RTP_HEADER_SIZE],
        body: &[u8],
    ) -> Result<Vec<u8>, VoiceError> {
        match self.mode {
            EncryptionMode::AeadAes256GcmRtpsize => self.decrypt_aes256_gcm_rtpsize(rtp_header, body),
            EncryptionMode::AeadXChaCha20Poly1305Rtpsize => {
                self.decrypt_xchacha20_rtpsize(rtp_header, body)
            }
            EncryptionMode::AeadAes256Gcm => self.decrypt_aes256_gcm(body),
            EncryptionMode::XSalsa20Poly1305 => self.decrypt_normal(rtp_header, body),
            EncryptionMode::XSalsa20Poly1305Lite => self.decrypt_lite(body),
            EncryptionMode::XSalsa20Poly1305LiteRtpsize => self.decrypt_lite_rtpsize(body),
            EncryptionMode::XSalsa20Poly1305Suffix => self.decrypt_suffix(body),
        }
    }

    fn next_counter(&mut self) -> u64 {
        let value = self.nonce_counter;
        self.nonce_counter = self.nonce_counter.wrapping_add(1);
        value
    }

    // -- aead_aes256_gcm_rtpsize: nonce = header, AAD = header, body = ciphertext‖tag --

    fn encrypt_aes256_gcm_rtpsize(
        &mut self,
        rtp_header: &[u8; RTP_HEADER_SIZE],
        audio: &[u8],
    ) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::Aes256Gcm(cipher) = &self.cipher else {
            unreachable!()
        };
        let nonce = aes_gcm::Nonce::from_slice(rtp_header);
        cipher
            .encrypt(
                nonce,
                Payload {
                    msg: audio,
                    aad: rtp_header,
                },
            )
            .map_err(|e| VoiceError::Encryption(e.to_string()))
    }

    fn decrypt_aes256_gcm_rtpsize(
        &self,
        rtp_header: &[u8; RTP_HEADER_SIZE],
        body: &[u8],
    ) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::Aes256Gcm(cipher) = &self.cipher else {
            unreachable!()
        };
        if body.len() < TAG_SIZE {
            return Err(VoiceError::Encryption("body too short".into()));
        }
        let nonce = aes_gcm::Nonce::from_slice(rtp_header);
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: body,
                    aad: rtp_header,
                },
            )
            .map_err(|e| VoiceError::Encryption(e.to_string()))
    }

    // -- aead_xchacha20_poly1305_rtpsize: nonce = monotonic counter zero-padded
    // to 24 bytes big-endian, AAD = header, body = nonce24‖ciphertext‖tag --

    fn encrypt_xchacha20_rtpsize(
        &mut self,
        rtp_header: &[u8; RTP_HEADER_SIZE],
        audio: &[u8],
    ) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::XChaCha20(cipher) = &self.cipher else {
            unreachable!()
        };
        let counter = self.next_counter();
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        BigEndian::write_u64(&mut nonce_bytes[NONCE_SIZE - 8..], counter);
        let nonce = chacha20poly1305::XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: audio,
                    aad: rtp_header,
                },
            )
            .map_err(|e| VoiceError::Encryption(e.to_string()))?;

        let mut body = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        body.extend_from_slice(&nonce_bytes);
        body.extend_from_slice(&ciphertext);
        Ok(body)
    }

    fn decrypt_xchacha20_rtpsize(
        &self,
        rtp_header: &[u8; RTP_HEADER_SIZE],
        body: &[u8],
    ) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::XChaCha20(cipher) = &self.cipher else {
            unreachable!()
        };
        if body.len() < NONCE_SIZE + TAG_SIZE {
            return Err(VoiceError::Encryption("body too short".into()));
        }
        let nonce = chacha20poly1305::XNonce::from_slice(&body[..NONCE_SIZE]);
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &body[NONCE_SIZE..],
                    aad: rtp_header,
                },
            )
            .map_err(|e| VoiceError::Encryption(e.to_string()))
    }

    // -- aead_aes256_gcm (deprecated): nonce = 12-byte monotonic counter,
    // no AAD, body = ciphertext‖tag‖nonce12 --

    fn encrypt_aes256_gcm(&mut self, audio: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::Aes256Gcm(cipher) = &self.cipher else {
            unreachable!()
        };
        let counter = self.next_counter();
        let mut nonce_bytes = [0u8; AES_GCM_NONCE_SIZE];
        BigEndian::write_u64(&mut nonce_bytes[AES_GCM_NONCE_SIZE - 8..], counter);
        let nonce = aes_gcm::Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, audio)
            .map_err(|e| VoiceError::Encryption(e.to_string()))?;

        let mut body = Vec::with_capacity(ciphertext.len() + AES_GCM_NONCE_SIZE);
        body.extend_from_slice(&ciphertext);
        body.extend_from_slice(&nonce_bytes);
        Ok(body)
    }

    fn decrypt_aes256_gcm(&self, body: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::Aes256Gcm(cipher) = &self.cipher else {
            unreachable!()
        };
        if body.len() < TAG_SIZE + AES_GCM_NONCE_SIZE {
            return Err(VoiceError::Encryption("body too short".into()));
        }
        let nonce_start = body.len() - AES_GCM_NONCE_SIZE;
        let nonce = aes_gcm::Nonce::from_slice(&body[nonce_start..]);
        cipher
            .decrypt(nonce, &body[..nonce_start])
            .map_err(|e| VoiceError::Encryption(e.to_string()))
    }

    // -- xsalsa20_poly1305 (deprecated): nonce = header right-padded to 24
    // bytes, body = ciphertext (nonce recoverable from header on the wire) --

    fn encrypt_normal(
        &mut self,
        rtp_header: &[u8; RTP_HEADER_SIZE],
        audio: &[u8],
    ) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::XSalsa20(cipher) = &self.cipher else {
            unreachable!()
        };
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes[..RTP_HEADER_SIZE].copy_from_slice(rtp_header);
        let nonce = xsalsa20poly1305::Nonce::from_slice(&nonce_bytes);

        cipher
            .encrypt(nonce, audio)
            .map_err(|e| VoiceError::Encryption(e.to_string()))
    }

    fn decrypt_normal(
        &self,
        rtp_header: &[u8; RTP_HEADER_SIZE],
        body: &[u8],
    ) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::XSalsa20(cipher) = &self.cipher else {
            unreachable!()
        };
        if body.len() < TAG_SIZE {
            return Err(VoiceError::Encryption("body too short".into()));
        }
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes[..RTP_HEADER_SIZE].copy_from_slice(rtp_header);
        let nonce = xsalsa20poly1305::Nonce::from_slice(&nonce_bytes);

        cipher
            .decrypt(nonce, body)
            .map_err(|e| VoiceError::Encryption(e.to_string()))
    }

    // -- xsalsa20_poly1305_lite (deprecated): nonce = 20 zero bytes ‖ 32-bit
    // counter, body = ciphertext‖counter4 --

    fn encrypt_lite(&mut self, audio: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::XSalsa20(cipher) = &self.cipher else {
            unreachable!()
        };
        let counter = self.next_counter() as u32;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        BigEndian::write_u32(&mut nonce_bytes[NONCE_SIZE - 4..], counter);
        let nonce = xsalsa20poly1305::Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, audio)
            .map_err(|e| VoiceError::Encryption(e.to_string()))?;

        let mut body = Vec::with_capacity(ciphertext.len() + 4);
        body.extend_from_slice(&ciphertext);
        body.extend_from_slice(&nonce_bytes[NONCE_SIZE - 4..]);
        Ok(body)
    }

    fn decrypt_lite(&self, body: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::XSalsa20(cipher) = &self.cipher else {
            unreachable!()
        };
        if body.len() < TAG_SIZE + 4 {
            return Err(VoiceError::Encryption("body too short".into()));
        }
        let split = body.len() - 4;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes[NONCE_SIZE - 4..].copy_from_slice(&body[split..]);
        let nonce = xsalsa20poly1305::Nonce::from_slice(&nonce_bytes);

        cipher
            .decrypt(nonce, &body[..split])
            .map_err(|e| VoiceError::Encryption(e.to_string()))
    }

    // -- xsalsa20_poly1305_lite_rtpsize (deprecated): nonce = 4-byte counter
    // prefix ‖ 20 zero bytes, body = ciphertext‖counter4 --

    fn encrypt_lite_rtpsize(&mut self, audio: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::XSalsa20(cipher) = &self.cipher else {
            unreachable!()
        };
        let counter = self.next_counter() as u32;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        BigEndian::write_u32(&mut nonce_bytes[..4], counter);
        let nonce = xsalsa20poly1305::Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, audio)
            .map_err(|e| VoiceError::Encryption(e.to_string()))?;

        let mut body = Vec::with_capacity(ciphertext.len() + 4);
        body.extend_from_slice(&ciphertext);
        body.extend_from_slice(&nonce_bytes[..4]);
        Ok(body)
    }

    fn decrypt_lite_rtpsize(&self, body: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::XSalsa20(cipher) = &self.cipher else {
            unreachable!()
        };
        if body.len() < TAG_SIZE + 4 {
            return Err(VoiceError::Encryption("body too short".into()));
        }
        let split = body.len() - 4;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes[..4].copy_from_slice(&body[split..]);
        let nonce = xsalsa20poly1305::Nonce::from_slice(&nonce_bytes);

        cipher
            .decrypt(nonce, &body[..split])
            .map_err(|e| VoiceError::Encryption(e.to_string()))
    }

    // -- xsalsa20_poly1305_suffix (deprecated): nonce = 24 CSPRNG random
    // bytes, body = ciphertext‖nonce24 --

    fn encrypt_suffix(&mut self, audio: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::XSalsa20(cipher) = &self.cipher else {
            unreachable!()
        };
        let nonce_bytes: [u8; NONCE_SIZE] = rand::rng().random();
        let nonce = xsalsa20poly1305::Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, audio)
            .map_err(|e| VoiceError::Encryption(e.to_string()))?;

        let mut body = Vec::with_capacity(ciphertext.len() + NONCE_SIZE);
        body.extend_from_slice(&ciphertext);
        body.extend_from_slice(&nonce_bytes);
        Ok(body)
    }

    fn decrypt_suffix(&self, body: &[u8]) -> Result<Vec<u8>, VoiceError> {
        let InnerCipher::XSalsa20(cipher) = &self.cipher else {
            unreachable!()
        };
        if body.len() < TAG_SIZE + NONCE_SIZE {
            return Err(VoiceError::Encryption("body too short".into()));
        }
        let split = body.len() - NONCE_SIZE;
        let nonce = xsalsa20poly1305::Nonce::from_slice(&body[split..]);

        cipher
            .decrypt(nonce, &body[..split])
            .map_err(|e| VoiceError::Encryption(e.to_string()))
    }
}

/// Build an RTP header.
pub fn build_rtp_header(sequence: u16, timestamp: u32, ssrc: u32) -> [u8; RTP_HEADER_SIZE] {
    let mut header = [0u8; RTP_HEADER_SIZE];

    header[0] = 0x80;
    header[1] = 0x78;
    BigEndian::write_u16(&mut header[2..4], sequence);
    BigEndian::write_u32(&mut header[4..8], timestamp);
    BigEndian::write_u32(&mut header[8..12], ssrc);

    header
}

/// Parse an RTP header back into `(sequence, timestamp, ssrc)`.
pub fn parse_rtp_header(header: &[u8; RTP_HEADER_SIZE]) -> (u16, u32, u32) {
    let sequence = BigEndian::read_u16(&header[2..4]);
    let timestamp = BigEndian::read_u32(&header[4..8]);
    let ssrc = BigEndian::read_u32(&header[8..12]);
    (sequence, timestamp, ssrc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_header() {
        let header = build_rtp_header(100, 48000, 12345);
        assert_eq!(header[0], 0x80);
        assert_eq!(header[1], 0x78);

        let (seq, ts, ssrc) = parse_rtp_header(&header);
        assert_eq!(seq, 100);
        assert_eq!(ts, 48000);
        assert_eq!(ssrc, 12345);
    }

    fn roundtrip(mode: EncryptionMode) {
        let key = [7u8; KEY_SIZE];
        let mut enc = VoiceCrypto::new(&key, mode);
        let dec = VoiceCrypto::new(&key, mode);

        let header = build_rtp_header(1, 960, 0xABCD);
        let audio = b"some opus-shaped bytes, length does not matter here";

        let body = enc.encrypt(&header, audio).unwrap();
        let plaintext = dec.decrypt(&header, &body).unwrap();
        assert_eq!(&plaintext, audio);
    }

    #[test]
    fn test_roundtrip_aes256_gcm_rtpsize() {
        roundtrip(EncryptionMode::AeadAes256GcmRtpsize);
    }

    #[test]
    fn test_roundtrip_xchacha20_rtpsize() {
        roundtrip(EncryptionMode::AeadXChaCha20Poly1305Rtpsize);
    }

    #[test]
    fn test_roundtrip_aes256_gcm() {
        roundtrip(EncryptionMode::AeadAes256Gcm);
    }

    #[test]
    fn test_roundtrip_xsalsa20_poly1305() {
        roundtrip(EncryptionMode::XSalsa20Poly1305);
    }

    #[test]
    fn test_roundtrip_xsalsa20_poly1305_lite() {
        roundtrip(EncryptionMode::XSalsa20Poly1305Lite);
    }

    #[test]
    fn test_roundtrip_xsalsa20_poly1305_lite_rtpsize() {
        roundtrip(EncryptionMode::XSalsa20Poly1305LiteRtpsize);
    }

    #[test]
    fn test_roundtrip_xsalsa20_poly1305_suffix() {
        roundtrip(EncryptionMode::XSalsa20Poly1305Suffix);
    }

    #[test]
    fn test_xchacha20_rtpsize_nonce_is_monotonic_counter() {
        let key = [1u8; KEY_SIZE];
        let mut crypto = VoiceCrypto::new(&key, EncryptionMode::AeadXChaCha20Poly1305Rtpsize);
        let header = build_rtp_header(0, 0, 1);

        for expected in 0u64..10 {
            let body = crypto.encrypt(&header, b"x").unwrap();
            let nonce = &body[..NONCE_SIZE];
            let counter = BigEndian::read_u64(&nonce[NONCE_SIZE - 8..]);
            assert_eq!(counter, expected);
            assert!(nonce[..NONCE_SIZE - 8].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_nonce_counter_never_repeats_across_packets() {
        let key = [2u8; KEY_SIZE];
        let mut crypto = VoiceCrypto::new(&key, EncryptionMode::XSalsa20Poly1305Lite);
        let header = build_rtp_header(0, 0, 1);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let body = crypto.encrypt(&header, b"frame").unwrap();
            let counter = &body[body.len() - 4..];
            assert!(seen.insert(counter.to_vec()), "nonce counter repeated");
        }
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        let err = VoiceCrypto::from_slice(&[0u8; 16], EncryptionMode::AeadAes256GcmRtpsize)
            .unwrap_err();
        assert!(matches!(err, VoiceError::InvalidSecretKey(16)));
    }
}
