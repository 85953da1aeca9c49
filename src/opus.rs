//! Opus encoder wrapper.
//!
//! Wraps `audiopus`'s encoder for the fixed 48 kHz / stereo / 20 ms frame
//! shape this library always sends. Grounded in the `audiopus::coder::Encoder`
//! construction and tuning call shape used by the native pyo3 voice binding's
//! player, and in the constants `songbird` derives for the same frame shape.

use crate::error::VoiceError;
use audiopus::coder::Encoder as OpusEncoderInner;
use audiopus::{Application, Bandwidth, Bitrate, Channels, SampleRate, Signal};

/// Samples per channel in one 20 ms frame at 48 kHz.
pub const FRAME_SIZE: usize = 960;

/// Output channels Discord voice requires.
pub const CHANNELS: usize = 2;

/// Bytes per PCM sample (s16le).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Exact PCM frame size in bytes: `960 * 2 * 2`.
pub const PCM_FRAME_BYTES: usize = FRAME_SIZE * CHANNELS * BYTES_PER_SAMPLE;

/// Opus application tuning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplicationMode {
    /// Tuned for voice (VOIP).
    Voip,
    /// Tuned for general audio.
    #[default]
    Audio,
    /// Tuned for minimal latency.
    LowDelay,
}

impl ApplicationMode {
    fn into_audiopus(self) -> Application {
        match self {
            ApplicationMode::Voip => Application::Voip,
            ApplicationMode::Audio => Application::Audio,
            ApplicationMode::LowDelay => Application::LowDelay,
        }
    }
}

/// Wraps an Opus encoder fixed to 48 kHz stereo.
pub struct OpusEncoder {
    inner: OpusEncoderInner,
    scratch: Vec<u8>,
}

impl OpusEncoder {
    /// Create a new encoder with the given application mode.
    ///
    /// Mirrors the tunables a production Opus binding exposes: 128 kbps
    /// bitrate, inband FEC for packet-loss resilience, ~15% expected loss,
    /// fullband bandwidth, and automatic signal detection.
    pub fn new(mode: ApplicationMode) -> Result<Self, VoiceError> {
        let mut inner = OpusEncoderInner::new(
            SampleRate::Hz48000,
            Channels::Stereo,
            mode.into_audiopus(),
        )
        .map_err(|e| VoiceError::Opus(e.to_string()))?;

        inner
            .set_bitrate(Bitrate::BitsPerSecond(128_000))
            .map_err(|e| VoiceError::Opus(e.to_string()))?;
        inner
            .enable_inband_fec()
            .map_err(|e| VoiceError::Opus(e.to_string()))?;
        inner
            .set_packet_loss_perc(15)
            .map_err(|e| VoiceError::Opus(e.to_string()))?;
        inner
            .set_bandwidth(Bandwidth::Fullband)
            .map_err(|e| VoiceError::Opus(e.to_string()))?;
        inner
            .set_signal(Signal::Auto)
            .map_err(|e| VoiceError::Opus(e.to_string()))?;

        Ok(Self {
            inner,
            scratch: vec![0u8; MAX_OPUS_PACKET_SIZE],
        })
    }

    /// Encode exactly one 3840-byte s16le PCM frame into an Opus packet.
    ///
    /// Fails with `InvalidFrameSize` if `pcm` is not exactly
    /// [`PCM_FRAME_BYTES`] long — the caller (the player) is responsible for
    /// zero-padding short final frames before calling this.
    pub fn encode(&mut self, pcm: &[u8]) -> Result<Vec<u8>, VoiceError> {
        if pcm.len() != PCM_FRAME_BYTES {
            return Err(VoiceError::InvalidFrameSize {
                expected: PCM_FRAME_BYTES,
                actual: pcm.len(),
            });
        }

        let samples = bytes_to_i16_samples(pcm);
        let len = self
            .inner
            .encode(&samples, &mut self.scratch)
            .map_err(|e| VoiceError::Opus(e.to_string()))?;

        Ok(self.scratch[..len].to_vec())
    }
}

/// Maximum size of an encoded Opus packet at our bitrate; generous enough
/// that the encoder never overruns the scratch buffer.
const MAX_OPUS_PACKET_SIZE: usize = 4000;

fn bytes_to_i16_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_frame_size() {
        let mut encoder = OpusEncoder::new(ApplicationMode::Audio).unwrap();
        let err = encoder.encode(&[0u8; 100]).unwrap_err();
        assert!(matches!(
            err,
            VoiceError::InvalidFrameSize {
                expected: PCM_FRAME_BYTES,
                actual: 100
            }
        ));
    }

    #[test]
    fn test_encodes_silence_frame() {
        let mut encoder = OpusEncoder::new(ApplicationMode::Audio).unwrap();
        let silence = vec![0u8; PCM_FRAME_BYTES];
        let packet = encoder.encode(&silence).unwrap();
        assert!(!packet.is_empty());
    }

    #[test]
    fn test_pcm_frame_bytes_matches_spec() {
        assert_eq!(PCM_FRAME_BYTES, 3840);
    }
}
