//! Playback coordinator: owns RTP sequencing and drives the frame clock.
//!
//! Mirrors the native pyo3 voice binding's `audio_play_loop` shape (encode,
//! build header, encrypt, send, pace) adapted to `tokio` tasks instead of a
//! dedicated OS thread. Sequence and timestamp counters live outside the
//! spawned task so a `stop()` followed by a new `play()` resumes numbering
//! instead of restarting at zero, matching the requirement that RTP
//! counters survive across a connection's stop/resume cycles. Because
//! `stop()` aborts the task outright, the counters are only advanced after
//! a frame's packet has actually been handed to the transport — otherwise
//! an abort landing mid-frame would burn a sequence number on a packet
//! that was never sent. A short final PCM frame from the source is
//! zero-padded up to a full frame here, before encoding; the source
//! itself hands back whatever it actually read.

use crate::clock::FrameClock;
use crate::crypto::{build_rtp_header, VoiceCrypto};
use crate::error::VoiceError;
use crate::opus::{ApplicationMode, OpusEncoder, PCM_FRAME_BYTES};
use crate::payload::SpeakingFlags;
use crate::source::AudioSource;
use crate::udp::VoiceUdp;
use crate::ws::VoiceCommand;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Drives one connection's outbound audio: encodes, encrypts, and paces
/// RTP packets onto the UDP transport.
pub struct Player {
    udp: Arc<VoiceUdp>,
    crypto: Arc<Mutex<VoiceCrypto>>,
    ssrc: u32,
    sequence: Arc<AtomicU16>,
    timestamp: Arc<AtomicU32>,
    command_tx: mpsc::Sender<VoiceCommand>,
    application_mode: ApplicationMode,
    task: Option<JoinHandle<()>>,
}

impl Player {
    /// Build a player for one connection. `sequence`/`timestamp` start at
    /// 0; Discord does not require any particular starting value.
    pub fn new(
        udp: Arc<VoiceUdp>,
        crypto: VoiceCrypto,
        ssrc: u32,
        command_tx: mpsc::Sender<VoiceCommand>,
        application_mode: ApplicationMode,
    ) -> Self {
        Self {
            udp,
            crypto: Arc::new(Mutex::new(crypto)),
            ssrc,
            sequence: Arc::new(AtomicU16::new(0)),
            timestamp: Arc::new(AtomicU32::new(0)),
            command_tx,
            application_mode,
            task: None,
        }
    }

    /// Whether a playback task is currently running.
    pub fn is_playing(&self) -> bool {
        self.task.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start playing `source`, stopping any currently-running source
    /// first. Returns once the new playback task has been spawned; it does
    /// not wait for the source to finish.
    pub async fn play(&mut self, source: AudioSource) -> Result<(), VoiceError> {
        self.stop().await?;

        let encoder = OpusEncoder::new(self.application_mode)?;
        let _ = self
            .command_tx
            .send(VoiceCommand::Speaking {
                speaking: SpeakingFlags::MICROPHONE,
                delay: 0,
                ssrc: self.ssrc,
            })
            .await;

        let udp = Arc::clone(&self.udp);
        let crypto = Arc::clone(&self.crypto);
        let ssrc = self.ssrc;
        let sequence = Arc::clone(&self.sequence);
        let timestamp = Arc::clone(&self.timestamp);

        self.task = Some(tokio::spawn(playback_loop(
            source, udp, crypto, ssrc, sequence, timestamp, encoder,
        )));

        Ok(())
    }

    /// Stop the current playback task, if any, and mark the connection not
    /// speaking. Idempotent when nothing is playing.
    pub async fn stop(&mut self) -> Result<(), VoiceError> {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;

            let _ = self
                .command_tx
                .send(VoiceCommand::Speaking {
                    speaking: SpeakingFlags::NONE,
                    delay: 0,
                    ssrc: self.ssrc,
                })
                .await;
        }

        Ok(())
    }
}

/// Advance per-frame at the 20 ms cadence: read, encode, encrypt, send.
/// Ends when the source is exhausted or a send fails.
async fn playback_loop(
    mut source: AudioSource,
    udp: Arc<VoiceUdp>,
    crypto: Arc<Mutex<VoiceCrypto>>,
    ssrc: u32,
    sequence: Arc<AtomicU16>,
    timestamp: Arc<AtomicU32>,
    mut encoder: OpusEncoder,
) {
    let mut clock = FrameClock::new();

    loop {
        let mut pcm = match source.next_frame().await {
            Ok(Some(pcm)) => pcm,
            Ok(None) => {
                debug!("audio source exhausted");
                break;
            }
            Err(e) => {
                error!(?e, "audio source read failed");
                break;
            }
        };

        pad_short_frame(&mut pcm);

        let opus_packet = match encoder.encode(&pcm) {
            Ok(packet) => packet,
            Err(e) => {
                error!(?e, "opus encode failed");
                break;
            }
        };

        // Peek the counters without advancing them: the packet is only
        // actually numbered once it's successfully handed to the
        // transport, so a cancellation or send failure doesn't burn a
        // sequence/timestamp value for a frame nobody received.
        let seq = sequence.load(Ordering::Relaxed);
        let ts = timestamp.load(Ordering::Relaxed);
        let header = build_rtp_header(seq, ts, ssrc);

        let body = {
            let mut guard = crypto.lock();
            match guard.encrypt(&header, &opus_packet) {
                Ok(body) => body,
                Err(e) => {
                    error!(?e, "packet encryption failed");
                    break;
                }
            }
        };

        let mut packet = Vec::with_capacity(header.len() + body.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(&body);

        if let Err(e) = udp.send(&packet).await {
            warn!(?e, "dropped voice packet");
            break;
        }

        sequence.fetch_add(1, Ordering::Relaxed);
        timestamp.fetch_add(crate::opus::FRAME_SIZE as u32, Ordering::Relaxed);

        clock.wait().await;
    }

    info!("playback loop ended");
}

/// Right-pad a short final PCM frame to [`PCM_FRAME_BYTES`] with zeros so
/// the encoder always sees a fixed-size input. A no-op for full frames.
fn pad_short_frame(pcm: &mut Vec<u8>) {
    if pcm.len() < PCM_FRAME_BYTES {
        pcm.resize(PCM_FRAME_BYTES, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::EncryptionMode;

    #[tokio::test]
    async fn test_sequence_and_timestamp_survive_stop_then_play() {
        let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let udp = Arc::new(
            VoiceUdp::connect("127.0.0.1", server_addr.port(), 0xAAAA)
                .await
                .unwrap(),
        );
        let key = [7u8; 32];
        let crypto = VoiceCrypto::new(&key, EncryptionMode::AeadAes256GcmRtpsize);
        let (tx, mut rx) = mpsc::channel(8);
        let mut player = Player::new(udp, crypto, 0xAAAA, tx, ApplicationMode::Audio);

        player.play(AudioSource::silence()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        player.stop().await.unwrap();

        let seq_after_first_stop = player.sequence.load(Ordering::Relaxed);
        assert!(seq_after_first_stop > 0);

        player.play(AudioSource::silence()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        player.stop().await.unwrap();

        let seq_after_second_stop = player.sequence.load(Ordering::Relaxed);
        assert!(seq_after_second_stop >= seq_after_first_stop);

        // Drain the speaking commands this exercise produced so the
        // channel doesn't appear to have been abandoned.
        while rx.try_recv().is_ok() {}
    }

    #[test]
    fn test_pad_short_frame_zero_pads_to_full_frame() {
        let mut pcm = vec![0x42u8; 100];
        pad_short_frame(&mut pcm);
        assert_eq!(pcm.len(), PCM_FRAME_BYTES);
        assert!(pcm[..100].iter().all(|&b| b == 0x42));
        assert!(pcm[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pad_short_frame_leaves_full_frame_untouched() {
        let mut pcm = vec![0x7Fu8; PCM_FRAME_BYTES];
        pad_short_frame(&mut pcm);
        assert_eq!(pcm.len(), PCM_FRAME_BYTES);
        assert!(pcm.iter().all(|&b| b == 0x7F));
    }

    #[tokio::test]
    async fn test_stop_without_play_is_a_no_op() {
        let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let udp = Arc::new(
            VoiceUdp::connect("127.0.0.1", server_addr.port(), 1)
                .await
                .unwrap(),
        );
        let crypto = VoiceCrypto::new(&[1u8; 32], EncryptionMode::AeadAes256GcmRtpsize);
        let (tx, _rx) = mpsc::channel(8);
        let mut player = Player::new(udp, crypto, 1, tx, ApplicationMode::Audio);

        player.stop().await.unwrap();
        assert!(!player.is_playing());
    }
}
