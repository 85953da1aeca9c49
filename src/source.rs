//! Audio sources.
//!
//! An [`AudioSource`] yields raw s16le PCM frames for the player to encode
//! and send. File and web sources delegate decoding to an `ffmpeg`
//! subprocess, grounded in the process-spawn shape the native pyo3 voice
//! binding's player uses for the same purpose; the silence source needs
//! no subprocess at all. A short final read is handed back as-is — the
//! player's loop is responsible for zero-padding it up to a full frame
//! before encoding, per the Opus encoder's fixed-size input requirement.

use crate::error::VoiceError;
use crate::opus::PCM_FRAME_BYTES;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

/// A source of raw PCM audio frames.
pub enum AudioSource {
    /// Decodes a local file through `ffmpeg`.
    File(Transcoder),
    /// Decodes a remote URL through `ffmpeg`.
    Web(Transcoder),
    /// Infinite stream of silence, used to keep a connection's RTP
    /// timestamps advancing without transmitting real audio.
    Silence,
}

impl AudioSource {
    /// Build a source decoding the local file at `path`.
    pub async fn file(path: impl AsRef<str>) -> Result<Self, VoiceError> {
        Ok(AudioSource::File(Transcoder::spawn(path.as_ref()).await?))
    }

    /// Build a source decoding the remote URL `url`. `ffmpeg` is handed the
    /// URL directly as its `-i` argument; protocol support (http, hls, ...)
    /// is whatever the local `ffmpeg` build provides.
    pub async fn web(url: impl AsRef<str>) -> Result<Self, VoiceError> {
        Ok(AudioSource::Web(Transcoder::spawn(url.as_ref()).await?))
    }

    /// Build a silence source.
    pub fn silence() -> Self {
        AudioSource::Silence
    }

    /// Read the next PCM frame. Returns `Ok(None)` once the source is
    /// exhausted (file/web sources) or never for silence. A short final
    /// read from ffmpeg is returned at its actual length, unpadded — the
    /// caller (the player) zero-pads it up to [`PCM_FRAME_BYTES`] before
    /// encoding.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, VoiceError> {
        match self {
            AudioSource::File(t) | AudioSource::Web(t) => t.next_frame().await,
            AudioSource::Silence => Ok(Some(vec![0u8; PCM_FRAME_BYTES])),
        }
    }
}

/// Wraps an `ffmpeg` subprocess transcoding arbitrary input into raw s16le
/// stereo 48 kHz PCM on stdout.
pub struct Transcoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl Transcoder {
    async fn spawn(input: &str) -> Result<Self, VoiceError> {
        debug!(input, "spawning ffmpeg transcoder");

        let mut child = Command::new("ffmpeg")
            .arg("-i")
            .arg(input)
            .args([
                "-f",
                "s16le",
                "-ar",
                "48000",
                "-ac",
                "2",
                "-loglevel",
                "error",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoiceError::ProtocolError("ffmpeg stdout not piped".to_string()))?;

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
        })
    }

    /// Read up to one frame's worth of bytes. Returns `Ok(None)` once
    /// nothing more is available. A short final read (less than
    /// [`PCM_FRAME_BYTES`]) is returned at its actual length — the player
    /// pads it to a full frame, not this layer.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, VoiceError> {
        read_frame(&mut self.stdout).await
    }
}

/// Read up to [`PCM_FRAME_BYTES`] from `reader`, stopping early on EOF.
/// Returns `Ok(None)` if nothing at all was read, otherwise the bytes
/// actually read (possibly fewer than a full frame). Split out of
/// [`Transcoder::next_frame`] so the short-read path can be driven by a
/// fake reader in tests, without spawning a real `ffmpeg` process.
async fn read_frame(
    reader: &mut (impl AsyncRead + Unpin),
) -> Result<Option<Vec<u8>>, VoiceError> {
    let mut frame = vec![0u8; PCM_FRAME_BYTES];
    let mut read = 0;

    while read < PCM_FRAME_BYTES {
        let n = reader.read(&mut frame[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
    }

    if read == 0 {
        return Ok(None);
    }

    frame.truncate(read);
    Ok(Some(frame))
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(?e, "failed to kill ffmpeg transcoder");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_silence_yields_zeroed_frame_of_correct_size() {
        let mut source = AudioSource::silence();
        let frame = source.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.len(), PCM_FRAME_BYTES);
        assert!(frame.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_silence_never_exhausts() {
        let mut source = AudioSource::silence();
        for _ in 0..10 {
            assert!(source.next_frame().await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_read_frame_short_read_returned_unpadded() {
        let payload = vec![0xABu8; 100];
        let mut cursor = std::io::Cursor::new(payload.clone());
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(frame.len(), 100);
        assert_eq!(frame, payload);
    }

    #[tokio::test]
    async fn test_read_frame_full_frame() {
        let payload = vec![0x11u8; PCM_FRAME_BYTES];
        let mut cursor = std::io::Cursor::new(payload.clone());
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(frame.len(), PCM_FRAME_BYTES);
        assert_eq!(frame, payload);
    }

    #[tokio::test]
    async fn test_read_frame_empty_is_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }
}
