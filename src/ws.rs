//! Voice WebSocket session: handshake, heartbeat loop, opcode dispatch.
//!
//! Connects to `wss://<endpoint>/?v=8` and interleaves three concerns on
//! one socket: the one-shot IDENTIFY/READY/SESSION_DESCRIPTION handshake,
//! a recurring HEARTBEAT/HEARTBEAT_ACK loop, and inbound opcode dispatch.
//! HELLO and READY are not ordered relative to each other on the wire, so
//! both are handled as they arrive rather than awaited in sequence.

use crate::error::VoiceError;
use crate::opcode::VoiceOpCode;
use crate::payload::*;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, trace, warn};

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Events surfaced from the session to the connection coordinator.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// READY: SSRC and remote voice-node address have been assigned.
    Ready(VoiceReadyInfo),
    /// SESSION_DESCRIPTION: the negotiated secret key has arrived.
    SessionDescription(VoiceSessionDescription),
    /// RESUMED: the prior session was resumed.
    Resumed,
    /// The socket closed, by either side.
    Closed { code: u16, reason: String },
}

/// Allocation handed out in READY.
#[derive(Debug, Clone)]
pub struct VoiceReadyInfo {
    /// SSRC assigned to this connection.
    pub ssrc: u32,
    /// Voice node UDP address.
    pub ip: String,
    /// Voice node UDP port.
    pub port: u16,
    /// Encryption modes the voice node supports.
    pub modes: Vec<String>,
}

/// Negotiated session key, captured from SESSION_DESCRIPTION.
#[derive(Debug, Clone)]
pub struct VoiceSessionDescription {
    /// Selected encryption mode (wire name).
    pub mode: String,
    /// Secret key for encryption (expected to be 32 bytes).
    pub secret_key: Vec<u8>,
}

/// Commands the coordinator sends to this session's single writer.
#[derive(Debug)]
pub enum VoiceCommand {
    /// Send SELECT_PROTOCOL once the external address is known.
    SelectProtocol {
        address: String,
        port: u16,
        mode: String,
    },
    /// Send SPEAKING to mark the start/end of an audio stream.
    Speaking {
        speaking: SpeakingFlags,
        delay: u32,
        ssrc: u32,
    },
}

/// One voice-gateway WebSocket session.
pub struct VoiceWebSocket {
    url: String,
}

impl VoiceWebSocket {
    /// Build a session targeting the endpoint from VOICE_SERVER_UPDATE.
    pub fn new(endpoint: &str) -> Self {
        let stripped = endpoint.trim_start_matches("wss://");
        Self {
            url: format!("wss://{stripped}/?v=8"),
        }
    }

    /// Connect, send IDENTIFY, then run the read/heartbeat/command loop
    /// until the socket closes or the command channel is dropped.
    pub async fn connect_and_run(
        &self,
        guild_id: u64,
        user_id: u64,
        session_id: String,
        token: String,
        event_tx: mpsc::Sender<VoiceEvent>,
        mut command_rx: mpsc::Receiver<VoiceCommand>,
    ) -> Result<(), VoiceError> {
        info!(url = %self.url, "connecting voice websocket");
        let (ws_stream, _response) = connect_async(&self.url).await?;
        let (mut sink, mut stream) = ws_stream.split();

        let identify = IdentifyPayload {
            server_id: guild_id.to_string(),
            user_id: user_id.to_string(),
            session_id,
            token,
        };
        send_payload(&mut sink, VoiceOpCode::Identify, &identify).await?;
        info!("sent IDENTIFY");

        let mut last_ack_seq: Option<u64> = None;
        let mut heartbeat_interval: Option<time::Interval> = None;
        let mut heartbeat_acked = true;
        let mut first_heartbeat = true;

        loop {
            let heartbeat_tick = async {
                match heartbeat_interval.as_mut() {
                    Some(timer) => {
                        timer.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(VoiceCommand::SelectProtocol { address, port, mode }) => {
                            let parsed_mode = EncryptionMode::parse_mode(&mode).unwrap_or_default();
                            let payload = SelectProtocolPayload::new(address, port, parsed_mode);
                            if let Err(e) = send_payload(&mut sink, VoiceOpCode::SelectProtocol, &payload).await {
                                error!(?e, "failed to send SELECT_PROTOCOL");
                                break;
                            }
                            info!("sent SELECT_PROTOCOL");
                        }
                        Some(VoiceCommand::Speaking { speaking, delay, ssrc }) => {
                            let payload = SpeakingPayload { speaking: speaking.bits(), delay, ssrc };
                            if let Err(e) = send_payload(&mut sink, VoiceOpCode::Speaking, &payload).await {
                                error!(?e, "failed to send SPEAKING");
                                break;
                            }
                        }
                        None => {
                            debug!("voice command channel closed, ending session");
                            break;
                        }
                    }
                }

                _ = heartbeat_tick => {
                    if first_heartbeat {
                        first_heartbeat = false;
                        let period = heartbeat_interval
                            .as_ref()
                            .map(|t| t.period().as_secs_f64())
                            .unwrap_or(0.0);
                        let jitter = rand::rng().random::<f64>() * period;
                        time::sleep(Duration::from_secs_f64(jitter)).await;
                    }

                    if !heartbeat_acked {
                        warn!("no HEARTBEAT_ACK since last beat");
                    }

                    heartbeat_acked = false;
                    let heartbeat = HeartbeatPayload { nonce: now_ms(), seq_ack: last_ack_seq };
                    if let Err(e) = send_payload(&mut sink, VoiceOpCode::Heartbeat, &heartbeat).await {
                        error!(?e, "failed to send HEARTBEAT");
                        break;
                    }
                    trace!(seq_ack = ?last_ack_seq, "sent HEARTBEAT");
                }

                message = stream.next() => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<RawVoicePayload>(&text) {
                                Ok(raw) => {
                                    if let Some(s) = raw.s {
                                        last_ack_seq = Some(s);
                                    }
                                    dispatch(raw, &mut heartbeat_interval, &mut heartbeat_acked, &event_tx).await;
                                }
                                Err(e) => warn!(?e, "malformed voice payload, ignoring"),
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((0, "no reason given".to_string()));
                            info!(code, %reason, "voice websocket closed");
                            let _ = event_tx.send(VoiceEvent::Closed { code, reason }).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(?e, "voice websocket error");
                            break;
                        }
                        None => {
                            debug!("voice websocket stream ended");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Dispatch one inbound payload. Unknown opcodes (including the DAVE
/// range) are logged at debug level and otherwise ignored, per the
/// requirement that the session never terminate on an unrecognized op.
async fn dispatch(
    raw: RawVoicePayload,
    heartbeat_interval: &mut Option<time::Interval>,
    heartbeat_acked: &mut bool,
    event_tx: &mpsc::Sender<VoiceEvent>,
) {
    match raw.op {
        VoiceOpCode::Hello => {
            let Some(data) = raw.d else { return };
            match serde_json::from_value::<HelloPayload>(data) {
                Ok(hello) => {
                    debug!(interval_ms = hello.heartbeat_interval, "received HELLO");
                    let interval = Duration::from_millis(hello.heartbeat_interval as u64);
                    *heartbeat_interval = Some(time::interval(interval));
                }
                Err(e) => warn!(?e, "malformed HELLO payload"),
            }
        }

        VoiceOpCode::Ready => {
            let Some(data) = raw.d else { return };
            match serde_json::from_value::<ReadyPayload>(data) {
                Ok(ready) => {
                    info!(ssrc = ready.ssrc, ip = %ready.ip, port = ready.port, "received READY");
                    let _ = event_tx
                        .send(VoiceEvent::Ready(VoiceReadyInfo {
                            ssrc: ready.ssrc,
                            ip: ready.ip,
                            port: ready.port,
                            modes: ready.modes,
                        }))
                        .await;
                }
                Err(e) => warn!(?e, "malformed READY payload"),
            }
        }

        VoiceOpCode::SessionDescription => {
            let Some(data) = raw.d else { return };
            match serde_json::from_value::<SessionDescriptionPayload>(data) {
                Ok(desc) => {
                    debug!(mode = %desc.mode, "received SESSION_DESCRIPTION");
                    let _ = event_tx
                        .send(VoiceEvent::SessionDescription(VoiceSessionDescription {
                            mode: desc.mode,
                            secret_key: desc.secret_key,
                        }))
                        .await;
                }
                Err(e) => warn!(?e, "malformed SESSION_DESCRIPTION payload"),
            }
        }

        VoiceOpCode::HeartbeatAck => {
            *heartbeat_acked = true;
            trace!("received HEARTBEAT_ACK");
        }

        VoiceOpCode::Resumed => {
            info!("voice session resumed");
            let _ = event_tx.send(VoiceEvent::Resumed).await;
        }

        VoiceOpCode::Speaking => trace!("received SPEAKING"),

        other => debug!(?other, "ignored voice opcode"),
    }
}

async fn send_payload<D: serde::Serialize>(
    sink: &mut WsSink,
    op: VoiceOpCode,
    data: &D,
) -> Result<(), VoiceError> {
    let payload = VoicePayload::new(op, data);
    let json = serde_json::to_string(&payload)?;
    sink.send(WsMessage::Text(json.into())).await?;
    Ok(())
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_uses_v8() {
        let ws = VoiceWebSocket::new("voice.example.com");
        assert_eq!(ws.url, "wss://voice.example.com/?v=8");
    }

    #[test]
    fn test_url_strips_existing_scheme() {
        let ws = VoiceWebSocket::new("wss://voice.example.com");
        assert_eq!(ws.url, "wss://voice.example.com/?v=8");
    }

    #[tokio::test]
    async fn test_dispatch_ready_emits_event() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut heartbeat_interval = None;
        let mut acked = true;
        let raw = RawVoicePayload {
            op: VoiceOpCode::Ready,
            d: Some(serde_json::json!({
                "ssrc": 7,
                "ip": "1.2.3.4",
                "port": 5000,
                "modes": ["aead_aes256_gcm_rtpsize"]
            })),
            s: None,
        };

        dispatch(raw, &mut heartbeat_interval, &mut acked, &tx).await;

        match rx.recv().await.unwrap() {
            VoiceEvent::Ready(info) => {
                assert_eq!(info.ssrc, 7);
                assert_eq!(info.ip, "1.2.3.4");
                assert_eq!(info.port, 5000);
            }
            other => panic!("expected Ready event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_hello_starts_heartbeat_timer() {
        let (tx, _rx) = mpsc::channel(1);
        let mut heartbeat_interval = None;
        let mut acked = true;
        let raw = RawVoicePayload {
            op: VoiceOpCode::Hello,
            d: Some(serde_json::json!({ "heartbeat_interval": 41250.0 })),
            s: None,
        };

        dispatch(raw, &mut heartbeat_interval, &mut acked, &tx).await;

        assert!(heartbeat_interval.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_heartbeat_ack_sets_flag() {
        let (tx, _rx) = mpsc::channel(1);
        let mut heartbeat_interval = None;
        let mut acked = false;
        let raw = RawVoicePayload {
            op: VoiceOpCode::HeartbeatAck,
            d: None,
            s: None,
        };

        dispatch(raw, &mut heartbeat_interval, &mut acked, &tx).await;

        assert!(acked);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_opcode_is_ignored_without_panic() {
        let (tx, _rx) = mpsc::channel(1);
        let mut heartbeat_interval = None;
        let mut acked = true;
        let raw = RawVoicePayload {
            op: VoiceOpCode::DaveMlsWelcome,
            d: None,
            s: None,
        };

        dispatch(raw, &mut heartbeat_interval, &mut acked, &tx).await;
    }
}
