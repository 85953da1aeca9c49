//! UDP transport for Discord Voice.
//!
//! A thin datagram wrapper plus the IP-discovery handshake. Carries no RTP
//! counters or encryption state — those belong to the player and encryption
//! suite respectively, so that only the playback loop can ever encrypt and
//! send, keeping the "exclusively owned by the coordinator" resource rule
//! enforceable by the type system rather than by convention.

use crate::error::VoiceError;
use byteorder::{BigEndian, ByteOrder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Maximum size of a voice packet.
pub const MAX_PACKET_SIZE: usize = 2048;

/// Size of the IP discovery request/response packet.
const DISCOVERY_PACKET_SIZE: usize = 74;

/// Voice UDP transport.
pub struct VoiceUdp {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    ssrc: u32,
}

impl VoiceUdp {
    /// Open a UDP socket connected to the voice node's `(server_ip,
    /// server_port)` address, as reported in READY.
    pub async fn connect(server_ip: &str, server_port: u16, ssrc: u32) -> Result<Self, VoiceError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        let server_addr: SocketAddr = format!("{server_ip}:{server_port}")
            .parse()
            .map_err(|e| VoiceError::Udp(format!("invalid server address: {e}")))?;

        socket.connect(server_addr).await?;
        info!(addr = %server_addr, ssrc, "connected voice UDP transport");

        Ok(Self {
            socket: Arc::new(socket),
            server_addr,
            ssrc,
        })
    }

    /// Run the IP discovery exchange: send a 74-byte request, await the
    /// 74-byte response, and return `(external_ip, external_port)`.
    pub async fn discover_ip(&self, timeout: Duration) -> Result<(String, u16), VoiceError> {
        let mut packet = [0u8; DISCOVERY_PACKET_SIZE];
        BigEndian::write_u16(&mut packet[0..2], 0x0001);
        BigEndian::write_u16(&mut packet[2..4], 70);
        BigEndian::write_u32(&mut packet[4..8], self.ssrc);

        self.socket.send(&packet).await?;

        let mut response = [0u8; DISCOVERY_PACKET_SIZE];
        match tokio::time::timeout(timeout, self.socket.recv(&mut response)).await {
            Ok(Ok(len)) if len >= DISCOVERY_PACKET_SIZE => {
                let response_type = BigEndian::read_u16(&response[0..2]);
                if response_type != 0x0002 {
                    return Err(VoiceError::ProtocolError(format!(
                        "unexpected IP discovery response type 0x{response_type:04x}"
                    )));
                }

                let ip_bytes = &response[8..72];
                let ip_end = ip_bytes.iter().position(|&b| b == 0).unwrap_or(64);
                let ip = String::from_utf8_lossy(&ip_bytes[..ip_end]).into_owned();
                let port = BigEndian::read_u16(&response[72..74]);

                info!(ip = %ip, port, "IP discovery complete");
                Ok((ip, port))
            }
            Ok(Ok(len)) => Err(VoiceError::ProtocolError(format!(
                "IP discovery response too short: {len} bytes"
            ))),
            Ok(Err(e)) => Err(VoiceError::Udp(format!("receive error: {e}"))),
            Err(_) => Err(VoiceError::ProtocolError(
                "IP discovery timed out".to_string(),
            )),
        }
    }

    /// Send a single datagram (already header-prefixed and encrypted).
    pub async fn send(&self, packet: &[u8]) -> Result<(), VoiceError> {
        self.socket.send(packet).await?;
        Ok(())
    }

    /// Receive a single datagram into `buf`, returning the number of bytes
    /// read. Present for symmetry/tests; production playback never reads.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, VoiceError> {
        let len = self.socket.recv(buf).await?;
        debug!(bytes = len, "received voice UDP datagram");
        Ok(len)
    }

    /// The socket's local (bound) address.
    pub fn local_addr(&self) -> Result<SocketAddr, VoiceError> {
        self.socket.local_addr().map_err(VoiceError::from)
    }

    /// SSRC assigned to this connection by the voice node.
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// The voice node's address this socket is connected to.
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_local_addr() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_discovery_round_trip() {
        // Stand in for a voice node: receive the request, reply with a
        // fixed external address, and check the parser's reconstruction.
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let client = VoiceUdp::connect("127.0.0.1", server_addr.port(), 0x1234)
            .await
            .unwrap();

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; DISCOVERY_PACKET_SIZE];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, DISCOVERY_PACKET_SIZE);
            assert_eq!(BigEndian::read_u16(&buf[0..2]), 0x0001);
            assert_eq!(BigEndian::read_u32(&buf[4..8]), 0x1234);

            let mut response = [0u8; DISCOVERY_PACKET_SIZE];
            BigEndian::write_u16(&mut response[0..2], 0x0002);
            response[8..17].copy_from_slice(b"1.2.3.4\0\0");
            BigEndian::write_u16(&mut response[72..74], 50000);
            server.send_to(&response, peer).await.unwrap();
        });

        let (ip, port) = client
            .discover_ip(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(ip, "1.2.3.4");
        assert_eq!(port, 50000);

        server_task.await.unwrap();
    }
}
