//! IP discovery over the media socket.

use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    common::errors::{VoiceError, VoiceResult},
    gateway::constants::{DISCOVERY_PACKET_SIZE, UDP_PACKET_BUF_CAPACITY},
};

/// 70-byte probe: ssrc big-endian, then zeros.
pub fn discovery_request(ssrc: u32) -> [u8; DISCOVERY_PACKET_SIZE] {
    let mut packet = [0u8; DISCOVERY_PACKET_SIZE];
    packet[0..4].copy_from_slice(&ssrc.to_be_bytes());
    packet
}

/// Parses a discovery reply: a NUL-terminated IP string after the first four
/// bytes and a little-endian port in the final two.
pub fn parse_discovery_response(reply: &[u8]) -> VoiceResult<SocketAddr> {
    if reply.len() < DISCOVERY_PACKET_SIZE {
        return Err(VoiceError::MalformedDiscovery(format!(
            "reply of {} bytes is too small",
            reply.len()
        )));
    }

    let body = &reply[4..];
    let end = body
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| VoiceError::MalformedDiscovery("address is not terminated".into()))?;
    let ip_str = std::str::from_utf8(&body[..end])
        .map_err(|_| VoiceError::MalformedDiscovery("address is not utf-8".into()))?;
    let ip: IpAddr = ip_str
        .parse()
        .map_err(|_| VoiceError::MalformedDiscovery(format!("invalid address {:?}", ip_str)))?;

    let n = reply.len();
    let port = u16::from_le_bytes([reply[n - 2], reply[n - 1]]);
    Ok(SocketAddr::new(ip, port))
}

/// One round trip on a connected socket.
pub async fn discover_ip(socket: &UdpSocket, ssrc: u32, wait: Duration) -> VoiceResult<SocketAddr> {
    socket.send(&discovery_request(ssrc)).await?;

    let mut buf = [0u8; UDP_PACKET_BUF_CAPACITY];
    let n = tokio::time::timeout(wait, socket.recv(&mut buf))
        .await
        .map_err(|_| VoiceError::DiscoveryTimeout)??;
    parse_discovery_response(&buf[..n])
}

/// Retries `discover_ip` with a fixed backoff.
///
/// Every failed attempt is logged; the final error is always
/// `DiscoveryTimeout` unless `cancel` fires first.
pub async fn discover_with_retry(
    socket: &UdpSocket,
    ssrc: u32,
    attempts: u32,
    wait: Duration,
    backoff: Duration,
    cancel: &CancellationToken,
) -> VoiceResult<SocketAddr> {
    for attempt in 1..=attempts.max(1) {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(VoiceError::Cancelled),
            r = discover_ip(socket, ssrc, wait) => r,
        };

        match result {
            Ok(addr) => {
                debug!("Discovered external address {} (attempt {})", addr, attempt);
                return Ok(addr);
            }
            Err(e) => warn!("Discovering UDP address (attempt {}): {}", attempt, e),
        }

        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(VoiceError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
    Err(VoiceError::DiscoveryTimeout)
}
