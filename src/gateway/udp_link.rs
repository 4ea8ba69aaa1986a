use xsalsa20poly1305::XSalsa20Poly1305;

use crate::{
    common::errors::VoiceResult,
    gateway::{
        constants::{
            RTP_HEADER_SIZE, RTP_OPUS_PAYLOAD_TYPE, RTP_VERSION_BYTE, UDP_PACKET_BUF_CAPACITY,
        },
        encryption::{SecretKey, header_nonce, seal_in_place},
    },
};

/// Builds sealed media packets for one socket.
///
/// Sequence and timestamp advance on every `seal`, whether the payload is
/// audio or silence, and wrap at 2^16 and 2^32 respectively.
pub struct PacketFramer {
    cipher: XSalsa20Poly1305,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    timestamp_step: u32,
    /// Reusable packet buffer, cleared per frame.
    packet_buf: Vec<u8>,
}

impl PacketFramer {
    /// Framer with random initial counters.
    pub fn new(key: &SecretKey, ssrc: u32, timestamp_step: u32) -> Self {
        Self::with_counters(key, ssrc, timestamp_step, rand::random(), rand::random())
    }

    pub fn with_counters(
        key: &SecretKey,
        ssrc: u32,
        timestamp_step: u32,
        sequence: u16,
        timestamp: u32,
    ) -> Self {
        Self {
            cipher: key.cipher(),
            ssrc,
            sequence,
            timestamp,
            timestamp_step,
            packet_buf: Vec::with_capacity(UDP_PACKET_BUF_CAPACITY),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Counters the next packet will carry.
    pub fn next_counters(&self) -> (u16, u32) {
        (self.sequence, self.timestamp)
    }

    /// Seals `payload` into `header ∥ ciphertext ∥ tag` and advances the counters.
    pub fn seal(&mut self, payload: &[u8]) -> VoiceResult<&[u8]> {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let timestamp = self.timestamp;
        self.timestamp = self.timestamp.wrapping_add(self.timestamp_step);

        let mut header = [0u8; RTP_HEADER_SIZE];
        header[0] = RTP_VERSION_BYTE;
        header[1] = RTP_OPUS_PAYLOAD_TYPE;
        header[2..4].copy_from_slice(&sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.packet_buf.clear();
        self.packet_buf.extend_from_slice(&header);
        self.packet_buf.extend_from_slice(payload);

        seal_in_place(
            &self.cipher,
            &header_nonce(&header),
            &mut self.packet_buf,
            RTP_HEADER_SIZE,
        )?;

        Ok(&self.packet_buf)
    }
}

/// Reads `(sequence, timestamp, ssrc)` back out of a packet header.
pub fn parse_header(packet: &[u8]) -> Option<(u16, u32, u32)> {
    if packet.len() < RTP_HEADER_SIZE
        || packet[0] != RTP_VERSION_BYTE
        || packet[1] != RTP_OPUS_PAYLOAD_TYPE
    {
        return None;
    }
    Some((
        u16::from_be_bytes([packet[2], packet[3]]),
        u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
        u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
    ))
}
