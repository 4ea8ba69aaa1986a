//! `xsalsa20_poly1305` packet sealing.
//!
//! The nonce is the 12-byte RTP header zero-padded to 24 bytes and the wire
//! layout is `header ∥ ciphertext ∥ tag`.

use xsalsa20poly1305::{
    KeyInit, XSalsa20Poly1305,
    aead::{AeadInPlace, generic_array::GenericArray},
};

use crate::{
    common::errors::{VoiceError, VoiceResult},
    gateway::constants::{DEFAULT_VOICE_MODE, RTP_HEADER_SIZE},
};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;

/// The 32-byte key delivered in the session description.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn cipher(&self) -> XSalsa20Poly1305 {
        XSalsa20Poly1305::new(GenericArray::from_slice(&self.0))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Negotiable encryption modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    XSalsa20Poly1305,
}

impl EncryptionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::XSalsa20Poly1305 => DEFAULT_VOICE_MODE,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        (name == DEFAULT_VOICE_MODE).then_some(Self::XSalsa20Poly1305)
    }

    /// Picks the mode we support from the server's list.
    pub fn select<S: AsRef<str>>(offered: &[S]) -> VoiceResult<Self> {
        offered
            .iter()
            .find_map(|m| Self::from_name(m.as_ref()))
            .ok_or(VoiceError::NoSupportedMode)
    }
}

/// Nonce for a packet: its header followed by zeros.
pub fn header_nonce(header: &[u8; RTP_HEADER_SIZE]) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..RTP_HEADER_SIZE].copy_from_slice(header);
    nonce
}

/// Encrypts `buf[offset..]` in place and appends the tag.
pub fn seal_in_place(
    cipher: &XSalsa20Poly1305,
    nonce: &[u8; NONCE_SIZE],
    buf: &mut Vec<u8>,
    offset: usize,
) -> VoiceResult<()> {
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), &[], &mut buf[offset..])
        .map_err(|_| VoiceError::Encryption)?;
    buf.extend_from_slice(&tag);
    Ok(())
}

/// Decrypts `ciphertext ∥ tag`, failing on any authentication mismatch.
pub fn open(
    cipher: &XSalsa20Poly1305,
    nonce: &[u8; NONCE_SIZE],
    sealed: &[u8],
) -> VoiceResult<Vec<u8>> {
    if sealed.len() < TAG_SIZE {
        return Err(VoiceError::Encryption);
    }
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);
    let mut plain = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            &[],
            &mut plain,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| VoiceError::Encryption)?;
    Ok(plain)
}

/// Splits a media packet and returns its decrypted payload.
pub fn open_packet(key: &SecretKey, packet: &[u8]) -> VoiceResult<Vec<u8>> {
    if packet.len() < RTP_HEADER_SIZE + TAG_SIZE {
        return Err(VoiceError::Encryption);
    }
    let mut header = [0u8; RTP_HEADER_SIZE];
    header.copy_from_slice(&packet[..RTP_HEADER_SIZE]);
    open(&key.cipher(), &header_nonce(&header), &packet[RTP_HEADER_SIZE..])
}
