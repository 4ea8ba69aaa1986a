//! Central constants for the audio side: encoder defaults, the decoder
//! process, and Opus silence framing.

// ── Encoder defaults ──────────────────────────────────────────────────────────

/// Output channel count (stereo).
pub const DEFAULT_CHANNELS: u16 = 2;

/// Output sample rate (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Samples per channel in one 20 ms frame at 48 kHz.
pub const DEFAULT_FRAME_SIZE: u32 = 960;

/// Target Opus bitrate (bits per second).
pub const DEFAULT_BITRATE: u32 = 64_000;

/// Upper bound on the size of one encoded Opus packet.
pub const DEFAULT_MAX_PACKET_BYTES: usize = 4_096;

/// Bytes per interleaved s16le sample.
pub const BYTES_PER_SAMPLE: usize = 2;

// ── Decoder process ──────────────────────────────────────────────────────────

/// External decoder invoked to normalise arbitrary input into raw PCM.
pub const DEFAULT_DECODER_BINARY: &str = "ffmpeg";

/// Frames worth of PCM the decoder's stdout reader buffers ahead.
pub const DECODER_READ_AHEAD_FRAMES: usize = 4;

// ── Silence ───────────────────────────────────────────────────────────────────

/// Bytes following the TOC byte in an Opus silence frame.
pub const SILENCE_TAIL: [u8; 2] = [0xFF, 0xFE];
