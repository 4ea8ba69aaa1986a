use std::time::Duration;

use bytes::Bytes;

use crate::{
    audio::constants::{
        BYTES_PER_SAMPLE, DEFAULT_BITRATE, DEFAULT_CHANNELS, DEFAULT_FRAME_SIZE,
        DEFAULT_MAX_PACKET_BYTES, DEFAULT_SAMPLE_RATE, SILENCE_TAIL,
    },
    common::errors::{VoiceError, VoiceResult},
};

/// The only frame durations the voice protocol accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDuration {
    Ms2_5,
    Ms5,
    Ms10,
    Ms20,
}

impl FrameDuration {
    pub const ALL: [FrameDuration; 4] = [Self::Ms2_5, Self::Ms5, Self::Ms10, Self::Ms20];

    pub fn from_duration(duration: Duration) -> Option<Self> {
        match duration.as_nanos() {
            2_500_000 => Some(Self::Ms2_5),
            5_000_000 => Some(Self::Ms5),
            10_000_000 => Some(Self::Ms10),
            20_000_000 => Some(Self::Ms20),
            _ => None,
        }
    }

    pub fn as_duration(self) -> Duration {
        match self {
            Self::Ms2_5 => Duration::from_micros(2_500),
            Self::Ms5 => Duration::from_millis(5),
            Self::Ms10 => Duration::from_millis(10),
            Self::Ms20 => Duration::from_millis(20),
        }
    }

    /// Opus TOC configuration number for a CELT fullband frame of this length.
    pub fn toc_config(self) -> u8 {
        match self {
            Self::Ms2_5 => 28,
            Self::Ms5 => 29,
            Self::Ms10 => 30,
            Self::Ms20 => 31,
        }
    }

    /// Three-byte Opus frame the receiver decodes as silence.
    pub fn silence_frame(self) -> Bytes {
        Bytes::from(vec![self.toc_config() << 3, SILENCE_TAIL[0], SILENCE_TAIL[1]])
    }
}

/// Encoder parameters for one outbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusParams {
    pub channels: u16,
    pub sample_rate: u32,
    /// Samples per channel in one frame.
    pub frame_size: u32,
    pub bitrate: u32,
    pub max_packet_bytes: usize,
}

impl OpusParams {
    pub const DEFAULT: OpusParams = OpusParams {
        channels: DEFAULT_CHANNELS,
        sample_rate: DEFAULT_SAMPLE_RATE,
        frame_size: DEFAULT_FRAME_SIZE,
        bitrate: DEFAULT_BITRATE,
        max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
    };

    /// Parameters for the given frame length at the default rate and channel count.
    pub fn with_frame_duration(frame: FrameDuration) -> Self {
        let frame_size =
            (frame.as_duration().as_micros() as u64 * DEFAULT_SAMPLE_RATE as u64 / 1_000_000) as u32;
        Self {
            frame_size,
            ..Self::DEFAULT
        }
    }

    /// Wall-clock length of one frame.
    pub fn frame_time(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.frame_size as u64 * 1_000_000_000 / self.sample_rate as u64)
    }

    /// Validated frame duration; anything but 2.5/5/10/20 ms is an error.
    pub fn frame_duration(&self) -> VoiceResult<FrameDuration> {
        let exact = self.sample_rate != 0
            && (self.frame_size as u64 * 1_000_000_000) % self.sample_rate as u64 == 0;
        let frame_time = self.frame_time();
        exact
            .then(|| FrameDuration::from_duration(frame_time))
            .flatten()
            .ok_or(VoiceError::InvalidFrameDuration(frame_time))
    }

    pub fn validate(&self) -> VoiceResult<()> {
        self.frame_duration()?;
        if !matches!(self.channels, 1 | 2) {
            return Err(VoiceError::InvalidParams(format!(
                "channel count {} must be 1 or 2",
                self.channels
            )));
        }
        if self.bitrate == 0 || self.max_packet_bytes == 0 {
            return Err(VoiceError::InvalidParams(
                "bitrate and max packet size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// RTP timestamp increment per packet.
    pub fn timestamp_step(&self) -> u32 {
        self.frame_size
    }

    /// Interleaved samples in one frame across all channels.
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size as usize * self.channels as usize
    }

    /// Size of one frame of raw s16le PCM.
    pub fn pcm_frame_bytes(&self) -> usize {
        self.samples_per_frame() * BYTES_PER_SAMPLE
    }
}

impl Default for OpusParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}
