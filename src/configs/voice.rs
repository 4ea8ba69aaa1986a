use serde::{Deserialize, Serialize};

use crate::{
    audio::{OpusParams, constants::DEFAULT_DECODER_BINARY},
    common::errors::VoiceResult,
};

/// `[voice]`: encoder parameters and the external decoder used by the encode pipeline.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct VoiceConfig {
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Samples per channel in one frame (960 = 20 ms at 48 kHz).
    #[serde(default = "default_frame_size")]
    pub frame_size: u32,
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
    #[serde(default = "default_max_packet_bytes")]
    pub max_packet_bytes: usize,
    #[serde(default = "default_decoder")]
    pub decoder: String,
}

impl VoiceConfig {
    /// Converts to validated encoder parameters, rejecting unsupported frame durations.
    pub fn to_params(&self) -> VoiceResult<OpusParams> {
        let params = OpusParams {
            channels: self.channels,
            sample_rate: self.sample_rate,
            frame_size: self.frame_size,
            bitrate: self.bitrate,
            max_packet_bytes: self.max_packet_bytes,
        };
        params.validate()?;
        Ok(params)
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            sample_rate: default_sample_rate(),
            frame_size: default_frame_size(),
            bitrate: default_bitrate(),
            max_packet_bytes: default_max_packet_bytes(),
            decoder: default_decoder(),
        }
    }
}

fn default_channels() -> u16 {
    OpusParams::DEFAULT.channels
}

fn default_sample_rate() -> u32 {
    OpusParams::DEFAULT.sample_rate
}

fn default_frame_size() -> u32 {
    OpusParams::DEFAULT.frame_size
}

fn default_bitrate() -> u32 {
    OpusParams::DEFAULT.bitrate
}

fn default_max_packet_bytes() -> usize {
    OpusParams::DEFAULT.max_packet_bytes
}

fn default_decoder() -> String {
    DEFAULT_DECODER_BINARY.to_string()
}
