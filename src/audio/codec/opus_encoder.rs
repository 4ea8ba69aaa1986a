use audiopus::{Application, Bitrate, Channels, SampleRate, coder::Encoder as OpusEncoder};
use bytes::Bytes;

use crate::{
    audio::OpusParams,
    common::errors::{VoiceError, VoiceResult},
};

/// Interleaved i16 PCM → Opus packets, one frame per call.
pub struct OpusFrameEncoder {
    encoder: OpusEncoder,
    samples_per_frame: usize,
    out: Vec<u8>,
}

impl OpusFrameEncoder {
    /// Builds an AUDIO-profile encoder for `params` at its configured bitrate.
    pub fn new(params: &OpusParams) -> VoiceResult<Self> {
        params.validate()?;

        let sample_rate = match params.sample_rate {
            8_000 => SampleRate::Hz8000,
            12_000 => SampleRate::Hz12000,
            16_000 => SampleRate::Hz16000,
            24_000 => SampleRate::Hz24000,
            48_000 => SampleRate::Hz48000,
            other => {
                return Err(VoiceError::InvalidParams(format!(
                    "opus cannot encode at {} Hz",
                    other
                )));
            }
        };
        let channels = if params.channels == 1 {
            Channels::Mono
        } else {
            Channels::Stereo
        };

        let mut encoder = OpusEncoder::new(sample_rate, channels, Application::Audio)
            .map_err(|e| VoiceError::Opus(e.to_string()))?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(params.bitrate as i32))
            .map_err(|e| VoiceError::Opus(e.to_string()))?;

        Ok(Self {
            encoder,
            samples_per_frame: params.samples_per_frame(),
            out: vec![0u8; params.max_packet_bytes],
        })
    }

    /// Encodes exactly one frame of interleaved PCM.
    pub fn encode(&mut self, pcm: &[i16]) -> VoiceResult<Bytes> {
        if pcm.len() != self.samples_per_frame {
            return Err(VoiceError::InvalidParams(format!(
                "expected {} samples per frame, got {}",
                self.samples_per_frame,
                pcm.len()
            )));
        }

        let size = self
            .encoder
            .encode(pcm, &mut self.out)
            .map_err(|e| VoiceError::Opus(e.to_string()))?;
        Ok(Bytes::copy_from_slice(&self.out[..size]))
    }
}
