//! Encode pipeline: arbitrary input audio → decoder process → Opus frames →
//! bounded frame queue.
//!
//! The queue is the only backpressure between decoding and the pacer: when
//! it is full the encode loop parks in `send_async` until the pacer drains
//! a frame or the caller cancels.

pub mod process;

pub use process::{DecoderCommand, DecoderProcess};

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use tokio::{io::AsyncRead, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    audio::{OpusParams, codec::OpusFrameEncoder},
    common::errors::{VoiceError, VoiceResult},
};

#[derive(Debug, Clone)]
pub struct Transcoder {
    params: OpusParams,
    command: DecoderCommand,
}

impl Transcoder {
    /// Transcoder running the ffmpeg-compatible `decoder` binary.
    pub fn new(params: OpusParams, decoder: &str) -> VoiceResult<Self> {
        Self::with_command(params, DecoderCommand::ffmpeg(decoder, &params))
    }

    /// Transcoder with an arbitrary decoder command that writes s16le PCM to stdout.
    pub fn with_command(params: OpusParams, command: DecoderCommand) -> VoiceResult<Self> {
        params.validate()?;
        Ok(Self { params, command })
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> VoiceResult<Self> {
        self.params.bitrate = bitrate;
        self.params.validate()?;
        Ok(self)
    }

    pub fn params(&self) -> &OpusParams {
        &self.params
    }

    /// Encodes `input` frame by frame into `frames`.
    ///
    /// Returns `Ok` on clean end of input, `Cancelled` when `cancel` fires,
    /// `Closed` when the queue's receiver is gone, or the decode/encode error.
    pub async fn encode_into<R>(
        &self,
        input: R,
        frames: &flume::Sender<Bytes>,
        cancel: &CancellationToken,
    ) -> VoiceResult<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut encoder = OpusFrameEncoder::new(&self.params)?;
        let frame_bytes = self.params.pcm_frame_bytes();
        let mut decoder = DecoderProcess::spawn(&self.command, input, frame_bytes)?;

        let mut raw = vec![0u8; frame_bytes];
        let mut pcm = vec![0i16; self.params.samples_per_frame()];
        let mut encoded = 0u64;

        loop {
            let more = tokio::select! {
                _ = cancel.cancelled() => return Err(VoiceError::Cancelled),
                r = decoder.read_frame(&mut raw) => r?,
            };
            if !more {
                break;
            }

            LittleEndian::read_i16_into(&raw, &mut pcm);
            let frame = encoder.encode(&pcm)?;

            tokio::select! {
                _ = cancel.cancelled() => return Err(VoiceError::Cancelled),
                r = frames.send_async(frame) => r.map_err(|_| VoiceError::Closed)?,
            }
            encoded += 1;
        }

        debug!("Encoded {} frames", encoded);
        decoder.finish().await
    }

    /// Starts encoding in the background and returns the bounded frame queue.
    pub fn convert<R>(
        &self,
        input: R,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (flume::Receiver<Bytes>, JoinHandle<VoiceResult<()>>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = flume::bounded(capacity.max(1));
        let this = self.clone();
        let task = tokio::spawn(async move { this.encode_into(input, &tx, &cancel).await });
        (rx, task)
    }

    /// Encodes a whole clip up front.
    pub async fn collect<R>(&self, input: R) -> VoiceResult<Vec<Bytes>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = flume::unbounded();
        self.encode_into(input, &tx, &CancellationToken::new())
            .await?;
        drop(tx);
        Ok(rx.drain().collect())
    }
}
