//! The external decoder process that turns arbitrary input audio into raw
//! interleaved s16le PCM.
//!
//! The child is killed when `DecoderProcess` is dropped, so every exit path
//! of the encode loop (EOF, error, cancellation) reaps it.

use std::process::Stdio;

use futures::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    task::JoinHandle,
};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

use crate::{
    audio::{OpusParams, constants::DECODER_READ_AHEAD_FRAMES},
    common::errors::{VoiceError, VoiceResult},
};

/// Program and arguments for the decoder child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl DecoderCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// ffmpeg invocation normalising stdin to s16le at the target rate and channel count.
    pub fn ffmpeg(binary: impl Into<String>, params: &OpusParams) -> Self {
        let args = vec![
            "-i".to_string(),
            "-".to_string(),
            "-f".to_string(),
            "s16le".to_string(),
            "-ar".to_string(),
            params.sample_rate.to_string(),
            "-ac".to_string(),
            params.channels.to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-".to_string(),
        ];
        Self::new(binary, args)
    }
}

pub struct DecoderProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
    feeder: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

impl DecoderProcess {
    /// Spawns the decoder, streams `input` into its stdin and forwards its
    /// stderr to the log.
    pub fn spawn<R>(command: &DecoderCommand, input: R, frame_bytes: usize) -> VoiceResult<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VoiceError::Decoder(format!("failed to start {}: {}", command.program, e))
            })?;

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(VoiceError::Decoder("decoder pipes unavailable".into()));
        };

        let feeder = tokio::spawn(async move {
            let mut input = input;
            match tokio::io::copy(&mut input, &mut stdin).await {
                Ok(bytes) => debug!("Decoder input finished after {} bytes", bytes),
                // The decoder may stop reading early; that surfaces on stdout instead.
                Err(e) => debug!("Decoder input closed: {}", e),
            }
        });

        let program = command.program.clone();
        let stderr = tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(4_096));
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) if !line.trim().is_empty() => warn!("{}: {}", program, line),
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            child,
            stdout: BufReader::with_capacity(frame_bytes * DECODER_READ_AHEAD_FRAMES, stdout),
            feeder,
            stderr,
        })
    }

    /// Fills `buf` with exactly one frame of PCM. Returns `false` at end of
    /// stream; a trailing partial frame is discarded.
    pub async fn read_frame(&mut self, buf: &mut [u8]) -> VoiceResult<bool> {
        match self.stdout.read_exact(buf).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Waits for the decoder to exit after its output has been drained.
    pub async fn finish(mut self) -> VoiceResult<()> {
        let status = self.child.wait().await?;
        let _ = (&mut self.stderr).await;
        if status.success() {
            Ok(())
        } else {
            Err(VoiceError::Decoder(format!("decoder exited with {}", status)))
        }
    }
}

impl Drop for DecoderProcess {
    fn drop(&mut self) {
        self.feeder.abort();
        self.stderr.abort();
        let _ = self.child.start_kill();
    }
}
