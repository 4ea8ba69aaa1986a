//! Real-time packet sender.
//!
//! Packets go out on absolute deadlines that advance by one frame per packet.
//! When the queue runs dry the pacer substitutes silence; after
//! `MAX_SILENCE_FRAMES` consecutive silence packets it stops speaking and
//! blocks until audio returns, restarting the clock at that point.

use std::sync::{
    Arc,
    atomic::{AtomicI64, AtomicU64, Ordering},
};

use bytes::Bytes;
use flume::TryRecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    audio::FrameDuration,
    common::errors::VoiceResult,
    gateway::{
        connector::PacketWriter, constants::MAX_SILENCE_FRAMES, udp_link::PacketFramer,
    },
};

/// Receives speaking transitions. Implementations must only enqueue.
pub trait SpeakingNotifier: Send + Sync {
    fn set_speaking(&self, speaking: bool);
}

#[derive(Debug, Default)]
pub struct PacerStats {
    packets: AtomicU64,
    silence: AtomicU64,
    underruns: AtomicI64,
}

impl PacerStats {
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn silence(&self) -> u64 {
        self.silence.load(Ordering::Relaxed)
    }

    /// Net underruns: each empty slot counts one and every run of
    /// `MAX_SILENCE_FRAMES` silence packets refunds that many.
    pub fn underruns(&self) -> i64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

pub struct Pacer {
    framer: PacketFramer,
    frames: flume::Receiver<Bytes>,
    writer: Arc<dyn PacketWriter>,
    notifier: Arc<dyn SpeakingNotifier>,
    frame_duration: FrameDuration,
    stats: Arc<PacerStats>,
    cancel: CancellationToken,
}

impl Pacer {
    pub fn new(
        framer: PacketFramer,
        frames: flume::Receiver<Bytes>,
        writer: Arc<dyn PacketWriter>,
        notifier: Arc<dyn SpeakingNotifier>,
        frame_duration: FrameDuration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            framer,
            frames,
            writer,
            notifier,
            frame_duration,
            stats: Arc::new(PacerStats::default()),
            cancel,
        }
    }

    pub fn with_stats(mut self, stats: Arc<PacerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<PacerStats> {
        self.stats.clone()
    }

    /// Runs until cancelled, until every frame producer is gone, or until a
    /// write fails for a reason other than cancellation.
    pub async fn run(mut self) -> VoiceResult<()> {
        let frame_time = self.frame_duration.as_duration();
        let silence = self.frame_duration.silence_frame();

        let mut next_frame = Instant::now();
        let mut silence_sent = MAX_SILENCE_FRAMES;
        let mut has_spoken = false;

        while !self.cancel.is_cancelled() {
            let mut data = None;

            if silence_sent < MAX_SILENCE_FRAMES {
                match self.frames.try_recv() {
                    Ok(frame) => data = Some(frame),
                    Err(TryRecvError::Empty) => {
                        self.stats.underruns.fetch_add(1, Ordering::Relaxed);
                    }
                    // Producers are gone; drain out the trailing silence.
                    Err(TryRecvError::Disconnected) => {}
                }
            } else {
                // Every idle wait after the first ends a speaking run.
                if has_spoken {
                    self.notifier.set_speaking(false);
                }

                let frame = tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(()),
                    r = self.frames.recv_async() => match r {
                        Ok(frame) => frame,
                        Err(_) => {
                            debug!("Frame queue closed, pacer stopping");
                            return Ok(());
                        }
                    },
                };

                self.notifier.set_speaking(true);
                has_spoken = true;
                data = Some(frame);
                next_frame = Instant::now();
            }

            let payload = match data {
                Some(frame) => {
                    silence_sent = 0;
                    frame
                }
                None => {
                    silence_sent += 1;
                    if silence_sent == MAX_SILENCE_FRAMES {
                        self.stats
                            .underruns
                            .fetch_sub(MAX_SILENCE_FRAMES as i64, Ordering::Relaxed);
                    }
                    self.stats.silence.fetch_add(1, Ordering::Relaxed);
                    silence.clone()
                }
            };

            let packet = self.framer.seal(&payload)?;

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(next_frame) => {}
            }
            next_frame += frame_time;

            if let Err(e) = self.writer.write_packet(packet).await {
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
                return Err(e.into());
            }
            self.stats.packets.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, io, time::Duration};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        common::errors::VoiceError,
        gateway::{
            encryption::{SecretKey, open_packet},
            udp_link::parse_header,
        },
    };

    enum Step {
        Frame(&'static [u8]),
        Empty,
        Cancel,
        CloseQueue,
        Fail,
    }

    /// Writer that replays a script after each packet: the step decides what
    /// the next slot finds in the queue.
    struct ScriptedWriter {
        packets: Mutex<Vec<(Instant, Vec<u8>)>>,
        script: Mutex<VecDeque<Step>>,
        queue: Mutex<Option<flume::Sender<Bytes>>>,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl PacketWriter for ScriptedWriter {
        async fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
            let step = self.script.lock().pop_front();
            if matches!(step, Some(Step::Fail)) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "socket gone"));
            }
            self.packets.lock().push((Instant::now(), packet.to_vec()));
            match step {
                Some(Step::Frame(f)) => {
                    if let Some(queue) = self.queue.lock().as_ref() {
                        let _ = queue.try_send(Bytes::from_static(f));
                    }
                }
                Some(Step::Cancel) => self.cancel.cancel(),
                Some(Step::CloseQueue) => drop(self.queue.lock().take()),
                _ => {}
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<bool>>);

    impl SpeakingNotifier for RecordingNotifier {
        fn set_speaking(&self, speaking: bool) {
            self.0.lock().push(speaking);
        }
    }

    struct Harness {
        writer: Arc<ScriptedWriter>,
        notifier: Arc<RecordingNotifier>,
        queue: flume::Sender<Bytes>,
        cancel: CancellationToken,
        pacer: Pacer,
    }

    fn key() -> SecretKey {
        SecretKey::new([5u8; 32])
    }

    fn harness(script: Vec<Step>) -> Harness {
        let (tx, rx) = flume::bounded(16);
        let cancel = CancellationToken::new();
        let writer = Arc::new(ScriptedWriter {
            packets: Mutex::new(Vec::new()),
            script: Mutex::new(script.into()),
            queue: Mutex::new(Some(tx.clone())),
            cancel: cancel.clone(),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let pacer = Pacer::new(
            PacketFramer::with_counters(&key(), 99, 960, 0, 0),
            rx,
            writer.clone(),
            notifier.clone(),
            FrameDuration::Ms20,
            cancel.clone(),
        );
        Harness {
            writer,
            notifier,
            queue: tx,
            cancel,
            pacer,
        }
    }

    fn payloads(writer: &ScriptedWriter) -> Vec<Vec<u8>> {
        writer
            .packets
            .lock()
            .iter()
            .map(|(_, p)| open_packet(&key(), p).unwrap())
            .collect()
    }

    const SILENCE: &[u8] = &[0xF8, 0xFF, 0xFE];

    #[tokio::test(start_paused = true)]
    async fn continuous_queue_speaks_once() {
        let Harness {
            writer,
            notifier,
            queue,
            pacer,
            ..
        } = harness(vec![
            Step::Frame(b"b"),
            Step::Frame(b"c"),
            Step::Frame(b"d"),
            Step::Cancel,
        ]);
        queue.send(Bytes::from_static(b"a")).unwrap();
        let stats = pacer.stats();
        pacer.run().await.unwrap();

        assert_eq!(*notifier.0.lock(), vec![true]);
        assert_eq!(
            payloads(&writer),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );
        assert_eq!(stats.underruns(), 0);
        assert_eq!(stats.silence(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn short_gap_keeps_speaking() {
        let Harness {
            writer,
            notifier,
            queue,
            pacer,
            ..
        } = harness(vec![
            Step::Frame(b"b"),
            Step::Empty,
            Step::Empty,
            Step::Empty,
            Step::Empty,
            Step::Frame(b"c"),
            Step::Cancel,
        ]);
        queue.send(Bytes::from_static(b"a")).unwrap();
        let stats = pacer.stats();
        pacer.run().await.unwrap();

        assert_eq!(*notifier.0.lock(), vec![true]);
        let sent = payloads(&writer);
        assert_eq!(sent.len(), 7);
        assert!(sent[2..6].iter().all(|p| p == SILENCE));
        assert_eq!(sent[6], b"c");
        // The refund only happens on the fifth consecutive silence frame.
        assert_eq!(stats.underruns(), 4);
        assert_eq!(stats.silence(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn long_gap_stops_and_resumes_speaking() {
        let Harness {
            writer,
            notifier,
            queue,
            pacer,
            ..
        } = harness(vec![
            Step::Frame(b"b"),
            Step::Empty,
            Step::Empty,
            Step::Empty,
            Step::Empty,
            Step::Empty,
            Step::Empty,
            Step::Cancel,
        ]);
        queue.send(Bytes::from_static(b"a")).unwrap();
        let stats = pacer.stats();
        let task = tokio::spawn(pacer.run());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*notifier.0.lock(), vec![true, false]);
        assert_eq!(writer.packets.lock().len(), 7);
        queue.send(Bytes::from_static(b"c")).unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(*notifier.0.lock(), vec![true, false, true]);
        let sent = payloads(&writer);
        assert_eq!(sent.len(), 8);
        assert!(sent[2..7].iter().all(|p| p == SILENCE));
        assert_eq!(sent[7], b"c");
        assert_eq!(stats.underruns(), 0);
        assert_eq!(stats.silence(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn deadlines_are_absolute() {
        let h = harness(vec![
            Step::Frame(b"b"),
            Step::Empty,
            Step::Frame(b"c"),
            Step::Frame(b"d"),
            Step::Cancel,
        ]);
        h.queue.send(Bytes::from_static(b"a")).unwrap();
        h.pacer.run().await.unwrap();

        let packets = h.writer.packets.lock();
        assert_eq!(packets.len(), 5);
        let start = packets[0].0;
        for (i, (at, packet)) in packets.iter().enumerate() {
            let expected = start + Duration::from_millis(20) * i as u32;
            assert!(*at >= expected && *at < expected + Duration::from_millis(1));
            let (seq, ts, ssrc) = parse_header(packet).unwrap();
            assert_eq!((seq, ts, ssrc), (i as u16, 960 * i as u32, 99));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn write_error_is_surfaced() {
        let h = harness(vec![Step::Frame(b"b"), Step::Fail]);
        h.queue.send(Bytes::from_static(b"a")).unwrap();
        let result = h.pacer.run().await;
        assert!(matches!(result, Err(VoiceError::Io(_))));
        assert_eq!(h.writer.packets.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_while_idle_returns_ok() {
        let h = harness(vec![]);
        let cancel = h.cancel.clone();
        let task = tokio::spawn(h.pacer.run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(h.writer.packets.lock().is_empty());
        assert!(h.notifier.0.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_queue_ends_after_trailing_silence() {
        let Harness {
            writer,
            notifier,
            queue,
            pacer,
            ..
        } = harness(vec![Step::Frame(b"b"), Step::CloseQueue]);
        queue.send(Bytes::from_static(b"a")).unwrap();
        drop(queue);

        pacer.run().await.unwrap();
        assert_eq!(writer.packets.lock().len(), 2 + MAX_SILENCE_FRAMES as usize);
        assert_eq!(*notifier.0.lock(), vec![true, false]);
    }
}
