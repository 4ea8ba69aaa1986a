use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    audio::OpusParams,
    common::{
        errors::{VoiceError, VoiceResult},
        types::{ChannelId, GuildId},
    },
    gateway::VoiceConnection,
    server::VoiceRegistry,
};

/// Clips waiting to be played before new ones are refused.
pub const PLAY_QUEUE_CAPACITY: usize = 10;

/// A pre-encoded clip bound for one voice channel.
#[derive(Debug, Clone)]
pub struct QueuedClip {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub name: String,
    pub frames: Vec<Bytes>,
}

/// Producer side of the play queue. Never blocks: a full queue is an error.
#[derive(Clone)]
pub struct PlayQueue {
    tx: flume::Sender<QueuedClip>,
}

impl PlayQueue {
    pub fn new(capacity: usize) -> (Self, flume::Receiver<QueuedClip>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, clip: QueuedClip) -> VoiceResult<()> {
        self.tx.try_send(clip).map_err(|e| match e {
            flume::TrySendError::Full(clip) => {
                warn!("Play queue overflowed, dropping {}", clip.name);
                VoiceError::QueueFull
            }
            flume::TrySendError::Disconnected(_) => VoiceError::Closed,
        })
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Plays queued clips one after another.
///
/// The current connection is reused while clips target the same channel and
/// closed once the queue has been idle for `idle_leave`.
pub struct Player {
    registry: Arc<VoiceRegistry>,
    params: OpusParams,
    idle_leave: Duration,
}

struct Current {
    conn: VoiceConnection,
    channel_id: ChannelId,
}

impl Player {
    pub fn new(registry: Arc<VoiceRegistry>, params: OpusParams, idle_leave: Duration) -> Self {
        Self {
            registry,
            params,
            idle_leave,
        }
    }

    /// Runs until `cancel` fires or every producer is gone and the queue drained.
    pub async fn run(self, clips: flume::Receiver<QueuedClip>, cancel: CancellationToken) {
        let mut current: Option<Current> = None;
        let idle = tokio::time::sleep(self.idle_leave);
        tokio::pin!(idle);
        let mut idle_armed = false;

        loop {
            let clip = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Player exiting");
                    break;
                }
                _ = &mut idle, if idle_armed => {
                    idle_armed = false;
                    if let Some(cur) = current.take() {
                        info!("[{}] Idle, leaving voice", cur.conn.guild_id());
                        cur.conn.close();
                    }
                    continue;
                }
                clip = clips.recv_async() => match clip {
                    Ok(clip) => clip,
                    Err(_) => {
                        // Let the pacer drain what was already queued.
                        if current.is_some() {
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                _ = tokio::time::sleep(self.idle_leave) => {}
                            }
                        }
                        break;
                    }
                },
            };
            idle_armed = false;
            debug!("Got clip {}", clip.name);

            let Some(conn) = self.connection_for(&mut current, &clip).await else {
                continue;
            };

            info!("[{}] Playing {}", clip.guild_id, clip.name);
            for frame in clip.frames {
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = conn.send_frame(frame) => r,
                };
                if let Err(e) = sent {
                    warn!("[{}] Stopped playing {}: {}", clip.guild_id, clip.name, e);
                    current = None;
                    break;
                }
            }

            idle.as_mut().reset(Instant::now() + self.idle_leave);
            idle_armed = true;
        }

        if let Some(cur) = current {
            cur.conn.close();
        }
    }

    /// Reuses the current connection when it targets the clip's channel,
    /// otherwise joins. Moving between guilds leaves the old one first.
    async fn connection_for(
        &self,
        current: &mut Option<Current>,
        clip: &QueuedClip,
    ) -> Option<VoiceConnection> {
        if let Some(cur) = current.as_ref() {
            if !cur.conn.is_closed()
                && cur.conn.guild_id() == &clip.guild_id
                && cur.channel_id == clip.channel_id
            {
                return Some(cur.conn.clone());
            }
        }

        if let Some(cur) = current.take() {
            // Same guild: the registry supersedes the old session on join.
            if cur.conn.guild_id() != &clip.guild_id {
                cur.conn.close();
            }
        }

        info!("[{}] Joining {}", clip.guild_id, clip.channel_id);
        match self
            .registry
            .join(clip.guild_id.clone(), clip.channel_id.clone(), self.params)
            .await
        {
            Ok(conn) => {
                *current = Some(Current {
                    conn: conn.clone(),
                    channel_id: clip.channel_id.clone(),
                });
                Some(conn)
            }
            Err(e) => {
                warn!(
                    "[{}] Failed to join voice channel {}: {}",
                    clip.guild_id, clip.channel_id, e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configs::GatewayConfig,
        gateway::connector::testing::FakeConnector,
        server::{
            VoiceEvent, VoiceStateUpdate, session_layer::testing::RecordingSessionLayer,
        },
    };

    fn clip(guild: &str, channel: &str, frames: usize) -> QueuedClip {
        QueuedClip {
            guild_id: guild.into(),
            channel_id: channel.into(),
            name: format!("{}-{}", guild, channel),
            frames: (0..frames).map(|i| Bytes::from(vec![i as u8; 3])).collect(),
        }
    }

    fn setup() -> (Arc<VoiceRegistry>, Arc<RecordingSessionLayer>) {
        let layer = RecordingSessionLayer::new("u1");
        let registry = Arc::new(VoiceRegistry::new(
            layer.clone(),
            FakeConnector::new(),
            GatewayConfig::default(),
        ));
        (registry, layer)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn full_queue_refuses_clips() {
        let (queue, _rx) = PlayQueue::new(1);
        queue.enqueue(clip("g1", "c1", 1)).unwrap();
        assert!(matches!(
            queue.enqueue(clip("g1", "c1", 1)),
            Err(VoiceError::QueueFull)
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn dropped_driver_closes_the_queue() {
        let (queue, rx) = PlayQueue::new(PLAY_QUEUE_CAPACITY);
        drop(rx);
        assert!(matches!(
            queue.enqueue(clip("g1", "c1", 1)),
            Err(VoiceError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn plays_then_leaves_after_idle() {
        let (registry, layer) = setup();
        let (queue, rx) = PlayQueue::new(PLAY_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let player = Player::new(registry.clone(), OpusParams::DEFAULT, Duration::from_secs(1));
        let task = tokio::spawn(player.run(rx, cancel.clone()));

        queue.enqueue(clip("g1", "c1", 3)).unwrap();
        settle().await;

        let conn = registry.get(&"g1".into()).unwrap();
        assert_eq!(
            *layer.joins.lock(),
            vec![(GuildId::from("g1"), ChannelId::from("c1"))]
        );
        // No pacer is running, so the frames sit in the session queue.
        assert_eq!(conn.frame_sender().len(), 3);
        registry.dispatch(&VoiceEvent::StateUpdate(VoiceStateUpdate {
            guild_id: "g1".into(),
            user_id: "u1".into(),
            channel_id: Some("c1".into()),
            session_id: "s".into(),
        }));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        settle().await;
        assert!(conn.is_closed());
        assert_eq!(*layer.leaves.lock(), vec![GuildId::from("g1")]);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn same_channel_reuses_the_connection() {
        let (registry, layer) = setup();
        let (queue, rx) = PlayQueue::new(PLAY_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let player = Player::new(registry.clone(), OpusParams::DEFAULT, Duration::from_secs(1));
        let task = tokio::spawn(player.run(rx, cancel.clone()));

        queue.enqueue(clip("g1", "c1", 2)).unwrap();
        queue.enqueue(clip("g1", "c1", 2)).unwrap();
        settle().await;

        assert_eq!(layer.joins.lock().len(), 1);
        assert_eq!(registry.get(&"g1".into()).unwrap().frame_sender().len(), 4);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn switching_guilds_closes_the_old_connection() {
        let (registry, layer) = setup();
        let (queue, rx) = PlayQueue::new(PLAY_QUEUE_CAPACITY);
        let cancel = CancellationToken::new();
        let player = Player::new(registry.clone(), OpusParams::DEFAULT, Duration::from_secs(1));
        let task = tokio::spawn(player.run(rx, cancel.clone()));

        queue.enqueue(clip("g1", "c1", 1)).unwrap();
        settle().await;
        let first = registry.get(&"g1".into()).unwrap();

        queue.enqueue(clip("g2", "c9", 1)).unwrap();
        settle().await;

        assert!(first.is_closed());
        assert_eq!(layer.joins.lock().len(), 2);
        assert!(registry.get(&"g2".into()).is_some());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_queue_drains_then_exits() {
        let (registry, _layer) = setup();
        let (queue, rx) = PlayQueue::new(PLAY_QUEUE_CAPACITY);
        let player = Player::new(registry.clone(), OpusParams::DEFAULT, Duration::from_secs(1));

        queue.enqueue(clip("g1", "c1", 1)).unwrap();
        drop(queue);
        player.run(rx, CancellationToken::new()).await;

        assert!(registry.get(&"g1".into()).is_none());
    }
}
