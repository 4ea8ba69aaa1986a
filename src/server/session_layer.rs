use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    common::{
        errors::{VoiceError, VoiceResult},
        types::{ChannelId, GuildId, SessionId, UserId},
    },
    configs::SessionConfig,
};

/// Voice-state update for a user in a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// `None` when the user left voice.
    pub channel_id: Option<ChannelId>,
    pub session_id: SessionId,
}

/// Voice server allocated for a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceServerUpdate {
    pub guild_id: GuildId,
    pub token: String,
    /// `None` while the platform is still allocating a server.
    pub endpoint: Option<String>,
}

/// Inbound events relayed by the chat-platform session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    StateUpdate(VoiceStateUpdate),
    ServerUpdate(VoiceServerUpdate),
}

impl VoiceEvent {
    pub fn guild_id(&self) -> &GuildId {
        match self {
            Self::StateUpdate(u) => &u.guild_id,
            Self::ServerUpdate(u) => &u.guild_id,
        }
    }
}

/// The chat-platform client a voice session rides on.
///
/// Join and leave are fire-and-forget: their effect arrives later as
/// [`VoiceEvent`]s.
#[async_trait]
pub trait SessionLayer: Send + Sync + 'static {
    fn user_id(&self) -> UserId;

    async fn request_join(&self, guild_id: &GuildId, channel_id: &ChannelId) -> VoiceResult<()>;

    async fn request_leave(&self, guild_id: &GuildId) -> VoiceResult<()>;
}

/// Session layer that replays fixed credentials.
///
/// A join answers with the configured voice-state and voice-server events on
/// `events`; a leave answers with a voice-state update carrying no channel.
pub struct StaticSessionLayer {
    user_id: UserId,
    session_id: SessionId,
    token: String,
    endpoint: String,
    events: mpsc::UnboundedSender<VoiceEvent>,
}

impl StaticSessionLayer {
    pub fn new(config: &SessionConfig) -> (Self, mpsc::UnboundedReceiver<VoiceEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let layer = Self {
            user_id: config.user_id.as_str().into(),
            session_id: config.session_id.as_str().into(),
            token: config.token.clone(),
            endpoint: config.endpoint.clone(),
            events,
        };
        (layer, rx)
    }

    fn emit(&self, event: VoiceEvent) -> VoiceResult<()> {
        self
            .events
            .send(event)
            .map_err(|_| VoiceError::SessionLayer("event receiver dropped".into()))
    }
}

#[async_trait]
impl SessionLayer for StaticSessionLayer {
    fn user_id(&self) -> UserId {
        self.user_id.clone()
    }

    async fn request_join(&self, guild_id: &GuildId, channel_id: &ChannelId) -> VoiceResult<()> {
        debug!("Joining {} in guild {}", channel_id, guild_id);
        self.emit(VoiceEvent::StateUpdate(VoiceStateUpdate {
            guild_id: guild_id.clone(),
            user_id: self.user_id.clone(),
            channel_id: Some(channel_id.clone()),
            session_id: self.session_id.clone(),
        }))?;
        self.emit(VoiceEvent::ServerUpdate(VoiceServerUpdate {
            guild_id: guild_id.clone(),
            token: self.token.clone(),
            endpoint: Some(self.endpoint.clone()),
        }))
    }

    async fn request_leave(&self, guild_id: &GuildId) -> VoiceResult<()> {
        debug!("Leaving voice in guild {}", guild_id);
        self.emit(VoiceEvent::StateUpdate(VoiceStateUpdate {
            guild_id: guild_id.clone(),
            user_id: self.user_id.clone(),
            channel_id: None,
            session_id: self.session_id.clone(),
        }))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Records join/leave requests without emitting events.
    pub struct RecordingSessionLayer {
        pub user_id: UserId,
        pub joins: Mutex<Vec<(GuildId, ChannelId)>>,
        pub leaves: Mutex<Vec<GuildId>>,
        pub fail_joins: AtomicBool,
    }

    impl RecordingSessionLayer {
        pub fn new(user_id: &str) -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self {
                user_id: user_id.into(),
                joins: Mutex::new(Vec::new()),
                leaves: Mutex::new(Vec::new()),
                fail_joins: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl SessionLayer for RecordingSessionLayer {
        fn user_id(&self) -> UserId {
            self.user_id.clone()
        }

        async fn request_join(
            &self,
            guild_id: &GuildId,
            channel_id: &ChannelId,
        ) -> VoiceResult<()> {
            self.joins.lock().push((guild_id.clone(), channel_id.clone()));
            if self.fail_joins.load(Ordering::SeqCst) {
                return Err(VoiceError::SessionLayer("join refused".into()));
            }
            Ok(())
        }

        async fn request_leave(&self, guild_id: &GuildId) -> VoiceResult<()> {
            self.leaves.lock().push(guild_id.clone());
            Ok(())
        }
    }
}
