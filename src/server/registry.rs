use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::{
    audio::OpusParams,
    common::{
        errors::VoiceResult,
        types::{ChannelId, GuildId, UserId},
    },
    configs::GatewayConfig,
    gateway::{connector::Connector, session::VoiceConnection},
    server::session_layer::{SessionLayer, VoiceEvent},
};

/// At most one live voice connection per guild.
pub struct VoiceRegistry {
    connections: DashMap<GuildId, VoiceConnection>,
    session_layer: Arc<dyn SessionLayer>,
    connector: Arc<dyn Connector>,
    config: GatewayConfig,
    user_id: UserId,
}

impl VoiceRegistry {
    pub fn new(
        session_layer: Arc<dyn SessionLayer>,
        connector: Arc<dyn Connector>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            connections: DashMap::new(),
            user_id: session_layer.user_id(),
            session_layer,
            connector,
            config,
        }
    }

    /// Replaces any connection for `guild_id` with a fresh idle one and asks
    /// the session layer to join. The previous connection is fully closed
    /// before the join is requested.
    pub async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        params: OpusParams,
    ) -> VoiceResult<VoiceConnection> {
        let conn = VoiceConnection::new(
            guild_id.clone(),
            params,
            self.config.clone(),
            self.connector.clone(),
            self.session_layer.clone(),
        )?;

        if let Some((_, previous)) = self.connections.remove(&guild_id) {
            info!("[{}] Superseding previous voice connection", guild_id);
            previous.supersede();
            previous.closed().await;
        }

        if let Some(displaced) = self.connections.insert(guild_id.clone(), conn.clone()) {
            displaced.supersede();
        }

        if let Err(e) = self.session_layer.request_join(&guild_id, &channel_id).await {
            warn!("[{}] Join request failed: {}", guild_id, e);
            self.connections.remove_if(&guild_id, |_, c| c.ptr_eq(&conn));
            conn.supersede();
            return Err(e);
        }
        Ok(conn)
    }

    /// Routes an event to its guild's connection; a no-op for unknown guilds.
    pub fn dispatch(&self, event: &VoiceEvent) {
        let guild_id = event.guild_id();
        let Some(conn) = self.connections.get(guild_id).map(|c| c.value().clone()) else {
            debug!("[{}] No voice connection for event", guild_id);
            return;
        };

        if conn.is_closed() {
            self.connections.remove_if(guild_id, |_, c| c.ptr_eq(&conn));
            return;
        }

        if let VoiceEvent::StateUpdate(update) = event {
            if update.user_id == self.user_id && update.channel_id.is_none() {
                info!("[{}] Left voice channel", guild_id);
                self.connections.remove_if(guild_id, |_, c| c.ptr_eq(&conn));
                conn.supersede();
                return;
            }
        }

        conn.handle_event(event);
    }

    /// Asks the session layer to leave; the resulting state update closes the connection.
    pub async fn leave(&self, guild_id: &GuildId) -> VoiceResult<()> {
        self.session_layer.request_leave(guild_id).await
    }

    pub fn get(&self, guild_id: &GuildId) -> Option<VoiceConnection> {
        self
            .connections
            .get(guild_id)
            .map(|c| c.value().clone())
            .filter(|c| !c.is_closed())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Closes every connection without leaving.
    pub async fn shutdown(&self) {
        let conns: Vec<VoiceConnection> =
            self.connections.iter().map(|c| c.value().clone()).collect();
        self.connections.clear();
        for conn in &conns {
            conn.supersede();
        }
        for conn in conns {
            conn.closed().await;
        }
    }
}
