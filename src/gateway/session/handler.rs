use std::{
    net::{IpAddr, SocketAddr},
    sync::{Arc, atomic::Ordering},
};

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use super::{
    Inner,
    heartbeat::{heartbeat_period, spawn_heartbeat},
    state::{ConnectionState, Negotiated, Phase},
    types::{
        HelloPayload, OpCode, ReadyPayload, SelectProtocolData, SelectProtocolPayload,
        SessionDescriptionPayload, SpeakingPayload, VoiceGatewayMessage,
    },
};
use crate::{
    common::{
        errors::{VoiceError, VoiceResult},
        types::{GuildId, now_ms},
    },
    gateway::{
        constants::MAX_HEARTBEAT_INTERVAL_MS,
        encryption::{EncryptionMode, SecretKey},
        pacer::{Pacer, SpeakingNotifier},
        udp_link::PacketFramer,
    },
};

impl Inner {
    /// Dispatches one text frame. Only `Json` errors are recoverable.
    pub(super) fn handle_text(self: &Arc<Self>, text: &str) -> VoiceResult<()> {
        let msg: VoiceGatewayMessage = serde_json::from_str(text)?;

        match msg.opcode() {
            Some(OpCode::Hello) => self.handle_hello(msg.payload()?),
            Some(OpCode::Ready) => self.handle_ready(msg.payload()?),
            Some(OpCode::SessionDescription) => self.handle_session_description(msg.payload()?),
            Some(OpCode::HeartbeatAck) => {
                self.handle_heartbeat_ack();
                Ok(())
            }
            Some(OpCode::Resumed) => {
                info!("[{}] Voice session resumed", self.guild_id);
                Ok(())
            }
            Some(OpCode::Speaking) | Some(OpCode::ClientDisconnect) => {
                debug!("[{}] Received voice op {}: {}", self.guild_id, msg.op, msg.d);
                Ok(())
            }
            _ => {
                debug!("[{}] Ignoring voice op {}", self.guild_id, msg.op);
                Ok(())
            }
        }
    }

    fn handle_hello(self: &Arc<Self>, hello: HelloPayload) -> VoiceResult<()> {
        let interval_ms = hello.heartbeat_interval;
        let period = if (1.0..=MAX_HEARTBEAT_INTERVAL_MS).contains(&interval_ms) {
            heartbeat_period(interval_ms)
        } else {
            None
        };
        let period = period.ok_or_else(|| {
            VoiceError::Gateway(format!("invalid heartbeat interval {}", interval_ms))
        })?;

        self.heartbeat_interval_ms
            .store(interval_ms.round() as u64, Ordering::Relaxed);

        if self.heartbeat_started.claim() {
            debug!(
                "[{}] Heartbeat interval set to {}ms",
                self.guild_id, interval_ms
            );
            spawn_heartbeat(self.clone(), period);
        }
        Ok(())
    }

    fn handle_ready(self: &Arc<Self>, ready: ReadyPayload) -> VoiceResult<()> {
        let mode = EncryptionMode::select(&ready.modes)?;
        debug!(
            "[{}] Ready! IP: {}, Port: {}, SSRC: {}, Mode: {}",
            self.guild_id,
            ready.ip,
            ready.port,
            ready.ssrc,
            mode.as_str()
        );

        if !self.discovery_started.claim() {
            debug!("[{}] Discovery already running", self.guild_id);
            return Ok(());
        }

        let this = self.clone();
        self.tasks.spawn(async move {
            if let Err(e) = this.select_protocol(ready, mode).await {
                if !e.is_cancelled() && !this.cancel.is_cancelled() {
                    error!("[{}] Establishing UDP session: {}", this.guild_id, e);
                }
                this.teardown();
            }
        });
        Ok(())
    }

    /// Discovers our external address and reports it with the chosen mode.
    async fn select_protocol(&self, ready: ReadyPayload, mode: EncryptionMode) -> VoiceResult<()> {
        let remote = resolve(&ready.ip, ready.port).await?;
        let link = self.connector.media(remote, ready.ssrc, &self.cancel).await?;
        let external = link.external;

        {
            let mut st = self.state.lock();
            match st.phase.state() {
                ConnectionState::SignalingOpen => {
                    st.phase = Phase::UdpDiscovered(Negotiated {
                        ssrc: ready.ssrc,
                        link,
                        mode,
                    });
                }
                ConnectionState::Closed => return Err(VoiceError::Cancelled),
                other => {
                    return Err(VoiceError::Gateway(format!(
                        "discovery finished in state {:?}",
                        other
                    )));
                }
            }
        }

        info!(
            "[{}] Discovered external address {} (ssrc {})",
            self.guild_id, external, ready.ssrc
        );

        self.send_message(
            OpCode::SelectProtocol,
            &SelectProtocolPayload {
                protocol: "udp".into(),
                data: SelectProtocolData {
                    address: external.ip().to_string(),
                    port: external.port(),
                    mode: mode.as_str().into(),
                },
            },
        )
    }

    fn handle_session_description(
        self: &Arc<Self>,
        description: SessionDescriptionPayload,
    ) -> VoiceResult<()> {
        if EncryptionMode::from_name(&description.mode).is_none() {
            return Err(VoiceError::NoSupportedMode);
        }
        if !self.pacer_started.claim() {
            debug!("[{}] Opus sender already running", self.guild_id);
            return Ok(());
        }

        let key = SecretKey::new(description.secret_key);
        let negotiated = {
            let mut st = self.state.lock();
            match std::mem::take(&mut st.phase) {
                Phase::UdpDiscovered(negotiated) => {
                    st.phase = Phase::ReadyToSend {
                        negotiated: negotiated.clone(),
                        key: key.clone(),
                    };
                    negotiated
                }
                other => {
                    let state = other.state();
                    st.phase = other;
                    return Err(VoiceError::Gateway(format!(
                        "session description received in state {:?}",
                        state
                    )));
                }
            }
        };

        let outbound = self.outbound.get().cloned().ok_or(VoiceError::Closed)?;
        let notifier = Arc::new(SpeakingSignal {
            guild_id: self.guild_id.clone(),
            ssrc: negotiated.ssrc,
            outbound,
        });

        let pacer = Pacer::new(
            PacketFramer::new(&key, negotiated.ssrc, self.params.timestamp_step()),
            self.frames_rx.clone(),
            negotiated.link.writer.clone(),
            notifier,
            self.frame_duration,
            self.cancel.clone(),
        )
        .with_stats(self.stats.clone());

        info!(
            "[{}] Starting opus sender (ssrc {}, {:?} frames)",
            self.guild_id, negotiated.ssrc, self.frame_duration
        );

        let this = self.clone();
        self.tasks.spawn(async move {
            let result = pacer.run().await;
            info!(
                "[{}] Opus sender stopped: {} packets, {} silence, underruns: {}",
                this.guild_id,
                this.stats.packets(),
                this.stats.silence(),
                this.stats.underruns()
            );
            if let Err(e) = result {
                error!("[{}] Opus sender failed: {}", this.guild_id, e);
            }
            this.close();
        });
        Ok(())
    }

    fn handle_heartbeat_ack(&self) {
        let sent_ms = self.last_heartbeat.load(Ordering::Relaxed);
        if sent_ms > 0 {
            let latency = now_ms().saturating_sub(sent_ms);
            self.ping.store(latency as i64, Ordering::Relaxed);
        }
    }
}

/// Resolves the media address from ready; hostnames go through DNS.
async fn resolve(host: &str, port: u16) -> VoiceResult<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| VoiceError::Gateway(format!("invalid UDP endpoint {}:{}", host, port)))
}

/// Sends speaking updates over signaling without waiting on the socket.
struct SpeakingSignal {
    guild_id: GuildId,
    ssrc: u32,
    outbound: mpsc::UnboundedSender<Message>,
}

impl SpeakingNotifier for SpeakingSignal {
    fn set_speaking(&self, speaking: bool) {
        debug!("[{}] speaking: {}", self.guild_id, speaking);
        let payload = SpeakingPayload {
            speaking,
            delay: 0,
            ssrc: self.ssrc,
        };
        let queued = VoiceGatewayMessage::new(OpCode::Speaking, &payload)
            .and_then(|msg| serde_json::to_string(&msg).map_err(VoiceError::from))
            .map(|json| self.outbound.send(Message::Text(json.into())).is_ok())
            .unwrap_or(false);
        if !queued {
            warn!("[{}] Could not queue speaking update", self.guild_id);
        }
    }
}
