use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{FrameDuration, OpusParams},
    common::{
        errors::{VoiceError, VoiceResult},
        types::{ChannelId, GuildId, UserId},
    },
    configs::GatewayConfig,
    gateway::{
        connector::{Connector, SignalSink, SignalStream, gateway_url},
        constants::WRITE_TASK_SHUTDOWN_MS,
        pacer::PacerStats,
    },
    server::session_layer::{SessionLayer, VoiceEvent},
};

pub mod handler;
pub mod heartbeat;
pub mod state;
pub mod types;

pub use self::state::ConnectionState;
use self::{
    state::{Credentials, LazyStart, Phase},
    types::{IdentifyPayload, OpCode, VoiceGatewayMessage},
};

/// One voice session for one guild.
///
/// Cheap to clone; every clone drives the same session. Signaling starts once
/// both the voice-state and voice-server events have been delivered through
/// [`VoiceConnection::handle_event`].
#[derive(Clone)]
pub struct VoiceConnection {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    guild_id: GuildId,
    user_id: UserId,
    params: OpusParams,
    frame_duration: FrameDuration,
    config: GatewayConfig,
    connector: Arc<dyn Connector>,
    session_layer: Arc<dyn SessionLayer>,
    state: Mutex<SessionState>,
    frames_tx: flume::Sender<Bytes>,
    frames_rx: flume::Receiver<Bytes>,
    outbound: OnceLock<mpsc::UnboundedSender<Message>>,
    heartbeat_interval_ms: AtomicU64,
    last_heartbeat: AtomicU64,
    ping: AtomicI64,
    cancel: CancellationToken,
    tasks: TaskTracker,
    signaling_started: LazyStart,
    heartbeat_started: LazyStart,
    discovery_started: LazyStart,
    pacer_started: LazyStart,
    closed: AtomicBool,
    stats: Arc<PacerStats>,
}

struct SessionState {
    channel_id: Option<ChannelId>,
    phase: Phase,
}

impl VoiceConnection {
    /// Creates an idle session. Fails before any I/O when `params` are invalid.
    pub fn new(
        guild_id: GuildId,
        params: OpusParams,
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
        session_layer: Arc<dyn SessionLayer>,
    ) -> VoiceResult<Self> {
        params.validate()?;
        let frame_duration = params.frame_duration()?;
        let (frames_tx, frames_rx) = flume::bounded(config.frame_queue_capacity.max(1));

        Ok(Self {
            inner: Arc::new(Inner {
                guild_id,
                user_id: session_layer.user_id(),
                params,
                frame_duration,
                config,
                connector,
                session_layer,
                state: Mutex::new(SessionState {
                    channel_id: None,
                    phase: Phase::Idle,
                }),
                frames_tx,
                frames_rx,
                outbound: OnceLock::new(),
                heartbeat_interval_ms: AtomicU64::new(0),
                last_heartbeat: AtomicU64::new(0),
                ping: AtomicI64::new(-1),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                signaling_started: LazyStart::default(),
                heartbeat_started: LazyStart::default(),
                discovery_started: LazyStart::default(),
                pacer_started: LazyStart::default(),
                closed: AtomicBool::new(false),
                stats: Arc::new(PacerStats::default()),
            }),
        })
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.inner.guild_id
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.inner.state.lock().channel_id.clone()
    }

    pub fn params(&self) -> &OpusParams {
        &self.inner.params
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().phase.state()
    }

    /// Whether both handles drive the same session.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Round trip of the last acknowledged heartbeat, `-1` before the first.
    pub fn ping_ms(&self) -> i64 {
        self.inner.ping.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Arc<PacerStats> {
        self.inner.stats.clone()
    }

    /// Producer side of the bounded frame queue the pacer drains.
    pub fn frame_sender(&self) -> flume::Sender<Bytes> {
        self.inner.frames_tx.clone()
    }

    /// Queues one encoded frame, waiting while the queue is full.
    pub async fn send_frame(&self, frame: Bytes) -> VoiceResult<()> {
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(VoiceError::Closed),
            r = self.inner.frames_tx.send_async(frame) => r.map_err(|_| VoiceError::Closed),
        }
    }

    /// Token cancelled when this session shuts down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Feeds a session-layer event; signaling opens once both halves are known.
    pub fn handle_event(&self, event: &VoiceEvent) {
        self.inner.handle_event(event);
    }

    /// Closes the session and asks the session layer to leave if still in a channel.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Tears the session down without asking the session layer to leave.
    pub fn supersede(&self) {
        self.inner.teardown();
    }

    /// Resolves once the session is closed and all of its tasks have exited.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
        self.inner.tasks.wait().await;
    }
}

impl std::fmt::Debug for VoiceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceConnection")
            .field("guild_id", &self.inner.guild_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn handle_event(self: &Arc<Self>, event: &VoiceEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let creds = {
            let mut st = self.state.lock();
            match event {
                VoiceEvent::StateUpdate(update) => {
                    if update.user_id != self.user_id {
                        return;
                    }
                    let Some(channel_id) = update.channel_id.clone() else {
                        return;
                    };
                    st.channel_id = Some(channel_id);
                    let Some(pending) = st.phase.pending_mut() else {
                        return;
                    };
                    pending.session_id = Some(update.session_id.clone());
                    pending.ready()
                }
                VoiceEvent::ServerUpdate(update) => {
                    let Some(pending) = st.phase.pending_mut() else {
                        return;
                    };
                    pending.token = Some(update.token.clone());
                    if let Some(endpoint) = update.endpoint.clone().filter(|e| !e.is_empty()) {
                        pending.endpoint = Some(endpoint);
                    }
                    pending.ready()
                }
            }
        };

        let Some(creds) = creds else {
            debug!("[{}] Waiting for the other half of the handshake", self.guild_id);
            return;
        };

        if !self.signaling_started.claim() {
            warn!("[{}] Signaling already started", self.guild_id);
            return;
        }

        let this = self.clone();
        self.tasks.spawn(async move { this.run_signaling(creds).await });
    }

    async fn run_signaling(self: Arc<Self>, creds: Credentials) {
        if let Err(e) = self.signaling(creds).await {
            if e.is_cancelled() || self.cancel.is_cancelled() {
                debug!("[{}] Signaling stopped", self.guild_id);
            } else {
                error!("[{}] Voice signaling failed: {}", self.guild_id, e);
            }
        }
        self.teardown();
    }

    async fn signaling(self: &Arc<Self>, creds: Credentials) -> VoiceResult<()> {
        let url = gateway_url(&creds.endpoint, self.config.version);
        info!("[{}] Connecting to voice endpoint {}", self.guild_id, url);

        let (mut sink, stream) = tokio::select! {
            _ = self.cancel.cancelled() => return Err(VoiceError::Cancelled),
            r = self.connector.signaling(&url) => r?,
        };

        {
            let mut st = self.state.lock();
            if matches!(st.phase, Phase::Closed) {
                return Err(VoiceError::Cancelled);
            }
            st.phase = Phase::SignalingOpen;
        }

        let identify = VoiceGatewayMessage::new(
            OpCode::Identify,
            &IdentifyPayload {
                server_id: self.guild_id.clone(),
                user_id: self.user_id.clone(),
                session_id: creds.session_id,
                token: creds.token,
            },
        )?;
        sink.send(Message::Text(serde_json::to_string(&identify)?.into()))
            .await?;

        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        let _ = self.outbound.set(tx);

        let this = self.clone();
        self.tasks.spawn(async move { this.write_loop(sink, rx).await });

        let this = self.clone();
        self.tasks.spawn(async move { this.handshake_watchdog().await });

        self.read_loop(stream).await
    }

    /// Serializes every outbound signaling message through one sink.
    async fn write_loop(self: Arc<Self>, mut sink: SignalSink, mut rx: mpsc::UnboundedReceiver<Message>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(e) = sink.send(msg).await {
                        if !self.cancel.is_cancelled() {
                            warn!("[{}] WS write error: {}", self.guild_id, e);
                            self.teardown();
                        }
                        break;
                    }
                }
            }
        }

        let _ = tokio::time::timeout(
            Duration::from_millis(WRITE_TASK_SHUTDOWN_MS),
            sink.close(),
        )
        .await;
    }

    async fn read_loop(self: &Arc<Self>, mut stream: SignalStream) -> VoiceResult<()> {
        loop {
            let deadline = self.read_timeout();
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Err(VoiceError::Cancelled),
                r = tokio::time::timeout(deadline, stream.next()) => r,
            };

            let msg = match next {
                Err(_) => {
                    return Err(VoiceError::Gateway(format!(
                        "no message within {:?}",
                        deadline
                    )));
                }
                Ok(None) => return Err(VoiceError::Gateway("stream ended".into())),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                Message::Text(text) => {
                    if let Err(e) = self.handle_text(text.as_str()) {
                        if !e.is_payload_error() {
                            return Err(e);
                        }
                        warn!(
                            "[{}] Failed to parse voice gateway message: {}",
                            self.guild_id, e
                        );
                    }
                }
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1000u16, "No reason".into()));
                    info!(
                        "[{}] WS closed: code={}, reason='{}'",
                        self.guild_id, code, reason
                    );
                    return Err(VoiceError::Gateway(format!("closed with code {}", code)));
                }
                _ => {}
            }
        }
    }

    /// Twice the heartbeat interval once known, the configured fallback before.
    fn read_timeout(&self) -> Duration {
        match self.heartbeat_interval_ms.load(Ordering::Relaxed) {
            0 => self.config.read_timeout(),
            ms => Duration::from_millis(ms * 2),
        }
    }

    async fn handshake_watchdog(self: Arc<Self>) {
        let limit = self.config.handshake_timeout();
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                if !self.pacer_started.is_started() {
                    error!("[{}] {}", self.guild_id, VoiceError::MissingKey(limit));
                    self.teardown();
                }
            }
        }
    }

    pub(crate) fn send_message<T: Serialize>(&self, op: OpCode, d: &T) -> VoiceResult<()> {
        let msg = VoiceGatewayMessage::new(op, d)?;
        let json = serde_json::to_string(&msg)?;
        self.outbound
            .get()
            .ok_or(VoiceError::Closed)?
            .send(Message::Text(json.into()))
            .map_err(|_| VoiceError::Closed)
    }

    /// Explicit close: tear down, then leave the channel if we were in one.
    fn close(self: &Arc<Self>) {
        let channel = self.state.lock().channel_id.take();
        self.teardown();

        if channel.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("[{}] No runtime to request leave on", self.guild_id);
            return;
        };
        let layer = self.session_layer.clone();
        let guild_id = self.guild_id.clone();
        handle.spawn(self.tasks.track_future(async move {
            if let Err(e) = layer.request_leave(&guild_id).await {
                warn!("[{}] Leave request failed: {}", guild_id, e);
            }
        }));
    }

    /// Idempotent teardown. Returns `true` for the caller that performed it.
    pub(crate) fn teardown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let previous = std::mem::replace(&mut self.state.lock().phase, Phase::Closed);
        self.cancel.cancel();
        self.tasks.close();
        debug!(
            "[{}] Voice connection closed from {:?}",
            self.guild_id,
            previous.state()
        );
        // Dropping the phase releases the media socket.
        drop(previous);
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
