//! Transport seams between a voice session and the network.
//!
//! `NetConnector` dials real sockets. Tests swap in an in-memory connector so
//! the handshake can be driven without a voice server.

use std::{io, net::SocketAddr, pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use tokio::net::UdpSocket;
use tokio_tungstenite::tungstenite::{Error as WsError, protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    common::errors::VoiceResult,
    configs::GatewayConfig,
    gateway::discovery::discover_with_retry,
};

pub type SignalSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
pub type SignalStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Outbound half of the media socket.
#[async_trait]
pub trait PacketWriter: Send + Sync {
    async fn write_packet(&self, packet: &[u8]) -> io::Result<()>;
}

#[async_trait]
impl PacketWriter for UdpSocket {
    async fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        self.send(packet).await.map(|_| ())
    }
}

/// A discovered media path: the writer and our externally visible address.
#[derive(Clone)]
pub struct MediaLink {
    pub writer: Arc<dyn PacketWriter>,
    pub external: SocketAddr,
}

impl std::fmt::Debug for MediaLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaLink")
            .field("external", &self.external)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens the signaling connection at `url`.
    async fn signaling(&self, url: &str) -> VoiceResult<(SignalSink, SignalStream)>;

    /// Opens the media socket to `remote` and runs IP discovery for `ssrc`.
    async fn media(
        &self,
        remote: SocketAddr,
        ssrc: u32,
        cancel: &CancellationToken,
    ) -> VoiceResult<MediaLink>;
}

/// `wss://<endpoint>/?v=<version>`, with a trailing `:80` dropped.
pub fn gateway_url(endpoint: &str, version: u8) -> String {
    let host = endpoint.strip_suffix(":80").unwrap_or(endpoint);
    format!("wss://{}/?v={}", host, version)
}

pub struct NetConnector {
    config: GatewayConfig,
}

impl NetConnector {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl Connector for NetConnector {
    async fn signaling(&self, url: &str) -> VoiceResult<(SignalSink, SignalStream)> {
        debug!("Connecting to voice gateway: {}", url);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok((Box::pin(write), Box::pin(read)))
    }

    async fn media(
        &self,
        remote: SocketAddr,
        ssrc: u32,
        cancel: &CancellationToken,
    ) -> VoiceResult<MediaLink> {
        let bind: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(remote).await?;

        let external = discover_with_retry(
            &socket,
            ssrc,
            self.config.discovery_attempts,
            self.config.discovery_timeout(),
            self.config.discovery_backoff(),
            cancel,
        )
        .await?;

        Ok(MediaLink {
            writer: Arc::new(socket),
            external,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connector: each `signaling` call yields a `FakeServer` the
    //! test drives by hand.

    use std::{
        sync::{
            Weak,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        task::{Context, Poll},
    };

    use futures::channel::mpsc;
    use parking_lot::Mutex;
    use serde_json::Value;

    use super::*;
    use crate::{common::errors::VoiceError, gateway::session::types::VoiceGatewayMessage};

    /// Sink that forwards to the fake server and counts closes.
    struct RecordingSink {
        tx: mpsc::UnboundedSender<Message>,
        closes: Arc<AtomicUsize>,
    }

    impl Sink<Message> for RecordingSink {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
            self.tx
                .unbounded_send(item)
                .map_err(|_| WsError::ConnectionClosed)
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.tx.close_channel();
            Poll::Ready(Ok(()))
        }
    }

    /// Test side of one signaling connection.
    pub struct FakeServer {
        pub url: String,
        inbound: mpsc::UnboundedSender<Result<Message, WsError>>,
        outbound: mpsc::UnboundedReceiver<Message>,
        closes: Arc<AtomicUsize>,
    }

    impl FakeServer {
        pub fn send_op(&self, op: u8, d: Value) {
            let text = serde_json::to_string(&VoiceGatewayMessage { op, d }).unwrap();
            let _ = self.inbound.unbounded_send(Ok(Message::Text(text.into())));
        }

        pub fn send_raw(&self, text: &str) {
            let _ = self
                .inbound
                .unbounded_send(Ok(Message::Text(text.to_string().into())));
        }

        pub fn send_close(&self) {
            let _ = self.inbound.unbounded_send(Ok(Message::Close(None)));
        }

        /// Next message the client wrote, or `None` once the client closed.
        pub async fn recv(&mut self) -> Option<VoiceGatewayMessage> {
            loop {
                match self.outbound.next().await? {
                    Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
                    _ => continue,
                }
            }
        }

        /// Waits for the next message with the given op, skipping others.
        pub async fn expect_op(&mut self, op: u8) -> VoiceGatewayMessage {
            loop {
                match self.recv().await {
                    Some(msg) if msg.op == op => return msg,
                    Some(_) => continue,
                    None => panic!("signaling closed while waiting for op {}", op),
                }
            }
        }

        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    /// Media writer that records packets and counts socket drops.
    pub struct RecordingWriter {
        pub packets: Mutex<Vec<Vec<u8>>>,
        drops: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PacketWriter for RecordingWriter {
        async fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "port unreachable"));
            }
            self.packets.lock().push(packet.to_vec());
            Ok(())
        }
    }

    impl Drop for RecordingWriter {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub struct FakeConnector {
        servers: Mutex<Option<mpsc::UnboundedSender<FakeServer>>>,
        pending: Mutex<Option<mpsc::UnboundedReceiver<FakeServer>>>,
        pub media_calls: Mutex<Vec<(SocketAddr, u32)>>,
        pub media_drops: Arc<AtomicUsize>,
        pub fail_media: AtomicBool,
        pub fail_writes: Arc<AtomicBool>,
        writers: Mutex<Vec<Weak<RecordingWriter>>>,
    }

    impl FakeConnector {
        pub fn new() -> Arc<Self> {
            let (tx, rx) = mpsc::unbounded();
            Arc::new(Self {
                servers: Mutex::new(Some(tx)),
                pending: Mutex::new(Some(rx)),
                ..Default::default()
            })
        }

        /// Most recent media writer, if it is still alive.
        pub fn last_writer(&self) -> Option<Arc<RecordingWriter>> {
            self.writers.lock().last().and_then(Weak::upgrade)
        }

        /// Stream of servers, one per dialed signaling connection.
        pub fn servers(&self) -> mpsc::UnboundedReceiver<FakeServer> {
            self.pending.lock().take().expect("servers() taken twice")
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn signaling(&self, url: &str) -> VoiceResult<(SignalSink, SignalStream)> {
            let (out_tx, out_rx) = mpsc::unbounded();
            let (in_tx, in_rx) = mpsc::unbounded();
            let closes = Arc::new(AtomicUsize::new(0));
            let server = FakeServer {
                url: url.to_string(),
                inbound: in_tx,
                outbound: out_rx,
                closes: closes.clone(),
            };
            if let Some(servers) = self.servers.lock().as_ref() {
                let _ = servers.unbounded_send(server);
            }
            let sink = RecordingSink { tx: out_tx, closes };
            Ok((Box::pin(sink), Box::pin(in_rx)))
        }

        async fn media(
            &self,
            remote: SocketAddr,
            ssrc: u32,
            _cancel: &CancellationToken,
        ) -> VoiceResult<MediaLink> {
            self.media_calls.lock().push((remote, ssrc));
            if self.fail_media.load(Ordering::SeqCst) {
                return Err(VoiceError::DiscoveryTimeout);
            }
            let writer = Arc::new(RecordingWriter {
                packets: Mutex::new(Vec::new()),
                drops: self.media_drops.clone(),
                fail: self.fail_writes.clone(),
            });
            self.writers.lock().push(Arc::downgrade(&writer));
            Ok(MediaLink {
                writer,
                external: "203.0.113.7:40000".parse().unwrap(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_strips_default_port() {
        assert_eq!(gateway_url("voice.example.com:80", 3), "wss://voice.example.com/?v=3");
        assert_eq!(
            gateway_url("region.example.com:443", 3),
            "wss://region.example.com:443/?v=3"
        );
        assert_eq!(gateway_url("host", 4), "wss://host/?v=4");
    }

    #[tokio::test]
    async fn udp_socket_writes_to_connected_peer() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(peer.local_addr().unwrap()).await.unwrap();

        let writer: Arc<dyn PacketWriter> = Arc::new(socket);
        writer.write_packet(b"packet").await.unwrap();

        let mut buf = [0u8; 16];
        let n = peer.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"packet");
    }
}
