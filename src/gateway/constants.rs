/// Voice gateway version requested in the WebSocket URL.
pub const VOICE_GATEWAY_VERSION: u8 = 3;

/// Read deadline (s) before Hello has advertised a heartbeat interval.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 120;

/// Seconds allowed between identify and the session description.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Largest heartbeat interval (ms) accepted from Hello.
pub const MAX_HEARTBEAT_INTERVAL_MS: f64 = 600_000.0;

/// Timeout (ms) allowed for the WS write task to shut down gracefully.
pub const WRITE_TASK_SHUTDOWN_MS: u64 = 500;

/// The only encryption mode this client speaks.
pub const DEFAULT_VOICE_MODE: &str = "xsalsa20_poly1305";

// ── UDP discovery ────────────────────────────────────────────────────────────

/// Size of the IP discovery request; replies must be at least this long.
pub const DISCOVERY_PACKET_SIZE: usize = 70;

/// Per-attempt wait for a discovery reply.
pub const IP_DISCOVERY_TIMEOUT_SECS: u64 = 5;

/// Discovery attempts before the session is abandoned.
pub const DISCOVERY_ATTEMPTS: u32 = 5;

/// Pause (ms) between discovery attempts.
pub const DISCOVERY_BACKOFF_MS: u64 = 1_000;

// ── RTP framing ──────────────────────────────────────────────────────────────

/// First RTP header byte: version 2, no padding, no extension, no CSRC.
pub const RTP_VERSION_BYTE: u8 = 0x80;

/// Payload type the voice server expects for Opus.
pub const RTP_OPUS_PAYLOAD_TYPE: u8 = 0x78;

/// Fixed RTP header length.
pub const RTP_HEADER_SIZE: usize = 12;

/// Largest datagram handled; also the initial capacity of the packet buffer.
pub const UDP_PACKET_BUF_CAPACITY: usize = 1_500;

// ── Pacer ────────────────────────────────────────────────────────────────────

/// Consecutive silence frames sent before the pacer stops speaking and idles.
pub const MAX_SILENCE_FRAMES: u32 = 5;

/// Frames the session queue holds before producers block.
pub const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 16;
