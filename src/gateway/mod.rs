pub mod connector;
pub mod constants;
pub mod discovery;
pub mod encryption;
pub mod pacer;
pub mod session;
pub mod udp_link;

pub use connector::{Connector, MediaLink, NetConnector, PacketWriter};
pub use encryption::{EncryptionMode, SecretKey};
pub use pacer::{Pacer, PacerStats, SpeakingNotifier};
pub use session::{ConnectionState, VoiceConnection};
pub use udp_link::PacketFramer;
