pub mod registry;
pub mod session_layer;

pub use registry::VoiceRegistry;
pub use session_layer::{
    SessionLayer, StaticSessionLayer, VoiceEvent, VoiceServerUpdate, VoiceStateUpdate,
};
