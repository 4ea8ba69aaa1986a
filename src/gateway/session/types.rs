use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    common::{
        errors::VoiceResult,
        types::{GuildId, SessionId, UserId},
    },
    gateway::encryption::KEY_SIZE,
};

/// Envelope of every signaling message.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VoiceGatewayMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

impl VoiceGatewayMessage {
    pub fn new<T: Serialize>(op: OpCode, d: &T) -> VoiceResult<Self> {
        Ok(Self {
            op: op as u8,
            d: serde_json::to_value(d)?,
        })
    }

    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    /// Decodes `d` as `T`.
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> VoiceResult<T> {
        Ok(T::deserialize(&self.d)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Identify = 0,
    SelectProtocol = 1,
    Ready = 2,
    Heartbeat = 3,
    SessionDescription = 4,
    Speaking = 5,
    HeartbeatAck = 6,
    Resume = 7,
    Hello = 8,
    Resumed = 9,
    ClientDisconnect = 13,
}

impl OpCode {
    pub fn from_u8(op: u8) -> Option<Self> {
        Some(match op {
            0 => Self::Identify,
            1 => Self::SelectProtocol,
            2 => Self::Ready,
            3 => Self::Heartbeat,
            4 => Self::SessionDescription,
            5 => Self::Speaking,
            6 => Self::HeartbeatAck,
            7 => Self::Resume,
            8 => Self::Hello,
            9 => Self::Resumed,
            13 => Self::ClientDisconnect,
            _ => return None,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IdentifyPayload {
    pub server_id: GuildId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub token: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct HelloPayload {
    pub heartbeat_interval: f64,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReadyPayload {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptionPayload {
    pub secret_key: [u8; KEY_SIZE],
    pub mode: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SelectProtocolPayload {
    pub protocol: String,
    pub data: SelectProtocolData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SpeakingPayload {
    pub speaking: bool,
    pub delay: u32,
    pub ssrc: u32,
}
