use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    common::types::SessionId,
    gateway::{
        connector::MediaLink,
        encryption::{EncryptionMode, SecretKey},
    },
};

/// Handshake inputs delivered by the session layer, in either order.
#[derive(Debug, Clone, Default)]
pub struct PendingCredentials {
    pub session_id: Option<SessionId>,
    pub token: Option<String>,
    pub endpoint: Option<String>,
}

/// Both halves of the handshake input.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub session_id: SessionId,
    pub token: String,
    pub endpoint: String,
}

impl PendingCredentials {
    /// Complete credentials once both events have arrived.
    pub fn ready(&self) -> Option<Credentials> {
        Some(Credentials {
            session_id: self.session_id.clone()?,
            token: self.token.clone()?,
            endpoint: self.endpoint.clone()?,
        })
    }
}

/// What the ready message and discovery settled on.
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub ssrc: u32,
    pub link: MediaLink,
    pub mode: EncryptionMode,
}

#[derive(Debug, Default)]
pub enum Phase {
    #[default]
    Idle,
    AwaitingHandshake(PendingCredentials),
    SignalingOpen,
    UdpDiscovered(Negotiated),
    ReadyToSend {
        negotiated: Negotiated,
        key: SecretKey,
    },
    Closed,
}

/// Observable discriminant of `Phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    AwaitingHandshake,
    SignalingOpen,
    UdpDiscovered,
    ReadyToSend,
    Closed,
}

impl Phase {
    pub fn state(&self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Idle,
            Self::AwaitingHandshake(_) => ConnectionState::AwaitingHandshake,
            Self::SignalingOpen => ConnectionState::SignalingOpen,
            Self::UdpDiscovered(_) => ConnectionState::UdpDiscovered,
            Self::ReadyToSend { .. } => ConnectionState::ReadyToSend,
            Self::Closed => ConnectionState::Closed,
        }
    }

    /// Pending credentials, promoting `Idle` to `AwaitingHandshake`.
    /// `None` once the handshake has started.
    pub fn pending_mut(&mut self) -> Option<&mut PendingCredentials> {
        if matches!(self, Self::Idle) {
            *self = Self::AwaitingHandshake(PendingCredentials::default());
        }
        match self {
            Self::AwaitingHandshake(pending) => Some(pending),
            _ => None,
        }
    }

    pub fn negotiated(&self) -> Option<&Negotiated> {
        match self {
            Self::UdpDiscovered(n) | Self::ReadyToSend { negotiated: n, .. } => Some(n),
            _ => None,
        }
    }
}

/// Start-once guard for a background loop.
#[derive(Debug, Default)]
pub struct LazyStart(AtomicBool);

impl LazyStart {
    /// `true` for exactly one caller.
    pub fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_started(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_complete_in_either_order() {
        let mut phase = Phase::Idle;
        phase.pending_mut().unwrap().token = Some("T".into());
        assert_eq!(phase.state(), ConnectionState::AwaitingHandshake);
        assert!(phase.pending_mut().unwrap().ready().is_none());

        let pending = phase.pending_mut().unwrap();
        pending.endpoint = Some("region.example.com:443".into());
        assert!(pending.ready().is_none());
        pending.session_id = Some("s".into());
        let creds = pending.ready().unwrap();
        assert_eq!(creds.token, "T");
        assert_eq!(creds.endpoint, "region.example.com:443");
    }

    #[test]
    fn pending_is_gone_after_handshake_starts() {
        let mut phase = Phase::SignalingOpen;
        assert!(phase.pending_mut().is_none());
        let mut closed = Phase::Closed;
        assert!(closed.pending_mut().is_none());
        assert_eq!(closed.state(), ConnectionState::Closed);
    }

    #[test]
    fn lazy_start_claims_once() {
        let once = LazyStart::default();
        assert!(!once.is_started());
        assert!(once.claim());
        assert!(!once.claim());
        assert!(once.is_started());
    }

    #[test]
    fn concurrent_claims_yield_one_winner() {
        let once = std::sync::Arc::new(LazyStart::default());
        let winners: usize = (0..8)
            .map(|_| {
                let once = once.clone();
                std::thread::spawn(move || once.claim() as usize)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();
        assert_eq!(winners, 1);
    }
}
