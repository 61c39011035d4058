use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod device;
pub mod events;
pub mod registry;

pub use device::{AudioDevice, AudioDeviceSet, SpeakerphoneMode};
pub use events::{
    CallEvent, ConnectionState, EncoderStats, EventCategory, IceConnectionState, Operation,
    StatsSnapshot,
};
pub use registry::{EventRegistry, Subscription, SubscriptionId};

/// Unique identifier for one call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only the first 8 characters for brevity
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Which side of the offer/answer exchange this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Offerer,
    Answerer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Offerer => write!(f, "offerer"),
            Role::Answerer => write!(f, "answerer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description as exchanged with the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A network path discovered by ICE, in its SDP attribute form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<String>, sdp_mline_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
        }
    }
}

/// Negotiation phase of the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NegotiationPhase {
    Idle,
    OfferPending,
    CreatingOffer,
    LocalOfferSet,
    AnswerPending,
    RemoteOfferSet,
    CreatingAnswer,
    ConnectPending,
    /// A create/set call failed; only teardown leaves this phase.
    Failed,
}

/// Inputs that drive the negotiation phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseEvent {
    /// Engine session and local tracks exist.
    Prepare,
    CreateOffer,
    LocalOfferApplied,
    RemoteAnswerApplied,
    RemoteOfferApplied,
    CreateAnswer,
    LocalAnswerApplied,
    Fail,
    Teardown,
}

/// Reasons an operation is refused without touching the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("invalid state transition: {event:?} while {phase:?}")]
    InvalidStateTransition {
        phase: NegotiationPhase,
        event: PhaseEvent,
    },

    #[error("no active session")]
    NoActiveSession,

    #[error("a session is already active")]
    SessionAlreadyActive,

    #[error("answerer requires a remote description")]
    MissingRemoteDescription,
}

/// Unified error type for the call core.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Bluetooth unavailable: {0}")]
    BluetoothUnavailable(String),

    #[error("Proximity sensor unavailable")]
    SensorUnavailable,

    #[error("Media engine error: {0}")]
    Engine(String),

    #[error("Audio platform error: {0}")]
    Platform(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error), // Catch-all for other errors
}
