use crate::{
    AudioDevice, AudioDeviceSet, IceCandidate, NegotiationPhase, Rejection, SessionDescription,
    SessionId,
};
use serde::{Deserialize, Serialize};

/// Subscription categories of the event fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Connection lifecycle, stats and session bookkeeping
    Connection,
    /// Local session descriptions
    Sdp,
    /// Local candidates and ICE connectivity
    Ice,
    /// Audio output routing
    Audio,
}

impl EventCategory {
    pub const ALL: [EventCategory; 4] = [
        EventCategory::Connection,
        EventCategory::Sdp,
        EventCategory::Ice,
        EventCategory::Audio,
    ];
}

/// Peer connection state as reported by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// ICE agent connectivity state as reported by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Operations a caller can enqueue on the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Start,
    SetRemoteDescription,
    AddRemoteIceCandidate,
    SendData,
    SetTrackEnabled,
}

/// Video encoder figures, only present on video calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncoderStats {
    pub frame_rate: Option<f64>,
    pub target_bitrate: Option<u64>,
    pub actual_bitrate: Option<u64>,
}

/// One sampling interval worth of connection statistics.
///
/// Byte deltas are `None` for the first sample after start and whenever the
/// engine did not report the counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub bytes_sent_delta: Option<u64>,
    pub bytes_received_delta: Option<u64>,
    pub encoder: Option<EncoderStats>,
}

/// Events published to subscribers of a call context.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// The negotiation phase advanced
    PhaseChanged {
        session_id: SessionId,
        phase: NegotiationPhase,
    },

    /// Peer connection state changed
    ConnectionStateChanged {
        session_id: SessionId,
        state: ConnectionState,
    },

    /// A stats sampling tick completed
    StatsReady {
        session_id: SessionId,
        stats: StatsSnapshot,
    },

    /// Text received over the data channel
    DataChannelMessage {
        session_id: SessionId,
        message: String,
    },

    /// Local and remote renderers should be (un)swapped
    VideoFeedsSwapped {
        session_id: SessionId,
        swapped: bool,
    },

    /// Engine create/set call failed; the session waits for release
    NegotiationFailed {
        session_id: SessionId,
        reason: String,
    },

    /// An enqueued operation was refused
    OperationRejected {
        operation: Operation,
        reason: Rejection,
    },

    /// The session was torn down
    SessionClosed { session_id: SessionId },

    /// Local description is set and can be sent to the peer
    LocalDescriptionReady {
        session_id: SessionId,
        description: SessionDescription,
    },

    /// A local candidate was gathered and can be sent to the peer
    LocalCandidate {
        session_id: SessionId,
        candidate: IceCandidate,
    },

    /// Previously gathered local candidates are no longer valid
    LocalCandidatesRemoved {
        session_id: SessionId,
        candidates: Vec<IceCandidate>,
    },

    /// ICE connectivity changed
    IceConnectionStateChanged {
        session_id: SessionId,
        state: IceConnectionState,
    },

    /// The selected output device or the available set changed
    AudioDeviceChanged {
        selected: AudioDevice,
        available: AudioDeviceSet,
    },
}

impl CallEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            CallEvent::PhaseChanged { .. }
            | CallEvent::ConnectionStateChanged { .. }
            | CallEvent::StatsReady { .. }
            | CallEvent::DataChannelMessage { .. }
            | CallEvent::VideoFeedsSwapped { .. }
            | CallEvent::NegotiationFailed { .. }
            | CallEvent::OperationRejected { .. }
            | CallEvent::SessionClosed { .. } => EventCategory::Connection,
            CallEvent::LocalDescriptionReady { .. } => EventCategory::Sdp,
            CallEvent::LocalCandidate { .. }
            | CallEvent::LocalCandidatesRemoved { .. }
            | CallEvent::IceConnectionStateChanged { .. } => EventCategory::Ice,
            CallEvent::AudioDeviceChanged { .. } => EventCategory::Audio,
        }
    }
}
