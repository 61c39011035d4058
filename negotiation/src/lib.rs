//! Offer/answer negotiation for rtpcall
//!
//! Drives a peer connection through the offer/answer exchange on a single
//! orchestrator task, buffers early remote candidates, samples connection
//! statistics and publishes everything as [`call_core::CallEvent`]s.

pub mod candidates;
pub mod engine;
pub mod orchestrator;
pub mod sdp;
pub mod state;
pub mod stats;
pub mod webrtc_engine;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use candidates::CandidateQueue;
pub use engine::{
    DataChannelConfig, EngineEvent, EngineEvents, EngineSession, MediaEngine, SessionConfig,
    StatsReport, TrackKind,
};
pub use orchestrator::{NegotiationActor, NegotiationHandle};
pub use sdp::{DescriptionView, SdpAction, SdpExchange};
pub use state::PhaseMachine;
pub use stats::StatsSampler;
pub use webrtc_engine::{WebRtcEngine, WebRtcSession};
