//! The media engine collaborator.
//!
//! An engine owns the native peer connection. The orchestrator drives it
//! through [`EngineSession`] and receives its asynchronous notifications
//! through the [`EngineEvents`] sink handed over at session creation.

use crate::orchestrator::Message;
use async_trait::async_trait;
use call_core::{
    ConnectionState, Error, IceCandidate, IceConnectionState, Role, SessionDescription, SessionId,
};
use log::trace;
use serde::{Deserialize, Serialize};
use settings_manager::IceServer;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Local media a session can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelConfig {
    pub label: String,
    pub ordered: bool,
}

/// Everything an engine needs to build one peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub role: Role,
    pub ice_servers: Vec<IceServer>,
    /// Only the offerer creates the channel; the answerer accepts it.
    pub data_channel: Option<DataChannelConfig>,
}

/// One entry of an engine statistics snapshot, as loosely typed key/value
/// pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub id: String,
    pub kind: String,
    pub values: HashMap<String, String>,
}

impl StatsReport {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn value_u64(&self, key: &str) -> Option<u64> {
        self.value(key).and_then(|v| v.parse().ok())
    }

    pub fn value_f64(&self, key: &str) -> Option<f64> {
        self.value(key).and_then(|v| v.parse().ok())
    }
}

/// Notifications raised by the engine outside of any call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ConnectionStateChanged(ConnectionState),
    IceConnectionStateChanged(IceConnectionState),
    LocalCandidate(IceCandidate),
    LocalCandidatesRemoved(Vec<IceCandidate>),
    DataChannelMessage(String),
}

/// Sink for engine notifications. Events are tagged with the session they
/// belong to and queued on the orchestrator's mailbox behind any work that
/// is already pending. Holding a sink does not keep the orchestrator alive.
#[derive(Clone)]
pub struct EngineEvents {
    session_id: SessionId,
    mailbox: mpsc::WeakUnboundedSender<Message>,
}

impl EngineEvents {
    pub(crate) fn new(session_id: SessionId, mailbox: mpsc::WeakUnboundedSender<Message>) -> Self {
        Self {
            session_id,
            mailbox,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Queue an event. Returns false once the orchestrator is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        let Some(mailbox) = self.mailbox.upgrade() else {
            trace!("Dropping {:?}, orchestrator gone", event);
            return false;
        };
        mailbox
            .send(Message::Engine {
                session_id: self.session_id,
                event,
            })
            .is_ok()
    }
}

/// Factory for engine sessions.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_session(
        &self,
        config: &SessionConfig,
        events: EngineEvents,
    ) -> Result<Box<dyn EngineSession>, Error>;
}

/// A native peer connection. Only ever called from the orchestrator task.
#[async_trait]
pub trait EngineSession: Send + Sync {
    async fn add_track(&mut self, kind: TrackKind) -> Result<(), Error>;
    async fn release_track(&mut self, kind: TrackKind) -> Result<(), Error>;
    /// Stop or resume sending a local track; the negotiated media is kept.
    async fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) -> Result<(), Error>;
    /// Returns the SDP text of the new offer. Does not apply it.
    async fn create_offer(&mut self) -> Result<String, Error>;
    async fn create_answer(&mut self) -> Result<String, Error>;
    async fn set_local_description(&mut self, description: SessionDescription)
        -> Result<(), Error>;
    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), Error>;
    async fn has_local_description(&self) -> bool;
    async fn has_remote_description(&self) -> bool;
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), Error>;
    async fn get_stats(&self) -> Result<Vec<StatsReport>, Error>;
    async fn send_data(&mut self, text: String) -> Result<(), Error>;
    async fn close(&mut self) -> Result<(), Error>;
}
