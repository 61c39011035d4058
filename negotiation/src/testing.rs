//! Scripted in-memory media engine for tests.

use crate::engine::{
    EngineEvent, EngineEvents, EngineSession, MediaEngine, SessionConfig, StatsReport, TrackKind,
};
use async_trait::async_trait;
use call_core::{Error, IceCandidate, Role, SdpType, SessionDescription};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Every call the orchestrator made, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateSession(Role),
    AddTrack(TrackKind),
    ReleaseTrack(TrackKind),
    SetTrackEnabled(TrackKind, bool),
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SdpType),
    SetRemoteDescription(SdpType),
    AddIceCandidate(String),
    GetStats,
    SendData(String),
    Close,
}

/// Engine calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateSession,
    AddTrack,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
}

#[derive(Default)]
struct State {
    calls: Vec<EngineCall>,
    failures: HashSet<FailPoint>,
    events: Option<EngineEvents>,
    stats: VecDeque<Vec<StatsReport>>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    offers: u32,
}

/// Records calls and answers them from memory. Clones share state.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<State>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_on(&self, point: FailPoint) {
        self.lock().failures.insert(point);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Queue a stats snapshot; each `get_stats` consumes one.
    pub fn push_stats(&self, reports: Vec<StatsReport>) {
        self.lock().stats.push_back(reports);
    }

    /// Raise an engine notification on the latest session.
    pub fn emit(&self, event: EngineEvent) -> bool {
        let events = self.lock().events.clone();
        events.map_or(false, |events| events.emit(event))
    }

    /// Notification sink of the latest session.
    pub fn events(&self) -> Option<EngineEvents> {
        self.lock().events.clone()
    }

    fn record(&self, call: EngineCall, point: Option<FailPoint>) -> Result<(), Error> {
        let mut state = self.lock();
        state.calls.push(call.clone());
        match point {
            Some(point) if state.failures.contains(&point) => {
                Err(Error::Engine(format!("{:?} failed", call)))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn create_session(
        &self,
        config: &SessionConfig,
        events: EngineEvents,
    ) -> Result<Box<dyn EngineSession>, Error> {
        self.record(
            EngineCall::CreateSession(config.role),
            Some(FailPoint::CreateSession),
        )?;
        let mut state = self.lock();
        state.events = Some(events);
        state.local = None;
        state.remote = None;
        drop(state);
        Ok(Box::new(FakeSession {
            engine: self.clone(),
        }))
    }
}

struct FakeSession {
    engine: FakeEngine,
}

#[async_trait]
impl EngineSession for FakeSession {
    async fn add_track(&mut self, kind: TrackKind) -> Result<(), Error> {
        self.engine
            .record(EngineCall::AddTrack(kind), Some(FailPoint::AddTrack))
    }

    async fn release_track(&mut self, kind: TrackKind) -> Result<(), Error> {
        self.engine.record(EngineCall::ReleaseTrack(kind), None)
    }

    async fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) -> Result<(), Error> {
        self.engine
            .record(EngineCall::SetTrackEnabled(kind, enabled), None)
    }

    async fn create_offer(&mut self) -> Result<String, Error> {
        self.engine
            .record(EngineCall::CreateOffer, Some(FailPoint::CreateOffer))?;
        let mut state = self.engine.lock();
        state.offers += 1;
        Ok(format!("v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\n", state.offers))
    }

    async fn create_answer(&mut self) -> Result<String, Error> {
        self.engine
            .record(EngineCall::CreateAnswer, Some(FailPoint::CreateAnswer))?;
        Ok("v=0\r\no=- answer 2 IN IP4 127.0.0.1\r\n".to_string())
    }

    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), Error> {
        self.engine.record(
            EngineCall::SetLocalDescription(description.sdp_type),
            Some(FailPoint::SetLocalDescription),
        )?;
        self.engine.lock().local = Some(description);
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), Error> {
        self.engine.record(
            EngineCall::SetRemoteDescription(description.sdp_type),
            Some(FailPoint::SetRemoteDescription),
        )?;
        self.engine.lock().remote = Some(description);
        Ok(())
    }

    async fn has_local_description(&self) -> bool {
        self.engine.lock().local.is_some()
    }

    async fn has_remote_description(&self) -> bool {
        self.engine.lock().remote.is_some()
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), Error> {
        self.engine
            .record(EngineCall::AddIceCandidate(candidate.candidate), None)
    }

    async fn get_stats(&self) -> Result<Vec<StatsReport>, Error> {
        self.engine.record(EngineCall::GetStats, None)?;
        Ok(self.engine.lock().stats.pop_front().unwrap_or_default())
    }

    async fn send_data(&mut self, text: String) -> Result<(), Error> {
        self.engine.record(EngineCall::SendData(text), None)
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.engine.record(EngineCall::Close, None)
    }
}
