//! Negotiation orchestrator.
//!
//! One actor task per call context owns the engine session. Caller commands,
//! engine notifications, engine-call completions and stats ticks all share a
//! single mailbox, so the actor observes them in one total order.

use crate::engine::{
    DataChannelConfig, EngineEvent, EngineEvents, EngineSession, MediaEngine, SessionConfig,
    TrackKind,
};
use crate::sdp::{DescriptionView, SdpAction, SdpExchange};
use crate::state::PhaseMachine;
use crate::stats::StatsSampler;
use audio_routing::AudioRouterHandle;
use call_core::{
    CallEvent, ConnectionState, Error, EventRegistry, IceCandidate, NegotiationPhase, Operation,
    PhaseEvent, Rejection, Role, SdpType, SessionDescription, SessionId,
};
use log::{debug, error, info, trace, warn};
use settings_manager::{IceServer, MediaSettings, Settings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Mailbox entries of the orchestrator actor.
pub(crate) enum Message {
    Start {
        role: Role,
        remote: Option<SessionDescription>,
    },
    SetRemoteDescription(SessionDescription),
    AddRemoteIceCandidate(IceCandidate),
    SendData(String),
    SetTrackEnabled {
        kind: TrackKind,
        enabled: bool,
    },
    Phase(oneshot::Sender<NegotiationPhase>),
    Release(oneshot::Sender<()>),
    Engine {
        session_id: SessionId,
        event: EngineEvent,
    },
    Completion {
        session_id: SessionId,
        completion: Completion,
    },
    StatsTick {
        session_id: SessionId,
    },
}

/// Result of an engine create/set call, fed back through the mailbox.
pub(crate) enum Completion {
    DescriptionCreated(Result<SessionDescription, String>),
    LocalDescriptionSet(Result<(), String>),
    RemoteDescriptionSet(Result<(), String>),
}

/// Caller side of the orchestrator. Operations are queued and return
/// immediately; outcomes arrive as [`CallEvent`]s.
#[derive(Clone)]
pub struct NegotiationHandle {
    mailbox: mpsc::UnboundedSender<Message>,
}

impl NegotiationHandle {
    fn send(&self, message: Message) -> Result<(), Error> {
        self.mailbox
            .send(message)
            .map_err(|_| Error::ChannelClosed("negotiation released".to_string()))
    }

    /// Begin a call. The answerer must pass the remote offer.
    pub fn start(&self, role: Role, remote: Option<SessionDescription>) -> Result<(), Error> {
        self.send(Message::Start { role, remote })
    }

    /// Apply the peer's answer (offerer side).
    pub fn set_remote_description(&self, description: SessionDescription) -> Result<(), Error> {
        self.send(Message::SetRemoteDescription(description))
    }

    pub fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), Error> {
        self.send(Message::AddRemoteIceCandidate(candidate))
    }

    pub fn send_data(&self, text: impl Into<String>) -> Result<(), Error> {
        self.send(Message::SendData(text.into()))
    }

    /// Mute or unmute a local track without renegotiating.
    pub fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), Error> {
        self.send(Message::SetTrackEnabled { kind, enabled })
    }

    /// Current negotiation phase, after everything queued before this call.
    pub async fn phase(&self) -> Result<NegotiationPhase, Error> {
        let (tx, rx) = oneshot::channel();
        self.send(Message::Phase(tx))?;
        rx.await
            .map_err(|_| Error::ChannelClosed("negotiation released".to_string()))
    }

    /// Tear the call down and stop the orchestrator. Caller operations queued
    /// before the release still run; engine completions and anything sent
    /// after it are dropped. Releasing twice is a no-op.
    pub async fn release(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        if self.mailbox.send(Message::Release(tx)).is_err() {
            debug!("Negotiation already released");
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}

/// State of the active call.
struct Session {
    id: SessionId,
    machine: PhaseMachine,
    sdp: SdpExchange,
    engine: Box<dyn EngineSession>,
    tracks: Vec<TrackKind>,
    /// Set once a remote description has been handed to the engine.
    remote_requested: bool,
    sampler: StatsSampler,
    stats_task: Option<JoinHandle<()>>,
}

impl Session {
    fn role(&self) -> Role {
        self.machine.role()
    }

    fn has_video(&self) -> bool {
        self.tracks.contains(&TrackKind::Video)
    }

    fn stop_stats(&mut self) {
        if let Some(task) = self.stats_task.take() {
            task.abort();
            debug!("Stats sampling stopped for session {}", self.id);
        }
    }
}

pub struct NegotiationActor {
    engine: Arc<dyn MediaEngine>,
    registry: EventRegistry,
    router: Option<AudioRouterHandle>,
    ice_servers: Vec<IceServer>,
    media: MediaSettings,
    session: Option<Session>,
    mailbox: mpsc::UnboundedReceiver<Message>,
    self_tx: mpsc::WeakUnboundedSender<Message>,
}

impl NegotiationActor {
    /// Spawn the orchestrator task.
    pub fn spawn(
        engine: Arc<dyn MediaEngine>,
        settings: &Settings,
        registry: EventRegistry,
        router: Option<AudioRouterHandle>,
    ) -> NegotiationHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut actor = NegotiationActor {
            engine,
            registry,
            router,
            ice_servers: settings.ice_servers.clone(),
            media: settings.media.clone(),
            session: None,
            mailbox: rx,
            self_tx: tx.downgrade(),
        };

        tokio::spawn(async move {
            actor.run().await;
        });

        NegotiationHandle { mailbox: tx }
    }

    async fn run(&mut self) {
        while let Some(message) = self.mailbox.recv().await {
            match message {
                Message::Release(ack) => {
                    self.release().await;
                    self.mailbox.close();
                    let _ = ack.send(());
                    break;
                }
                message => self.handle_message(message).await,
            }
        }

        // Every handle dropped without a release
        if self.session.is_some() || self.router.is_some() {
            self.release().await;
        }
        info!("Negotiation orchestrator exited");
    }

    async fn handle_message(&mut self, message: Message) {
        match message {
            Message::Start { role, remote } => self.start(role, remote).await,
            Message::SetRemoteDescription(description) => {
                self.set_remote_description(description).await
            }
            Message::AddRemoteIceCandidate(candidate) => {
                self.add_remote_ice_candidate(candidate).await
            }
            Message::SendData(text) => self.send_data(text).await,
            Message::SetTrackEnabled { kind, enabled } => {
                self.set_track_enabled(kind, enabled).await
            }
            Message::Phase(reply) => {
                let phase = self
                    .session
                    .as_ref()
                    .map(|s| s.machine.phase())
                    .unwrap_or(NegotiationPhase::Idle);
                let _ = reply.send(phase);
            }
            Message::Release(_) => {}
            Message::Engine { session_id, event } => {
                if self.is_current(session_id) {
                    self.handle_engine_event(event).await;
                } else {
                    trace!("Dropping engine event of stale session {}", session_id);
                }
            }
            Message::Completion {
                session_id,
                completion,
            } => {
                if self.is_current(session_id) {
                    self.handle_completion(completion).await;
                } else {
                    debug!("Dropping completion of stale session {}", session_id);
                }
            }
            Message::StatsTick { session_id } => {
                if self.is_current(session_id) {
                    self.sample_stats().await;
                }
            }
        }
    }

    fn is_current(&self, session_id: SessionId) -> bool {
        self.session.as_ref().map(|s| s.id) == Some(session_id)
    }

    fn publish(&self, event: CallEvent) {
        self.registry.publish(event);
    }

    fn reject(&self, operation: Operation, reason: Rejection) {
        warn!("{:?} rejected: {}", operation, reason);
        self.publish(CallEvent::OperationRejected { operation, reason });
    }

    /// Queue a message behind whatever is already waiting.
    fn enqueue(&self, message: Message) {
        match self.self_tx.upgrade() {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!("Mailbox closed, dropping self-enqueued work"),
        }
    }

    fn complete(&self, session_id: SessionId, completion: Completion) {
        self.enqueue(Message::Completion {
            session_id,
            completion,
        });
    }

    /// Advance the phase machine and publish the new phase.
    fn advance(&mut self, event: PhaseEvent) -> Result<NegotiationPhase, Rejection> {
        let session = self.session.as_mut().ok_or(Rejection::NoActiveSession)?;
        let phase = session.machine.apply(event)?;
        let session_id = session.id;
        self.publish(CallEvent::PhaseChanged { session_id, phase });
        Ok(phase)
    }

    async fn start(&mut self, role: Role, remote: Option<SessionDescription>) {
        if self.session.is_some() {
            self.reject(Operation::Start, Rejection::SessionAlreadyActive);
            return;
        }
        let remote_offer = match (role, remote) {
            (Role::Answerer, None) => {
                self.reject(Operation::Start, Rejection::MissingRemoteDescription);
                return;
            }
            (_, remote) => remote,
        };

        let session_id = SessionId::new();
        info!("Starting {} session {}", role, session_id);

        let config = SessionConfig {
            role,
            ice_servers: self.ice_servers.clone(),
            data_channel: self.media.data_channel.then(|| DataChannelConfig {
                label: self.media.data_channel_label.clone(),
                ordered: self.media.ordered_data_channel,
            }),
        };
        let events = EngineEvents::new(session_id, self.self_tx.clone());
        let engine = match self.engine.create_session(&config, events).await {
            Ok(engine) => engine,
            Err(e) => {
                error!("Failed to create engine session: {}", e);
                self.publish(CallEvent::NegotiationFailed {
                    session_id,
                    reason: e.to_string(),
                });
                return;
            }
        };

        self.session = Some(Session {
            id: session_id,
            machine: PhaseMachine::new(role),
            sdp: SdpExchange::new(role),
            engine,
            tracks: Vec::new(),
            remote_requested: false,
            sampler: StatsSampler::new(self.media.video),
            stats_task: None,
        });

        let mut kinds = Vec::new();
        if self.media.audio {
            kinds.push(TrackKind::Audio);
        }
        if self.media.video {
            kinds.push(TrackKind::Video);
        }
        for kind in kinds {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            if let Err(e) = session.engine.add_track(kind).await {
                self.abandon(format!("Failed to add {:?} track: {}", kind, e))
                    .await;
                return;
            }
            session.tracks.push(kind);
        }

        if let Err(rejection) = self.advance(PhaseEvent::Prepare) {
            self.fail(rejection.to_string());
            return;
        }

        match role {
            Role::Offerer => {
                self.create_description(Operation::Start, PhaseEvent::CreateOffer)
                    .await
            }
            Role::Answerer => {
                if let Some(offer) = remote_offer {
                    self.apply_remote(offer).await;
                }
            }
        }
    }

    /// Drop a session that never left `Idle`: close the engine side and
    /// report the failure. The caller may start again afterwards.
    async fn abandon(&mut self, reason: String) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        error!("Session {} abandoned: {}", session.id, reason);
        for kind in session.tracks.clone() {
            if let Err(e) = session.engine.release_track(kind).await {
                warn!("Failed to release {:?} track: {}", kind, e);
            }
        }
        if let Err(e) = session.engine.close().await {
            warn!("Failed to close engine session: {}", e);
        }
        self.publish(CallEvent::NegotiationFailed {
            session_id: session.id,
            reason,
        });
    }

    /// Create an offer or answer and queue its completion.
    async fn create_description(&mut self, operation: Operation, event: PhaseEvent) {
        if let Err(rejection) = self.advance(event) {
            self.reject(operation, rejection);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let result = match event {
            PhaseEvent::CreateOffer => session
                .engine
                .create_offer()
                .await
                .map(SessionDescription::offer),
            _ => session
                .engine
                .create_answer()
                .await
                .map(SessionDescription::answer),
        };
        let session_id = session.id;
        self.complete(
            session_id,
            Completion::DescriptionCreated(result.map_err(|e| e.to_string())),
        );
    }

    async fn apply_remote(&mut self, description: SessionDescription) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        debug!("Setting remote {:?} on session {}", description.sdp_type, session.id);
        session.remote_requested = true;
        let result = session.engine.set_remote_description(description).await;
        let session_id = session.id;
        self.complete(
            session_id,
            Completion::RemoteDescriptionSet(result.map_err(|e| e.to_string())),
        );
    }

    async fn set_remote_description(&mut self, description: SessionDescription) {
        let Some(session) = self.session.as_ref() else {
            self.reject(Operation::SetRemoteDescription, Rejection::NoActiveSession);
            return;
        };
        let event = match session.role() {
            Role::Offerer => PhaseEvent::RemoteAnswerApplied,
            Role::Answerer => PhaseEvent::RemoteOfferApplied,
        };
        // The phase only moves once the engine call completes, so a second
        // description queued behind the first must be caught here.
        if session.remote_requested {
            let rejection = Rejection::InvalidStateTransition {
                phase: session.machine.phase(),
                event,
            };
            self.reject(Operation::SetRemoteDescription, rejection);
            return;
        }
        if let Err(rejection) = session.machine.next(event) {
            self.reject(Operation::SetRemoteDescription, rejection);
            return;
        }
        self.apply_remote(description).await;
    }

    async fn add_remote_ice_candidate(&mut self, candidate: IceCandidate) {
        let Some(session) = self.session.as_mut() else {
            self.reject(Operation::AddRemoteIceCandidate, Rejection::NoActiveSession);
            return;
        };
        if let Some(candidate) = session.sdp.accept_remote_candidate(candidate) {
            if let Err(e) = session.engine.add_ice_candidate(candidate).await {
                warn!("Failed to add remote candidate: {}", e);
            }
        }
    }

    async fn send_data(&mut self, text: String) {
        let Some(session) = self.session.as_mut() else {
            self.reject(Operation::SendData, Rejection::NoActiveSession);
            return;
        };
        if let Err(e) = session.engine.send_data(text).await {
            warn!("Failed to send data channel message: {}", e);
        }
    }

    async fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) {
        let Some(session) = self.session.as_mut() else {
            self.reject(Operation::SetTrackEnabled, Rejection::NoActiveSession);
            return;
        };
        if !session.tracks.contains(&kind) {
            warn!("Session {} has no {:?} track to toggle", session.id, kind);
            return;
        }
        debug!(
            "{} {:?} track on session {}",
            if enabled { "Enabling" } else { "Disabling" },
            kind,
            session.id
        );
        if let Err(e) = session.engine.set_track_enabled(kind, enabled).await {
            warn!("Failed to toggle {:?} track: {}", kind, e);
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::DescriptionCreated(Ok(description)) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if !session.sdp.on_create_success(description.clone()) {
                    return;
                }
                let result = session.engine.set_local_description(description).await;
                let session_id = session.id;
                self.complete(
                    session_id,
                    Completion::LocalDescriptionSet(result.map_err(|e| e.to_string())),
                );
            }
            Completion::LocalDescriptionSet(Ok(())) => {
                let event = match self.session.as_ref().map(Session::role) {
                    Some(Role::Offerer) => PhaseEvent::LocalOfferApplied,
                    Some(Role::Answerer) => PhaseEvent::LocalAnswerApplied,
                    None => return,
                };
                self.on_set_success(Operation::Start, event).await;
            }
            Completion::RemoteDescriptionSet(Ok(())) => {
                let event = match self.session.as_ref().map(Session::role) {
                    Some(Role::Offerer) => PhaseEvent::RemoteAnswerApplied,
                    Some(Role::Answerer) => PhaseEvent::RemoteOfferApplied,
                    None => return,
                };
                self.on_set_success(Operation::SetRemoteDescription, event)
                    .await;
            }
            Completion::DescriptionCreated(Err(reason)) => {
                self.fail(format!("create description failed: {}", reason))
            }
            Completion::LocalDescriptionSet(Err(reason)) => {
                self.fail(format!("set local description failed: {}", reason))
            }
            Completion::RemoteDescriptionSet(Err(reason)) => {
                self.fail(format!("set remote description failed: {}", reason))
            }
        }
    }

    async fn on_set_success(&mut self, operation: Operation, event: PhaseEvent) {
        if let Err(rejection) = self.advance(event) {
            self.reject(operation, rejection);
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let view = DescriptionView {
            has_local: session.engine.has_local_description().await,
            has_remote: session.engine.has_remote_description().await,
        };

        for action in session.sdp.on_set_success(view) {
            match action {
                SdpAction::PublishLocal(description) => {
                    info!(
                        "Local {} ready on session {}",
                        match description.sdp_type {
                            SdpType::Offer => "offer",
                            SdpType::Answer => "answer",
                        },
                        session.id
                    );
                    self.registry.publish(CallEvent::LocalDescriptionReady {
                        session_id: session.id,
                        description,
                    });
                }
                SdpAction::AddCandidates(candidates) => {
                    for candidate in candidates {
                        if let Err(e) = session.engine.add_ice_candidate(candidate).await {
                            warn!("Failed to add queued remote candidate: {}", e);
                        }
                    }
                }
                SdpAction::CreateAnswer => {
                    self.create_description(operation, PhaseEvent::CreateAnswer)
                        .await;
                    return;
                }
            }
        }
    }

    /// Move the session to `Failed` and wait for release.
    fn fail(&mut self, reason: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        error!("Negotiation failed on session {}: {}", session.id, reason);
        session.stop_stats();
        let session_id = session.id;
        if self.advance(PhaseEvent::Fail).is_ok() {
            self.publish(CallEvent::NegotiationFailed { session_id, reason });
        }
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let session_id = session.id;
        match event {
            EngineEvent::ConnectionStateChanged(state) => {
                info!("Session {} connection {:?}", session_id, state);
                self.publish(CallEvent::ConnectionStateChanged { session_id, state });
                if state == ConnectionState::Connected {
                    self.on_connected();
                }
            }
            EngineEvent::IceConnectionStateChanged(state) => {
                debug!("Session {} ICE {:?}", session_id, state);
                self.publish(CallEvent::IceConnectionStateChanged { session_id, state });
            }
            EngineEvent::LocalCandidate(candidate) => {
                self.publish(CallEvent::LocalCandidate {
                    session_id,
                    candidate,
                });
            }
            EngineEvent::LocalCandidatesRemoved(candidates) => {
                self.publish(CallEvent::LocalCandidatesRemoved {
                    session_id,
                    candidates,
                });
            }
            EngineEvent::DataChannelMessage(message) => {
                self.publish(CallEvent::DataChannelMessage {
                    session_id,
                    message,
                });
            }
        }
    }

    fn on_connected(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.machine.phase() == NegotiationPhase::Failed {
            return;
        }

        if self.media.stats_enabled && session.stats_task.is_none() {
            let period = Duration::from_millis(self.media.stats_period_ms.max(1));
            let session_id = session.id;
            let mailbox = self.self_tx.clone();
            session.stats_task = Some(tokio::spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut interval = tokio::time::interval_at(start, period);
                loop {
                    interval.tick().await;
                    let Some(tx) = mailbox.upgrade() else {
                        break;
                    };
                    if tx.send(Message::StatsTick { session_id }).is_err() {
                        break;
                    }
                }
            }));
            debug!("Stats sampling every {:?} on session {}", period, session_id);
        }

        let session_id = session.id;
        let video = session.has_video();

        if let Some(router) = &self.router {
            if let Err(e) = router.reevaluate() {
                warn!("Audio routing re-evaluation failed: {}", e);
            }
        }
        if video {
            self.publish(CallEvent::VideoFeedsSwapped {
                session_id,
                swapped: false,
            });
        }
    }

    async fn sample_stats(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.engine.get_stats().await {
            Ok(reports) => {
                let stats = session.sampler.sample(&reports);
                let session_id = session.id;
                self.publish(CallEvent::StatsReady { session_id, stats });
            }
            Err(e) => warn!("Stats request failed: {}", e),
        }
    }

    /// Tear down the session (tracks audio before video, then the engine)
    /// and release the audio routing subsystem.
    async fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            info!("Releasing session {}", session.id);
            session.stop_stats();
            if let Ok(phase) = session.machine.apply(PhaseEvent::Teardown) {
                self.registry.publish(CallEvent::PhaseChanged {
                    session_id: session.id,
                    phase,
                });
            }

            for kind in [TrackKind::Audio, TrackKind::Video] {
                if session.tracks.contains(&kind) {
                    if let Err(e) = session.engine.release_track(kind).await {
                        warn!("Failed to release {:?} track: {}", kind, e);
                    }
                }
            }
            if let Err(e) = session.engine.close().await {
                warn!("Failed to close engine session: {}", e);
            }
            self.registry.publish(CallEvent::SessionClosed {
                session_id: session.id,
            });
        }

        if let Some(router) = self.router.take() {
            if let Err(e) = router.stop().await {
                warn!("Failed to stop audio routing: {}", e);
            }
        }
    }
}
