//! rtpcall: peer-to-peer call negotiation and audio routing
//!
//! A [`CallContext`] owns everything one call needs: the event registry,
//! the negotiation orchestrator and the audio routing coordinator. Nothing
//! is global; build one context per call and hand it to whoever drives it.

use audio_routing::{AudioBackend, AudioRouter, AudioRouterHandle, HardwareEvent, RoutingSnapshot};
use call_core::{
    AudioDevice, Error, EventCategory, EventRegistry, IceCandidate, NegotiationPhase, Role,
    SessionDescription, Subscription, SubscriptionId,
};
use log::info;
use negotiation::{MediaEngine, NegotiationActor, NegotiationHandle, TrackKind};
use settings_manager::Settings;
use std::sync::Arc;

pub use audio_routing;
pub use call_core;
pub use negotiation;
pub use settings_manager;

/// One call: negotiation, audio routing and the subscribers watching both.
pub struct CallContext {
    registry: EventRegistry,
    negotiation: NegotiationHandle,
    audio: AudioRouterHandle,
}

impl CallContext {
    /// Activate audio routing and spawn the negotiation orchestrator.
    /// Must be called inside a tokio runtime.
    pub fn new(engine: Arc<dyn MediaEngine>, backend: AudioBackend, settings: &Settings) -> Self {
        let registry = EventRegistry::new();
        let audio = AudioRouter::spawn(backend, &settings.audio, registry.clone());
        let negotiation =
            NegotiationActor::spawn(engine, settings, registry.clone(), Some(audio.clone()));
        info!("Call context created");

        Self {
            registry,
            negotiation,
            audio,
        }
    }

    pub fn subscribe(&self, categories: &[EventCategory]) -> Subscription {
        self.registry.subscribe(categories)
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.registry.subscribe_all()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    pub fn start_session(
        &self,
        role: Role,
        remote: Option<SessionDescription>,
    ) -> Result<(), Error> {
        self.negotiation.start(role, remote)
    }

    pub fn set_remote_description(&self, description: SessionDescription) -> Result<(), Error> {
        self.negotiation.set_remote_description(description)
    }

    pub fn add_remote_ice_candidate(&self, candidate: IceCandidate) -> Result<(), Error> {
        self.negotiation.add_remote_ice_candidate(candidate)
    }

    pub fn send_data(&self, text: impl Into<String>) -> Result<(), Error> {
        self.negotiation.send_data(text)
    }

    /// Mute or unmute the local microphone track.
    pub fn set_audio_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.negotiation.set_track_enabled(TrackKind::Audio, enabled)
    }

    pub fn set_video_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.negotiation.set_track_enabled(TrackKind::Video, enabled)
    }

    pub fn select_audio_device(&self, device: AudioDevice) -> Result<(), Error> {
        self.audio.select_device(device)
    }

    /// Only SpeakerPhone and Earpiece are accepted.
    pub fn set_default_audio_device(&self, device: AudioDevice) -> Result<(), Error> {
        self.audio.set_default_device(device)
    }

    /// Feed a hardware broadcast (headset plug, Bluetooth, proximity) to the
    /// audio router.
    pub fn notify_hardware(&self, event: HardwareEvent) -> Result<(), Error> {
        self.audio.notify(event)
    }

    pub async fn phase(&self) -> Result<NegotiationPhase, Error> {
        self.negotiation.phase().await
    }

    pub async fn audio_snapshot(&self) -> Result<RoutingSnapshot, Error> {
        self.audio.snapshot().await
    }

    /// Tear down the session, restore the OS audio state and stop both
    /// tasks. Safe to call more than once.
    pub async fn release(&self) -> Result<(), Error> {
        self.negotiation.release().await?;
        // The orchestrator stops the router; this covers a context whose
        // orchestrator already exited.
        self.audio.stop().await
    }
}
