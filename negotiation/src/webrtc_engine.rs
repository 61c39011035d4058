//! [`MediaEngine`] backed by the `webrtc` crate.

use crate::engine::{
    EngineEvent, EngineEvents, EngineSession, MediaEngine, SessionConfig, StatsReport, TrackKind,
};
use async_trait::async_trait;
use call_core::{
    ConnectionState, Error, IceCandidate, IceConnectionState, Role, SdpType, SessionDescription,
};
use log::{debug, info, trace, warn};
use settings_manager::IceServer;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as CodecRegistry, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Media stream id shared by the local tracks.
const STREAM_ID: &str = "ARDAMS";

fn engine_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Engine(format!("{}: {}", context, e))
}

/// Peer connection factory with the default codecs and interceptors.
pub struct WebRtcEngine {
    api: API,
}

impl WebRtcEngine {
    pub fn new() -> Result<Self, Error> {
        let mut media_engine = CodecRegistry::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| engine_error("Failed to register codecs", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| engine_error("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

fn rtc_config(ice_servers: &[IceServer]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

fn ice_connection_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        _ => None,
    }
}

/// Forward text messages of a data channel as engine events.
fn watch_data_channel(dc: &Arc<RTCDataChannel>, events: EngineEvents) {
    let label = dc.label().to_string();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events.clone();
        let label = label.clone();
        Box::pin(async move {
            if !msg.is_string {
                trace!("Ignoring binary message on '{}'", label);
                return;
            }
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    events.emit(EngineEvent::DataChannelMessage(text));
                }
                Err(e) => warn!("Invalid UTF-8 on data channel '{}': {}", label, e),
            }
        })
    }));
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_session(
        &self,
        config: &SessionConfig,
        events: EngineEvents,
    ) -> Result<Box<dyn EngineSession>, Error> {
        debug!("Creating peer connection for session {}", events.session_id());
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config(&config.ice_servers))
                .await
                .map_err(|e| engine_error("Failed to create peer connection", e))?,
        );

        let sink = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            if let Some(state) = connection_state(state) {
                sink.emit(EngineEvent::ConnectionStateChanged(state));
            }
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            if let Some(state) = ice_connection_state(state) {
                sink.emit(EngineEvent::IceConnectionStateChanged(state));
            }
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        sink.emit(EngineEvent::LocalCandidate(IceCandidate::new(
                            init.candidate,
                            init.sdp_mid,
                            init.sdp_mline_index,
                        )));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let data_channel = Arc::new(Mutex::new(None));
        match (&config.data_channel, config.role) {
            (Some(dc_config), Role::Offerer) => {
                let init = RTCDataChannelInit {
                    ordered: Some(dc_config.ordered),
                    ..Default::default()
                };
                let dc = pc
                    .create_data_channel(&dc_config.label, Some(init))
                    .await
                    .map_err(|e| engine_error("Failed to create data channel", e))?;
                watch_data_channel(&dc, events.clone());
                *data_channel.lock().await = Some(dc);
            }
            (Some(_), Role::Answerer) => {
                let slot = data_channel.clone();
                let sink = events.clone();
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let slot = slot.clone();
                    let sink = sink.clone();
                    Box::pin(async move {
                        info!("Remote data channel '{}' opened", dc.label());
                        watch_data_channel(&dc, sink);
                        *slot.lock().await = Some(dc);
                    })
                }));
            }
            (None, _) => {}
        }

        Ok(Box::new(WebRtcSession {
            pc,
            data_channel,
            senders: HashMap::new(),
            tracks: HashMap::new(),
        }))
    }
}

/// One `RTCPeerConnection` plus the local tracks and data channel on it.
pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    senders: HashMap<TrackKind, Arc<RTCRtpSender>>,
    tracks: HashMap<TrackKind, Arc<TrackLocalStaticSample>>,
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, Error> {
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    }
    .map_err(|e| engine_error("Invalid session description", e))
}

#[async_trait]
impl EngineSession for WebRtcSession {
    async fn add_track(&mut self, kind: TrackKind) -> Result<(), Error> {
        let (mime_type, track_id) = match kind {
            TrackKind::Audio => (MIME_TYPE_OPUS, "ARDAMSa0"),
            TrackKind::Video => (MIME_TYPE_VP8, "ARDAMSv0"),
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track_id.to_owned(),
            STREAM_ID.to_owned(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| engine_error("Failed to add track", e))?;
        self.senders.insert(kind, sender);
        self.tracks.insert(kind, track);
        debug!("Added local {:?} track", kind);
        Ok(())
    }

    async fn release_track(&mut self, kind: TrackKind) -> Result<(), Error> {
        self.tracks.remove(&kind);
        if let Some(sender) = self.senders.remove(&kind) {
            self.pc
                .remove_track(&sender)
                .await
                .map_err(|e| engine_error("Failed to remove track", e))?;
            debug!("Released local {:?} track", kind);
        }
        Ok(())
    }

    async fn set_track_enabled(&mut self, kind: TrackKind, enabled: bool) -> Result<(), Error> {
        let (Some(sender), Some(track)) = (self.senders.get(&kind), self.tracks.get(&kind)) else {
            return Err(Error::Engine(format!("no local {:?} track", kind)));
        };
        // A sender without a track keeps its transceiver but sends nothing
        let replacement = enabled.then(|| Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>);
        sender
            .replace_track(replacement)
            .await
            .map_err(|e| engine_error("Failed to toggle track", e))?;
        debug!("Local {:?} track {}", kind, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<String, Error> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| engine_error("Failed to create offer", e))?;
        Ok(offer.sdp)
    }

    async fn create_answer(&mut self) -> Result<String, Error> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| engine_error("Failed to create answer", e))?;
        Ok(answer.sdp)
    }

    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), Error> {
        self.pc
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(|e| engine_error("Failed to set local description", e))
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), Error> {
        self.pc
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(|e| engine_error("Failed to set remote description", e))
    }

    async fn has_local_description(&self) -> bool {
        self.pc.local_description().await.is_some()
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), Error> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| engine_error("Failed to add ICE candidate", e))
    }

    async fn get_stats(&self) -> Result<Vec<StatsReport>, Error> {
        let stats = self.pc.get_stats().await;
        let reports = stats
            .reports
            .into_iter()
            .filter_map(|(id, report)| match report {
                StatsReportType::CandidatePair(pair) => Some(
                    StatsReport::new(id, "candidate-pair")
                        .with("nominated", pair.nominated)
                        .with("bytesSent", pair.bytes_sent)
                        .with("bytesReceived", pair.bytes_received),
                ),
                _ => None,
            })
            .collect();
        Ok(reports)
    }

    async fn send_data(&mut self, text: String) -> Result<(), Error> {
        let guard = self.data_channel.lock().await;
        let dc = guard
            .as_ref()
            .ok_or_else(|| Error::Engine("No data channel on this session".to_string()))?;
        dc.send_text(text)
            .await
            .map_err(|e| engine_error("Failed to send data channel message", e))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if let Some(dc) = self.data_channel.lock().await.take() {
            if let Err(e) = dc.close().await {
                warn!("Failed to close data channel: {}", e);
            }
        }
        self.pc
            .close()
            .await
            .map_err(|e| engine_error("Failed to close peer connection", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use call_core::SessionId;
    use tokio::sync::mpsc;

    #[test]
    fn ice_servers_carry_credentials() {
        let servers = vec![
            IceServer::stun("stun:stun.l.google.com:19302"),
            IceServer {
                urls: vec!["turn:turn.example.org:3478".to_string()],
                username: Some("alice".to_string()),
                credential: Some("secret".to_string()),
            },
        ];

        let config = rtc_config(&servers);
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(config.ice_servers[0].username, "");
        assert_eq!(config.ice_servers[1].username, "alice");
        assert_eq!(config.ice_servers[1].credential, "secret");
    }

    #[test]
    fn unspecified_states_are_not_forwarded() {
        assert_eq!(connection_state(RTCPeerConnectionState::Unspecified), None);
        assert_eq!(
            connection_state(RTCPeerConnectionState::Connected),
            Some(ConnectionState::Connected)
        );
        assert_eq!(ice_connection_state(RTCIceConnectionState::Unspecified), None);
    }

    #[tokio::test]
    async fn offer_with_audio_track() {
        let engine = WebRtcEngine::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let events = EngineEvents::new(SessionId::new(), tx.downgrade());
        let config = SessionConfig {
            role: Role::Offerer,
            ice_servers: Vec::new(),
            data_channel: None,
        };

        let mut session = engine.create_session(&config, events).await.unwrap();
        session.add_track(TrackKind::Audio).await.unwrap();

        let offer = session.create_offer().await.unwrap();
        assert!(offer.starts_with("v=0"));
        assert!(offer.contains("m=audio"));
        assert!(!session.has_local_description().await);

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn only_added_tracks_can_be_toggled() {
        let engine = WebRtcEngine::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let events = EngineEvents::new(SessionId::new(), tx.downgrade());
        let config = SessionConfig {
            role: Role::Offerer,
            ice_servers: Vec::new(),
            data_channel: None,
        };

        let mut session = engine.create_session(&config, events).await.unwrap();
        assert!(session.set_track_enabled(TrackKind::Audio, false).await.is_err());

        session.add_track(TrackKind::Audio).await.unwrap();
        session.set_track_enabled(TrackKind::Audio, false).await.unwrap();
        session.set_track_enabled(TrackKind::Audio, true).await.unwrap();

        session.close().await.unwrap();
    }
}
