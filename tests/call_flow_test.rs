use audio_routing::platform::headless::{HeadlessAudio, NoBluetooth};
use audio_routing::{AudioBackend, HardwareEvent};
use call_core::{
    AudioDevice, CallEvent, ConnectionState, Error, EventCategory, NegotiationPhase, Role,
    SdpType, SessionDescription, Subscription,
};
use negotiation::testing::{EngineCall, FakeEngine};
use negotiation::{EngineEvent, TrackKind};
use rtpcall::CallContext;
use settings_manager::Settings;
use std::sync::Arc;
use std::time::Duration;

fn phone_backend() -> AudioBackend {
    AudioBackend {
        platform: Box::new(HeadlessAudio {
            earpiece: true,
            ..HeadlessAudio::default()
        }),
        bluetooth: Box::new(NoBluetooth),
        proximity: None,
    }
}

async fn next_description(events: &mut Subscription) -> SessionDescription {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.events.recv())
            .await
            .expect("timed out waiting for a local description")
            .expect("registry dropped");
        if let CallEvent::LocalDescriptionReady { description, .. } = event {
            return description;
        }
    }
}

async fn wait_for_phase(context: &CallContext, phase: NegotiationPhase) {
    for _ in 0..50 {
        if context.phase().await.unwrap() == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("never reached {:?}", phase);
}

#[test_log::test(tokio::test)]
async fn offer_answer_between_two_contexts() {
    let settings = Settings::default();
    let caller_engine = FakeEngine::new();
    let callee_engine = FakeEngine::new();
    let caller = CallContext::new(Arc::new(caller_engine.clone()), phone_backend(), &settings);
    let callee = CallContext::new(Arc::new(callee_engine.clone()), phone_backend(), &settings);
    let mut caller_sdp = caller.subscribe(&[EventCategory::Sdp]);
    let mut callee_sdp = callee.subscribe(&[EventCategory::Sdp]);

    caller.start_session(Role::Offerer, None).unwrap();
    let offer = next_description(&mut caller_sdp).await;
    assert_eq!(offer.sdp_type, SdpType::Offer);
    assert_eq!(caller.phase().await.unwrap(), NegotiationPhase::LocalOfferSet);

    callee.start_session(Role::Answerer, Some(offer)).unwrap();
    let answer = next_description(&mut callee_sdp).await;
    assert_eq!(answer.sdp_type, SdpType::Answer);

    caller.set_remote_description(answer).unwrap();
    wait_for_phase(&caller, NegotiationPhase::ConnectPending).await;
    wait_for_phase(&callee, NegotiationPhase::ConnectPending).await;

    assert!(callee_engine
        .calls()
        .contains(&EngineCall::SetRemoteDescription(SdpType::Offer)));
    assert!(caller_engine
        .calls()
        .contains(&EngineCall::SetRemoteDescription(SdpType::Answer)));

    caller.release().await.unwrap();
    callee.release().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn muting_keeps_the_negotiated_session() {
    let mut settings = Settings::default();
    settings.media.video = true;
    let engine = FakeEngine::new();
    let context = CallContext::new(Arc::new(engine.clone()), phone_backend(), &settings);

    context.start_session(Role::Offerer, None).unwrap();
    wait_for_phase(&context, NegotiationPhase::LocalOfferSet).await;

    context.set_audio_enabled(false).unwrap();
    context.set_video_enabled(false).unwrap();
    assert_eq!(context.phase().await.unwrap(), NegotiationPhase::LocalOfferSet);

    let calls = engine.calls();
    assert!(calls.contains(&EngineCall::SetTrackEnabled(TrackKind::Audio, false)));
    assert!(calls.contains(&EngineCall::SetTrackEnabled(TrackKind::Video, false)));

    context.release().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn audio_follows_hardware_and_user_choice() {
    let context = CallContext::new(
        Arc::new(FakeEngine::new()),
        phone_backend(),
        &Settings::default(),
    );

    let snapshot = context.audio_snapshot().await.unwrap();
    assert!(snapshot.active);
    assert_eq!(snapshot.default_device, AudioDevice::Earpiece);
    assert_eq!(snapshot.selected, AudioDevice::Earpiece);

    context
        .notify_hardware(HardwareEvent::WiredHeadset {
            plugged: true,
            has_mic: true,
            name: "Headset".to_string(),
        })
        .unwrap();
    assert_eq!(
        context.audio_snapshot().await.unwrap().selected,
        AudioDevice::WiredHeadset
    );

    context
        .notify_hardware(HardwareEvent::WiredHeadset {
            plugged: false,
            has_mic: true,
            name: "Headset".to_string(),
        })
        .unwrap();
    context.select_audio_device(AudioDevice::SpeakerPhone).unwrap();
    let snapshot = context.audio_snapshot().await.unwrap();
    assert_eq!(snapshot.selected, AudioDevice::SpeakerPhone);
    assert_eq!(snapshot.user_selected, Some(AudioDevice::SpeakerPhone));

    context.release().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn speaker_only_host_defaults_to_speaker() {
    let context = CallContext::new(
        Arc::new(FakeEngine::new()),
        AudioBackend::headless(),
        &Settings::default(),
    );

    let snapshot = context.audio_snapshot().await.unwrap();
    assert_eq!(snapshot.default_device, AudioDevice::SpeakerPhone);
    assert_eq!(snapshot.selected, AudioDevice::SpeakerPhone);
    assert!(!snapshot.available.contains(AudioDevice::Bluetooth));

    context.release().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn release_is_idempotent_and_final() {
    let engine = FakeEngine::new();
    let context = CallContext::new(Arc::new(engine.clone()), phone_backend(), &Settings::default());
    let mut events = context.subscribe(&[EventCategory::Connection]);

    context.start_session(Role::Offerer, None).unwrap();
    wait_for_phase(&context, NegotiationPhase::LocalOfferSet).await;
    engine.emit(EngineEvent::ConnectionStateChanged(ConnectionState::Connected));

    context.release().await.unwrap();
    let calls_after_first = engine.calls();
    context.release().await.unwrap();
    assert_eq!(engine.calls(), calls_after_first);
    assert_eq!(calls_after_first.last(), Some(&EngineCall::Close));

    let mut closed = 0;
    while let Ok(event) = events.events.try_recv() {
        if matches!(event, CallEvent::SessionClosed { .. }) {
            closed += 1;
        }
    }
    assert_eq!(closed, 1);

    assert!(matches!(
        context.start_session(Role::Offerer, None),
        Err(Error::ChannelClosed(_))
    ));
    assert!(matches!(
        context.audio_snapshot().await,
        Err(Error::ChannelClosed(_))
    ));
}
