//! Audio output routing.
//!
//! The [`AudioRouter`] runs as its own task and owns the audio platform, the
//! Bluetooth SCO manager and the proximity monitor. Everything else talks to
//! it through an [`AudioRouterHandle`].

use crate::bluetooth::{BluetoothScoManager, BluetoothState, ScoAudioState};
use crate::platform::{AudioBackend, AudioMode, AudioPlatform};
use crate::proximity::ProximityMonitor;
use call_core::{AudioDevice, AudioDeviceSet, CallEvent, Error, EventRegistry, SpeakerphoneMode};
use log::{debug, error, info, warn};
use settings_manager::AudioSettings;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Hardware notifications delivered by the host's broadcast and sensor
/// plumbing.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareEvent {
    WiredHeadset {
        plugged: bool,
        has_mic: bool,
        name: String,
    },
    BluetoothProfileConnected,
    BluetoothProfileDisconnected,
    BluetoothHeadsetConnection {
        connected: bool,
    },
    BluetoothAudioState(ScoAudioState),
    ProximitySample {
        distance_cm: f32,
    },
}

/// Point-in-time view of the routing state.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingSnapshot {
    pub selected: AudioDevice,
    pub available: AudioDeviceSet,
    pub user_selected: Option<AudioDevice>,
    pub default_device: AudioDevice,
    pub bluetooth: BluetoothState,
    pub near: bool,
    pub active: bool,
}

enum RouterCommand {
    Hardware(HardwareEvent),
    SelectDevice(AudioDevice),
    SetDefaultDevice(AudioDevice),
    Reevaluate,
    Snapshot(oneshot::Sender<RoutingSnapshot>),
    Stop(oneshot::Sender<()>),
}

/// OS flags captured on start and restored on stop.
#[derive(Debug, Clone, Copy)]
struct SavedAudioState {
    mode: AudioMode,
    speakerphone: bool,
    microphone_mute: bool,
}

/// Cloneable entry point into the router task.
#[derive(Clone)]
pub struct AudioRouterHandle {
    command_tx: mpsc::UnboundedSender<RouterCommand>,
}

impl AudioRouterHandle {
    fn send(&self, command: RouterCommand) -> Result<(), Error> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::ChannelClosed("audio router stopped".to_string()))
    }

    pub fn notify(&self, event: HardwareEvent) -> Result<(), Error> {
        self.send(RouterCommand::Hardware(event))
    }

    pub fn select_device(&self, device: AudioDevice) -> Result<(), Error> {
        self.send(RouterCommand::SelectDevice(device))
    }

    pub fn set_default_device(&self, device: AudioDevice) -> Result<(), Error> {
        self.send(RouterCommand::SetDefaultDevice(device))
    }

    /// Re-run device selection, e.g. once the call connects.
    pub fn reevaluate(&self) -> Result<(), Error> {
        self.send(RouterCommand::Reevaluate)
    }

    pub async fn snapshot(&self) -> Result<RoutingSnapshot, Error> {
        let (tx, rx) = oneshot::channel();
        self.send(RouterCommand::Snapshot(tx))?;
        rx.await
            .map_err(|_| Error::ChannelClosed("audio router stopped".to_string()))
    }

    /// Restore the OS audio state and end the router task. Stopping a router
    /// that already stopped is a no-op.
    pub async fn stop(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        if self.command_tx.send(RouterCommand::Stop(tx)).is_err() {
            debug!("Audio router already stopped");
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}

/// Device selection policy and the hardware it drives.
pub struct AudioRouter {
    platform: Box<dyn AudioPlatform>,
    bluetooth: BluetoothScoManager,
    proximity: ProximityMonitor,
    registry: EventRegistry,
    speakerphone: SpeakerphoneMode,
    default_device: AudioDevice,
    selected: AudioDevice,
    user_selected: Option<AudioDevice>,
    available: AudioDeviceSet,
    wired_headset: bool,
    saved: Option<SavedAudioState>,
    active: bool,
    command_rx: mpsc::UnboundedReceiver<RouterCommand>,
    timer_rx: mpsc::UnboundedReceiver<u64>,
}

impl AudioRouter {
    /// Spawn the router task and activate routing.
    pub fn spawn(
        backend: AudioBackend,
        settings: &AudioSettings,
        registry: EventRegistry,
    ) -> AudioRouterHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let bluetooth = BluetoothScoManager::new(
            backend.bluetooth,
            Duration::from_millis(settings.sco_timeout_ms),
            settings.max_sco_attempts,
            timer_tx,
        );

        let mut router = AudioRouter {
            platform: backend.platform,
            bluetooth,
            proximity: ProximityMonitor::new(backend.proximity),
            registry,
            speakerphone: settings.speakerphone,
            default_device: settings.speakerphone.default_device(),
            selected: AudioDevice::None,
            user_selected: None,
            available: AudioDeviceSet::new(),
            wired_headset: false,
            saved: None,
            active: false,
            command_rx,
            timer_rx,
        };

        tokio::spawn(async move {
            router.activate();
            router.run().await;
        });

        AudioRouterHandle { command_tx }
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("All router handles dropped");
                        break;
                    }
                },

                Some(generation) = self.timer_rx.recv() => {
                    if self.bluetooth.on_timeout(generation) {
                        self.update_device_state();
                    }
                }
            }
        }
        info!("Audio router exited");
    }

    /// Returns false once the router should exit.
    fn handle_command(&mut self, command: RouterCommand) -> bool {
        match command {
            RouterCommand::Hardware(event) => self.handle_hardware_event(event),
            RouterCommand::SelectDevice(device) => self.select_device(device),
            RouterCommand::SetDefaultDevice(device) => self.set_default_device(device),
            RouterCommand::Reevaluate => {
                if self.active {
                    self.update_device_state();
                }
            }
            RouterCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            RouterCommand::Stop(ack) => {
                self.deactivate();
                self.command_rx.close();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn handle_hardware_event(&mut self, event: HardwareEvent) {
        if !self.active {
            debug!("Ignoring {:?}, router inactive", event);
            return;
        }
        match event {
            HardwareEvent::WiredHeadset {
                plugged,
                has_mic,
                name,
            } => {
                info!(
                    "Wired headset {}: {} (mic: {})",
                    if plugged { "plugged" } else { "unplugged" },
                    name,
                    has_mic
                );
                self.wired_headset = plugged;
            }
            HardwareEvent::BluetoothProfileConnected => self.bluetooth.on_profile_connected(),
            HardwareEvent::BluetoothProfileDisconnected => {
                self.bluetooth.on_profile_disconnected()
            }
            HardwareEvent::BluetoothHeadsetConnection { connected } => {
                self.bluetooth.on_headset_connection_changed(connected)
            }
            HardwareEvent::BluetoothAudioState(state) => {
                self.bluetooth.on_audio_state_changed(state)
            }
            HardwareEvent::ProximitySample { distance_cm } => {
                let changed = self.proximity.on_sample(distance_cm);
                if !changed || self.speakerphone != SpeakerphoneMode::Auto {
                    return;
                }
            }
        }
        self.update_device_state();
    }

    fn activate(&mut self) {
        if self.active {
            return;
        }
        info!("Starting audio routing");

        self.saved = Some(SavedAudioState {
            mode: self.platform.mode(),
            speakerphone: self.platform.is_speakerphone_on(),
            microphone_mute: self.platform.is_microphone_mute(),
        });

        if let Err(e) = self.platform.request_audio_focus() {
            warn!("Audio focus request failed: {}", e);
        }
        if let Err(e) = self.platform.set_mode(AudioMode::InCommunication) {
            warn!("Failed to enter communication mode: {}", e);
        }
        if let Err(e) = self.platform.set_microphone_mute(false) {
            warn!("Failed to unmute microphone: {}", e);
        }

        if let Err(e) = self.bluetooth.start() {
            info!("Bluetooth audio disabled: {}", e);
        }
        if self.speakerphone == SpeakerphoneMode::Auto {
            if let Err(e) = self.proximity.start() {
                warn!("Automatic earpiece switching disabled: {}", e);
            }
        }

        self.wired_headset = self.platform.has_wired_headset();
        self.default_device = self.validate_default(self.default_device);
        self.active = true;
        self.update_device_state();
    }

    /// Undo everything [`activate`] did. Each step runs even if an earlier
    /// one fails.
    ///
    /// [`activate`]: AudioRouter::activate
    fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        info!("Stopping audio routing");
        self.active = false;

        self.bluetooth.stop();

        if let Some(saved) = self.saved.take() {
            if let Err(e) = self.platform.set_speakerphone_on(saved.speakerphone) {
                error!("Failed to restore speakerphone: {}", e);
            }
            if let Err(e) = self.platform.set_microphone_mute(saved.microphone_mute) {
                error!("Failed to restore microphone mute: {}", e);
            }
            if let Err(e) = self.platform.set_mode(saved.mode) {
                error!("Failed to restore audio mode: {}", e);
            }
        }
        if let Err(e) = self.platform.abandon_audio_focus() {
            error!("Failed to abandon audio focus: {}", e);
        }

        self.proximity.stop();
        self.user_selected = None;
        self.selected = AudioDevice::None;
        self.available = AudioDeviceSet::new();
    }

    fn select_device(&mut self, device: AudioDevice) {
        if !self.available.contains(device) {
            warn!("Selected device {} is not in {}", device, self.available);
        }
        info!("User selected {}", device);
        self.user_selected = Some(device);
        if self.active {
            self.update_device_state();
        }
    }

    fn set_default_device(&mut self, device: AudioDevice) {
        match device {
            AudioDevice::SpeakerPhone | AudioDevice::Earpiece => {
                self.default_device = self.validate_default(device);
                debug!("Default audio device: {}", self.default_device);
                if self.active {
                    self.update_device_state();
                }
            }
            other => error!("Invalid default audio device: {}", other),
        }
    }

    fn validate_default(&self, device: AudioDevice) -> AudioDevice {
        if device == AudioDevice::Earpiece && !self.platform.has_earpiece() {
            AudioDevice::SpeakerPhone
        } else {
            device
        }
    }

    /// Recompute the available set, drive SCO and pick the output device.
    fn update_device_state(&mut self) {
        if matches!(
            self.bluetooth.state(),
            BluetoothState::HeadsetAvailable
                | BluetoothState::HeadsetUnavailable
                | BluetoothState::ScoDisconnecting
        ) {
            self.bluetooth.update_device();
        }

        self.user_selected = match self.user_selected {
            Some(AudioDevice::Bluetooth)
                if self.bluetooth.state() == BluetoothState::HeadsetUnavailable =>
            {
                None
            }
            Some(AudioDevice::SpeakerPhone) if self.wired_headset => {
                Some(AudioDevice::WiredHeadset)
            }
            Some(AudioDevice::WiredHeadset) if !self.wired_headset => {
                Some(AudioDevice::SpeakerPhone)
            }
            other => other,
        };

        let bluetooth_wanted = matches!(self.user_selected, None | Some(AudioDevice::Bluetooth));
        let need_stop = !bluetooth_wanted
            && matches!(
                self.bluetooth.state(),
                BluetoothState::ScoConnecting | BluetoothState::ScoConnected
            );
        let need_start =
            bluetooth_wanted && self.bluetooth.state() == BluetoothState::HeadsetAvailable;

        if need_stop {
            self.bluetooth.stop_sco_audio();
            self.bluetooth.update_device();
        }

        let mut sco_failed = false;
        if need_start && !need_stop {
            if let Err(e) = self.bluetooth.start_sco_audio() {
                warn!("{}", e);
                sco_failed = true;
            }
        }

        let mut available = AudioDeviceSet::new();
        if self.bluetooth.is_usable() && !sco_failed {
            available.insert(AudioDevice::Bluetooth);
        }
        if self.wired_headset {
            available.insert(AudioDevice::WiredHeadset);
        } else {
            available.insert(AudioDevice::SpeakerPhone);
            if self.platform.has_earpiece() {
                available.insert(AudioDevice::Earpiece);
            }
        }

        let selected = self.choose_device(&available);
        let available_changed = available != self.available;
        self.available = available;

        if selected != self.selected || available_changed {
            self.apply_device(selected);
            info!("Audio device {} selected from {}", selected, self.available);
            self.registry.publish(CallEvent::AudioDeviceChanged {
                selected,
                available: self.available.clone(),
            });
        }
    }

    fn choose_device(&self, available: &AudioDeviceSet) -> AudioDevice {
        let sco_connected = self.bluetooth.is_sco_connected();

        if let Some(device) = self.user_selected {
            if available.contains(device) && (device != AudioDevice::Bluetooth || sco_connected) {
                return device;
            }
        }
        if sco_connected && available.contains(AudioDevice::Bluetooth) {
            return AudioDevice::Bluetooth;
        }
        if available.contains(AudioDevice::WiredHeadset) {
            return AudioDevice::WiredHeadset;
        }
        if self.speakerphone == SpeakerphoneMode::Auto
            && self.proximity.is_running()
            && available.contains(AudioDevice::Earpiece)
            && available.contains(AudioDevice::SpeakerPhone)
        {
            return if self.proximity.is_near() {
                AudioDevice::Earpiece
            } else {
                AudioDevice::SpeakerPhone
            };
        }
        if available.contains(self.default_device) {
            return self.default_device;
        }
        AudioDevice::SpeakerPhone
    }

    fn apply_device(&mut self, device: AudioDevice) {
        if device == AudioDevice::None {
            return;
        }
        if let Err(e) = self
            .platform
            .set_speakerphone_on(device == AudioDevice::SpeakerPhone)
        {
            error!("Failed to switch output to {}: {}", device, e);
        }
        self.selected = device;
    }

    fn snapshot(&self) -> RoutingSnapshot {
        RoutingSnapshot {
            selected: self.selected,
            available: self.available.clone(),
            user_selected: self.user_selected,
            default_device: self.default_device,
            bluetooth: self.bluetooth.state(),
            near: self.proximity.is_near(),
            active: self.active,
        }
    }
}

impl Drop for AudioRouter {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::headless::{HeadlessAudio, NoBluetooth};
    use crate::platform::{BluetoothPlatform, ProximitySensor};
    use crate::testing::{FakeBluetooth, FakeProximity};
    use call_core::EventCategory;
    use mockall::mock;
    use std::sync::{Arc, Mutex};

    mock! {
        Platform {}
        impl AudioPlatform for Platform {
            fn mode(&self) -> AudioMode;
            fn set_mode(&mut self, mode: AudioMode) -> Result<(), Error>;
            fn is_speakerphone_on(&self) -> bool;
            fn set_speakerphone_on(&mut self, on: bool) -> Result<(), Error>;
            fn is_microphone_mute(&self) -> bool;
            fn set_microphone_mute(&mut self, mute: bool) -> Result<(), Error>;
            fn request_audio_focus(&mut self) -> Result<(), Error>;
            fn abandon_audio_focus(&mut self) -> Result<(), Error>;
            fn has_earpiece(&self) -> bool;
            fn has_wired_headset(&self) -> bool;
        }
    }

    fn settings(speakerphone: SpeakerphoneMode) -> AudioSettings {
        AudioSettings {
            speakerphone,
            ..AudioSettings::default()
        }
    }

    fn handset(
        bluetooth: Box<dyn BluetoothPlatform>,
        proximity: Option<Box<dyn ProximitySensor>>,
    ) -> AudioBackend {
        AudioBackend {
            platform: Box::new(HeadlessAudio {
                earpiece: true,
                ..HeadlessAudio::default()
            }),
            bluetooth,
            proximity,
        }
    }

    fn spawn_handset(speakerphone: SpeakerphoneMode) -> AudioRouterHandle {
        AudioRouter::spawn(
            handset(Box::new(NoBluetooth), Some(Box::new(FakeProximity))),
            &settings(speakerphone),
            EventRegistry::new(),
        )
    }

    #[test_log::test(tokio::test)]
    async fn activation_publishes_initial_device() {
        let registry = EventRegistry::new();
        let mut sub = registry.subscribe(&[EventCategory::Audio]);
        let _router = AudioRouter::spawn(
            handset(Box::new(NoBluetooth), None),
            &settings(SpeakerphoneMode::Off),
            registry,
        );

        let event = sub.events.recv().await.unwrap();
        let expected: AudioDeviceSet = [AudioDevice::SpeakerPhone, AudioDevice::Earpiece]
            .into_iter()
            .collect();
        assert_eq!(
            event,
            CallEvent::AudioDeviceChanged {
                selected: AudioDevice::Earpiece,
                available: expected,
            }
        );
    }

    #[test_log::test(tokio::test)]
    async fn wired_headset_wins_without_user_choice() {
        let router = spawn_handset(SpeakerphoneMode::On);
        router
            .notify(HardwareEvent::WiredHeadset {
                plugged: true,
                has_mic: true,
                name: "Headset".to_string(),
            })
            .unwrap();

        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.selected, AudioDevice::WiredHeadset);
        assert!(snapshot.available.contains(AudioDevice::WiredHeadset));
        assert!(!snapshot.available.contains(AudioDevice::SpeakerPhone));
    }

    #[test_log::test(tokio::test)]
    async fn proximity_drives_auto_mode() {
        let router = spawn_handset(SpeakerphoneMode::Auto);
        assert_eq!(
            router.snapshot().await.unwrap().selected,
            AudioDevice::SpeakerPhone
        );

        router
            .notify(HardwareEvent::ProximitySample { distance_cm: 1.0 })
            .unwrap();
        let snapshot = router.snapshot().await.unwrap();
        assert!(snapshot.near);
        assert_eq!(snapshot.selected, AudioDevice::Earpiece);

        router
            .notify(HardwareEvent::ProximitySample { distance_cm: 8.0 })
            .unwrap();
        assert_eq!(
            router.snapshot().await.unwrap().selected,
            AudioDevice::SpeakerPhone
        );
    }

    #[test_log::test(tokio::test)]
    async fn auto_mode_without_sensor_uses_default() {
        let router = AudioRouter::spawn(
            handset(Box::new(NoBluetooth), None),
            &settings(SpeakerphoneMode::Auto),
            EventRegistry::new(),
        );
        router
            .notify(HardwareEvent::ProximitySample { distance_cm: 0.0 })
            .unwrap();

        let snapshot = router.snapshot().await.unwrap();
        assert!(!snapshot.near);
        assert_eq!(snapshot.selected, AudioDevice::SpeakerPhone);
    }

    #[test_log::test(tokio::test)]
    async fn user_speaker_choice_follows_headset_plug() {
        let router = spawn_handset(SpeakerphoneMode::Off);
        router.select_device(AudioDevice::SpeakerPhone).unwrap();
        assert_eq!(
            router.snapshot().await.unwrap().selected,
            AudioDevice::SpeakerPhone
        );

        let plug = |plugged| HardwareEvent::WiredHeadset {
            plugged,
            has_mic: false,
            name: "Headphones".to_string(),
        };

        router.notify(plug(true)).unwrap();
        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.user_selected, Some(AudioDevice::WiredHeadset));
        assert_eq!(snapshot.selected, AudioDevice::WiredHeadset);

        router.notify(plug(false)).unwrap();
        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.user_selected, Some(AudioDevice::SpeakerPhone));
        assert_eq!(snapshot.selected, AudioDevice::SpeakerPhone);
    }

    #[test_log::test(tokio::test)]
    async fn default_device_is_validated() {
        let router = spawn_handset(SpeakerphoneMode::Off);
        router.set_default_device(AudioDevice::SpeakerPhone).unwrap();
        router.set_default_device(AudioDevice::Bluetooth).unwrap();

        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.default_device, AudioDevice::SpeakerPhone);
        assert_eq!(snapshot.selected, AudioDevice::SpeakerPhone);

        // No earpiece hardware
        let headless = AudioRouter::spawn(
            AudioBackend::headless(),
            &settings(SpeakerphoneMode::On),
            EventRegistry::new(),
        );
        headless.set_default_device(AudioDevice::Earpiece).unwrap();
        assert_eq!(
            headless.snapshot().await.unwrap().default_device,
            AudioDevice::SpeakerPhone
        );
    }

    #[test_log::test(tokio::test)]
    async fn connected_bluetooth_is_preferred_until_user_overrides() {
        let bluetooth = FakeBluetooth::with_headset();
        let router = AudioRouter::spawn(
            handset(Box::new(bluetooth.clone()), None),
            &settings(SpeakerphoneMode::Off),
            EventRegistry::new(),
        );

        router
            .notify(HardwareEvent::BluetoothProfileConnected)
            .unwrap();
        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.bluetooth, BluetoothState::ScoConnecting);
        assert_eq!(snapshot.selected, AudioDevice::Earpiece);

        router
            .notify(HardwareEvent::BluetoothAudioState(ScoAudioState::Connected))
            .unwrap();
        assert_eq!(
            router.snapshot().await.unwrap().selected,
            AudioDevice::Bluetooth
        );

        router.select_device(AudioDevice::SpeakerPhone).unwrap();
        let snapshot = router.snapshot().await.unwrap();
        assert_eq!(snapshot.selected, AudioDevice::SpeakerPhone);
        assert_eq!(snapshot.bluetooth, BluetoothState::HeadsetAvailable);
        assert!(snapshot.available.contains(AudioDevice::Bluetooth));
        assert_eq!(bluetooth.calls().sco_stops, 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn bluetooth_leaves_device_set_after_retry_bound() {
        let bluetooth = FakeBluetooth::with_headset();
        let router = AudioRouter::spawn(
            handset(Box::new(bluetooth.clone()), None),
            &settings(SpeakerphoneMode::Off),
            EventRegistry::new(),
        );

        router
            .notify(HardwareEvent::BluetoothProfileConnected)
            .unwrap();
        let snapshot = router.snapshot().await.unwrap();
        assert!(snapshot.available.contains(AudioDevice::Bluetooth));

        // Both connect attempts time out
        tokio::time::sleep(Duration::from_secs(10)).await;

        let snapshot = router.snapshot().await.unwrap();
        assert!(!snapshot.available.contains(AudioDevice::Bluetooth));
        assert_eq!(snapshot.selected, AudioDevice::Earpiece);
        assert_eq!(bluetooth.calls().sco_starts, 2);
        assert_eq!(bluetooth.calls().sco_stops, 2);
    }

    #[test_log::test(tokio::test)]
    async fn stop_restores_flags_even_when_a_step_fails() {
        let calls = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut platform = MockPlatform::new();
        platform.expect_mode().return_const(AudioMode::Normal);
        platform.expect_is_speakerphone_on().return_const(true);
        platform.expect_is_microphone_mute().return_const(true);
        platform.expect_has_earpiece().return_const(true);
        platform.expect_has_wired_headset().return_const(false);

        let log = calls.clone();
        platform.expect_request_audio_focus().returning(move || {
            log.lock().unwrap().push("focus".to_string());
            Err(Error::Platform("focus denied".to_string()))
        });
        let log = calls.clone();
        platform.expect_set_mode().returning(move |mode| {
            log.lock().unwrap().push(format!("mode {:?}", mode));
            Ok(())
        });
        let log = calls.clone();
        platform.expect_set_microphone_mute().returning(move |mute| {
            log.lock().unwrap().push(format!("mute {}", mute));
            Ok(())
        });
        let log = calls.clone();
        platform.expect_set_speakerphone_on().returning(move |on| {
            log.lock().unwrap().push(format!("speaker {}", on));
            Err(Error::Platform("route stuck".to_string()))
        });
        let log = calls.clone();
        platform.expect_abandon_audio_focus().returning(move || {
            log.lock().unwrap().push("abandon".to_string());
            Ok(())
        });

        let router = AudioRouter::spawn(
            AudioBackend {
                platform: Box::new(platform),
                bluetooth: Box::new(NoBluetooth),
                proximity: None,
            },
            &settings(SpeakerphoneMode::Off),
            EventRegistry::new(),
        );
        router.stop().await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "focus",
                "mode InCommunication",
                "mute false",
                "speaker false",
                "speaker true",
                "mute true",
                "mode Normal",
                "abandon",
            ]
        );
    }

    #[test_log::test(tokio::test)]
    async fn stop_twice_is_a_no_op() {
        let router = spawn_handset(SpeakerphoneMode::Off);
        router.stop().await.unwrap();
        router.stop().await.unwrap();

        assert!(matches!(
            router.select_device(AudioDevice::Earpiece),
            Err(Error::ChannelClosed(_))
        ));
    }
}
