//! Bluetooth SCO link management with bounded retries and a connect timeout.

use crate::platform::{BluetoothHeadset, BluetoothPlatform};
use call_core::Error;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lifecycle of the Bluetooth audio link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BluetoothState {
    Uninitialized,
    HeadsetUnavailable,
    HeadsetAvailable,
    ScoConnecting,
    ScoConnected,
    ScoDisconnecting,
}

/// SCO audio state as broadcast by the headset profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoAudioState {
    Connecting,
    Connected,
    Disconnected,
}

/// Owns the headset profile proxy and the SCO connect timer.
///
/// Lives on the audio router task. The timer posts its generation number on
/// `timer_tx`; the router hands it back through [`on_timeout`] so stale
/// timers are recognised and ignored.
///
/// [`on_timeout`]: BluetoothScoManager::on_timeout
pub struct BluetoothScoManager {
    platform: Box<dyn BluetoothPlatform>,
    state: BluetoothState,
    attempts: u32,
    max_attempts: u32,
    sco_timeout: Duration,
    device: Option<BluetoothHeadset>,
    proxy_connected: bool,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    timer_tx: mpsc::UnboundedSender<u64>,
}

impl BluetoothScoManager {
    pub fn new(
        platform: Box<dyn BluetoothPlatform>,
        sco_timeout: Duration,
        max_attempts: u32,
        timer_tx: mpsc::UnboundedSender<u64>,
    ) -> Self {
        Self {
            platform,
            state: BluetoothState::Uninitialized,
            attempts: 0,
            max_attempts,
            sco_timeout,
            device: None,
            proxy_connected: false,
            timer: None,
            generation: 0,
            timer_tx,
        }
    }

    pub fn state(&self) -> BluetoothState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn device(&self) -> Option<&BluetoothHeadset> {
        self.device.as_ref()
    }

    pub fn is_sco_connected(&self) -> bool {
        self.state == BluetoothState::ScoConnected
    }

    /// Whether Bluetooth belongs in the available device set. A headset whose
    /// SCO attempts are exhausted is not usable.
    pub fn is_usable(&self) -> bool {
        match self.state {
            BluetoothState::ScoConnected | BluetoothState::ScoConnecting => true,
            BluetoothState::HeadsetAvailable => self.attempts < self.max_attempts,
            _ => false,
        }
    }

    fn set_state(&mut self, state: BluetoothState) {
        if self.state != state {
            debug!("Bluetooth state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Acquire the headset profile proxy.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.state != BluetoothState::Uninitialized {
            return Err(Error::BluetoothUnavailable(format!(
                "start while {:?}",
                self.state
            )));
        }
        if !self.platform.has_permission() {
            return Err(Error::BluetoothUnavailable(
                "missing Bluetooth permission".to_string(),
            ));
        }
        if !self.platform.has_adapter() {
            return Err(Error::BluetoothUnavailable("no adapter".to_string()));
        }
        self.platform.open_headset_proxy()?;

        self.attempts = 0;
        self.device = None;
        self.set_state(BluetoothState::HeadsetUnavailable);
        info!("Bluetooth SCO manager started");
        Ok(())
    }

    /// Release the proxy and cancel everything. Always ends `Uninitialized`.
    pub fn stop(&mut self) {
        if self.state == BluetoothState::Uninitialized {
            return;
        }
        self.stop_sco_audio();
        self.cancel_timer();
        self.platform.close_headset_proxy();
        self.proxy_connected = false;
        self.device = None;
        self.set_state(BluetoothState::Uninitialized);
        info!("Bluetooth SCO manager stopped");
    }

    pub fn on_profile_connected(&mut self) {
        if self.state == BluetoothState::Uninitialized {
            return;
        }
        debug!("Headset profile connected");
        self.proxy_connected = true;
        self.update_device();
    }

    pub fn on_profile_disconnected(&mut self) {
        if self.state == BluetoothState::Uninitialized {
            return;
        }
        debug!("Headset profile disconnected");
        self.stop_sco_audio();
        self.proxy_connected = false;
        self.device = None;
        self.set_state(BluetoothState::HeadsetUnavailable);
    }

    pub fn on_headset_connection_changed(&mut self, connected: bool) {
        if self.state == BluetoothState::Uninitialized {
            return;
        }
        if connected {
            self.attempts = 0;
        } else {
            self.stop_sco_audio();
        }
        self.update_device();
    }

    pub fn on_audio_state_changed(&mut self, audio: ScoAudioState) {
        if self.state == BluetoothState::Uninitialized {
            return;
        }
        match audio {
            ScoAudioState::Connected => {
                self.cancel_timer();
                if self.state == BluetoothState::ScoConnecting {
                    info!("Bluetooth SCO audio connected");
                    self.attempts = 0;
                    self.set_state(BluetoothState::ScoConnected);
                }
            }
            ScoAudioState::Connecting => debug!("Bluetooth SCO audio connecting"),
            ScoAudioState::Disconnected => {
                debug!("Bluetooth SCO audio disconnected");
                self.stop_sco_audio();
            }
        }
    }

    /// Refresh the headset handle from the profile. Only moves between the
    /// idle states; an SCO link in progress is left alone.
    pub fn update_device(&mut self) {
        if !matches!(
            self.state,
            BluetoothState::HeadsetUnavailable
                | BluetoothState::HeadsetAvailable
                | BluetoothState::ScoDisconnecting
        ) || !self.proxy_connected
        {
            return;
        }

        match self.platform.connected_headsets().into_iter().next() {
            Some(headset) => {
                debug!("Connected headset: {} ({})", headset.name, headset.address);
                self.device = Some(headset);
                self.set_state(BluetoothState::HeadsetAvailable);
            }
            None => {
                self.device = None;
                self.set_state(BluetoothState::HeadsetUnavailable);
            }
        }
    }

    /// Start an SCO link and arm the connect timeout.
    pub fn start_sco_audio(&mut self) -> Result<(), Error> {
        if self.attempts >= self.max_attempts {
            warn!(
                "Bluetooth SCO refused: {} attempts already made",
                self.attempts
            );
            return Err(Error::BluetoothUnavailable(format!(
                "retry bound of {} reached",
                self.max_attempts
            )));
        }
        if self.state != BluetoothState::HeadsetAvailable {
            return Err(Error::BluetoothUnavailable(format!(
                "cannot start SCO while {:?}",
                self.state
            )));
        }

        self.set_state(BluetoothState::ScoConnecting);
        self.attempts += 1;
        if let Err(e) = self.platform.start_sco() {
            self.set_state(BluetoothState::HeadsetAvailable);
            return Err(e);
        }
        info!("Bluetooth SCO start, attempt {}", self.attempts);
        self.arm_timer();
        Ok(())
    }

    pub fn stop_sco_audio(&mut self) {
        if !matches!(
            self.state,
            BluetoothState::ScoConnecting | BluetoothState::ScoConnected
        ) {
            return;
        }
        self.cancel_timer();
        self.platform.stop_sco();
        self.set_state(BluetoothState::ScoDisconnecting);
    }

    /// Connect timer fired. Returns true when the state changed.
    pub fn on_timeout(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.timer.is_none() {
            debug!("Ignoring stale SCO timer {}", generation);
            return false;
        }
        self.timer = None;
        if self.state != BluetoothState::ScoConnecting {
            return false;
        }

        let connected = self
            .device
            .as_ref()
            .map(|headset| self.platform.is_audio_connected(headset))
            .unwrap_or(false);

        if connected {
            info!("Bluetooth SCO connected at timeout check");
            self.attempts = 0;
            self.set_state(BluetoothState::ScoConnected);
        } else {
            warn!("Bluetooth SCO connect timed out");
            self.stop_sco_audio();
        }
        true
    }

    fn arm_timer(&mut self) {
        self.cancel_timer();
        let generation = self.generation;
        let timeout = self.sco_timeout;
        let tx = self.timer_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(generation);
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
    }
}

impl Drop for BluetoothScoManager {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
