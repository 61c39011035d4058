//! OS collaborators consumed by the routing subsystem.
//!
//! Hosts with telephony audio implement these traits over their native audio,
//! Bluetooth and sensor services. [`headless`] provides an in-memory backend
//! for hosts without any of that hardware.

use call_core::Error;
use serde::{Deserialize, Serialize};

/// OS audio mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioMode {
    Normal,
    InCommunication,
}

/// Output control and audio focus of the OS audio service.
pub trait AudioPlatform: Send {
    fn mode(&self) -> AudioMode;
    fn set_mode(&mut self, mode: AudioMode) -> Result<(), Error>;
    fn is_speakerphone_on(&self) -> bool;
    fn set_speakerphone_on(&mut self, on: bool) -> Result<(), Error>;
    fn is_microphone_mute(&self) -> bool;
    fn set_microphone_mute(&mut self, mute: bool) -> Result<(), Error>;
    /// Transient exclusive focus for voice communication
    fn request_audio_focus(&mut self) -> Result<(), Error>;
    fn abandon_audio_focus(&mut self) -> Result<(), Error>;
    /// Whether the handset has an earpiece receiver at all
    fn has_earpiece(&self) -> bool;
    /// Wired headset state at startup; later changes arrive as hardware events
    fn has_wired_headset(&self) -> bool;
}

/// A paired headset reported by the headset profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothHeadset {
    pub name: String,
    pub address: String,
}

/// Bluetooth adapter and headset profile.
pub trait BluetoothPlatform: Send {
    fn has_permission(&self) -> bool;
    fn has_adapter(&self) -> bool;
    /// Ask for the headset profile proxy. Connection is reported later as a
    /// profile-connected hardware event.
    fn open_headset_proxy(&mut self) -> Result<(), Error>;
    fn close_headset_proxy(&mut self);
    fn connected_headsets(&self) -> Vec<BluetoothHeadset>;
    fn is_audio_connected(&self, headset: &BluetoothHeadset) -> bool;
    fn start_sco(&mut self) -> Result<(), Error>;
    fn stop_sco(&mut self);
}

/// Proximity sensor. Samples are delivered as hardware events.
pub trait ProximitySensor: Send {
    /// Distance in centimetres at or beyond which the user is "far"
    fn maximum_range(&self) -> f32;
    fn start(&mut self) -> Result<(), Error>;
    fn stop(&mut self);
}

/// The collaborators handed to the audio router.
pub struct AudioBackend {
    pub platform: Box<dyn AudioPlatform>,
    pub bluetooth: Box<dyn BluetoothPlatform>,
    pub proximity: Option<Box<dyn ProximitySensor>>,
}

impl AudioBackend {
    /// Backend for hosts without telephony audio: speaker only, no Bluetooth,
    /// no proximity sensor.
    pub fn headless() -> Self {
        Self {
            platform: Box::new(headless::HeadlessAudio::default()),
            bluetooth: Box::new(headless::NoBluetooth),
            proximity: None,
        }
    }
}

pub mod headless {
    use super::*;
    use log::trace;

    /// In-memory audio service that only remembers the flags it was given.
    #[derive(Debug, Clone)]
    pub struct HeadlessAudio {
        pub mode: AudioMode,
        pub speakerphone: bool,
        pub microphone_mute: bool,
        pub focused: bool,
        pub earpiece: bool,
        pub wired_headset: bool,
    }

    impl Default for HeadlessAudio {
        fn default() -> Self {
            Self {
                mode: AudioMode::Normal,
                speakerphone: false,
                microphone_mute: false,
                focused: false,
                earpiece: false,
                wired_headset: false,
            }
        }
    }

    impl AudioPlatform for HeadlessAudio {
        fn mode(&self) -> AudioMode {
            self.mode
        }

        fn set_mode(&mut self, mode: AudioMode) -> Result<(), Error> {
            trace!("Headless audio mode -> {:?}", mode);
            self.mode = mode;
            Ok(())
        }

        fn is_speakerphone_on(&self) -> bool {
            self.speakerphone
        }

        fn set_speakerphone_on(&mut self, on: bool) -> Result<(), Error> {
            self.speakerphone = on;
            Ok(())
        }

        fn is_microphone_mute(&self) -> bool {
            self.microphone_mute
        }

        fn set_microphone_mute(&mut self, mute: bool) -> Result<(), Error> {
            self.microphone_mute = mute;
            Ok(())
        }

        fn request_audio_focus(&mut self) -> Result<(), Error> {
            self.focused = true;
            Ok(())
        }

        fn abandon_audio_focus(&mut self) -> Result<(), Error> {
            self.focused = false;
            Ok(())
        }

        fn has_earpiece(&self) -> bool {
            self.earpiece
        }

        fn has_wired_headset(&self) -> bool {
            self.wired_headset
        }
    }

    /// Bluetooth stack of a host without an adapter.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NoBluetooth;

    impl BluetoothPlatform for NoBluetooth {
        fn has_permission(&self) -> bool {
            true
        }

        fn has_adapter(&self) -> bool {
            false
        }

        fn open_headset_proxy(&mut self) -> Result<(), Error> {
            Err(Error::BluetoothUnavailable("no adapter".to_string()))
        }

        fn close_headset_proxy(&mut self) {}

        fn connected_headsets(&self) -> Vec<BluetoothHeadset> {
            Vec::new()
        }

        fn is_audio_connected(&self, _headset: &BluetoothHeadset) -> bool {
            false
        }

        fn start_sco(&mut self) -> Result<(), Error> {
            Err(Error::BluetoothUnavailable("no adapter".to_string()))
        }

        fn stop_sco(&mut self) {}
    }
}
