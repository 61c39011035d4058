use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Audio output routes the coordinator can pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AudioDevice {
    SpeakerPhone,
    WiredHeadset,
    Earpiece,
    Bluetooth,
    None,
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AudioDevice::SpeakerPhone => "speaker_phone",
            AudioDevice::WiredHeadset => "wired_headset",
            AudioDevice::Earpiece => "earpiece",
            AudioDevice::Bluetooth => "bluetooth",
            AudioDevice::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// How the speakerphone is chosen when no headset is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerphoneMode {
    /// Follow the proximity sensor: earpiece when near, speaker when far.
    Auto,
    On,
    #[default]
    Off,
}

impl SpeakerphoneMode {
    /// Device used when nothing better is available.
    pub fn default_device(self) -> AudioDevice {
        match self {
            SpeakerphoneMode::Off => AudioDevice::Earpiece,
            SpeakerphoneMode::On | SpeakerphoneMode::Auto => AudioDevice::SpeakerPhone,
        }
    }
}

/// Devices currently physically available. Rebuilt from scratch on every
/// hardware event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceSet(BTreeSet<AudioDevice>);

impl AudioDeviceSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, device: AudioDevice) -> bool {
        self.0.insert(device)
    }

    pub fn remove(&mut self, device: AudioDevice) -> bool {
        self.0.remove(&device)
    }

    pub fn contains(&self, device: AudioDevice) -> bool {
        self.0.contains(&device)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = AudioDevice> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<AudioDevice> for AudioDeviceSet {
    fn from_iter<I: IntoIterator<Item = AudioDevice>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for AudioDeviceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.iter().map(|d| d.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
