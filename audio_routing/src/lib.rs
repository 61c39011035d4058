//! Audio output routing for rtpcall
//!
//! Picks one output device (speaker, earpiece, wired headset or Bluetooth)
//! from the hardware that is present and keeps the OS audio service in
//! communication mode for the duration of a call.

pub mod bluetooth;
pub mod coordinator;
pub mod platform;
pub mod proximity;

#[cfg(test)]
mod testing;

pub use bluetooth::{BluetoothScoManager, BluetoothState, ScoAudioState};
pub use coordinator::{AudioRouter, AudioRouterHandle, HardwareEvent, RoutingSnapshot};
pub use platform::{
    AudioBackend, AudioMode, AudioPlatform, BluetoothHeadset, BluetoothPlatform, ProximitySensor,
};
pub use proximity::ProximityMonitor;
