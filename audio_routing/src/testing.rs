//! In-memory collaborators for the routing tests.

use crate::platform::{BluetoothHeadset, BluetoothPlatform, ProximitySensor};
use call_core::Error;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct BluetoothCalls {
    pub connected: Vec<BluetoothHeadset>,
    pub audio_connected: bool,
    pub sco_starts: u32,
    pub sco_stops: u32,
    pub proxy_open: bool,
}

/// Scripted Bluetooth stack. Clones share state so a test can keep one and
/// hand the other to the code under test.
#[derive(Clone, Default)]
pub struct FakeBluetooth(pub Arc<Mutex<BluetoothCalls>>);

impl FakeBluetooth {
    pub fn with_headset() -> Self {
        let fake = Self::default();
        fake.0.lock().unwrap().connected.push(BluetoothHeadset {
            name: "Headset".to_string(),
            address: "00:11:22:33:44:55".to_string(),
        });
        fake
    }

    pub fn calls(&self) -> std::sync::MutexGuard<'_, BluetoothCalls> {
        self.0.lock().unwrap()
    }
}

impl BluetoothPlatform for FakeBluetooth {
    fn has_permission(&self) -> bool {
        true
    }
    fn has_adapter(&self) -> bool {
        true
    }
    fn open_headset_proxy(&mut self) -> Result<(), Error> {
        self.calls().proxy_open = true;
        Ok(())
    }
    fn close_headset_proxy(&mut self) {
        self.calls().proxy_open = false;
    }
    fn connected_headsets(&self) -> Vec<BluetoothHeadset> {
        self.calls().connected.clone()
    }
    fn is_audio_connected(&self, _headset: &BluetoothHeadset) -> bool {
        self.calls().audio_connected
    }
    fn start_sco(&mut self) -> Result<(), Error> {
        self.calls().sco_starts += 1;
        Ok(())
    }
    fn stop_sco(&mut self) {
        self.calls().sco_stops += 1;
    }
}

/// Proximity sensor with a 5 cm range.
#[derive(Debug, Default)]
pub struct FakeProximity;

impl ProximitySensor for FakeProximity {
    fn maximum_range(&self) -> f32 {
        5.0
    }
    fn start(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn stop(&mut self) {}
}
