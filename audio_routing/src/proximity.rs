use crate::platform::ProximitySensor;
use call_core::Error;
use log::{debug, info};

/// Near/far tracking on top of a hardware proximity sensor.
pub struct ProximityMonitor {
    sensor: Option<Box<dyn ProximitySensor>>,
    running: bool,
    near: bool,
}

impl ProximityMonitor {
    pub fn new(sensor: Option<Box<dyn ProximitySensor>>) -> Self {
        Self {
            sensor,
            running: false,
            near: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.sensor.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_near(&self) -> bool {
        self.near
    }

    pub fn start(&mut self) -> Result<(), Error> {
        if self.running {
            return Ok(());
        }
        let sensor = self.sensor.as_mut().ok_or(Error::SensorUnavailable)?;
        sensor.start()?;
        self.running = true;
        info!(
            "Proximity sensor started, maximum range {} cm",
            sensor.maximum_range()
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        if let Some(sensor) = self.sensor.as_mut() {
            sensor.stop();
        }
        self.running = false;
        debug!("Proximity sensor stopped");
    }

    /// Record a sample. Returns true when it flips the near/far state.
    pub fn on_sample(&mut self, distance_cm: f32) -> bool {
        let Some(sensor) = self.sensor.as_ref() else {
            return false;
        };
        if !self.running {
            return false;
        }

        let near = distance_cm < sensor.maximum_range();
        if near == self.near {
            return false;
        }
        self.near = near;
        debug!("Proximity sensor: {}", if near { "near" } else { "far" });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Sensor {}
        impl ProximitySensor for Sensor {
            fn maximum_range(&self) -> f32;
            fn start(&mut self) -> Result<(), Error>;
            fn stop(&mut self);
        }
    }

    fn running_monitor() -> ProximityMonitor {
        let mut sensor = MockSensor::new();
        sensor.expect_maximum_range().return_const(5.0f32);
        sensor.expect_start().times(1).returning(|| Ok(()));
        sensor.expect_stop().return_const(());
        let mut monitor = ProximityMonitor::new(Some(Box::new(sensor)));
        monitor.start().unwrap();
        monitor
    }

    #[test]
    fn samples_below_range_are_near() {
        let mut monitor = running_monitor();

        assert!(monitor.on_sample(0.0));
        assert!(monitor.is_near());

        // Same side of the threshold is not a transition
        assert!(!monitor.on_sample(1.0));

        assert!(monitor.on_sample(5.0));
        assert!(!monitor.is_near());
    }

    #[test]
    fn missing_sensor_is_reported() {
        let mut monitor = ProximityMonitor::new(None);
        assert!(matches!(monitor.start(), Err(Error::SensorUnavailable)));
        assert!(!monitor.on_sample(0.0));
        assert!(!monitor.is_near());
    }

    #[test]
    fn samples_ignored_after_stop() {
        let mut monitor = running_monitor();
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(!monitor.on_sample(0.0));
    }
}
