//! Collaborators the controller core drives. Device drivers, clocks and
//! storage backends live in the binaries and implement these traits.

use crate::{
    error::PersistError,
    types::{LightState, Percent, PumpState, TimeOfDay},
};

pub trait Pump {
    fn turn_on(&mut self);
    fn turn_off(&mut self);
    fn set_speed(&mut self, speed: Percent);
    fn current_state(&self) -> PumpState;
}

pub trait Light {
    fn turn_on(&mut self);
    fn turn_off(&mut self);
    fn set_brightness(&mut self, brightness: Percent);
    /// Observed output state, read back from the driver rather than cached.
    fn current_state(&self) -> LightState;
}

pub trait ClockSource {
    /// `None` until the clock has been synchronized.
    fn now(&self) -> Option<TimeOfDay>;
}

/// Fixed-size blob storage keyed by name.
pub trait PersistenceLayer {
    fn read(&self, key: &str) -> Option<Vec<u8>>;
    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), PersistError>;
}
