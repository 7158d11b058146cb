//! In-memory fakes for the ports, shared by the unit tests.

use std::{cell::Cell, collections::HashMap};

use crate::{
    error::PersistError,
    ports::{ClockSource, Light, PersistenceLayer, Pump},
    types::{LightState, Percent, PumpState, TimeOfDay},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCall {
    On,
    Off,
    Level(u8),
}

#[derive(Debug, Default)]
pub struct RecordingPump {
    pub state: PumpState,
    pub calls: Vec<ActuatorCall>,
}

impl RecordingPump {
    pub fn take_calls(&mut self) -> Vec<ActuatorCall> {
        std::mem::take(&mut self.calls)
    }
}

impl Pump for RecordingPump {
    fn turn_on(&mut self) {
        self.state.on = true;
        self.calls.push(ActuatorCall::On);
    }

    fn turn_off(&mut self) {
        self.state.on = false;
        self.calls.push(ActuatorCall::Off);
    }

    fn set_speed(&mut self, speed: Percent) {
        self.state.speed = speed;
        self.calls.push(ActuatorCall::Level(speed.value()));
    }

    fn current_state(&self) -> PumpState {
        self.state
    }
}

#[derive(Debug, Default)]
pub struct RecordingLight {
    pub state: LightState,
    pub calls: Vec<ActuatorCall>,
}

impl RecordingLight {
    pub fn take_calls(&mut self) -> Vec<ActuatorCall> {
        std::mem::take(&mut self.calls)
    }
}

impl Light for RecordingLight {
    fn turn_on(&mut self) {
        self.state.on = true;
        self.calls.push(ActuatorCall::On);
    }

    fn turn_off(&mut self) {
        self.state.on = false;
        self.calls.push(ActuatorCall::Off);
    }

    fn set_brightness(&mut self, brightness: Percent) {
        self.state.brightness = brightness;
        self.calls.push(ActuatorCall::Level(brightness.value()));
    }

    fn current_state(&self) -> LightState {
        self.state
    }
}

#[derive(Debug, Default)]
pub struct ManualClock {
    reading: Cell<Option<TimeOfDay>>,
}

impl ManualClock {
    pub fn at_minute(minute_of_day: u16) -> Self {
        let clock = Self::default();
        clock.set_minute(minute_of_day);
        clock
    }

    pub fn set_minute(&self, minute_of_day: u16) {
        self.reading
            .set(Some(TimeOfDay::from_minute_of_day(minute_of_day)));
    }

    pub fn unsync(&self) {
        self.reading.set(None);
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> Option<TimeOfDay> {
        self.reading.get()
    }
}

#[derive(Debug, Default)]
pub struct MemoryPersistence {
    blobs: HashMap<String, Vec<u8>>,
    fail_writes: bool,
    pub writes: usize,
}

impl MemoryPersistence {
    pub fn blob(&self, key: &str) -> Option<&[u8]> {
        self.blobs.get(key).map(Vec::as_slice)
    }

    pub fn insert(&mut self, key: &str, bytes: Vec<u8>) {
        self.blobs.insert(key.to_string(), bytes);
    }

    pub fn corrupt(&mut self, key: &str, index: usize) {
        if let Some(byte) = self.blobs.get_mut(key).and_then(|blob| blob.get_mut(index)) {
            *byte ^= 0x5a;
        }
    }

    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl PersistenceLayer for MemoryPersistence {
    fn read(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.get(key).cloned()
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), PersistError> {
        if self.fail_writes {
            return Err(PersistError::write(key, "simulated flash failure"));
        }
        self.writes += 1;
        self.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
