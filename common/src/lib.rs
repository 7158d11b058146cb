pub mod config;
pub mod controller;
pub mod duty_cycle;
pub mod error;
pub mod ports;
pub mod record;
pub mod store;
pub mod time_window;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::ControllerConfig;
pub use controller::{Command, ControllerCore, SettingsSource, TickOutcome};
pub use duty_cycle::{DutyCycle, DutyCycleScheduler, Phase};
pub use error::{LoadError, PersistError};
pub use ports::{ClockSource, Light, PersistenceLayer, Pump};
pub use record::SettingsRecord;
pub use store::SettingsStore;
pub use time_window::{TimeWindow, TimeWindowScheduler};
pub use types::{LightState, Percent, PumpState, ScheduleView, StateSnapshot, TimeOfDay};
