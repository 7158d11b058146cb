use std::fmt;

use chrono::Timelike;
use serde::{Deserialize, Serialize};

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// A 0-100 level. Construction clamps, so an out-of-range value never escapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percent(u8);

impl Percent {
    pub const ZERO: Self = Self(0);
    pub const FULL: Self = Self(100);

    pub fn new(value: i64) -> Self {
        Self(value.clamp(0, 100) as u8)
    }

    pub fn from_fraction(fraction: f32) -> Self {
        if !fraction.is_finite() {
            return Self::ZERO;
        }
        Self::new((fraction * 100.0).round() as i64)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn as_fraction(self) -> f32 {
        f32::from(self.0) / 100.0
    }
}

impl Default for Percent {
    fn default() -> Self {
        Self::FULL
    }
}

/// Wall-clock hour and minute as reported by a synchronized clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Some(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn from_minute_of_day(minutes: u16) -> Self {
        let minutes = minutes % MINUTES_PER_DAY;
        Self {
            hour: (minutes / 60) as u8,
            minute: (minutes % 60) as u8,
        }
    }

    pub fn from_timelike<T: Timelike>(time: &T) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn minute_of_day(self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PumpState {
    pub on: bool,
    pub speed: Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightState {
    pub on: bool,
    pub brightness: Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleView {
    pub enabled: bool,
    pub on: u16,
    pub off: u16,
}

/// Body of `GET /api/state`. Field names are consumed by the dashboard as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub pump_on: bool,
    pub pump_speed: u8,
    pub pump_sched: ScheduleView,
    pub light_on: bool,
    pub light_brightness: u8,
    pub light_sched: ScheduleView,
}
