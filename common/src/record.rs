//! Persisted controller settings and their on-flash byte layout.
//!
//! Layout (little-endian, 14 bytes):
//!
//! | offset | width | field                    |
//! |--------|-------|--------------------------|
//! | 0      | 1     | pump_schedule_enabled    |
//! | 1      | 2     | pump_on_minutes          |
//! | 3      | 2     | pump_off_minutes         |
//! | 5      | 1     | light_schedule_enabled   |
//! | 6      | 2     | light_on_minute_of_day   |
//! | 8      | 2     | light_off_minute_of_day  |
//! | 10     | 4     | checksum over bytes 0..10 |

use serde::{Deserialize, Serialize};

use crate::{
    duty_cycle::DutyCycle, error::LoadError, time_window::TimeWindow, types::ScheduleView,
};

pub const PUMP_MINUTES_MIN: u16 = 1;
pub const PUMP_MINUTES_MAX: u16 = 120;
pub const MINUTE_OF_DAY_MAX: u16 = 1439;

pub const PAYLOAD_LEN: usize = 10;
pub const RECORD_LEN: usize = PAYLOAD_LEN + 4;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// FNV-1 style digest: xor each byte in, then multiply by the prime.
pub fn fnv1_digest(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

pub fn clamp_pump_minutes(minutes: i32) -> u16 {
    minutes.clamp(i32::from(PUMP_MINUTES_MIN), i32::from(PUMP_MINUTES_MAX)) as u16
}

pub fn clamp_minute_of_day(minutes: i32) -> u16 {
    minutes.clamp(0, i32::from(MINUTE_OF_DAY_MAX)) as u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsRecord {
    pub pump_schedule_enabled: bool,
    pub pump_on_minutes: u16,
    pub pump_off_minutes: u16,
    pub light_schedule_enabled: bool,
    pub light_on_minute_of_day: u16,
    pub light_off_minute_of_day: u16,
}

impl Default for SettingsRecord {
    fn default() -> Self {
        Self {
            pump_schedule_enabled: false,
            pump_on_minutes: 5,
            pump_off_minutes: 15,
            light_schedule_enabled: false,
            light_on_minute_of_day: 1080,
            light_off_minute_of_day: 540,
        }
    }
}

impl SettingsRecord {
    pub fn sanitize(&mut self) {
        self.pump_on_minutes = clamp_pump_minutes(i32::from(self.pump_on_minutes));
        self.pump_off_minutes = clamp_pump_minutes(i32::from(self.pump_off_minutes));
        self.light_on_minute_of_day = clamp_minute_of_day(i32::from(self.light_on_minute_of_day));
        self.light_off_minute_of_day =
            clamp_minute_of_day(i32::from(self.light_off_minute_of_day));
    }

    pub fn duty_cycle(&self) -> DutyCycle {
        DutyCycle {
            on_minutes: self.pump_on_minutes,
            off_minutes: self.pump_off_minutes,
        }
    }

    pub fn light_window(&self) -> TimeWindow {
        TimeWindow {
            on_minute: self.light_on_minute_of_day,
            off_minute: self.light_off_minute_of_day,
        }
    }

    pub fn pump_schedule_view(&self) -> ScheduleView {
        ScheduleView {
            enabled: self.pump_schedule_enabled,
            on: self.pump_on_minutes,
            off: self.pump_off_minutes,
        }
    }

    pub fn light_schedule_view(&self) -> ScheduleView {
        ScheduleView {
            enabled: self.light_schedule_enabled,
            on: self.light_on_minute_of_day,
            off: self.light_off_minute_of_day,
        }
    }

    pub fn payload_bytes(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0_u8; PAYLOAD_LEN];
        out[0] = u8::from(self.pump_schedule_enabled);
        out[1..3].copy_from_slice(&self.pump_on_minutes.to_le_bytes());
        out[3..5].copy_from_slice(&self.pump_off_minutes.to_le_bytes());
        out[5] = u8::from(self.light_schedule_enabled);
        out[6..8].copy_from_slice(&self.light_on_minute_of_day.to_le_bytes());
        out[8..10].copy_from_slice(&self.light_off_minute_of_day.to_le_bytes());
        out
    }

    pub fn checksum(&self) -> u32 {
        fnv1_digest(&self.payload_bytes())
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0_u8; RECORD_LEN];
        out[..PAYLOAD_LEN].copy_from_slice(&self.payload_bytes());
        out[PAYLOAD_LEN..].copy_from_slice(&self.checksum().to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, LoadError> {
        let Ok(raw) = <&[u8; RECORD_LEN]>::try_from(bytes) else {
            return Err(LoadError::Truncated {
                len: bytes.len(),
                expected: RECORD_LEN,
            });
        };

        let stored = u32::from_le_bytes([raw[10], raw[11], raw[12], raw[13]]);
        let computed = fnv1_digest(&raw[..PAYLOAD_LEN]);
        if stored != computed {
            return Err(LoadError::ChecksumMismatch { stored, computed });
        }

        Ok(Self {
            pump_schedule_enabled: raw[0] != 0,
            pump_on_minutes: u16::from_le_bytes([raw[1], raw[2]]),
            pump_off_minutes: u16::from_le_bytes([raw[3], raw[4]]),
            light_schedule_enabled: raw[5] != 0,
            light_on_minute_of_day: u16::from_le_bytes([raw[6], raw[7]]),
            light_off_minute_of_day: u16::from_le_bytes([raw[8], raw[9]]),
        })
    }
}
