use log::info;

use crate::{ports::Light, types::TimeOfDay};

/// Daily `[on_minute, off_minute)` window in minutes since midnight.
/// When `on_minute >= off_minute` the window spans midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub on_minute: u16,
    pub off_minute: u16,
}

impl TimeWindow {
    pub fn wraps_midnight(self) -> bool {
        self.on_minute >= self.off_minute
    }

    pub fn contains(self, minute_of_day: u16) -> bool {
        if self.wraps_midnight() {
            minute_of_day >= self.on_minute || minute_of_day < self.off_minute
        } else {
            self.on_minute <= minute_of_day && minute_of_day < self.off_minute
        }
    }
}

/// Level-triggered light scheduler: every evaluation compares the desired
/// state with what the light reports and corrects only on mismatch.
#[derive(Debug, Clone, Default)]
pub struct TimeWindowScheduler {
    commanded_on: bool,
    last_change_ms: Option<u32>,
}

impl TimeWindowScheduler {
    pub fn commanded_on(&self) -> bool {
        self.commanded_on
    }

    pub fn last_change_ms(&self) -> Option<u32> {
        self.last_change_ms
    }

    /// Returns the commanded state when a command was issued. An
    /// unsynchronized clock skips evaluation entirely.
    pub fn tick<L: Light>(
        &mut self,
        window: TimeWindow,
        now: Option<TimeOfDay>,
        light: &mut L,
        now_ms: u32,
    ) -> Option<bool> {
        let now = now?;
        let should_be_on = window.contains(now.minute_of_day());
        if light.current_state().on == should_be_on {
            return None;
        }

        if should_be_on {
            light.turn_on();
            info!("lighting ON (scheduled) at {now}");
        } else {
            light.turn_off();
            info!("lighting OFF (scheduled) at {now}");
        }
        self.commanded_on = should_be_on;
        self.last_change_ms = Some(now_ms);
        Some(should_be_on)
    }
}
