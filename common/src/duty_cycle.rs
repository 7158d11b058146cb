use log::info;

use crate::ports::Pump;

pub const MS_PER_MINUTE: u32 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyCycle {
    pub on_minutes: u16,
    pub off_minutes: u16,
}

impl DutyCycle {
    pub fn phase_duration_ms(self, phase: Phase) -> u32 {
        let minutes = match phase {
            Phase::On => self.on_minutes,
            Phase::Off => self.off_minutes,
        };
        u32::from(minutes).saturating_mul(MS_PER_MINUTE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    On,
    Off,
}

impl Phase {
    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

/// Edge-triggered pump cycler. Acts only when the current phase has run its
/// full duration; it never inspects the pump's actual state.
///
/// Timestamps come from a wrapping millisecond counter, so elapsed time is
/// always computed with `wrapping_sub`.
#[derive(Debug, Clone)]
pub struct DutyCycleScheduler {
    phase: Phase,
    last_change_ms: u32,
}

impl DutyCycleScheduler {
    pub fn new(now_ms: u32) -> Self {
        Self {
            phase: Phase::Off,
            last_change_ms: now_ms,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn last_change_ms(&self) -> u32 {
        self.last_change_ms
    }

    pub fn elapsed_ms(&self, now_ms: u32) -> u32 {
        now_ms.wrapping_sub(self.last_change_ms)
    }

    /// Restarts the cycle from the ON phase.
    pub fn start_cycle<P: Pump>(&mut self, pump: &mut P, now_ms: u32) {
        self.last_change_ms = now_ms;
        self.phase = Phase::On;
        pump.turn_on();
        info!("pump cycle started");
    }

    pub fn stop_cycle<P: Pump>(&mut self, pump: &mut P) {
        pump.turn_off();
        self.phase = Phase::Off;
        info!("pump cycle stopped");
    }

    /// Returns the new phase when a transition happened.
    pub fn tick<P: Pump>(&mut self, cycle: DutyCycle, pump: &mut P, now_ms: u32) -> Option<Phase> {
        if self.elapsed_ms(now_ms) < cycle.phase_duration_ms(self.phase) {
            return None;
        }

        self.phase = self.phase.toggled();
        self.last_change_ms = now_ms;
        match self.phase {
            Phase::On => pump.turn_on(),
            Phase::Off => pump.turn_off(),
        }
        info!("pump {} (scheduled cycle)", self.phase.as_str());
        Some(self.phase)
    }
}
