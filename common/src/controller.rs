use log::{debug, error, info};

use crate::{
    duty_cycle::{DutyCycleScheduler, Phase},
    error::PersistError,
    ports::{ClockSource, Light, PersistenceLayer, Pump},
    record::{clamp_minute_of_day, clamp_pump_minutes, SettingsRecord},
    store::SettingsStore,
    time_window::TimeWindowScheduler,
    types::{Percent, StateSnapshot, TimeOfDay},
};

/// Typed request produced by the HTTP adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    PumpManual {
        on: Option<bool>,
        speed: Option<Percent>,
    },
    /// `enabled: None` edits the durations without starting or stopping
    /// the cycle.
    PumpSchedule {
        enabled: Option<bool>,
        on_minutes: i32,
        off_minutes: i32,
    },
    LightManual {
        on: Option<bool>,
        brightness: Option<Percent>,
    },
    LightSchedule {
        enabled: bool,
        on_minute: i32,
        off_minute: i32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsSource {
    Stored,
    Defaults,
}

impl SettingsSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stored => "loaded from storage",
            Self::Defaults => "using defaults",
        }
    }
}

/// What a single tick changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub pump: Option<Phase>,
    pub light: Option<bool>,
}

pub struct ControllerCore<P, L, C, S> {
    pump: P,
    light: L,
    clock: C,
    store: SettingsStore<S>,
    settings: SettingsRecord,
    settings_source: SettingsSource,
    pump_cycle: DutyCycleScheduler,
    light_schedule: TimeWindowScheduler,
}

impl<P, L, C, S> ControllerCore<P, L, C, S>
where
    P: Pump,
    L: Light,
    C: ClockSource,
    S: PersistenceLayer,
{
    /// Builds a core running `defaults` without touching storage or actuators.
    pub fn new(
        pump: P,
        light: L,
        clock: C,
        store: SettingsStore<S>,
        mut defaults: SettingsRecord,
        now_ms: u32,
    ) -> Self {
        defaults.sanitize();
        Self {
            pump,
            light,
            clock,
            store,
            settings: defaults,
            settings_source: SettingsSource::Defaults,
            pump_cycle: DutyCycleScheduler::new(now_ms),
            light_schedule: TimeWindowScheduler::default(),
        }
    }

    /// Startup path: load stored settings (falling back to `defaults`) and
    /// start the pump cycle if it is enabled.
    pub fn boot(
        pump: P,
        light: L,
        clock: C,
        store: SettingsStore<S>,
        defaults: SettingsRecord,
        now_ms: u32,
    ) -> Self {
        let mut core = Self::new(pump, light, clock, store, defaults, now_ms);
        match core.store.load() {
            Some(record) => core.apply_loaded_settings(record, now_ms),
            None => {
                if core.settings.pump_schedule_enabled {
                    core.pump_cycle.start_cycle(&mut core.pump, now_ms);
                }
            }
        }
        core
    }

    pub fn apply_loaded_settings(&mut self, mut record: SettingsRecord, now_ms: u32) {
        record.sanitize();
        self.settings = record;
        self.settings_source = SettingsSource::Stored;
        if self.settings.pump_schedule_enabled {
            self.pump_cycle.start_cycle(&mut self.pump, now_ms);
        }
    }

    pub fn settings(&self) -> &SettingsRecord {
        &self.settings
    }

    pub fn settings_source(&self) -> SettingsSource {
        self.settings_source
    }

    pub fn pump_phase(&self) -> Phase {
        self.pump_cycle.phase()
    }

    pub fn light_commanded_on(&self) -> bool {
        self.light_schedule.commanded_on()
    }

    pub fn pump(&self) -> &P {
        &self.pump
    }

    pub fn pump_mut(&mut self) -> &mut P {
        &mut self.pump
    }

    pub fn light(&self) -> &L {
        &self.light
    }

    pub fn light_mut(&mut self) -> &mut L {
        &mut self.light
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn store(&self) -> &SettingsStore<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SettingsStore<S> {
        &mut self.store
    }

    /// Reads the injected clock and evaluates both schedulers.
    pub fn tick(&mut self, now_ms: u32) -> TickOutcome {
        let reading = self.clock.now();
        self.tick_at(now_ms, reading)
    }

    /// Pump cycle first, then the light window.
    pub fn tick_at(&mut self, now_ms: u32, clock_reading: Option<TimeOfDay>) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if self.settings.pump_schedule_enabled {
            outcome.pump = self
                .pump_cycle
                .tick(self.settings.duty_cycle(), &mut self.pump, now_ms);
        }

        if self.settings.light_schedule_enabled {
            outcome.light = self.light_schedule.tick(
                self.settings.light_window(),
                clock_reading,
                &mut self.light,
                now_ms,
            );
        }

        outcome
    }

    pub fn handle(&mut self, command: Command, now_ms: u32) -> Result<(), PersistError> {
        match command {
            Command::PumpManual { on, speed } => {
                self.set_pump_manual(on, speed);
                Ok(())
            }
            Command::PumpSchedule {
                enabled,
                on_minutes,
                off_minutes,
            } => match enabled {
                Some(enabled) => self.set_pump_schedule(enabled, on_minutes, off_minutes, now_ms),
                None => self.set_pump_durations(on_minutes, off_minutes),
            },
            Command::LightManual { on, brightness } => {
                self.set_light_manual(on, brightness);
                Ok(())
            }
            Command::LightSchedule {
                enabled,
                on_minute,
                off_minute,
            } => self.set_light_schedule(enabled, on_minute, off_minute),
        }
    }

    /// Applies and persists the pump cycle. The in-memory change stays in
    /// effect even when the save fails.
    pub fn set_pump_schedule(
        &mut self,
        enabled: bool,
        on_minutes: i32,
        off_minutes: i32,
        now_ms: u32,
    ) -> Result<(), PersistError> {
        self.settings.pump_on_minutes = clamp_pump_minutes(on_minutes);
        self.settings.pump_off_minutes = clamp_pump_minutes(off_minutes);
        self.settings.pump_schedule_enabled = enabled;

        if enabled {
            self.pump_cycle.start_cycle(&mut self.pump, now_ms);
        } else {
            self.pump_cycle.stop_cycle(&mut self.pump);
        }

        self.persist()
    }

    /// Changes the cycle durations only. A running cycle picks them up at its
    /// next phase check; the pump is not commanded.
    pub fn set_pump_durations(
        &mut self,
        on_minutes: i32,
        off_minutes: i32,
    ) -> Result<(), PersistError> {
        self.settings.pump_on_minutes = clamp_pump_minutes(on_minutes);
        self.settings.pump_off_minutes = clamp_pump_minutes(off_minutes);
        self.persist()
    }

    /// Convergence to the new window is left to the next tick.
    pub fn set_light_schedule(
        &mut self,
        enabled: bool,
        on_minute: i32,
        off_minute: i32,
    ) -> Result<(), PersistError> {
        self.settings.light_on_minute_of_day = clamp_minute_of_day(on_minute);
        self.settings.light_off_minute_of_day = clamp_minute_of_day(off_minute);
        self.settings.light_schedule_enabled = enabled;
        self.persist()
    }

    /// Direct override, neither persisted nor tracked by the pump cycle.
    pub fn set_pump_manual(&mut self, on: Option<bool>, speed: Option<Percent>) {
        match on {
            Some(true) => self.pump.turn_on(),
            Some(false) => self.pump.turn_off(),
            None => {}
        }
        if let Some(speed) = speed {
            self.pump.set_speed(speed);
        }
        debug!("manual pump command: on={on:?} speed={speed:?}");
    }

    /// Direct override; an enabled light window may revert it on the next tick.
    pub fn set_light_manual(&mut self, on: Option<bool>, brightness: Option<Percent>) {
        match on {
            Some(true) => self.light.turn_on(),
            Some(false) => self.light.turn_off(),
            None => {}
        }
        if let Some(brightness) = brightness {
            self.light.set_brightness(brightness);
        }
        debug!("manual light command: on={on:?} brightness={brightness:?}");
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let pump = self.pump.current_state();
        let light = self.light.current_state();
        StateSnapshot {
            pump_on: pump.on,
            pump_speed: pump.speed.value(),
            pump_sched: self.settings.pump_schedule_view(),
            light_on: light.on,
            light_brightness: light.brightness.value(),
            light_sched: self.settings.light_schedule_view(),
        }
    }

    pub fn log_config(&self) {
        let settings = &self.settings;
        let window = settings.light_window();
        info!("hydroponic controller:");
        info!("  settings: {}", self.settings_source.as_str());
        info!("  pump ON: {} min", settings.pump_on_minutes);
        info!("  pump OFF: {} min", settings.pump_off_minutes);
        info!(
            "  pump schedule: {}",
            enabled_str(settings.pump_schedule_enabled)
        );
        info!(
            "  light ON: {}",
            TimeOfDay::from_minute_of_day(window.on_minute)
        );
        info!(
            "  light OFF: {}",
            TimeOfDay::from_minute_of_day(window.off_minute)
        );
        info!(
            "  light schedule: {}",
            enabled_str(settings.light_schedule_enabled)
        );
    }

    fn persist(&mut self) -> Result<(), PersistError> {
        match self.store.save(&self.settings) {
            Ok(()) => {
                info!(
                    "settings saved: pump {} {}/{} min, light {} {}-{}",
                    enabled_str(self.settings.pump_schedule_enabled),
                    self.settings.pump_on_minutes,
                    self.settings.pump_off_minutes,
                    enabled_str(self.settings.light_schedule_enabled),
                    TimeOfDay::from_minute_of_day(self.settings.light_on_minute_of_day),
                    TimeOfDay::from_minute_of_day(self.settings.light_off_minute_of_day),
                );
                Ok(())
            }
            Err(err) => {
                error!("failed to save settings: {err}");
                Err(err)
            }
        }
    }
}

fn enabled_str(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        duty_cycle::MS_PER_MINUTE,
        store::DEFAULT_SETTINGS_KEY,
        testing::{ActuatorCall, ManualClock, MemoryPersistence, RecordingLight, RecordingPump},
        types::ScheduleView,
    };

    type TestCore = ControllerCore<RecordingPump, RecordingLight, ManualClock, MemoryPersistence>;

    fn core_with(persistence: MemoryPersistence, clock: ManualClock) -> TestCore {
        ControllerCore::boot(
            RecordingPump::default(),
            RecordingLight::default(),
            clock,
            SettingsStore::new(persistence, DEFAULT_SETTINGS_KEY),
            SettingsRecord::default(),
            0,
        )
    }

    fn core() -> TestCore {
        core_with(MemoryPersistence::default(), ManualClock::default())
    }

    fn persisted(record: SettingsRecord) -> MemoryPersistence {
        let mut persistence = MemoryPersistence::default();
        persistence.insert(DEFAULT_SETTINGS_KEY, record.encode().to_vec());
        persistence
    }

    #[test]
    fn boots_with_defaults_when_nothing_stored() {
        let core = core();

        assert_eq!(*core.settings(), SettingsRecord::default());
        assert_eq!(core.settings_source(), SettingsSource::Defaults);
        assert_eq!(core.pump_phase(), Phase::Off);
        assert!(core.pump().calls.is_empty());
    }

    #[test]
    fn boot_applies_stored_settings_and_starts_cycle() {
        let stored = SettingsRecord {
            pump_schedule_enabled: true,
            pump_on_minutes: 3,
            pump_off_minutes: 9,
            ..SettingsRecord::default()
        };
        let core = core_with(persisted(stored), ManualClock::default());

        assert_eq!(*core.settings(), stored);
        assert_eq!(core.settings_source(), SettingsSource::Stored);
        assert_eq!(core.pump_phase(), Phase::On);
        assert_eq!(core.pump().calls, vec![ActuatorCall::On]);
    }

    #[test]
    fn boot_ignores_corrupt_settings() {
        let stored = SettingsRecord {
            pump_schedule_enabled: true,
            ..SettingsRecord::default()
        };
        let mut persistence = persisted(stored);
        persistence.corrupt(DEFAULT_SETTINGS_KEY, 2);

        let core = core_with(persistence, ManualClock::default());

        assert_eq!(*core.settings(), SettingsRecord::default());
        assert_eq!(core.settings_source(), SettingsSource::Defaults);
        assert!(core.pump().calls.is_empty());
    }

    #[test]
    fn enabled_defaults_start_the_cycle() {
        let defaults = SettingsRecord {
            pump_schedule_enabled: true,
            ..SettingsRecord::default()
        };
        let core = ControllerCore::boot(
            RecordingPump::default(),
            RecordingLight::default(),
            ManualClock::default(),
            SettingsStore::new(MemoryPersistence::default(), DEFAULT_SETTINGS_KEY),
            defaults,
            0,
        );

        assert_eq!(core.pump_phase(), Phase::On);
        assert_eq!(core.pump().calls, vec![ActuatorCall::On]);
    }

    #[test]
    fn pump_schedule_is_clamped_and_persisted() {
        let mut core = core();

        core.set_pump_schedule(true, 0, 500, 0).unwrap();

        assert_eq!(core.settings().pump_on_minutes, 1);
        assert_eq!(core.settings().pump_off_minutes, 120);
        assert_eq!(
            core.store().try_load().map(|record| record.pump_schedule_view()),
            Ok(ScheduleView {
                enabled: true,
                on: 1,
                off: 120
            })
        );
    }

    #[test]
    fn enabling_cycle_runs_on_then_off_then_on() {
        let mut core = core();
        core.set_pump_schedule(true, 2, 3, 0).unwrap();

        let mut transitions = Vec::new();
        for second in 0..=(5 * 60) {
            let now_ms = second * 1_000;
            if let Some(phase) = core.tick_at(now_ms, None).pump {
                transitions.push((now_ms / MS_PER_MINUTE, phase));
            }
        }

        assert_eq!(transitions, vec![(2, Phase::Off), (5, Phase::On)]);
        assert_eq!(
            core.pump().calls,
            vec![ActuatorCall::On, ActuatorCall::Off, ActuatorCall::On]
        );
    }

    #[test]
    fn disabling_cycle_issues_one_off_and_goes_quiet() {
        let mut core = core();
        core.set_pump_schedule(true, 1, 1, 0).unwrap();
        core.tick_at(30_000, None);
        core.pump_mut().take_calls();

        core.set_pump_schedule(false, 1, 1, 30_000).unwrap();
        for minute in 1..=10 {
            core.tick_at(minute * MS_PER_MINUTE, None);
        }

        assert_eq!(core.pump().calls, vec![ActuatorCall::Off]);
        assert_eq!(core.pump_phase(), Phase::Off);
    }

    #[test]
    fn reenabling_restarts_from_on() {
        let mut core = core();
        core.set_pump_schedule(true, 1, 1, 0).unwrap();
        core.tick_at(MS_PER_MINUTE, None);
        assert_eq!(core.pump_phase(), Phase::Off);

        core.set_pump_schedule(true, 1, 1, MS_PER_MINUTE + 5).unwrap();

        assert_eq!(core.pump_phase(), Phase::On);
        assert_eq!(core.tick_at(2 * MS_PER_MINUTE, None).pump, None);
        assert_eq!(
            core.tick_at(2 * MS_PER_MINUTE + 5, None).pump,
            Some(Phase::Off)
        );
    }

    #[test]
    fn save_failure_keeps_in_memory_change() {
        let mut core = core();
        core.store_mut().persistence_mut().fail_writes(true);

        let result = core.set_light_schedule(true, 480, 1020);

        assert!(result.is_err());
        assert!(core.settings().light_schedule_enabled);
        assert_eq!(core.settings().light_on_minute_of_day, 480);

        core.store_mut().persistence_mut().fail_writes(false);
        core.set_light_schedule(true, 480, 1020).unwrap();
        assert_eq!(core.store().load(), Some(*core.settings()));
    }

    #[test]
    fn light_schedule_clamps_minutes_without_commanding_light() {
        let mut core = core();

        core.set_light_schedule(true, -30, 5_000).unwrap();

        assert_eq!(core.settings().light_on_minute_of_day, 0);
        assert_eq!(core.settings().light_off_minute_of_day, 1439);
        assert!(core.light().calls.is_empty());
    }

    #[test]
    fn light_converges_on_next_tick() {
        let mut core = core_with(MemoryPersistence::default(), ManualClock::at_minute(1200));
        core.set_light_schedule(true, 1080, 540).unwrap();

        assert_eq!(core.tick(1_000).light, Some(true));
        assert_eq!(core.tick(2_000).light, None);
        assert_eq!(core.light().calls, vec![ActuatorCall::On]);
        assert!(core.light_commanded_on());
    }

    #[test]
    fn manual_light_toggle_is_reverted_by_window() {
        let mut core = core_with(MemoryPersistence::default(), ManualClock::at_minute(600));
        core.set_light_schedule(true, 480, 1020).unwrap();
        core.tick(0);
        core.light_mut().take_calls();

        core.set_light_manual(Some(false), None);
        assert!(!core.snapshot().light_on);

        assert_eq!(core.tick(1_000).light, Some(true));
        assert!(core.snapshot().light_on);
        assert_eq!(
            core.light().calls,
            vec![ActuatorCall::Off, ActuatorCall::On]
        );
    }

    #[test]
    fn unsynced_clock_leaves_light_alone() {
        let clock = ManualClock::default();
        let mut core = core_with(MemoryPersistence::default(), clock);
        core.set_light_schedule(true, 0, 1439).unwrap();

        assert_eq!(core.tick(0).light, None);
        core.clock().set_minute(10);
        assert_eq!(core.tick(1).light, Some(true));
        core.clock().unsync();
        core.set_light_manual(Some(false), None);
        assert_eq!(core.tick(2).light, None);
        assert!(!core.snapshot().light_on);
    }

    #[test]
    fn disabled_light_schedule_never_commands() {
        let mut core = core_with(MemoryPersistence::default(), ManualClock::at_minute(600));
        core.set_light_schedule(false, 480, 1020).unwrap();

        assert_eq!(core.tick(0), TickOutcome::default());
        assert!(core.light().calls.is_empty());
    }

    #[test]
    fn manual_commands_are_not_persisted() {
        let mut core = core();

        core.handle(
            Command::PumpManual {
                on: Some(true),
                speed: Some(Percent::new(40)),
            },
            0,
        )
        .unwrap();
        core.handle(
            Command::LightManual {
                on: None,
                brightness: Some(Percent::new(75)),
            },
            0,
        )
        .unwrap();

        assert_eq!(core.store().persistence().writes, 0);
        assert_eq!(
            core.pump().calls,
            vec![ActuatorCall::On, ActuatorCall::Level(40)]
        );
        assert_eq!(core.light().calls, vec![ActuatorCall::Level(75)]);
        assert_eq!(core.pump_phase(), Phase::Off);
    }

    #[test]
    fn schedule_commands_persist_through_handle() {
        let mut core = core();

        core.handle(
            Command::LightSchedule {
                enabled: true,
                on_minute: 360,
                off_minute: 1320,
            },
            0,
        )
        .unwrap();
        core.handle(
            Command::PumpSchedule {
                enabled: Some(false),
                on_minutes: 10,
                off_minutes: 20,
            },
            0,
        )
        .unwrap();

        assert_eq!(core.store().persistence().writes, 2);
        assert_eq!(core.store().load(), Some(*core.settings()));
    }

    #[test]
    fn duration_edit_leaves_manually_running_pump_alone() {
        let mut core = core();
        core.set_pump_manual(Some(true), None);
        core.pump_mut().take_calls();

        core.handle(
            Command::PumpSchedule {
                enabled: None,
                on_minutes: 5,
                off_minutes: 45,
            },
            1_000,
        )
        .unwrap();

        assert!(core.pump().current_state().on);
        assert!(core.pump().calls.is_empty());
        assert_eq!(core.settings().pump_off_minutes, 45);
        assert!(!core.settings().pump_schedule_enabled);
        assert_eq!(core.store().load(), Some(*core.settings()));
    }

    #[test]
    fn duration_edit_does_not_restart_running_cycle() {
        let mut core = core();
        core.set_pump_schedule(true, 1, 10, 0).unwrap();
        core.tick_at(MS_PER_MINUTE, None);
        assert_eq!(core.pump_phase(), Phase::Off);
        core.pump_mut().take_calls();

        core.handle(
            Command::PumpSchedule {
                enabled: None,
                on_minutes: 2,
                off_minutes: 10,
            },
            MS_PER_MINUTE + 500,
        )
        .unwrap();

        assert_eq!(core.pump_phase(), Phase::Off);
        assert!(!core.pump().current_state().on);
        assert!(core.pump().calls.is_empty());
        assert_eq!(core.settings().pump_on_minutes, 2);

        // The OFF phase still ends ten minutes after it began.
        assert_eq!(core.tick_at(11 * MS_PER_MINUTE - 1, None).pump, None);
        assert_eq!(
            core.tick_at(11 * MS_PER_MINUTE, None).pump,
            Some(Phase::On)
        );
    }

    #[test]
    fn snapshot_serializes_to_dashboard_shape() {
        let mut core = core();
        core.set_pump_manual(Some(true), Some(Percent::new(60)));
        core.set_light_manual(Some(false), Some(Percent::new(30)));

        let json = serde_json::to_value(core.snapshot()).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "pump_on": true,
                "pump_speed": 60,
                "pump_sched": {"enabled": false, "on": 5, "off": 15},
                "light_on": false,
                "light_brightness": 30,
                "light_sched": {"enabled": false, "on": 1080, "off": 540}
            })
        );
    }
}
