//! Route table and query-parameter translation shared by the host and
//! ESP32 HTTP servers. Everything past this module works on [`Command`].

use std::collections::HashMap;

use hydro_common::{Command, Percent, SettingsRecord};

pub const STATE_PATH: &str = "/api/state";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRoute {
    Pump,
    PumpCycle,
    Light,
    LightSchedule,
}

impl CommandRoute {
    #[cfg_attr(not(feature = "esp32"), allow(dead_code))]
    pub const ALL: [Self; 4] = [Self::Pump, Self::PumpCycle, Self::Light, Self::LightSchedule];

    pub fn path(self) -> &'static str {
        match self {
            Self::Pump => "/api/pump",
            Self::PumpCycle => "/api/pump-cycle",
            Self::Light => "/api/light",
            Self::LightSchedule => "/api/light-schedule",
        }
    }
}

/// `None` means the request carried nothing to apply.
///
/// Schedule routes merge absent parameters with the live settings so a
/// request may update a single field. On `/api/pump-cycle` the cycle is only
/// started or stopped when `enabled` is present. Numeric values are passed
/// through unclamped; the core clamps them.
///
/// A value that does not parse as a number counts as absent and keeps the
/// live setting, unlike `atoi`-style parsing where `on=soon` reads as 0 and
/// clamps to the minimum. The request is still applied and saved.
pub fn build_command(
    route: CommandRoute,
    params: &HashMap<String, String>,
    live: &SettingsRecord,
) -> Option<Command> {
    let flag = |key: &str| params.get(key).map(|value| parse_flag(value));
    let number = |key: &str| params.get(key).and_then(|value| parse_number(value));

    match route {
        CommandRoute::Pump => {
            let on = flag("on");
            let speed = number("speed").map(Percent::new);
            (on.is_some() || speed.is_some()).then_some(Command::PumpManual { on, speed })
        }
        CommandRoute::Light => {
            let on = flag("on");
            let brightness = number("brightness").map(Percent::new);
            (on.is_some() || brightness.is_some())
                .then_some(Command::LightManual { on, brightness })
        }
        CommandRoute::PumpCycle => {
            if !has_any(params, &["enabled", "on", "off"]) {
                return None;
            }
            Some(Command::PumpSchedule {
                enabled: flag("enabled"),
                on_minutes: number("on")
                    .map(saturate_i32)
                    .unwrap_or(i32::from(live.pump_on_minutes)),
                off_minutes: number("off")
                    .map(saturate_i32)
                    .unwrap_or(i32::from(live.pump_off_minutes)),
            })
        }
        CommandRoute::LightSchedule => {
            if !has_any(params, &["enabled", "on", "off"]) {
                return None;
            }
            Some(Command::LightSchedule {
                enabled: flag("enabled").unwrap_or(live.light_schedule_enabled),
                on_minute: number("on")
                    .map(saturate_i32)
                    .unwrap_or(i32::from(live.light_on_minute_of_day)),
                off_minute: number("off")
                    .map(saturate_i32)
                    .unwrap_or(i32::from(live.light_off_minute_of_day)),
            })
        }
    }
}

/// Splits the query string of a request URI into key/value pairs.
#[cfg_attr(not(feature = "esp32"), allow(dead_code))]
pub fn parse_query(uri: &str) -> HashMap<String, String> {
    let Some((_, query)) = uri.split_once('?') else {
        return HashMap::new();
    };

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (name.to_string(), value.replace('+', " "))
        })
        .collect()
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true")
}

fn parse_number(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(parsed) = value.parse::<i64>() {
        return Some(parsed);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .map(|parsed| parsed.round() as i64)
}

fn saturate_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn has_any(params: &HashMap<String, String>, keys: &[&str]) -> bool {
    keys.iter().any(|key| params.contains_key(*key))
}
