use serde::{Deserialize, Serialize};

use crate::{record::SettingsRecord, store::DEFAULT_SETTINGS_KEY};

const MIN_TICK_INTERVAL_MS: u64 = 10;

/// Deployment configuration. Unlike [`SettingsRecord`] it is not changed at
/// runtime; `defaults` only applies when storage holds no valid record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub settings_key: String,
    pub defaults: SettingsRecord,
    pub tick_interval_ms: u64,
    pub timezone: String,
    pub http_port: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            settings_key: DEFAULT_SETTINGS_KEY.to_string(),
            defaults: SettingsRecord::default(),
            tick_interval_ms: 200,
            timezone: "UTC".to_string(),
            http_port: 8080,
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.defaults.sanitize();
        self.tick_interval_ms = self.tick_interval_ms.max(MIN_TICK_INTERVAL_MS);
        if self.settings_key.trim().is_empty() {
            self.settings_key = DEFAULT_SETTINGS_KEY.to_string();
        }
    }
}
