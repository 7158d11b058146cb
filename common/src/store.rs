use log::{info, warn};

use crate::{
    error::{LoadError, PersistError},
    ports::PersistenceLayer,
    record::SettingsRecord,
};

pub const DEFAULT_SETTINGS_KEY: &str = "hydro_settings";

/// Reads and writes the checksummed [`SettingsRecord`] blob.
#[derive(Debug)]
pub struct SettingsStore<S> {
    persistence: S,
    key: String,
}

impl<S: PersistenceLayer> SettingsStore<S> {
    pub fn new(persistence: S, key: impl Into<String>) -> Self {
        Self {
            persistence,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn persistence(&self) -> &S {
        &self.persistence
    }

    pub fn persistence_mut(&mut self) -> &mut S {
        &mut self.persistence
    }

    pub fn try_load(&self) -> Result<SettingsRecord, LoadError> {
        let blob = self.persistence.read(&self.key).ok_or(LoadError::NotFound)?;
        SettingsRecord::decode(&blob)
    }

    /// Returns the stored record only when present and intact.
    pub fn load(&self) -> Option<SettingsRecord> {
        match self.try_load() {
            Ok(record) => {
                info!("settings loaded from `{}`", self.key);
                Some(record)
            }
            Err(LoadError::NotFound) => {
                info!("no saved settings under `{}`, using defaults", self.key);
                None
            }
            Err(err) => {
                warn!("stored settings are corrupt ({err}), using defaults");
                None
            }
        }
    }

    /// Writes the full record with a fresh checksum. No retries.
    pub fn save(&mut self, record: &SettingsRecord) -> Result<(), PersistError> {
        let blob = record.encode();
        self.persistence.write(&self.key, &blob)
    }
}
