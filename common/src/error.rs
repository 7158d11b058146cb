use std::fmt::Display;

use thiserror::Error;

/// Failure reported by a [`PersistenceLayer`](crate::ports::PersistenceLayer) write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    #[error("failed to write `{key}` to storage: {reason}")]
    Write { key: String, reason: String },
}

impl PersistError {
    pub fn write(key: &str, reason: impl Display) -> Self {
        Self::Write {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Why a stored settings blob could not be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("no saved settings found")]
    NotFound,
    #[error("settings blob is {len} bytes, expected {expected}")]
    Truncated { len: usize, expected: usize },
    #[error("settings checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

impl LoadError {
    pub fn is_corrupt(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_not_corruption() {
        assert!(!LoadError::NotFound.is_corrupt());
        assert!(LoadError::Truncated {
            len: 3,
            expected: 14
        }
        .is_corrupt());
        assert!(LoadError::ChecksumMismatch {
            stored: 1,
            computed: 2
        }
        .is_corrupt());
    }

    #[test]
    fn write_error_names_the_key() {
        let err = PersistError::write("hydro_settings", "flash full");
        assert_eq!(
            err.to_string(),
            "failed to write `hydro_settings` to storage: flash full"
        );
    }
}
