//! Board configuration, loaded once at process start from a TOML file. There
//! is no runtime reconfiguration; lock order in the file is the reporting
//! order.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Duration;

use crate::gpio::{Level, PinId};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One lock on the board.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    /// Sensor pin wired to the lock's shackle switch.
    pub pin: PinId,
    /// Level the sensor reads once the lock has been opened.
    pub solved_state: Level,
    /// Display name used in the status snapshot.
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub locks: Vec<LockConfig>,
    #[serde(default = "default_lock_debounce")]
    pub lock_debounce_time_seconds: f64,
    pub start_button_pin: PinId,
    pub reset_button_pin: PinId,
    pub status_led_pin: PinId,
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
}

impl Config {
    pub fn lock_debounce(&self) -> Duration {
        Duration::from_secs_f64(self.lock_debounce_time_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.locks.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one lock must be configured".to_string(),
            ));
        }
        // Duration::from_secs_f64 panics on non-finite or overflowing input,
        // so the bound check has to happen here.
        if !self.lock_debounce_time_seconds.is_finite()
            || self.lock_debounce_time_seconds <= 0.0
            || self.lock_debounce_time_seconds > 3600.0
        {
            return Err(ConfigError::Invalid(
                "lock_debounce_time_seconds must be a finite number in (0, 3600]".to_string(),
            ));
        }
        let mut pins: Vec<PinId> = self
            .locks
            .iter()
            .map(|l| l.pin)
            .chain([
                self.start_button_pin,
                self.reset_button_pin,
                self.status_led_pin,
            ])
            .collect();
        pins.sort_unstable();
        if pins.windows(2).any(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid(
                "pin assignments must be unique".to_string(),
            ));
        }
        for lock in &self.locks {
            if lock.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "lock on pin {} has an empty name",
                    lock.pin
                )));
            }
        }
        Ok(())
    }
}

fn default_lock_debounce() -> f64 {
    1.0
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            Err(ConfigError::Io(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn base_config() -> Config {
        Config {
            locks: vec![
                LockConfig {
                    pin: 17,
                    solved_state: Level::High,
                    name: "padlock".to_string(),
                },
                LockConfig {
                    pin: 27,
                    solved_state: Level::Low,
                    name: "deadbolt".to_string(),
                },
            ],
            lock_debounce_time_seconds: 1.0,
            start_button_pin: 2,
            reset_button_pin: 3,
            status_led_pin: 4,
            http_addr: default_http_addr(),
        }
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("board.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            r#"
start_button_pin = 2
reset_button_pin = 3
status_led_pin = 4

[[locks]]
pin = 17
solved_state = "high"
name = "padlock"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = load_config(&file_path).unwrap();
        assert_eq!(config.locks.len(), 1);
        assert_eq!(config.locks[0].solved_state, Level::High);
        assert_eq!(config.locks[0].name, "padlock");
        // Defaults for missing fields
        assert_eq!(config.lock_debounce_time_seconds, 1.0);
        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Path::new("nonexistent_board.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(&file_path);
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_validate_rejects_empty_lock_list() {
        let mut config = base_config();
        config.locks.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_pins() {
        let mut config = base_config();
        config.locks[1].pin = config.locks[0].pin;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_nonpositive_debounce() {
        let mut config = base_config();
        config.lock_debounce_time_seconds = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_nonfinite_debounce() {
        // inf and NaN parse as valid TOML floats and would panic
        // Duration::from_secs_f64 later.
        let mut config = base_config();
        config.lock_debounce_time_seconds = f64::INFINITY;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.lock_debounce_time_seconds = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_debounce() {
        let mut config = base_config();
        config.lock_debounce_time_seconds = 1e18;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_lock_name() {
        let mut config = base_config();
        config.locks[0].name = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
