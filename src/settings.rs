use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::transport::LineConfig;
use crate::DEFAULT_POLL_INTERVAL_MS;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid settings file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Values remembered between sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub last_port: Option<String>,
    pub last_output: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub line: LineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            last_port: None,
            last_output: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            line: LineConfig::default(),
        }
    }
}

impl Settings {
    /// `<config dir>/p506ctrl/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("p506ctrl").join("settings.json"))
    }

    /// Load from `path`, a missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| SettingsError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(io_err)?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("p506ctrl-settings-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = Settings::load(&temp_path("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.poll_interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip.json");
        let settings = Settings {
            last_port: Some("/dev/ttyUSB1".to_string()),
            last_output: Some(PathBuf::from("/tmp/readings.csv")),
            poll_interval_ms: 500,
            line: LineConfig::default(),
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let path = temp_path("partial.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"last_port":"COM4"}"#).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.last_port.as_deref(), Some("COM4"));
        assert_eq!(settings.line, LineConfig::PROTEK_506);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_broken_file_is_reported() {
        let path = temp_path("broken.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::Json { .. })
        ));
        let _ = fs::remove_file(&path);
    }
}
