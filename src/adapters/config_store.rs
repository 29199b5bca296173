use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::{AppConfig, PracticeError};
use crate::ports::ConfigStore;

const APP_DIR: &str = "SpeechPractice";
const CONFIG_FILE: &str = "config.toml";

/// TOML-based configuration store with OS-specific paths.
pub struct TomlConfigStore {
    data_dir: PathBuf,
    logs_dir: PathBuf,
}

impl TomlConfigStore {
    /// Create a store under the OS application data directory.
    pub fn new() -> Result<Self, PracticeError> {
        let data_dir = Self::default_data_dir()?;
        let logs_dir = Self::default_logs_dir(&data_dir);
        Self::at(data_dir, logs_dir)
    }

    /// Create a store rooted at an explicit directory. Logs go to `logs/` below it.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Result<Self, PracticeError> {
        let data_dir = data_dir.into();
        let logs_dir = data_dir.join("logs");
        Self::at(data_dir, logs_dir)
    }

    fn at(data_dir: PathBuf, logs_dir: PathBuf) -> Result<Self, PracticeError> {
        fs::create_dir_all(&data_dir)?;
        info!(data_dir = ?data_dir, "ConfigStore initialized");
        Ok(Self { data_dir, logs_dir })
    }

    /// - macOS: ~/Library/Application Support/SpeechPractice/
    /// - Windows: %APPDATA%\SpeechPractice\
    /// - Linux and others: ~/.config/SpeechPractice/
    fn default_data_dir() -> Result<PathBuf, PracticeError> {
        let base = if cfg!(target_os = "macos") {
            dirs::data_dir()
        } else {
            dirs::config_dir()
        };
        base.map(|p| p.join(APP_DIR))
            .ok_or_else(|| PracticeError::Config("Could not find application data directory".to_string()))
    }

    /// - macOS: inside the data directory
    /// - Windows: %LOCALAPPDATA%\SpeechPractice\logs\
    /// - Linux: ~/.local/share/SpeechPractice/logs/
    fn default_logs_dir(data_dir: &Path) -> PathBuf {
        let base = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
        } else if cfg!(target_os = "linux") {
            dirs::data_dir()
        } else {
            None
        };
        base.map(|p| p.join(APP_DIR).join("logs"))
            .unwrap_or_else(|| data_dir.join("logs"))
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<AppConfig, PracticeError> {
        let config_path = self.config_path();

        if config_path.exists() {
            debug!(path = ?config_path, "Loading configuration");
            let content = fs::read_to_string(&config_path)?;
            let config: AppConfig = toml::from_str(&content)?;
            info!(path = ?config_path, locale = ?config.practice.locale, "Configuration loaded");
            Ok(config)
        } else {
            info!(path = ?config_path, "Configuration file not found, creating default");
            let config = AppConfig::new();
            self.save(&config)?;
            Ok(config)
        }
    }

    fn save(&self, config: &AppConfig) -> Result<(), PracticeError> {
        let config_path = self.config_path();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&config_path, content)?;

        info!(path = ?config_path, "Configuration saved");
        Ok(())
    }

    fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    fn logs_dir(&self) -> PathBuf {
        self.logs_dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Locale;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("speech_practice_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = scratch("defaults");
        let store = TomlConfigStore::with_data_dir(&dir).unwrap();
        assert!(!store.config_path().exists());

        let config = store.load().unwrap();
        assert!(store.config_path().exists());
        assert_eq!(config.practice.locale, Locale::ZhTw);
        assert!(store.logs_dir().ends_with("logs"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = scratch("roundtrip");
        let store = TomlConfigStore::with_data_dir(&dir).unwrap();

        let mut config = AppConfig::new();
        config.practice.voice_auto_play = true;
        config.capture.keep_warm_secs = 10;
        config.logging.level = "debug".to_string();
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.practice.voice_auto_play);
        assert_eq!(loaded.capture.keep_warm_secs, 10);
        assert_eq!(loaded.logging.level, "debug");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = scratch("partial");
        let store = TomlConfigStore::with_data_dir(&dir).unwrap();
        fs::write(store.config_path(), "[practice]\nlocale = \"en\"\n").unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.practice.locale, Locale::En);
        assert_eq!(loaded.capture.chunk_interval_ms, 100);
        assert_eq!(loaded.recognition.base_silence_ms, 1_500);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = scratch("malformed");
        let store = TomlConfigStore::with_data_dir(&dir).unwrap();
        fs::write(store.config_path(), "[practice\nlocale =").unwrap();

        assert!(matches!(store.load(), Err(PracticeError::Config(_))));

        let _ = fs::remove_dir_all(&dir);
    }
}
