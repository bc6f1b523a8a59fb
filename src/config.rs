use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{CaptureSettings, DEFAULT_BUFFER_SIZE, DEFAULT_READ_TIMEOUT, MIN_BUFFER_SIZE};
use crate::error::ConfigError;

const DEFAULT_CONFIG_PATH: &str = "/etc/sipscope.conf";
const DEFAULT_LOG_DIR: &str = "/var/log/sipscope";
const DEFAULT_LOG_FILTER: &str = "info";
/// Log file name inside `log_dir`
pub const LOG_FILE_NAME: &str = "sipscope.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_dir: PathBuf,
    pub log_filter: String,
    pub read_timeout: Duration,
    pub buffer_size: usize,
    /// Interface captured when neither a file nor a device is given
    pub interface: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            interface: None,
        }
    }
}

impl Config {
    /// Load from `path`, or `$SIPSCOPE_CONFIG`, or the default location,
    /// then apply `SIPSCOPE_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => std::env::var("SIPSCOPE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };

        let mut config = Config::default();

        // A missing file is fine unless it was asked for explicitly
        if path.is_some() || config_path.exists() {
            let content = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
                path: config_path.display().to_string(),
                source,
            })?;
            config.apply_file(&content)?;
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `key = value` lines. Unknown keys are ignored.
    pub fn apply_file(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.set(key.trim(), value.trim())?;
            }
        }
        Ok(())
    }

    /// Apply overrides from `lookup`, keyed by `SIPSCOPE_<KEY>`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in ["log_dir", "log_filter", "read_timeout_ms", "buffer_size", "interface"] {
            let var = format!("SIPSCOPE_{}", key.to_ascii_uppercase());
            if let Some(value) = lookup(&var) {
                self.set(key, value.trim())?;
            }
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "log_dir" => self.log_dir = PathBuf::from(value),
            "log_filter" => self.log_filter = value.to_string(),
            "read_timeout_ms" => {
                let ms: u64 = value.parse().map_err(|_| invalid())?;
                if ms == 0 {
                    return Err(invalid());
                }
                self.read_timeout = Duration::from_millis(ms);
            }
            "buffer_size" => {
                let size: usize = value.parse().map_err(|_| invalid())?;
                // Must hold the largest record a capture file may contain
                if size < MIN_BUFFER_SIZE {
                    return Err(invalid());
                }
                self.buffer_size = size;
            }
            "interface" => {
                self.interface = (!value.is_empty()).then(|| value.to_string());
            }
            _ => {}
        }
        Ok(())
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            read_timeout: self.read_timeout,
            buffer_size: self.buffer_size,
        }
    }
}
