//! Logger configuration.
//!
//! [`Settings`] is the user-editable TOML document. [`Settings::validate`]
//! turns it into [`LoopSettings`], the checked value object handed to the
//! scheduler. Invalid settings are rejected here, before the logger starts.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// File name used by `configure --new-file`.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "internet-speed-log-config.toml";

/// Name of the pointer file that records the active configuration path.
const LOCATION_FILE_NAME: &str = "location.toml";

/// Application directory under the platform config directory.
const APP_DIR_NAME: &str = "internet-speed-log";

/// Contents written by `configure --new-file`.
pub const DEFAULT_CONFIG_TEXT: &str = "\
# Internet Speed Log Configuration

# Logging Options

log_interval = 10                     # minutes (must be a multiple of `kill_check_interval`)
repeats = 1

# Application Options

kill_check_interval = 5               # seconds
missing_connection_retries = 3
missing_connection_retry_interval = 30 # seconds
";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("no configuration found; run `internet-speed-log configure --new-file` first")]
    NotConfigured,
}

/// User-facing settings, as stored in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Minutes between measurement cycles.
    pub log_interval: u64,
    /// Measurements per cycle.
    pub repeats: u32,
    /// Seconds between stop-signal checks while sleeping.
    pub kill_check_interval: u64,
    /// Identity resolution attempts before waiting a full interval.
    pub missing_connection_retries: u32,
    /// Seconds between identity resolution attempts.
    pub missing_connection_retry_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_interval: 10,
            repeats: 1,
            kill_check_interval: 5,
            missing_connection_retries: 3,
            missing_connection_retry_interval: 30,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text. `origin` is only used for messages.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml(&text, path)?;
        debug!(path = %path.display(), ?settings, "Loaded configuration");
        Ok(settings)
    }

    /// Check the settings and convert them to scheduler durations.
    pub fn validate(&self) -> Result<LoopSettings, ConfigError> {
        let log_interval = self
            .log_interval
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::Validation("log_interval is too large".to_string()))?;

        LoopSettings::new(
            log_interval,
            self.repeats,
            Duration::from_secs(self.kill_check_interval),
            self.missing_connection_retries,
            Duration::from_secs(self.missing_connection_retry_interval),
        )
    }
}

/// Validated scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    log_interval: Duration,
    repeats: u32,
    tick: Duration,
    max_resolve_attempts: u32,
    resolve_retry_interval: Duration,
}

impl LoopSettings {
    /// Build loop settings, enforcing that `log_interval` is a whole number
    /// of `tick`s.
    pub fn new(
        log_interval: Duration,
        repeats: u32,
        tick: Duration,
        missing_connection_retries: u32,
        resolve_retry_interval: Duration,
    ) -> Result<Self, ConfigError> {
        if log_interval.is_zero() {
            return Err(ConfigError::Validation(
                "log_interval must be greater than 0".to_string(),
            ));
        }
        if tick.is_zero() {
            return Err(ConfigError::Validation(
                "kill_check_interval must be greater than 0".to_string(),
            ));
        }
        if log_interval.as_nanos() % tick.as_nanos() != 0 {
            return Err(ConfigError::Validation(format!(
                "log_interval ({}s) must be a multiple of kill_check_interval ({}s)",
                log_interval.as_secs_f64(),
                tick.as_secs_f64()
            )));
        }
        if repeats == 0 {
            return Err(ConfigError::Validation(
                "repeats must be at least 1".to_string(),
            ));
        }
        if resolve_retry_interval.is_zero() {
            return Err(ConfigError::Validation(
                "missing_connection_retry_interval must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            log_interval,
            repeats,
            tick,
            max_resolve_attempts: missing_connection_retries.max(1),
            resolve_retry_interval,
        })
    }

    /// Time between the end of one cycle and the start of the next.
    pub fn log_interval(&self) -> Duration {
        self.log_interval
    }

    pub fn repeats(&self) -> u32 {
        self.repeats
    }

    /// Granularity of cancellation checks during the inter-cycle sleep.
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Number of ticks in one log interval.
    pub fn ticks_per_interval(&self) -> u32 {
        u32::try_from(self.log_interval.as_nanos() / self.tick.as_nanos()).unwrap_or(u32::MAX)
    }

    /// Resolution attempts per resolving phase; always at least one.
    pub fn max_resolve_attempts(&self) -> u32 {
        self.max_resolve_attempts
    }

    pub fn resolve_retry_interval(&self) -> Duration {
        self.resolve_retry_interval
    }
}

/// Pointer to the active configuration file, kept in the platform config
/// directory so `log` works from any working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigLocation {
    pub config_path: PathBuf,
}

impl ConfigLocation {
    /// Default location of the pointer file.
    pub fn default_pointer_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(LOCATION_FILE_NAME))
    }

    /// Read a pointer file; `Ok(None)` if it does not exist.
    pub fn read(pointer: &Path) -> Result<Option<Self>, ConfigError> {
        let text = match fs::read_to_string(pointer) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: pointer.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&text)
            .map(Some)
            .map_err(|e| ConfigError::Parse {
                path: pointer.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Write the pointer file, creating its directory if needed.
    pub fn write(&self, pointer: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: pointer.to_path_buf(),
            source,
        };
        if let Some(parent) = pointer.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = toml::to_string(self).map_err(|e| ConfigError::Parse {
            path: pointer.to_path_buf(),
            message: e.to_string(),
        })?;
        fs::write(pointer, format!("# Location of the configuration file\n{text}")).map_err(io_err)
    }
}

/// Resolve which configuration file to use.
///
/// Order: explicit path, recorded location, `DEFAULT_CONFIG_FILE_NAME` in
/// `working_dir`.
pub fn discover_config(
    explicit: Option<&Path>,
    pointer: Option<&Path>,
    working_dir: &Path,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(pointer) = pointer {
        if let Some(location) = ConfigLocation::read(pointer)? {
            return Ok(location.config_path);
        }
    }
    let local = working_dir.join(DEFAULT_CONFIG_FILE_NAME);
    if local.is_file() {
        return Ok(local);
    }
    Err(ConfigError::NotConfigured)
}
