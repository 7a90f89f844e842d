use crate::dates::{self, DateError};
use chrono_tz::Tz;
use std::{env, path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got `{value}`")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error(transparent)]
    Timezone(#[from] DateError),
}

/// Tunables shared by every entity store of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long push notifications are ignored after our own write lands. Default 1s.
    pub echo_settle: Duration,
    /// Period of the daily reset / habit finalization check. Default 60s.
    pub reset_poll_interval: Duration,
    /// Upper bound on the best-effort chat account link at sign-in. Default 5s.
    pub link_timeout: Duration,
    /// XP history entries kept, newest first. Default 100.
    pub xp_history_limit: usize,
    /// Zone used until the user stores a preference. `None` means the host zone.
    pub default_timezone: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            echo_settle: Duration::from_millis(1000),
            reset_poll_interval: Duration::from_secs(60),
            link_timeout: Duration::from_millis(5000),
            xp_history_limit: 100,
            default_timezone: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            echo_settle: read_millis("HUNTER_ECHO_SETTLE_MS")?.unwrap_or(defaults.echo_settle),
            reset_poll_interval: read_number("HUNTER_RESET_POLL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.reset_poll_interval),
            link_timeout: read_millis("HUNTER_LINK_TIMEOUT_MS")?.unwrap_or(defaults.link_timeout),
            xp_history_limit: read_number("HUNTER_XP_HISTORY_LIMIT")?
                .and_then(|value| usize::try_from(value).ok())
                .unwrap_or(defaults.xp_history_limit),
            default_timezone: env::var("HUNTER_TIMEZONE")
                .ok()
                .filter(|value| !value.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reset_poll_interval.is_zero() {
            return Err(ConfigError::Zero("reset_poll_interval"));
        }
        if self.link_timeout.is_zero() {
            return Err(ConfigError::Zero("link_timeout"));
        }
        if self.xp_history_limit == 0 {
            return Err(ConfigError::Zero("xp_history_limit"));
        }
        if let Some(name) = &self.default_timezone {
            dates::parse_timezone(name)?;
        }
        Ok(())
    }

    pub fn fallback_timezone(&self) -> Result<Tz, DateError> {
        dates::resolve_timezone(self.default_timezone.as_deref())
    }
}

/// Settings of the local daemon binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_path: PathBuf,
    pub port: u16,
    /// `None` runs the daemon without an authenticated user.
    pub user_id: Option<String>,
    pub import_path: Option<PathBuf>,
    pub discord_id: Option<String>,
    pub sync: SyncConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("PORT") {
            Ok(value) => value.parse::<u16>().map_err(|_| ConfigError::InvalidNumber {
                name: "PORT",
                value,
            })?,
            Err(_) => 8080,
        };

        Ok(Self {
            data_path: resolve_data_path(),
            port,
            user_id: match env::var("HUNTER_USER_ID") {
                Ok(value) if value.trim().is_empty() => None,
                Ok(value) => Some(value.trim().to_string()),
                Err(_) => Some("local-hunter".to_string()),
            },
            import_path: env::var("HUNTER_IMPORT_PATH").ok().map(PathBuf::from),
            discord_id: env::var("HUNTER_DISCORD_ID")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            sync: SyncConfig::from_env()?,
        })
    }
}

pub fn resolve_data_path() -> PathBuf {
    if let Ok(path) = env::var("HUNTER_DATA_PATH") {
        return PathBuf::from(path);
    }

    PathBuf::from("data/hunter.json")
}

fn read_number(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        Err(_) => Ok(None),
    }
}

fn read_millis(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(read_number(name)?.map(Duration::from_millis))
}
