use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::GibError;

pub const CONFIG_FILE_NAME: &str = "metagib.json";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_retries: u32,
    pub timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            min_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            max_retries: 10,
            timeout_ms: 10_000,
        }
    }
}

impl RetrySettings {
    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub retry: RetrySettings,
    pub rpc_timeout_ms: u64,
    pub pause_after_success_ms: u64,
    /// `None` keeps retrying a failing mint forever.
    pub max_attempts: Option<u32>,
    pub timezone: String,
    pub image_extension: String,
    pub success_dataset: String,
    pub error_dataset: String,
    pub image_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            rpc_timeout_ms: 30_000,
            pause_after_success_ms: 200,
            max_attempts: None,
            timezone: "America/New_York".to_string(),
            image_extension: "png".to_string(),
            success_dataset: "MintInfo".to_string(),
            error_dataset: "MintInfoErrors".to_string(),
            image_dir: "Images".to_string(),
        }
    }
}

impl Settings {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn pause_after_success(&self) -> Duration {
        Duration::from_millis(self.pause_after_success_ms)
    }

    pub fn validate(&self) -> Result<(), GibError> {
        if self.retry.min_backoff_ms > self.retry.max_backoff_ms {
            return Err(GibError::InvalidConfig(format!(
                "retry.min_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.min_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        if self.retry.timeout_ms == 0 {
            return Err(GibError::InvalidConfig(
                "retry.timeout_ms must be positive".to_string(),
            ));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(GibError::InvalidConfig(
                "rpc_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(GibError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        for (field, value) in [
            ("success_dataset", &self.success_dataset),
            ("error_dataset", &self.error_dataset),
            ("image_dir", &self.image_dir),
            ("image_extension", &self.image_extension),
        ] {
            if value.trim().is_empty() {
                return Err(GibError::InvalidConfig(format!("{field} must not be empty")));
            }
        }
        if self.success_dataset == self.error_dataset {
            return Err(GibError::InvalidConfig(
                "success_dataset and error_dataset must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn apply(mut self, overrides: &RunOverrides) -> Self {
        if let Some(max_attempts) = overrides.max_attempts {
            self.max_attempts = Some(max_attempts);
        }
        if let Some(pause) = overrides.pause_after_success_ms {
            self.pause_after_success_ms = pause;
        }
        self
    }
}

/// Command-line values that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub max_attempts: Option<u32>,
    pub pause_after_success_ms: Option<u64>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist. Otherwise `./metagib.json`, then the user
    /// config directory, then built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<Settings, GibError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };

        let settings = match config_path {
            Some(config_path) => {
                tracing::debug!(path = %config_path.display(), "loading config");
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| GibError::ConfigRead(config_path.clone()))?;
                Self::parse(&content)?
            }
            None => Settings::default(),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Settings, GibError> {
        serde_json::from_str(content).map_err(|err| GibError::ConfigParse(err.to_string()))
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("metagib").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }
}
