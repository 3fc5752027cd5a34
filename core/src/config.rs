//! Layered configuration for survey hosts.
//!
//! Precedence, lowest first:
//! 1. Built-in defaults
//! 2. `$SURVEY_HOME/config.toml`
//! 3. `SURVEY_*` environment variables
//!
//! `SURVEY_HOME` itself defaults to `~/.survey`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_SINK_URL: &str = "http://localhost:8888";
pub const DEFAULT_SUBMIT_PATH: &str = "/.netlify/functions/submit-survey";

const HOME_VAR: &str = "SURVEY_HOME";
const DEFAULT_HOME_DIR: &str = ".survey";
const CONFIG_FILE: &str = "config.toml";
const STATE_DIR: &str = "state";

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("I/O error loading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Config validation error: {0}")]
    Validation(String),

    #[error("Invalid value for ${var}: '{value}' (expected: {expected})")]
    InvalidEnvValue {
        var: String,
        value: String,
        expected: String,
    },

    #[error("Invalid sink URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Cannot determine home directory")]
    NoHomeDir,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurveyConfig {
    /// Directory holding `config.toml`.
    pub home: PathBuf,
    pub sink_url: String,
    pub submit_path: String,
    pub request_timeout_secs: u64,
    pub deferred_drain_delay_ms: u64,
    pub mount_drain_delay_ms: u64,
    pub drain_interval_secs: u64,
    /// Where the `session` and `pending-queue` documents live.
    pub data_dir: PathBuf,
}

impl SurveyConfig {
    pub fn defaults(home: PathBuf) -> Self {
        Self {
            data_dir: home.join(STATE_DIR),
            home,
            sink_url: DEFAULT_SINK_URL.to_string(),
            submit_path: DEFAULT_SUBMIT_PATH.to_string(),
            request_timeout_secs: 10,
            deferred_drain_delay_ms: 1000,
            mount_drain_delay_ms: 2000,
            drain_interval_secs: 30,
        }
    }

    /// Absolute URL submissions are posted to.
    pub fn submit_url(&self) -> Result<Url, ConfigLoadError> {
        let joined = format!(
            "{}/{}",
            self.sink_url.trim_end_matches('/'),
            self.submit_path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|source| ConfigLoadError::InvalidUrl {
            url: joined,
            source,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn deferred_drain_delay(&self) -> Duration {
        Duration::from_millis(self.deferred_drain_delay_ms)
    }

    pub fn mount_drain_delay(&self) -> Duration {
        Duration::from_millis(self.mount_drain_delay_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.drain_interval_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "drain_interval_secs must be greater than zero".to_string(),
            ));
        }
        self.submit_url()?;
        Ok(())
    }
}

/// `config.toml` contents; every key optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    sink_url: Option<String>,
    submit_path: Option<String>,
    request_timeout_secs: Option<u64>,
    deferred_drain_delay_ms: Option<u64>,
    mount_drain_delay_ms: Option<u64>,
    drain_interval_secs: Option<u64>,
    data_dir: Option<PathBuf>,
}

/// Builder that resolves a [`SurveyConfig`] from all enabled layers.
pub struct ConfigLoader {
    home: Option<PathBuf>,
    env_prefix: String,
    skip_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            home: None,
            env_prefix: "SURVEY".to_string(),
            skip_file: false,
            skip_env: false,
        }
    }

    /// Set the survey home explicitly instead of `$SURVEY_HOME` / `~/.survey`.
    pub fn with_home(mut self, path: PathBuf) -> Self {
        self.home = Some(path);
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn skip_file_layer(mut self) -> Self {
        self.skip_file = true;
        self
    }

    pub fn skip_env_layer(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load configuration with all enabled layers.
    pub fn load(self) -> Result<SurveyConfig, ConfigLoadError> {
        let home = self.resolve_home()?;
        let mut config = SurveyConfig::defaults(home.clone());

        if !self.skip_file {
            let file = Self::load_from_file(&home)?;
            Self::merge_file(&mut config, file);
        }

        if !self.skip_env {
            Self::apply_overrides(&mut config, &self.env_prefix, |var| env::var(var).ok())?;
        }

        config.validate()?;
        Ok(config)
    }

    fn resolve_home(&self) -> Result<PathBuf, ConfigLoadError> {
        if let Some(ref path) = self.home {
            return Ok(path.clone());
        }
        if let Ok(path) = env::var(HOME_VAR)
            && !path.trim().is_empty()
        {
            return Ok(PathBuf::from(path));
        }
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_HOME_DIR))
            .ok_or(ConfigLoadError::NoHomeDir)
    }

    /// A missing file is an empty layer, not an error.
    fn load_from_file(home: &Path) -> Result<FileConfig, ConfigLoadError> {
        let path = home.join(CONFIG_FILE);
        let contents = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("config.toml not found at {path:?}, using defaults");
                return Ok(FileConfig::default());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(toml::from_str(&contents)?)
    }

    fn merge_file(config: &mut SurveyConfig, file: FileConfig) {
        if let Some(v) = file.sink_url {
            config.sink_url = v;
        }
        if let Some(v) = file.submit_path {
            config.submit_path = v;
        }
        if let Some(v) = file.request_timeout_secs {
            config.request_timeout_secs = v;
        }
        if let Some(v) = file.deferred_drain_delay_ms {
            config.deferred_drain_delay_ms = v;
        }
        if let Some(v) = file.mount_drain_delay_ms {
            config.mount_drain_delay_ms = v;
        }
        if let Some(v) = file.drain_interval_secs {
            config.drain_interval_secs = v;
        }
        if let Some(dir) = file.data_dir {
            config.data_dir = if dir.is_relative() {
                config.home.join(dir)
            } else {
                dir
            };
        }
    }

    /// Apply `{prefix}_*` overrides read through `lookup`.
    fn apply_overrides(
        config: &mut SurveyConfig,
        prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigLoadError> {
        let read = |name: &str| {
            let var = format!("{prefix}_{name}");
            lookup(&var)
                .filter(|value| !value.trim().is_empty())
                .map(|value| (var, value))
        };
        let seconds = |var: String, value: String| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigLoadError::InvalidEnvValue {
                    var,
                    value,
                    expected: "a whole number of seconds".to_string(),
                })
        };

        if let Some((var, value)) = read("SINK_URL") {
            tracing::debug!("Applying env override: {var}={value}");
            config.sink_url = value;
        }
        if let Some((var, value)) = read("SUBMIT_PATH") {
            tracing::debug!("Applying env override: {var}={value}");
            config.submit_path = value;
        }
        if let Some((var, value)) = read("REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = seconds(var, value)?;
        }
        if let Some((var, value)) = read("DRAIN_INTERVAL_SECS") {
            config.drain_interval_secs = seconds(var, value)?;
        }
        if let Some((var, value)) = read("DATA_DIR") {
            tracing::debug!("Applying env override: {var}={value}");
            config.data_dir = PathBuf::from(value);
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
