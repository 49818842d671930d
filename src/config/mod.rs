use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "kdolist.toml";
pub const ENV_PREFIX: &str = "KDOLIST_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(Box<figment::Error>),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub step_pause_ms: u64,
    pub ready_pause_ms: u64,
    pub offline_pause_ms: u64,
    pub failure_pause_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            step_pause_ms: 300,
            ready_pause_ms: 500,
            offline_pause_ms: 1500,
            failure_pause_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Base URL the client bundle is served from
    pub origin: String,
    /// Small static resource used by the reachability probe
    pub probe_path: String,
    pub probe_timeout_ms: u64,
    /// JSON document describing the latest deployed bundle
    pub manifest_path: String,
    /// Bound on one manifest request, at boot and on every poll
    pub check_timeout_ms: u64,
    /// Version of the bundle currently installed
    pub bundle_version: String,
    pub poll_interval_secs: u64,
    /// Skip the probe and start in offline mode
    pub force_offline: bool,
    pub pacing: PacingConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            probe_path: "/favicon.svg".to_string(),
            probe_timeout_ms: 3000,
            manifest_path: "/version.json".to_string(),
            check_timeout_ms: 5000,
            bundle_version: env!("CARGO_PKG_VERSION").to_string(),
            poll_interval_secs: 60,
            force_offline: false,
            pacing: PacingConfig::default(),
        }
    }
}

impl ShellConfig {
    /// Defaults, then the TOML file, then `KDOLIST_*` environment variables.
    /// Nested keys use a double underscore: `KDOLIST_PACING__STEP_PAUSE_MS`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config: ShellConfig = Figment::from(Serialized::defaults(ShellConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.origin_url()?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "probe_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.check_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "check_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin)
            .map_err(|e| ConfigError::Invalid(format!("origin {}: {}", self.origin, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::Invalid(format!(
                "origin must be http or https, got {}",
                other
            ))),
        }
    }

    pub fn probe_url(&self) -> Result<Url, ConfigError> {
        self.join(&self.probe_path)
    }

    pub fn manifest_url(&self) -> Result<Url, ConfigError> {
        self.join(&self.manifest_path)
    }

    fn join(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin_url()?
            .join(path)
            .map_err(|e| ConfigError::Invalid(format!("path {}: {}", path, e)))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_bundle_version(mut self, version: impl Into<String>) -> Self {
        self.bundle_version = version.into();
        self
    }

    pub fn with_force_offline(mut self, offline: bool) -> Self {
        self.force_offline = offline;
        self
    }
}
