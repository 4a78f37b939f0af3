//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Prefix of environment variables overriding file settings,
/// e.g. `SIP_REGISTRAR__REGISTRAR__MIN_EXPIRES=120`
pub const ENV_PREFIX: &str = "SIP_REGISTRAR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registrar: RegistrarConfig,
    pub sweeper: SweeperConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Domains served by this registrar; empty serves every domain
    pub domains: Vec<String>,
    /// Expiry applied when neither the contact nor the request carries one (seconds)
    pub default_expires: u32,
    /// Smallest non-zero expiry accepted (seconds)
    pub min_expires: u32,
    /// Larger requested expiries are clamped to this (seconds)
    pub max_expires: u32,
    /// Upper bound on contacts per AOR
    pub max_bindings_per_aor: usize,
    /// Users allowed to modify any AOR
    pub admin_users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registrar: RegistrarConfig::default(),
            sweeper: SweeperConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            domains: vec!["localhost".to_string()],
            default_expires: 3600, // 1 hour
            min_expires: 60,       // 1 minute
            max_expires: 7200,     // 2 hours
            max_bindings_per_aor: 10,
            admin_users: Vec::new(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 15 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl RegistrarConfig {
    /// Whether `host` is one of the served domains
    pub fn serves_domain(&self, host: &str) -> bool {
        self.domains.is_empty() || self.domains.iter().any(|d| d.eq_ignore_ascii_case(host))
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("registrar.domains")
                .with_list_parse_key("registrar.admin_users")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.registrar;
        if r.min_expires == 0 {
            return Err(ConfigError::Invalid("registrar.min_expires must be > 0".to_string()));
        }
        if r.min_expires > r.max_expires {
            return Err(ConfigError::Invalid(format!(
                "registrar.min_expires ({}) exceeds registrar.max_expires ({})",
                r.min_expires, r.max_expires
            )));
        }
        if r.default_expires < r.min_expires || r.default_expires > r.max_expires {
            return Err(ConfigError::Invalid(format!(
                "registrar.default_expires ({}) outside [{}, {}]",
                r.default_expires, r.min_expires, r.max_expires
            )));
        }
        if r.max_bindings_per_aor == 0 {
            return Err(ConfigError::Invalid(
                "registrar.max_bindings_per_aor must be > 0".to_string(),
            ));
        }
        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::Invalid("sweeper.interval_secs must be > 0".to_string()));
        }
        Ok(())
    }
}
