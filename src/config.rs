/*!
 * Configuration types for the vault pipeline
 *
 * Configuration comes from a TOML file or from the process environment, using the
 * same variable names the deployment templates set on both functions.
 */

use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_VAULT_BUCKET: &str = "VAULT_BUCKET";
pub const ENV_STANDARD_QUEUE: &str = "DUPLICATOR_QUEUE";
pub const ENV_LARGE_QUEUE: &str = "DUPLICATOR_LARGE_QUEUE";
pub const ENV_GIANT_QUEUE: &str = "DUPLICATOR_GIANT_QUEUE";
pub const ENV_FAILURE_QUEUE: &str = "BAD_RECEIVE_QUEUE";
pub const ENV_MAX_CONCURRENCY: &str = "MAX_DUPLICATOR_CONCURRENCY";
pub const ENV_REGION: &str = "AWS_REGION";
pub const ENV_DEBUG_MODE: &str = "DEBUG_MODE";
pub const ENV_SUPER_DEBUG_MODE: &str = "SUPER_DEBUG_MODE";

/// Main configuration shared by the Router and the Duplication Worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Bucket every duplicated object lands in
    #[serde(default)]
    pub vault_bucket: Option<String>,

    /// Queue identities per tier
    #[serde(default)]
    pub queues: QueueTargets,

    /// Number of ordering groups the Router rotates through
    #[serde(default = "default_max_concurrency")]
    pub max_duplicator_concurrency: u32,

    /// Region for the AWS clients (None = provider chain default)
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            vault_bucket: None,
            queues: QueueTargets::default(),
            max_duplicator_concurrency: default_max_concurrency(),
            region: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Queue identities (ARNs or endpoint URLs)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTargets {
    /// Ordered queue for objects below 1 GiB
    #[serde(default)]
    pub standard: Option<String>,

    /// Ordered queue for objects from 1 GiB up to 5 GiB
    #[serde(default)]
    pub large: Option<String>,

    /// Dead-letter queue for discarded records
    #[serde(default)]
    pub failure: Option<String>,

    /// Batch-compute job queue for giant objects; only its presence is consulted
    #[serde(default)]
    pub giant: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Lower the pipeline's own filter to DEBUG
    #[serde(default)]
    pub debug_mode: bool,

    /// Also let the AWS SDK and HTTP stack log below WARN
    #[serde(default)]
    pub super_debug_mode: bool,

    #[serde(default)]
    pub format: LogFormat,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    Compact,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn default_max_concurrency() -> u32 {
    5
}

fn env_flag(value: Option<String>) -> bool {
    value.map(|v| v.to_lowercase() == "true").unwrap_or(false)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl VaultConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| VaultError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_duplicator_concurrency = match non_empty(lookup(ENV_MAX_CONCURRENCY)) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
                VaultError::Config(format!("{} must be an integer: {}", ENV_MAX_CONCURRENCY, e))
            })?,
            None => default_max_concurrency(),
        };

        Ok(Self {
            vault_bucket: non_empty(lookup(ENV_VAULT_BUCKET)),
            queues: QueueTargets {
                standard: non_empty(lookup(ENV_STANDARD_QUEUE)),
                large: non_empty(lookup(ENV_LARGE_QUEUE)),
                failure: non_empty(lookup(ENV_FAILURE_QUEUE)),
                giant: non_empty(lookup(ENV_GIANT_QUEUE)),
            },
            max_duplicator_concurrency,
            region: non_empty(lookup(ENV_REGION)),
            logging: LoggingConfig {
                debug_mode: env_flag(lookup(ENV_DEBUG_MODE)),
                super_debug_mode: env_flag(lookup(ENV_SUPER_DEBUG_MODE)),
                ..LoggingConfig::default()
            },
        })
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| VaultError::Config(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Everything the Router needs: the three tier queues and a non-zero group count
    pub fn validate_for_router(&self) -> Result<()> {
        for (name, value) in [
            (ENV_STANDARD_QUEUE, &self.queues.standard),
            (ENV_LARGE_QUEUE, &self.queues.large),
            (ENV_FAILURE_QUEUE, &self.queues.failure),
        ] {
            if value.is_none() {
                return Err(VaultError::Config(format!("{} is not set", name)));
            }
        }
        if self.max_duplicator_concurrency == 0 {
            return Err(VaultError::Config(format!(
                "{} must be at least 1",
                ENV_MAX_CONCURRENCY
            )));
        }
        Ok(())
    }

    pub fn validate_for_duplicator(&self) -> Result<()> {
        match &self.vault_bucket {
            Some(_) => Ok(()),
            None => Err(VaultError::Config(format!("{} is not set", ENV_VAULT_BUCKET))),
        }
    }
}
