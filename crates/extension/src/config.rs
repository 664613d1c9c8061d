use model::env::{
    EXTENSION_HANDLER_TIMEOUT_SECONDS, EXTENSION_PLATFORM_TIMEOUT_SECONDS, EXTENSION_TABLE_NAME,
};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TABLE_NAME: &str = "cloudformation-extension-records";
/// Time a handler may spend in one invocation before yielding.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(45);
/// Hard limit CloudFormation places on a single handler invocation.
pub const DEFAULT_PLATFORM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{variable} must be a whole number of seconds, got {value:?}")]
    InvalidSeconds { variable: &'static str, value: String },

    #[error("Handler timeout of {handler:?} must be less than the platform timeout of {platform:?}")]
    HandlerTimeoutTooLong {
        handler: Duration,
        platform: Duration,
    },

    #[error("The record table name must not be empty")]
    EmptyTableName,
}

/// Settings shared by every resource handler in a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionConfig {
    pub table_name: String,
    pub handler_timeout: Duration,
    pub platform_timeout: Duration,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        ExtensionConfig {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            platform_timeout: DEFAULT_PLATFORM_TIMEOUT,
        }
    }
}

impl ExtensionConfig {
    /// Read overrides from the environment, falling back to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults: ExtensionConfig = ExtensionConfig::default();

        let config = ExtensionConfig {
            table_name: std::env::var(EXTENSION_TABLE_NAME).unwrap_or(defaults.table_name),
            handler_timeout: seconds_from_env(EXTENSION_HANDLER_TIMEOUT_SECONDS)?
                .unwrap_or(defaults.handler_timeout),
            platform_timeout: seconds_from_env(EXTENSION_PLATFORM_TIMEOUT_SECONDS)?
                .unwrap_or(defaults.platform_timeout),
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table_name.trim().is_empty() {
            return Err(ConfigError::EmptyTableName);
        }

        if self.handler_timeout >= self.platform_timeout {
            return Err(ConfigError::HandlerTimeoutTooLong {
                handler: self.handler_timeout,
                platform: self.platform_timeout,
            });
        }

        Ok(())
    }
}

fn seconds_from_env(variable: &'static str) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(variable) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|seconds| Some(Duration::from_secs(seconds)))
            .map_err(|_| ConfigError::InvalidSeconds { variable, value }),
        Err(_) => Ok(None),
    }
}
