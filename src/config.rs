//! Context configuration.

use std::time::Duration;

use crate::error::ContextError;

/// Default action timeout: enough time for the connection to set up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Environment variable overriding [`ContextConfig::default_timeout`], in milliseconds.
pub const ENV_DEFAULT_TIMEOUT_MS: &str = "TWINME_DEFAULT_TIMEOUT_MS";
/// Environment variable overriding [`ContextConfig::start_online`] (`true`/`false`/`1`/`0`).
pub const ENV_START_ONLINE: &str = "TWINME_START_ONLINE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Timeout applied to executors that do not choose their own.
    pub default_timeout: Duration,
    /// Treat the channel as online before the first connectivity event.
    pub start_online: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            start_online: false,
        }
    }
}

impl ContextConfig {
    /// Defaults overridden by `TWINME_DEFAULT_TIMEOUT_MS` and `TWINME_START_ONLINE`.
    pub fn from_env() -> Result<Self, ContextError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ContextError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_DEFAULT_TIMEOUT_MS) {
            let millis: u64 =
                value
                    .trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ContextError::InvalidConfig {
                        name: ENV_DEFAULT_TIMEOUT_MS,
                        reason: e.to_string(),
                    })?;
            if millis == 0 {
                return Err(ContextError::InvalidConfig {
                    name: ENV_DEFAULT_TIMEOUT_MS,
                    reason: "timeout must be positive".to_string(),
                });
            }
            config.default_timeout = Duration::from_millis(millis);
        }

        if let Some(value) = lookup(ENV_START_ONLINE) {
            config.start_online = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(ContextError::InvalidConfig {
                        name: ENV_START_ONLINE,
                        reason: format!("expected a boolean, got {other:?}"),
                    })
                }
            };
        }

        Ok(config)
    }
}
