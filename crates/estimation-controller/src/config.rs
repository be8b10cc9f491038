//! Configuration for the estimation controller.
//!
//! Everything is sourced from environment variables and everything has a
//! default, so the binary starts with no environment at all.
//! `Config::from_vars` takes a plain map so tests never touch the process
//! environment.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default bind address for the health/metrics HTTP server.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default idle lifetime of a session that receives no events.
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SECONDS: u64 = 3600;

/// Prefix for generated instance identifiers.
const EC_ID_PREFIX: &str = "ec";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was present but its value is unusable.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the controller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier of this controller instance.
    pub ec_id: String,

    /// Bind address for the health/metrics HTTP server.
    pub health_bind_address: String,

    /// Seconds a session may sit idle before it is torn down.
    pub session_idle_timeout_seconds: u64,
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is present but
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Loads configuration from the given variable map.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is present but
    /// fails validation.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let ec_id = vars.get("EC_ID").cloned().unwrap_or_else(generate_ec_id);

        let health_bind_address = vars
            .get("EC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let session_idle_timeout_seconds = match vars.get("EC_SESSION_IDLE_TIMEOUT_SECONDS") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "EC_SESSION_IDLE_TIMEOUT_SECONDS must be an integer number of seconds, got '{raw}'"
                ))
            })?,
            None => DEFAULT_SESSION_IDLE_TIMEOUT_SECONDS,
        };
        if session_idle_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "EC_SESSION_IDLE_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            ec_id,
            health_bind_address,
            session_idle_timeout_seconds,
        })
    }

    /// Idle session lifetime as a [`Duration`].
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_seconds)
    }
}

/// Generates an instance id of the form `ec-<hostname>-<uuid8>`.
fn generate_ec_id() -> String {
    let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let uuid = uuid::Uuid::new_v4().to_string();
    let suffix = uuid.get(..8).unwrap_or("00000000");
    format!("{EC_ID_PREFIX}-{hostname}-{suffix}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert!(config.ec_id.starts_with("ec-"));
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(
            config.session_idle_timeout_seconds,
            DEFAULT_SESSION_IDLE_TIMEOUT_SECONDS
        );
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert(
            "EC_HEALTH_BIND_ADDRESS".to_string(),
            "127.0.0.1:9999".to_string(),
        );
        vars.insert(
            "EC_SESSION_IDLE_TIMEOUT_SECONDS".to_string(),
            "120".to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.health_bind_address, "127.0.0.1:9999");
        assert_eq!(config.session_idle_timeout_seconds, 120);
        assert_eq!(config.idle_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_ec_id_custom_value() {
        let mut vars = base_vars();
        vars.insert("EC_ID".to_string(), "ec-custom-1".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.ec_id, "ec-custom-1");
    }

    #[test]
    fn test_generated_ec_ids_are_unique() {
        let first = Config::from_vars(&base_vars()).unwrap();
        let second = Config::from_vars(&base_vars()).unwrap();

        assert_ne!(first.ec_id, second.ec_id);
    }

    #[test]
    fn test_invalid_idle_timeout_rejected() {
        let mut vars = base_vars();
        vars.insert(
            "EC_SESSION_IDLE_TIMEOUT_SECONDS".to_string(),
            "soon".to_string(),
        );

        let result = Config::from_vars(&vars);

        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_zero_idle_timeout_rejected() {
        let mut vars = base_vars();
        vars.insert(
            "EC_SESSION_IDLE_TIMEOUT_SECONDS".to_string(),
            "0".to_string(),
        );

        let result = Config::from_vars(&vars);

        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
