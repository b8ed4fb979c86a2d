//! Process settings read from the environment (after `.env` is loaded by the binary).

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "dataapi-config.json";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_MAX_CONFIG_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    pub config_file: PathBuf,
    /// Overrides the default data source's connection string.
    pub connection_string: Option<String>,
    pub stage_timeout: Duration,
    pub introspection_timeout: Duration,
    pub listen_addr: SocketAddr,
    /// Body limit for configuration submissions.
    pub max_config_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            connection_string: None,
            stage_timeout: crate::orchestrator::DEFAULT_STAGE_TIMEOUT,
            introspection_timeout: crate::metadata::DEFAULT_INTROSPECTION_TIMEOUT,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            max_config_bytes: DEFAULT_MAX_CONFIG_BYTES,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(Settings {
            config_file: get("DATAAPI_CONFIG_FILE").map(PathBuf::from).unwrap_or(defaults.config_file),
            connection_string: get("DATAAPI_CONNECTION_STRING"),
            stage_timeout: match get("DATAAPI_STAGE_TIMEOUT_SECS") {
                Some(v) => Duration::from_secs(parse("DATAAPI_STAGE_TIMEOUT_SECS", &v)?),
                None => defaults.stage_timeout,
            },
            introspection_timeout: match get("DATAAPI_INTROSPECTION_TIMEOUT_SECS") {
                Some(v) => Duration::from_secs(parse("DATAAPI_INTROSPECTION_TIMEOUT_SECS", &v)?),
                None => defaults.introspection_timeout,
            },
            listen_addr: parse(
                "DATAAPI_LISTEN_ADDR",
                &get("DATAAPI_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            )?,
            max_config_bytes: match get("DATAAPI_MAX_CONFIG_BYTES") {
                Some(v) => parse("DATAAPI_MAX_CONFIG_BYTES", &v)?,
                None => defaults.max_config_bytes,
            },
        })
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::Load(format!("{}={}: {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset() {
        let s = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(s.config_file, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(s.stage_timeout, Duration::from_secs(30));
        assert_eq!(s.introspection_timeout, Duration::from_secs(15));
        assert_eq!(s.listen_addr.port(), 5000);
        assert_eq!(s.max_config_bytes, DEFAULT_MAX_CONFIG_BYTES);
        assert!(s.connection_string.is_none());
    }

    #[test]
    fn values_override_defaults() {
        let env: HashMap<&str, &str> = [
            ("DATAAPI_CONFIG_FILE", "/etc/dab.json"),
            ("DATAAPI_STAGE_TIMEOUT_SECS", "5"),
            ("DATAAPI_LISTEN_ADDR", "127.0.0.1:8080"),
            ("DATAAPI_CONNECTION_STRING", "postgres://db"),
        ]
        .into_iter()
        .collect();
        let s = Settings::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(s.config_file, PathBuf::from("/etc/dab.json"));
        assert_eq!(s.stage_timeout, Duration::from_secs(5));
        assert_eq!(s.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(s.connection_string.as_deref(), Some("postgres://db"));
    }

    #[test]
    fn malformed_number_names_the_key() {
        let err = Settings::from_lookup(|k| (k == "DATAAPI_MAX_CONFIG_BYTES").then(|| "lots".to_string())).unwrap_err();
        assert!(err.to_string().contains("DATAAPI_MAX_CONFIG_BYTES"));
    }
}
