use std::env;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:survey_ballot.db";
pub const DEFAULT_CLOSURE_CHECK_INTERVAL_SECONDS: u64 = 60;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a positive number of seconds, got '{value}'")]
    InvalidInterval { name: &'static str, value: String },
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub closure_check_interval: Duration,
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = match lookup("DATABASE_URL") {
            Some(url) if url.trim().is_empty() => return Err(ConfigError::Empty("DATABASE_URL")),
            Some(url) => url.trim().to_string(),
            None => DEFAULT_DATABASE_URL.to_string(),
        };

        let closure_check_interval = match lookup("CLOSURE_CHECK_INTERVAL_SECONDS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(seconds) if seconds > 0 => Duration::from_secs(seconds),
                _ => {
                    return Err(ConfigError::InvalidInterval {
                        name: "CLOSURE_CHECK_INTERVAL_SECONDS",
                        value: raw,
                    });
                }
            },
            None => Duration::from_secs(DEFAULT_CLOSURE_CHECK_INTERVAL_SECONDS),
        };

        Ok(Self {
            database_url,
            closure_check_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.closure_check_interval, Duration::from_secs(60));
    }

    #[test]
    fn values_are_read() {
        let config = config(&[
            ("DATABASE_URL", "sqlite:/tmp/votes.db"),
            ("CLOSURE_CHECK_INTERVAL_SECONDS", " 15 "),
        ])
        .unwrap();
        assert_eq!(config.database_url, "sqlite:/tmp/votes.db");
        assert_eq!(config.closure_check_interval, Duration::from_secs(15));
    }

    #[test]
    fn bad_interval_is_an_error() {
        for value in ["0", "soon", "-5"] {
            assert_eq!(
                config(&[("CLOSURE_CHECK_INTERVAL_SECONDS", value)]).unwrap_err(),
                ConfigError::InvalidInterval {
                    name: "CLOSURE_CHECK_INTERVAL_SECONDS",
                    value: value.to_string(),
                }
            );
        }
    }

    #[test]
    fn blank_database_url_is_an_error() {
        assert_eq!(
            config(&[("DATABASE_URL", "  ")]).unwrap_err(),
            ConfigError::Empty("DATABASE_URL")
        );
    }
}
