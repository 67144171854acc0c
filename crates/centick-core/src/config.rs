//! Environment-driven runtime configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::ConfigError;

const MIN_TTL_SECONDS: u64 = 60;
const MIN_INTERVAL_SECONDS: u64 = 60;

/// Runtime configuration resolved from the process environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Bearer credential for the paid backend; `None` disables the paid tier.
    pub paid_token: Option<String>,
    /// Monetary ceiling for paid requests, USD.
    pub total_budget: f64,
    /// Charge per paid request, USD.
    pub cost_per_request: f64,
    pub cache_ttl: Duration,
    /// Informational threshold surfaced in budget output; alert levels
    /// themselves are fixed.
    pub alert_threshold: f64,
    pub update_interval: Duration,
    pub request_timeout: Duration,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub max_retries: u32,
    /// Concurrency bound for batch quote fetches.
    pub batch_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paid_token: None,
            total_budget: 5.50,
            cost_per_request: 0.0015,
            cache_ttl: Duration::from_secs(900),
            alert_threshold: 0.80,
            update_interval: Duration::from_secs(900),
            request_timeout: Duration::from_secs(30),
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            log_level: String::from("INFO"),
            max_retries: 3,
            batch_concurrency: 5,
        }
    }
}

impl Config {
    /// Resolve configuration from the environment, falling back to defaults
    /// for anything unset. Invalid values are a startup error, never a
    /// silent default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            paid_token: env::var("BRIGHT_DATA_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            total_budget: parse_var("TOTAL_BUDGET", defaults.total_budget, parse_float)?,
            cost_per_request: parse_var(
                "COST_PER_REQUEST",
                defaults.cost_per_request,
                parse_float,
            )?,
            cache_ttl: Duration::from_secs(parse_var(
                "CACHE_TTL_SECONDS",
                defaults.cache_ttl.as_secs(),
                parse_seconds,
            )?),
            alert_threshold: parse_var("ALERT_THRESHOLD", defaults.alert_threshold, parse_float)?,
            update_interval: Duration::from_secs(parse_var(
                "UPDATE_INTERVAL_SECONDS",
                defaults.update_interval.as_secs(),
                parse_seconds,
            )?),
            request_timeout: Duration::from_secs(parse_var(
                "REQUEST_TIMEOUT",
                defaults.request_timeout.as_secs(),
                parse_seconds,
            )?),
            data_dir: env::var_os("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            log_dir: env::var_os("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            max_retries: parse_var("MAX_RETRIES", defaults.max_retries, parse_u32)?,
            batch_concurrency: defaults.batch_concurrency,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_budget <= 0.0 {
            return Err(ConfigError::Invalid {
                name: "TOTAL_BUDGET",
                value: self.total_budget.to_string(),
                reason: "must be greater than zero",
            });
        }
        if self.cost_per_request <= 0.0 {
            return Err(ConfigError::Invalid {
                name: "COST_PER_REQUEST",
                value: self.cost_per_request.to_string(),
                reason: "must be greater than zero",
            });
        }
        if self.cache_ttl.as_secs() < MIN_TTL_SECONDS {
            return Err(ConfigError::Invalid {
                name: "CACHE_TTL_SECONDS",
                value: self.cache_ttl.as_secs().to_string(),
                reason: "must be at least 60 seconds",
            });
        }
        if self.update_interval.as_secs() < MIN_INTERVAL_SECONDS {
            return Err(ConfigError::Invalid {
                name: "UPDATE_INTERVAL_SECONDS",
                value: self.update_interval.as_secs().to_string(),
                reason: "must be at least 60 seconds",
            });
        }
        Ok(())
    }

    pub fn paid_enabled(&self) -> bool {
        self.paid_token.is_some()
    }

    /// Credential for the paid backend, or a startup error if it is required.
    pub fn require_paid_token(&self) -> Result<&str, ConfigError> {
        self.paid_token
            .as_deref()
            .ok_or(ConfigError::Missing {
                name: "BRIGHT_DATA_TOKEN",
            })
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.data_dir.join("quote_cache.db")
    }

    pub fn cost_state_path(&self) -> PathBuf {
        self.log_dir.join("cost_tracking.json")
    }
}

fn parse_var<T, F>(name: &'static str, default: T, parse: F) -> Result<T, ConfigError>
where
    F: Fn(&'static str, &str) -> Result<T, ConfigError>,
{
    match env::var(name) {
        Ok(raw) => parse(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_float(name: &'static str, raw: &str) -> Result<f64, ConfigError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ConfigError::Invalid {
            name,
            value: raw.to_owned(),
            reason: "expected a finite decimal number",
        })
}

fn parse_seconds(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_owned(),
        reason: "expected a whole number of seconds",
    })
}

fn parse_u32(name: &'static str, raw: &str) -> Result<u32, ConfigError> {
    raw.trim().parse::<u32>().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_owned(),
        reason: "expected a whole number",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.total_budget, 5.50);
        assert_eq!(config.cost_per_request, 0.0015);
        assert_eq!(config.cache_ttl, Duration::from_secs(900));
        assert_eq!(config.update_interval, Duration::from_secs(900));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.batch_concurrency, 5);
        assert!(!config.paid_enabled());
    }

    #[test]
    fn rejects_non_positive_budget() {
        let config = Config {
            total_budget: 0.0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                name: "TOTAL_BUDGET",
                ..
            })
        ));
    }

    #[test]
    fn rejects_sub_minute_ttl() {
        let config = Config {
            cache_ttl: Duration::from_secs(5),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_paid_token_is_a_config_error_when_required() {
        let config = Config::default();
        assert!(matches!(
            config.require_paid_token(),
            Err(ConfigError::Missing {
                name: "BRIGHT_DATA_TOKEN"
            })
        ));
    }

    #[test]
    fn parses_floats_strictly() {
        assert!(parse_float("TOTAL_BUDGET", "5.5").is_ok());
        assert!(parse_float("TOTAL_BUDGET", "NaN").is_err());
        assert!(parse_float("TOTAL_BUDGET", "five").is_err());
    }
}
