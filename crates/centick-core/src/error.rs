use std::time::Duration;

use thiserror::Error;

/// Validation and contract errors exposed by `centick-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid asset class '{value}', expected one of stocks, forex, commodities, index, crypto")]
    InvalidAssetClass { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("currency must be a 3-letter uppercase ISO code: '{value}'")]
    InvalidCurrency { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be greater than zero")]
    NonPositiveValue { field: &'static str },
    #[error("'{low}' must not exceed '{high}'")]
    InvalidRange {
        low: &'static str,
        high: &'static str,
    },
}

/// Classification of a backend fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Credential rejected (401/403). Fatal for the adapter; never retried.
    Auth,
    /// Remote asked us to back off (429).
    RateLimited,
    /// Remote returned a 5xx.
    Server,
    /// The request was dispatched but failed in flight.
    Transport,
    /// The remote answered but the payload could not be normalized.
    Parse,
    /// The call was cancelled before any network request was dispatched.
    Cancelled,
}

/// Structured backend adapter error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Auth, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::RateLimited, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Server, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transport, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Parse, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Cancelled, message)
    }

    /// Map an HTTP status to the matching failure kind.
    pub fn from_status(status: u16, body_preview: &str) -> Self {
        let message = format!("status {status}: {body_preview}");
        match status {
            401 | 403 => Self::auth(message),
            429 => Self::rate_limited(message),
            500..=599 => Self::server(message),
            _ => Self::transport(message),
        }
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transient failures worth another attempt inside a single adapter call.
    pub const fn retryable(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::RateLimited | FetchErrorKind::Server | FetchErrorKind::Transport
        )
    }

    /// Whether a network request actually reached (or was dispatched toward)
    /// the remote. The paid tier is charged only for such definite outcomes.
    pub const fn remote_reached(&self) -> bool {
        !matches!(self.kind, FetchErrorKind::Cancelled)
    }
}

/// Rejection from a breaker currently refusing calls to its backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit for '{backend}' is open, retry in {recovery_in:?}")]
pub struct CircuitOpen {
    pub backend: &'static str,
    pub recovery_in: Duration,
}

/// Failures inside the quote cache. Always absorbed by the cache wrapper:
/// reads degrade to a miss and writes are best-effort.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("cached payload for '{key}' is not decodable: {source}")]
    Payload {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Invalid or missing configuration; fatal at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {name} is required but not set")]
    Missing { name: &'static str },
    #[error("environment variable {name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Failures around the cost ledger itself (not budget denial, which is a
/// normal predicate outcome).
#[derive(Debug, Error)]
pub enum CostStateError {
    #[error("reset requires explicit confirmation")]
    ResetNotConfirmed,
    #[error("cost state persistence failed: {0}")]
    Persistence(#[from] std::io::Error),
}

/// Top-level error for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    CostState(#[from] CostStateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_codes_to_kinds() {
        assert_eq!(FetchError::from_status(401, "").kind(), FetchErrorKind::Auth);
        assert_eq!(
            FetchError::from_status(429, "").kind(),
            FetchErrorKind::RateLimited
        );
        assert_eq!(
            FetchError::from_status(503, "").kind(),
            FetchErrorKind::Server
        );
        assert_eq!(
            FetchError::from_status(404, "").kind(),
            FetchErrorKind::Transport
        );
    }

    #[test]
    fn auth_and_parse_are_not_retryable() {
        assert!(!FetchError::auth("denied").retryable());
        assert!(!FetchError::parse("garbled").retryable());
        assert!(FetchError::server("boom").retryable());
        assert!(FetchError::rate_limited("slow down").retryable());
    }

    #[test]
    fn only_cancelled_skips_charging() {
        assert!(FetchError::auth("denied").remote_reached());
        assert!(FetchError::transport("reset").remote_reached());
        assert!(!FetchError::cancelled("ctx dropped").remote_reached());
    }
}
