use centick_core::{CacheError, ConfigError, ValidationError};

/// CLI failures mapped onto process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("cache unavailable: {0}")]
    Cache(#[from] CacheError),

    #[error("no quotes could be retrieved")]
    NoQuotes,

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CliError {
    /// 1 for configuration problems, 2 for operational failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::InvalidArgument(_) | Self::Validation(_) => 1,
            Self::Cache(_) | Self::NoQuotes | Self::Io(_) | Self::Serialization(_) => 2,
        }
    }
}

/// Exit code reported after a SIGINT-triggered shutdown.
pub const EXIT_INTERRUPTED: i32 = 130;
