//! CLI argument definitions.

use clap::{Parser, ValueEnum};

use centick_core::AssetClass;

/// Budget-aware market quote collector.
///
/// Collects quotes for the given symbols on a fixed cadence, serving each
/// lookup from the cheapest available tier: local cache, then a free
/// backend, then a paid scraping backend bounded by a hard dollar budget.
#[derive(Debug, Parser)]
#[command(
    name = "centick",
    version,
    about = "Budget-aware market quote collector",
    after_help = "Environment:\n  \
        BRIGHT_DATA_TOKEN   paid backend credential (paid tier disabled when unset)\n  \
        TOTAL_BUDGET        monetary ceiling in USD (default 5.50)\n  \
        COST_PER_REQUEST    charge per paid request in USD (default 0.0015)\n  \
        CACHE_TTL_SECONDS   cache entry lifetime (default 900)\n  \
        UPDATE_INTERVAL_SECONDS  collection cadence (default 900)\n  \
        DATA_DIR            cache and output directory (default data)\n  \
        LOG_LEVEL           DEBUG/INFO/WARNING/ERROR/CRITICAL (default INFO)"
)]
pub struct Cli {
    /// Trading symbols to track (e.g. AAPL MSFT GOOGL:US).
    #[arg(value_name = "SYMBOL")]
    pub symbols: Vec<String>,

    /// Asset class applied to every given symbol.
    #[arg(long, value_enum, default_value_t = AssetClassArg::Stocks)]
    pub asset_class: AssetClassArg,

    /// Collection interval in minutes; defaults to UPDATE_INTERVAL_SECONDS.
    #[arg(long, value_name = "MINUTES")]
    pub interval: Option<u64>,

    /// Collect once and exit instead of scheduling.
    #[arg(long, conflicts_with = "interval")]
    pub once: bool,

    /// Print collector and cache statistics, then exit.
    #[arg(long, conflicts_with_all = ["once", "budget"])]
    pub status: bool,

    /// Print budget usage and cost statistics, then exit.
    #[arg(long, conflicts_with = "once")]
    pub budget: bool,

    /// Bypass the cache and force fresh retrieval.
    #[arg(long)]
    pub force_fresh: bool,

    /// Log verbosity; overrides the LOG_LEVEL environment variable.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

/// Asset classes accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum AssetClassArg {
    Stocks,
    Forex,
    Commodities,
    Index,
    Crypto,
}

impl From<AssetClassArg> for AssetClass {
    fn from(value: AssetClassArg) -> Self {
        match value {
            AssetClassArg::Stocks => Self::Stocks,
            AssetClassArg::Forex => Self::Forex,
            AssetClassArg::Commodities => Self::Commodities,
            AssetClassArg::Index => Self::Index,
            AssetClassArg::Crypto => Self::Crypto,
        }
    }
}
