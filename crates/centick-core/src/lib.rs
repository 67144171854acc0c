//! # Centick Core
//!
//! Cost-optimized market quote collection for a tracked set of symbols.
//!
//! The crate composes five cooperating pieces:
//!
//! - **Cost tracker**: enforces a hard monetary budget against the paid
//!   backend and persists every charge to a JSON ledger.
//! - **Quote cache**: a durable SQLite store that deduplicates backend
//!   calls within a TTL window.
//! - **Circuit breakers**: one per backend, short-circuiting calls to a
//!   failing provider and probing for recovery.
//! - **Hybrid source**: the priority cascade (cache, then free, then paid)
//!   that serves every quote at minimum monetary cost.
//! - **Scheduler**: periodic collection plus the midnight budget reset and
//!   the hourly cache sweep.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Backend adapters (free chart API, paid scraper) |
//! | [`backend`] | Backend adapter contract |
//! | [`cache`] | Durable TTL quote cache |
//! | [`circuit_breaker`] | Per-backend circuit breaker |
//! | [`clock`] | Injectable wall clock |
//! | [`config`] | Environment-driven configuration |
//! | [`convert`] | Symbol conversion tables |
//! | [`cost`] | Budget accounting and persistence |
//! | [`domain`] | Domain models (Quote, Symbol, AssetClass) |
//! | [`error`] | Core error types |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`hybrid`] | Priority cascade over cache/free/paid |
//! | [`retry`] | Backoff policy for the paid adapter |
//! | [`scheduler`] | Periodic collection driver |
//! | [`sink`] | Quote output sinks (CSV, JSONL) |
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use centick_core::{
//!     AssetClass, Config, CostTracker, FreeAdapter, HybridSource,
//!     HybridSourceConfig, QuoteCache, Symbol, SystemClock,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let clock = Arc::new(SystemClock);
//!
//!     let cache = Arc::new(
//!         QuoteCache::open(config.cache_db_path(), config.cache_ttl, clock.clone()).await?,
//!     );
//!     let tracker = Arc::new(CostTracker::open(
//!         config.cost_state_path(),
//!         config.total_budget,
//!         config.cost_per_request,
//!         clock.clone(),
//!     ));
//!
//!     let source = HybridSource::new(
//!         cache,
//!         tracker,
//!         Arc::new(FreeAdapter::default()),
//!         None,
//!         clock,
//!         HybridSourceConfig::default(),
//!     );
//!
//!     let symbol = Symbol::parse("AAPL")?;
//!     if let Some(quote) = source
//!         .get_quote(&symbol, AssetClass::Stocks, false)
//!         .await
//!         .into_quote()
//!     {
//!         println!("{}: {} ({})", quote.symbol, quote.price, quote.source);
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod backend;
pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod convert;
pub mod cost;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod hybrid;
pub mod retry;
pub mod scheduler;
pub mod sink;

// Re-export commonly used types at the crate root for convenience.

pub use adapters::{FreeAdapter, PaidAdapter, PaidAdapterConfig};
pub use backend::{FetchFuture, FetchRequest, QuoteBackend};
pub use cache::{CacheKeyStats, CacheStatistics, QuoteCache};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatistics,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use cost::{Accounting, AlertLevel, BudgetCheck, CostStatistics, CostTracker, DailyUsage};
pub use domain::{validate_currency_code, AssetClass, Quote, QuoteSource, Symbol, UtcDateTime};
pub use error::{
    CacheError, CircuitOpen, ConfigError, CoreError, CostStateError, FetchError, FetchErrorKind,
    ValidationError,
};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, NoopHttpClient,
    ReqwestHttpClient,
};
pub use hybrid::{
    BackendUsage, HybridSource, HybridSourceConfig, MissReason, QuoteOutcome, SourceStatistics,
};
pub use retry::{Backoff, RetryConfig};
pub use scheduler::{
    CollectionReport, QuoteScheduler, SchedulerConfig, SchedulerStatistics, TrackedSymbol,
};
pub use sink::{CsvSink, JsonlSink, QuoteSink};
