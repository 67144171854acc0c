//! Priority cascade over cache, free and paid quote sources.
//!
//! Per symbol the order is fixed: cache, then the free backend, then the
//! paid backend gated by both its breaker and the budget predicate. Each
//! tier's failure is absorbed and the cascade continues; the absence of a
//! quote is a reported value, never an error. Batch fetches fan out with
//! bounded concurrency and one symbol's failure never cancels its siblings.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::backend::{FetchRequest, QuoteBackend};
use crate::cache::QuoteCache;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStatistics};
use crate::clock::Clock;
use crate::convert;
use crate::cost::CostTracker;
use crate::{AssetClass, Quote, QuoteSource, Symbol};

/// Why a symbol could not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    /// Every admitted tier was tried and failed.
    AllSourcesFailed,
    /// The paid tier would have been needed but the budget denied it.
    BudgetExhausted,
}

/// Per-symbol result of a cascade walk.
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteOutcome {
    Quote(Quote),
    Unavailable(MissReason),
}

impl QuoteOutcome {
    pub fn quote(&self) -> Option<&Quote> {
        match self {
            Self::Quote(quote) => Some(quote),
            Self::Unavailable(_) => None,
        }
    }

    pub fn into_quote(self) -> Option<Quote> {
        match self {
            Self::Quote(quote) => Some(quote),
            Self::Unavailable(_) => None,
        }
    }

    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Quote(_))
    }
}

/// Tuning for the cascade.
#[derive(Debug, Clone)]
pub struct HybridSourceConfig {
    pub request_timeout: Duration,
    pub batch_concurrency: usize,
    pub free_breaker: CircuitBreakerConfig,
    pub paid_breaker: CircuitBreakerConfig,
}

impl Default for HybridSourceConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            batch_concurrency: 5,
            free_breaker: CircuitBreakerConfig::free_tier(),
            paid_breaker: CircuitBreakerConfig::paid_tier(),
        }
    }
}

#[derive(Debug, Default)]
struct SourceCounters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    free_successes: AtomicU64,
    free_failures: AtomicU64,
    paid_successes: AtomicU64,
    paid_failures: AtomicU64,
    paid_charged: AtomicU64,
}

/// Usage snapshot for one backend tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendUsage {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate_pct: f64,
    pub total_cost: f64,
    pub circuit: CircuitStatistics,
}

/// Aggregated cascade statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatistics {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate_pct: f64,
    pub free: BackendUsage,
    pub paid: BackendUsage,
}

/// The composed quote source.
pub struct HybridSource {
    cache: Arc<QuoteCache>,
    cost_tracker: Arc<CostTracker>,
    free_backend: Arc<dyn QuoteBackend>,
    paid_backend: Option<Arc<dyn QuoteBackend>>,
    free_breaker: CircuitBreaker,
    paid_breaker: CircuitBreaker,
    config: HybridSourceConfig,
    counters: SourceCounters,
}

impl HybridSource {
    pub fn new(
        cache: Arc<QuoteCache>,
        cost_tracker: Arc<CostTracker>,
        free_backend: Arc<dyn QuoteBackend>,
        paid_backend: Option<Arc<dyn QuoteBackend>>,
        clock: Arc<dyn Clock>,
        config: HybridSourceConfig,
    ) -> Self {
        Self {
            free_breaker: CircuitBreaker::new("free", config.free_breaker, clock.clone()),
            paid_breaker: CircuitBreaker::new("paid", config.paid_breaker, clock),
            cache,
            cost_tracker,
            free_backend,
            paid_backend,
            config,
            counters: SourceCounters::default(),
        }
    }

    /// Walk the cascade for one symbol.
    pub async fn get_quote(
        &self,
        symbol: &Symbol,
        asset_class: AssetClass,
        force_fresh: bool,
    ) -> QuoteOutcome {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);

        if !force_fresh {
            if let Some(quote) = self.cache.get(asset_class, symbol).await {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%symbol, class = %asset_class, "served from cache");
                return QuoteOutcome::Quote(quote);
            }
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        if let Some(quote) = self.try_free(symbol, asset_class).await {
            return QuoteOutcome::Quote(quote);
        }

        match self.try_paid(symbol, asset_class).await {
            PaidAttempt::Served(quote) => QuoteOutcome::Quote(quote),
            PaidAttempt::Failed | PaidAttempt::Skipped => {
                tracing::warn!(%symbol, class = %asset_class, "no source could serve the symbol");
                QuoteOutcome::Unavailable(MissReason::AllSourcesFailed)
            }
            PaidAttempt::BudgetDenied => {
                QuoteOutcome::Unavailable(MissReason::BudgetExhausted)
            }
        }
    }

    async fn try_free(&self, symbol: &Symbol, asset_class: AssetClass) -> Option<Quote> {
        let native = convert::free_symbol(symbol, asset_class)?;
        let request = FetchRequest::new(
            symbol.clone(),
            native,
            asset_class,
            self.config.request_timeout,
        );

        match self
            .free_breaker
            .call(self.free_backend.fetch_quote(request))
            .await
        {
            Ok(Ok(quote)) => {
                self.counters.free_successes.fetch_add(1, Ordering::Relaxed);
                let quote = quote.tagged(QuoteSource::Free);
                self.cache.set(asset_class, symbol, &quote).await;
                tracing::info!(%symbol, price = quote.price, "served from free backend");
                Some(quote)
            }
            Ok(Err(error)) => {
                self.counters.free_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%symbol, %error, "free backend failed");
                None
            }
            Err(rejection) => {
                tracing::debug!(%symbol, recovery_in = ?rejection.recovery_in, "free circuit open");
                None
            }
        }
    }

    async fn try_paid(&self, symbol: &Symbol, asset_class: AssetClass) -> PaidAttempt {
        let Some(paid_backend) = &self.paid_backend else {
            return PaidAttempt::Skipped;
        };
        if !self.paid_breaker.is_available() {
            return PaidAttempt::Skipped;
        }

        // Budget is checked before the breaker claims the call so a denied
        // request neither charges nor counts against the backend.
        let check = self.cost_tracker.can_make_request();
        if !check.allowed {
            tracing::warn!(
                %symbol,
                reason = check.reason.as_deref().unwrap_or("budget exhausted"),
                "paid backend skipped"
            );
            return PaidAttempt::BudgetDenied;
        }

        let native = convert::paid_symbol(symbol, asset_class);
        let request = FetchRequest::new(
            symbol.clone(),
            native,
            asset_class,
            self.config.request_timeout,
        );

        match self.paid_breaker.call(paid_backend.fetch_quote(request)).await {
            Ok(Ok(quote)) => {
                self.counters.paid_successes.fetch_add(1, Ordering::Relaxed);
                self.counters.paid_charged.fetch_add(1, Ordering::Relaxed);
                let accounting = self.cost_tracker.record_request(asset_class, symbol, true);
                let quote = quote.tagged(QuoteSource::Paid);
                self.cache.set(asset_class, symbol, &quote).await;
                tracing::info!(
                    %symbol,
                    price = quote.price,
                    total_cost = accounting.total_cost,
                    alert = accounting.alert_level.as_str(),
                    "served from paid backend"
                );
                PaidAttempt::Served(quote)
            }
            Ok(Err(error)) => {
                self.counters.paid_failures.fetch_add(1, Ordering::Relaxed);
                if error.remote_reached() {
                    self.counters.paid_charged.fetch_add(1, Ordering::Relaxed);
                    self.cost_tracker.record_request(asset_class, symbol, false);
                    tracing::warn!(%symbol, %error, "paid backend failed, request charged");
                } else {
                    tracing::warn!(%symbol, %error, "paid call cancelled before dispatch, not charged");
                }
                PaidAttempt::Failed
            }
            Err(rejection) => {
                tracing::debug!(%symbol, recovery_in = ?rejection.recovery_in, "paid circuit open");
                PaidAttempt::Skipped
            }
        }
    }

    /// Fetch a batch concurrently. Outcomes are keyed by symbol; ordering
    /// across symbols is not significant.
    pub async fn get_quotes(
        &self,
        symbols: &[Symbol],
        asset_class: AssetClass,
        force_fresh: bool,
    ) -> BTreeMap<Symbol, QuoteOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.batch_concurrency.max(1)));

        let tasks = symbols.iter().map(|symbol| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("batch semaphore is never closed");
                let outcome = self.get_quote(symbol, asset_class, force_fresh).await;
                (symbol.clone(), outcome)
            }
        });

        futures::future::join_all(tasks).await.into_iter().collect()
    }

    pub fn free_breaker(&self) -> &CircuitBreaker {
        &self.free_breaker
    }

    pub fn paid_breaker(&self) -> &CircuitBreaker {
        &self.paid_breaker
    }

    pub fn cache(&self) -> &Arc<QuoteCache> {
        &self.cache
    }

    pub fn cost_tracker(&self) -> &Arc<CostTracker> {
        &self.cost_tracker
    }

    pub fn statistics(&self) -> SourceStatistics {
        let hits = self.counters.cache_hits.load(Ordering::Relaxed);
        let misses = self.counters.cache_misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let cache_hit_rate_pct = if lookups > 0 {
            hits as f64 / lookups as f64 * 100.0
        } else {
            0.0
        };

        SourceStatistics {
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate_pct,
            free: usage(
                self.counters.free_successes.load(Ordering::Relaxed),
                self.counters.free_failures.load(Ordering::Relaxed),
                0.0,
                self.free_breaker.statistics(),
            ),
            paid: usage(
                self.counters.paid_successes.load(Ordering::Relaxed),
                self.counters.paid_failures.load(Ordering::Relaxed),
                self.counters.paid_charged.load(Ordering::Relaxed) as f64
                    * self.cost_tracker.cost_per_request(),
                self.paid_breaker.statistics(),
            ),
        }
    }
}

enum PaidAttempt {
    Served(Quote),
    Failed,
    BudgetDenied,
    Skipped,
}

fn usage(successes: u64, failures: u64, total_cost: f64, circuit: CircuitStatistics) -> BackendUsage {
    let attempts = successes + failures;
    let success_rate_pct = if attempts > 0 {
        successes as f64 / attempts as f64 * 100.0
    } else {
        0.0
    };
    BackendUsage {
        attempts,
        successes,
        failures,
        success_rate_pct,
        total_cost,
        circuit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FetchFuture;
    use crate::clock::ManualClock;
    use crate::{FetchError, UtcDateTime};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend double that replays a script of outcomes, then repeats the
    /// last entry forever.
    struct ScriptedBackend {
        name: &'static str,
        source: QuoteSource,
        script: Mutex<VecDeque<Result<f64, FetchError>>>,
        fallback: Result<f64, FetchError>,
        calls: AtomicU64,
    }

    impl ScriptedBackend {
        fn always_price(name: &'static str, source: QuoteSource, price: f64) -> Arc<Self> {
            Arc::new(Self {
                name,
                source,
                script: Mutex::new(VecDeque::new()),
                fallback: Ok(price),
                calls: AtomicU64::new(0),
            })
        }

        fn always_failing(name: &'static str, source: QuoteSource, error: FetchError) -> Arc<Self> {
            Arc::new(Self {
                name,
                source,
                script: Mutex::new(VecDeque::new()),
                fallback: Err(error),
                calls: AtomicU64::new(0),
            })
        }

        fn scripted(
            name: &'static str,
            source: QuoteSource,
            script: Vec<Result<f64, FetchError>>,
            fallback: Result<f64, FetchError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                source,
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicU64::new(0),
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl QuoteBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn fetch_quote<'a>(&'a self, request: FetchRequest) -> FetchFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::Relaxed);
                let next = self
                    .script
                    .lock()
                    .expect("script lock not poisoned")
                    .pop_front()
                    .unwrap_or_else(|| self.fallback.clone());
                let price = next?;
                Quote::new(
                    request.symbol,
                    request.asset_class,
                    price,
                    self.source,
                    UtcDateTime::now(),
                )
                .map_err(|error| FetchError::parse(error.to_string()))
            })
        }
    }

    struct Harness {
        source: HybridSource,
        clock: Arc<ManualClock>,
        _dir: tempfile::TempDir,
    }

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw).expect("valid symbol")
    }

    async fn harness(
        free: Arc<ScriptedBackend>,
        paid: Option<Arc<ScriptedBackend>>,
        budget: f64,
        config: HybridSourceConfig,
    ) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::starting_at(
            UtcDateTime::parse("2024-05-01T09:00:00Z").expect("valid"),
        ));
        let cache = Arc::new(
            QuoteCache::open(
                dir.path().join("quote_cache.db"),
                Duration::from_secs(60),
                clock.clone(),
            )
            .await
            .expect("cache opens"),
        );
        let cost_tracker = Arc::new(CostTracker::open(
            dir.path().join("cost_tracking.json"),
            budget,
            0.0015,
            clock.clone(),
        ));

        let source = HybridSource::new(
            cache,
            cost_tracker,
            free,
            paid.map(|paid| paid as Arc<dyn QuoteBackend>),
            clock.clone(),
            config,
        );

        Harness {
            source,
            clock,
            _dir: dir,
        }
    }

    fn serial_config() -> HybridSourceConfig {
        HybridSourceConfig {
            batch_concurrency: 1,
            ..HybridSourceConfig::default()
        }
    }

    #[tokio::test]
    async fn cache_short_circuits_the_second_read() {
        let free = ScriptedBackend::always_price("free", QuoteSource::Free, 100.0);
        let harness = harness(free.clone(), None, 5.50, serial_config()).await;

        let first = harness
            .source
            .get_quote(&symbol("AAPL"), AssetClass::Stocks, false)
            .await;
        let first = first.quote().expect("free tier serves");
        assert_eq!(first.source, QuoteSource::Free);
        assert_eq!(first.price, 100.0);

        let second = harness
            .source
            .get_quote(&symbol("AAPL"), AssetClass::Stocks, false)
            .await;
        let second = second.quote().expect("cache serves");
        assert_eq!(second.source, QuoteSource::Cache);
        assert_eq!(free.calls(), 1, "no second adapter call");

        let stats = harness.source.statistics();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn force_fresh_bypasses_the_cache() {
        let free = ScriptedBackend::always_price("free", QuoteSource::Free, 100.0);
        let harness = harness(free.clone(), None, 5.50, serial_config()).await;

        for _ in 0..2 {
            harness
                .source
                .get_quote(&symbol("AAPL"), AssetClass::Stocks, true)
                .await;
        }
        assert_eq!(free.calls(), 2);
    }

    #[tokio::test]
    async fn falls_back_from_free_to_paid() {
        let free = ScriptedBackend::always_failing(
            "free",
            QuoteSource::Free,
            FetchError::server("upstream 500"),
        );
        let paid = ScriptedBackend::always_price("paid", QuoteSource::Paid, 101.0);
        let harness = harness(free, Some(paid), 5.50, serial_config()).await;

        let outcome = harness
            .source
            .get_quote(&symbol("AAPL:US"), AssetClass::Stocks, false)
            .await;
        let quote = outcome.quote().expect("paid tier serves");
        assert_eq!(quote.source, QuoteSource::Paid);
        assert_eq!(quote.price, 101.0);

        let cost = harness.source.cost_tracker().statistics();
        assert_eq!(cost.total_requests, 1);
        assert_eq!(cost.total_cost, 0.0015);

        let stats = harness.source.statistics();
        assert_eq!(stats.free.failures, 1);
        assert_eq!(stats.free.circuit.consecutive_failures, 1);
        assert_eq!(stats.paid.successes, 1);
        assert_eq!(stats.paid.total_cost, 0.0015);
    }

    #[tokio::test]
    async fn budget_exhaustion_mid_batch_spares_completed_work() {
        let free = ScriptedBackend::always_failing(
            "free",
            QuoteSource::Free,
            FetchError::server("upstream 500"),
        );
        let paid = ScriptedBackend::always_price("paid", QuoteSource::Paid, 42.0);
        // Budget covers exactly two paid requests.
        let harness = harness(free, Some(paid), 0.003, serial_config()).await;

        let symbols = vec![symbol("A"), symbol("B"), symbol("C")];
        let outcomes = harness
            .source
            .get_quotes(&symbols, AssetClass::Stocks, false)
            .await;

        let served: Vec<_> = outcomes
            .values()
            .filter_map(|outcome| outcome.quote())
            .collect();
        assert_eq!(served.len(), 2);
        assert!(served.iter().all(|quote| quote.source == QuoteSource::Paid));

        let denied: Vec<_> = outcomes
            .values()
            .filter(|outcome| {
                matches!(outcome, QuoteOutcome::Unavailable(MissReason::BudgetExhausted))
            })
            .collect();
        assert_eq!(denied.len(), 1);

        let cost = harness.source.cost_tracker().statistics();
        assert_eq!(cost.total_cost, 0.003);
        assert_eq!(cost.total_requests, 2);
    }

    #[tokio::test]
    async fn breaker_trips_then_recovers_with_one_probe() {
        let free = ScriptedBackend::scripted(
            "free",
            QuoteSource::Free,
            vec![
                Err(FetchError::server("down")),
                Err(FetchError::server("down")),
                Err(FetchError::server("down")),
            ],
            Ok(100.0),
        );
        let paid = ScriptedBackend::always_price("paid", QuoteSource::Paid, 101.0);
        let config = HybridSourceConfig {
            free_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_window: Duration::from_secs(5),
                success_threshold: 1,
            },
            ..serial_config()
        };
        let harness = harness(free.clone(), Some(paid.clone()), 5.50, config).await;

        // Three failing calls trip the free breaker; paid serves each time.
        for _ in 0..3 {
            let outcome = harness
                .source
                .get_quote(&symbol("AAPL"), AssetClass::Stocks, true)
                .await;
            assert_eq!(outcome.quote().expect("paid serves").source, QuoteSource::Paid);
        }
        assert_eq!(free.calls(), 3);
        assert!(!harness.source.free_breaker().is_available());

        // Within the window the free adapter is never invoked.
        let outcome = harness
            .source
            .get_quote(&symbol("AAPL"), AssetClass::Stocks, true)
            .await;
        assert_eq!(outcome.quote().expect("paid serves").source, QuoteSource::Paid);
        assert_eq!(free.calls(), 3);

        // After the window one probe is admitted and succeeds.
        harness.clock.advance(Duration::from_secs(5));
        let outcome = harness
            .source
            .get_quote(&symbol("AAPL"), AssetClass::Stocks, true)
            .await;
        assert_eq!(outcome.quote().expect("free probe serves").source, QuoteSource::Free);
        assert_eq!(free.calls(), 4);
        assert!(harness.source.free_breaker().is_available());
    }

    #[tokio::test]
    async fn cancelled_paid_calls_are_not_charged() {
        let free = ScriptedBackend::always_failing(
            "free",
            QuoteSource::Free,
            FetchError::server("down"),
        );
        let paid = ScriptedBackend::always_failing(
            "paid",
            QuoteSource::Paid,
            FetchError::cancelled("ctx dropped before dispatch"),
        );
        let harness = harness(free, Some(paid), 5.50, serial_config()).await;

        let outcome = harness
            .source
            .get_quote(&symbol("AAPL"), AssetClass::Stocks, false)
            .await;
        assert!(matches!(
            outcome,
            QuoteOutcome::Unavailable(MissReason::AllSourcesFailed)
        ));

        let cost = harness.source.cost_tracker().statistics();
        assert_eq!(cost.total_requests, 0);
        assert_eq!(cost.total_cost, 0.0);
    }

    #[tokio::test]
    async fn charged_paid_failures_advance_spend() {
        let free = ScriptedBackend::always_failing(
            "free",
            QuoteSource::Free,
            FetchError::server("down"),
        );
        let paid = ScriptedBackend::always_failing(
            "paid",
            QuoteSource::Paid,
            FetchError::parse("page blocked"),
        );
        let harness = harness(free, Some(paid), 5.50, serial_config()).await;

        let outcome = harness
            .source
            .get_quote(&symbol("AAPL"), AssetClass::Stocks, false)
            .await;
        assert!(!outcome.is_available());

        let cost = harness.source.cost_tracker().statistics();
        assert_eq!(cost.total_requests, 1);
        assert_eq!(cost.failed_requests, 1);
        assert_eq!(cost.total_cost, 0.0015);
    }

    #[tokio::test]
    async fn index_symbols_skip_the_free_tier() {
        let free = ScriptedBackend::always_price("free", QuoteSource::Free, 1.0);
        let paid = ScriptedBackend::always_price("paid", QuoteSource::Paid, 65000.0);
        let harness = harness(free.clone(), Some(paid), 5.50, serial_config()).await;

        let outcome = harness
            .source
            .get_quote(&symbol("SENSEX"), AssetClass::Index, false)
            .await;
        assert_eq!(outcome.quote().expect("paid serves").source, QuoteSource::Paid);
        assert_eq!(free.calls(), 0);
    }

    #[tokio::test]
    async fn without_paid_backend_failures_surface_as_all_sources_failed() {
        let free = ScriptedBackend::always_failing(
            "free",
            QuoteSource::Free,
            FetchError::server("down"),
        );
        let harness = harness(free, None, 5.50, serial_config()).await;

        let outcome = harness
            .source
            .get_quote(&symbol("AAPL"), AssetClass::Stocks, false)
            .await;
        assert!(matches!(
            outcome,
            QuoteOutcome::Unavailable(MissReason::AllSourcesFailed)
        ));
    }
}
