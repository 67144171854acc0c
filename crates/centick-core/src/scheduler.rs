//! Periodic collection driver.
//!
//! Three jobs run for the life of the scheduler: quote collection on the
//! configured cadence, a budget reset at local midnight, and an hourly
//! cache sweep. Exactly one collection is active at any moment; a tick that
//! would overlap a still-running collection is skipped rather than queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use time::UtcOffset;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::hybrid::{HybridSource, MissReason, QuoteOutcome};
use crate::sink::QuoteSink;
use crate::{AssetClass, Symbol, UtcDateTime};

/// One entry in the tracked set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedSymbol {
    pub symbol: Symbol,
    pub asset_class: AssetClass,
}

/// Scheduler cadence and shutdown tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub collection_interval: Duration,
    pub sweep_interval: Duration,
    /// Upper bound on waiting for in-flight work during `stop(wait=true)`.
    pub shutdown_grace: Duration,
    pub force_fresh: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(30),
            force_fresh: false,
        }
    }
}

/// Outcome summary of one collection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionReport {
    pub attempted: usize,
    pub collected: usize,
    pub failed: usize,
    pub budget_denied: usize,
}

#[derive(Debug, Default)]
struct JobCounters {
    total_collections: AtomicU64,
    successful_collections: AtomicU64,
    failed_collections: AtomicU64,
    quotes_collected: AtomicU64,
    budget_resets: AtomicU64,
    cache_sweeps: AtomicU64,
}

#[derive(Debug, Default)]
struct LastActivity {
    collection: Mutex<Option<UtcDateTime>>,
    budget_reset: Mutex<Option<UtcDateTime>>,
    cache_sweep: Mutex<Option<UtcDateTime>>,
}

/// Scheduler statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatistics {
    pub is_running: bool,
    pub collection_interval_seconds: u64,
    pub symbols_tracked: usize,
    pub total_collections: u64,
    pub successful_collections: u64,
    pub failed_collections: u64,
    pub quotes_collected: u64,
    pub budget_resets: u64,
    pub cache_sweeps: u64,
    pub last_collection_at: Option<UtcDateTime>,
    pub last_budget_reset_at: Option<UtcDateTime>,
    pub last_cache_sweep_at: Option<UtcDateTime>,
}

struct SchedulerInner {
    source: Arc<HybridSource>,
    sinks: tokio::sync::Mutex<Vec<Box<dyn QuoteSink>>>,
    symbols: RwLock<Vec<TrackedSymbol>>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    local_offset: UtcOffset,
    /// Serializes collection runs; ticks use `try_lock` and skip.
    run_guard: tokio::sync::Mutex<()>,
    counters: JobCounters,
    last: LastActivity,
}

/// Periodic driver owning the hybrid source and the sinks.
pub struct QuoteScheduler {
    inner: Arc<SchedulerInner>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl QuoteScheduler {
    pub fn new(
        source: Arc<HybridSource>,
        sinks: Vec<Box<dyn QuoteSink>>,
        symbols: Vec<TrackedSymbol>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let local_offset = UtcOffset::current_local_offset().unwrap_or_else(|_| {
            tracing::warn!("local UTC offset unavailable, budget resets use UTC midnight");
            UtcOffset::UTC
        });

        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                source,
                sinks: tokio::sync::Mutex::new(sinks),
                symbols: RwLock::new(symbols),
                config,
                clock,
                local_offset,
                run_guard: tokio::sync::Mutex::new(()),
                counters: JobCounters::default(),
                last: LastActivity::default(),
            }),
            shutdown,
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Install the three jobs and begin scheduling. The first collection
    /// runs immediately rather than waiting a full interval.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("scheduler is already running");
            return;
        }

        let mut handles = self.handles.lock().expect("handle lock not poisoned");
        handles.push(tokio::spawn(collection_loop(
            Arc::clone(&self.inner),
            self.shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(budget_reset_loop(
            Arc::clone(&self.inner),
            self.shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(sweep_loop(
            Arc::clone(&self.inner),
            self.shutdown.subscribe(),
        )));

        tracing::info!(
            symbols = self.inner.symbols.read().expect("symbol lock not poisoned").len(),
            interval_secs = self.inner.config.collection_interval.as_secs(),
            "scheduler started"
        );
    }

    /// Cancel scheduling. With `wait` the call blocks until in-flight work
    /// concludes, bounded by the configured grace period.
    pub async fn stop(&self, wait: bool) {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("scheduler is not running");
            return;
        }

        let _ = self.shutdown.send(true);
        let handles: Vec<_> = self
            .handles
            .lock()
            .expect("handle lock not poisoned")
            .drain(..)
            .collect();

        if wait {
            let grace = self.inner.config.shutdown_grace;
            for handle in handles {
                if tokio::time::timeout(grace, handle).await.is_err() {
                    tracing::warn!("scheduler job did not stop within the grace period");
                }
            }
        } else {
            for handle in handles {
                handle.abort();
            }
        }

        let mut sinks = self.inner.sinks.lock().await;
        for sink in sinks.iter_mut() {
            if let Err(error) = sink.flush() {
                tracing::warn!(sink = sink.name(), %error, "sink flush failed on shutdown");
            }
        }

        tracing::info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Track another symbol from the next collection tick onward.
    pub fn add_symbol(&self, symbol: Symbol, asset_class: AssetClass) -> bool {
        let mut symbols = self
            .inner
            .symbols
            .write()
            .expect("symbol lock not poisoned");
        if symbols.iter().any(|tracked| tracked.symbol == symbol) {
            tracing::warn!(%symbol, "symbol is already tracked");
            return false;
        }
        tracing::info!(%symbol, class = %asset_class, "tracking symbol");
        symbols.push(TrackedSymbol {
            symbol,
            asset_class,
        });
        true
    }

    /// Stop tracking a symbol from the next collection tick onward.
    pub fn remove_symbol(&self, symbol: &Symbol) -> bool {
        let mut symbols = self
            .inner
            .symbols
            .write()
            .expect("symbol lock not poisoned");
        let before = symbols.len();
        symbols.retain(|tracked| &tracked.symbol != symbol);
        let removed = symbols.len() < before;
        if removed {
            tracing::info!(%symbol, "stopped tracking symbol");
        } else {
            tracing::warn!(%symbol, "symbol was not tracked");
        }
        removed
    }

    pub fn tracked_symbols(&self) -> Vec<TrackedSymbol> {
        self.inner
            .symbols
            .read()
            .expect("symbol lock not poisoned")
            .clone()
    }

    /// Run one collection immediately, outside the cadence. Waits for any
    /// in-flight collection instead of overlapping it.
    pub async fn force_collection(&self) -> CollectionReport {
        let _guard = self.inner.run_guard.lock().await;
        collect(&self.inner).await
    }

    /// Reset the cost ledger now; the midnight job calls the same path.
    pub fn run_budget_reset(&self) {
        budget_reset(&self.inner);
    }

    /// Sweep expired cache entries now; the hourly job calls the same path.
    pub async fn run_cache_sweep(&self) -> u64 {
        cache_sweep(&self.inner).await
    }

    pub fn statistics(&self) -> SchedulerStatistics {
        let inner = &self.inner;
        SchedulerStatistics {
            is_running: self.is_running(),
            collection_interval_seconds: inner.config.collection_interval.as_secs(),
            symbols_tracked: inner
                .symbols
                .read()
                .expect("symbol lock not poisoned")
                .len(),
            total_collections: inner.counters.total_collections.load(Ordering::Relaxed),
            successful_collections: inner
                .counters
                .successful_collections
                .load(Ordering::Relaxed),
            failed_collections: inner.counters.failed_collections.load(Ordering::Relaxed),
            quotes_collected: inner.counters.quotes_collected.load(Ordering::Relaxed),
            budget_resets: inner.counters.budget_resets.load(Ordering::Relaxed),
            cache_sweeps: inner.counters.cache_sweeps.load(Ordering::Relaxed),
            last_collection_at: *inner
                .last
                .collection
                .lock()
                .expect("activity lock not poisoned"),
            last_budget_reset_at: *inner
                .last
                .budget_reset
                .lock()
                .expect("activity lock not poisoned"),
            last_cache_sweep_at: *inner
                .last
                .cache_sweep
                .lock()
                .expect("activity lock not poisoned"),
        }
    }
}

async fn collection_loop(inner: Arc<SchedulerInner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.config.collection_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        // A tick that lands while a forced collection is active is dropped.
        match inner.run_guard.try_lock() {
            Ok(_guard) => {
                collect(&inner).await;
            }
            Err(_) => {
                tracing::debug!("collection already in flight, skipping tick");
            }
        }
    }
}

async fn budget_reset_loop(inner: Arc<SchedulerInner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let delay = until_next_midnight(&inner);
        tokio::select! {
            _ = tokio::time::sleep(delay) => budget_reset(&inner),
            _ = shutdown.changed() => break,
        }
    }
}

async fn sweep_loop(inner: Arc<SchedulerInner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The immediate first tick would sweep a cache that was just opened.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => { cache_sweep(&inner).await; }
            _ = shutdown.changed() => break,
        }
    }
}

/// One collection pass over a stable snapshot of the tracked set.
async fn collect(inner: &SchedulerInner) -> CollectionReport {
    let snapshot = inner
        .symbols
        .read()
        .expect("symbol lock not poisoned")
        .clone();
    let run_number = inner
        .counters
        .total_collections
        .fetch_add(1, Ordering::Relaxed)
        + 1;

    tracing::info!(run = run_number, symbols = snapshot.len(), "collection started");

    let mut report = CollectionReport {
        attempted: snapshot.len(),
        collected: 0,
        failed: 0,
        budget_denied: 0,
    };

    let mut by_class: std::collections::BTreeMap<AssetClass, Vec<Symbol>> =
        std::collections::BTreeMap::new();
    for tracked in &snapshot {
        by_class
            .entry(tracked.asset_class)
            .or_default()
            .push(tracked.symbol.clone());
    }

    for (asset_class, symbols) in by_class {
        let outcomes = inner
            .source
            .get_quotes(&symbols, asset_class, inner.config.force_fresh)
            .await;

        for (symbol, outcome) in outcomes {
            match outcome {
                QuoteOutcome::Quote(quote) => {
                    report.collected += 1;
                    write_to_sinks(inner, &quote).await;
                    tracing::debug!(%symbol, price = quote.price, source = %quote.source, "collected");
                }
                QuoteOutcome::Unavailable(MissReason::BudgetExhausted) => {
                    report.budget_denied += 1;
                    tracing::warn!(%symbol, "collection skipped symbol: budget exhausted");
                }
                QuoteOutcome::Unavailable(MissReason::AllSourcesFailed) => {
                    report.failed += 1;
                    tracing::warn!(%symbol, "collection failed for symbol");
                }
            }
        }
    }

    {
        let mut sinks = inner.sinks.lock().await;
        for sink in sinks.iter_mut() {
            if let Err(error) = sink.flush() {
                tracing::warn!(sink = sink.name(), %error, "sink flush failed");
            }
        }
    }

    inner
        .counters
        .quotes_collected
        .fetch_add(report.collected as u64, Ordering::Relaxed);
    if report.failed == 0 && report.budget_denied == 0 {
        inner
            .counters
            .successful_collections
            .fetch_add(1, Ordering::Relaxed);
    } else {
        inner
            .counters
            .failed_collections
            .fetch_add(1, Ordering::Relaxed);
    }
    *inner
        .last
        .collection
        .lock()
        .expect("activity lock not poisoned") = Some(inner.clock.now());

    tracing::info!(
        run = run_number,
        collected = report.collected,
        failed = report.failed,
        budget_denied = report.budget_denied,
        "collection finished"
    );

    report
}

async fn write_to_sinks(inner: &SchedulerInner, quote: &crate::Quote) {
    let mut sinks = inner.sinks.lock().await;
    for sink in sinks.iter_mut() {
        if let Err(error) = sink.write(quote) {
            tracing::warn!(sink = sink.name(), symbol = %quote.symbol, %error, "sink write failed");
        }
    }
}

fn budget_reset(inner: &SchedulerInner) {
    match inner.source.cost_tracker().reset(true) {
        Ok(before) => {
            inner.counters.budget_resets.fetch_add(1, Ordering::Relaxed);
            *inner
                .last
                .budget_reset
                .lock()
                .expect("activity lock not poisoned") = Some(inner.clock.now());
            tracing::info!(
                previous_requests = before.total_requests,
                previous_cost = before.total_cost,
                "daily budget reset"
            );
        }
        Err(error) => {
            tracing::error!(%error, "daily budget reset failed");
        }
    }
}

async fn cache_sweep(inner: &SchedulerInner) -> u64 {
    let removed = inner.source.cache().clear_expired().await;
    inner.counters.cache_sweeps.fetch_add(1, Ordering::Relaxed);
    *inner
        .last
        .cache_sweep
        .lock()
        .expect("activity lock not poisoned") = Some(inner.clock.now());
    tracing::info!(removed, "cache sweep finished");
    removed
}

/// Wall-clock delay until the next local midnight.
fn until_next_midnight(inner: &SchedulerInner) -> Duration {
    let now_local = inner
        .clock
        .now()
        .into_inner()
        .to_offset(inner.local_offset);
    let next_midnight = now_local
        .date()
        .next_day()
        .map(|date| date.midnight().assume_offset(inner.local_offset));

    match next_midnight {
        Some(next) => {
            let delta = next - now_local;
            delta.unsigned_abs()
        }
        // Date overflow only happens at the end of the representable range.
        None => Duration::from_secs(86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FreeAdapter;
    use crate::cache::QuoteCache;
    use crate::clock::ManualClock;
    use crate::cost::CostTracker;
    use crate::hybrid::HybridSourceConfig;
    use crate::Quote;

    struct VecSink {
        quotes: Arc<Mutex<Vec<Quote>>>,
    }

    impl QuoteSink for VecSink {
        fn name(&self) -> &'static str {
            "vec"
        }

        fn write(&mut self, quote: &Quote) -> std::io::Result<()> {
            self.quotes
                .lock()
                .expect("sink lock not poisoned")
                .push(quote.clone());
            Ok(())
        }
    }

    fn symbol(raw: &str) -> Symbol {
        Symbol::parse(raw).expect("valid symbol")
    }

    async fn scheduler_harness(
        symbols: Vec<TrackedSymbol>,
        budget: f64,
    ) -> (QuoteScheduler, Arc<Mutex<Vec<Quote>>>, Arc<ManualClock>, tempfile::TempDir) {
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
        let source = Arc::new(HybridSource::new(
            cache,
            cost_tracker,
            Arc::new(FreeAdapter::default()),
            None,
            clock.clone(),
            HybridSourceConfig::default(),
        ));

        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = VecSink {
            quotes: Arc::clone(&collected),
        };
        let scheduler = QuoteScheduler::new(
            source,
            vec![Box::new(sink)],
            symbols,
            clock.clone(),
            SchedulerConfig {
                collection_interval: Duration::from_secs(60),
                sweep_interval: Duration::from_secs(3600),
                shutdown_grace: Duration::from_secs(5),
                force_fresh: false,
            },
        );

        (scheduler, collected, clock, dir)
    }

    #[tokio::test]
    async fn forced_collection_writes_every_tracked_symbol() {
        let tracked = vec![
            TrackedSymbol {
                symbol: symbol("AAPL"),
                asset_class: AssetClass::Stocks,
            },
            TrackedSymbol {
                symbol: symbol("EURUSD"),
                asset_class: AssetClass::Forex,
            },
        ];
        let (scheduler, collected, _clock, _dir) = scheduler_harness(tracked, 5.50).await;

        let report = scheduler.force_collection().await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.collected, 2);
        assert_eq!(report.failed, 0);

        let quotes = collected.lock().expect("sink lock not poisoned");
        assert_eq!(quotes.len(), 2);

        let stats = scheduler.statistics();
        assert_eq!(stats.total_collections, 1);
        assert_eq!(stats.successful_collections, 1);
        assert_eq!(stats.quotes_collected, 2);
        assert!(stats.last_collection_at.is_some());
    }

    #[tokio::test]
    async fn membership_changes_apply_to_the_next_run() {
        let (scheduler, collected, _clock, _dir) = scheduler_harness(Vec::new(), 5.50).await;

        assert!(scheduler.add_symbol(symbol("AAPL"), AssetClass::Stocks));
        assert!(!scheduler.add_symbol(symbol("AAPL"), AssetClass::Stocks));
        assert_eq!(scheduler.tracked_symbols().len(), 1);

        scheduler.force_collection().await;
        assert_eq!(collected.lock().expect("sink lock not poisoned").len(), 1);

        assert!(scheduler.remove_symbol(&symbol("AAPL")));
        assert!(!scheduler.remove_symbol(&symbol("AAPL")));

        let report = scheduler.force_collection().await;
        assert_eq!(report.attempted, 0);
    }

    #[tokio::test]
    async fn budget_reset_zeroes_the_ledger() {
        let tracked = vec![TrackedSymbol {
            symbol: symbol("AAPL"),
            asset_class: AssetClass::Stocks,
        }];
        let (scheduler, _collected, clock, _dir) = scheduler_harness(tracked, 5.50).await;

        let tracker = scheduler.inner.source.cost_tracker();
        tracker.record_request(AssetClass::Stocks, &symbol("AAPL"), true);
        tracker.record_request(AssetClass::Stocks, &symbol("AAPL"), false);
        assert!(tracker.statistics().total_cost > 0.0);

        clock.advance(Duration::from_secs(3600));
        scheduler.run_budget_reset();

        let stats = tracker.statistics();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.total_cost, 0.0);
        assert_eq!(stats.tracking_start, clock.now());
        assert_eq!(scheduler.statistics().budget_resets, 1);
    }

    #[tokio::test]
    async fn cache_sweep_reports_removed_entries() {
        let tracked = vec![TrackedSymbol {
            symbol: symbol("AAPL"),
            asset_class: AssetClass::Stocks,
        }];
        let (scheduler, _collected, clock, _dir) = scheduler_harness(tracked, 5.50).await;

        scheduler.force_collection().await;
        clock.advance(Duration::from_secs(61));

        assert_eq!(scheduler.run_cache_sweep().await, 1);
        assert_eq!(scheduler.run_cache_sweep().await, 0);
        assert_eq!(scheduler.statistics().cache_sweeps, 2);
    }

    #[tokio::test]
    async fn start_runs_an_initial_collection_and_stop_waits() {
        let tracked = vec![TrackedSymbol {
            symbol: symbol("AAPL"),
            asset_class: AssetClass::Stocks,
        }];
        let (scheduler, collected, _clock, _dir) = scheduler_harness(tracked, 5.50).await;

        scheduler.start();
        assert!(scheduler.is_running());

        // Let the immediate first tick and one scheduled tick fire.
        tokio::time::sleep(Duration::from_secs(61)).await;
        scheduler.stop(true).await;
        assert!(!scheduler.is_running());

        let runs = scheduler.statistics().total_collections;
        assert!(runs >= 2, "expected initial plus one scheduled run, got {runs}");
        assert!(!collected.lock().expect("sink lock not poisoned").is_empty());
    }
}
