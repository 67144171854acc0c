//! Component assembly and command dispatch.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use centick_core::{
    AssetClass, CacheStatistics, Clock, Config, CostStatistics, CostTracker, CsvSink, FreeAdapter,
    HybridSource, HybridSourceConfig, JsonlSink, PaidAdapter, PaidAdapterConfig, QuoteBackend,
    QuoteCache, QuoteScheduler, QuoteSink, ReqwestHttpClient, RetryConfig, SchedulerConfig,
    SourceStatistics, Symbol, SystemClock, TrackedSymbol,
};

use crate::cli::Cli;
use crate::error::{CliError, EXIT_INTERRUPTED};
use crate::output;

#[derive(Debug, Serialize)]
struct StatusReport {
    cache: CacheStatistics,
    cost: CostStatistics,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    attempted: usize,
    collected: usize,
    failed: usize,
    budget_denied: usize,
    source: SourceStatistics,
    cost: CostStatistics,
}

pub async fn run(cli: Cli) -> Result<i32, CliError> {
    let config = Config::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let tracker = Arc::new(CostTracker::open(
        config.cost_state_path(),
        config.total_budget,
        config.cost_per_request,
        clock.clone(),
    ));

    if cli.budget {
        output::print_json(&tracker.statistics())?;
        return Ok(0);
    }

    let cache = Arc::new(
        QuoteCache::open(config.cache_db_path(), config.cache_ttl, clock.clone()).await?,
    );

    if cli.status {
        let report = StatusReport {
            cache: cache.statistics().await?,
            cost: tracker.statistics(),
        };
        output::print_json(&report)?;
        return Ok(0);
    }

    if cli.symbols.is_empty() {
        return Err(CliError::InvalidArgument(String::from(
            "at least one symbol is required (or use --status / --budget)",
        )));
    }

    let symbols = cli
        .symbols
        .iter()
        .map(|raw| Symbol::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let asset_class = AssetClass::from(cli.asset_class);

    let http_client = Arc::new(ReqwestHttpClient::new());
    let free_backend = Arc::new(FreeAdapter::with_http_client(http_client.clone()));
    let paid_backend: Option<Arc<dyn QuoteBackend>> = match &config.paid_token {
        Some(token) => Some(Arc::new(PaidAdapter::new(
            http_client,
            token.clone(),
            PaidAdapterConfig {
                retry: RetryConfig::with_max_retries(config.max_retries),
                ..PaidAdapterConfig::default()
            },
        ))),
        None => {
            tracing::info!("BRIGHT_DATA_TOKEN not set, paid tier disabled");
            None
        }
    };

    let source = Arc::new(HybridSource::new(
        cache,
        tracker,
        free_backend,
        paid_backend,
        clock.clone(),
        HybridSourceConfig {
            request_timeout: config.request_timeout,
            batch_concurrency: config.batch_concurrency,
            ..HybridSourceConfig::default()
        },
    ));

    let sinks: Vec<Box<dyn QuoteSink>> = vec![
        Box::new(CsvSink::open(config.data_dir.join("quotes.csv"))?),
        Box::new(JsonlSink::open(config.data_dir.join("quotes.jsonl"))?),
    ];

    let tracked = symbols
        .into_iter()
        .map(|symbol| TrackedSymbol {
            symbol,
            asset_class,
        })
        .collect();

    let scheduler = QuoteScheduler::new(
        Arc::clone(&source),
        sinks,
        tracked,
        clock,
        SchedulerConfig {
            collection_interval: cli
                .interval
                .map(|minutes| Duration::from_secs(minutes.max(1) * 60))
                .unwrap_or(config.update_interval),
            force_fresh: cli.force_fresh,
            ..SchedulerConfig::default()
        },
    );

    if cli.once {
        let report = scheduler.force_collection().await;
        let collected = report.collected;
        let summary = RunSummary {
            attempted: report.attempted,
            collected: report.collected,
            failed: report.failed,
            budget_denied: report.budget_denied,
            source: source.statistics(),
            cost: source.cost_tracker().statistics(),
        };
        output::print_json(&summary)?;

        if collected == 0 {
            return Err(CliError::NoQuotes);
        }
        return Ok(0);
    }

    scheduler.start();
    tracing::info!("press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    scheduler.stop(true).await;

    let last = scheduler.statistics();
    let summary = RunSummary {
        attempted: last.symbols_tracked,
        collected: last.quotes_collected as usize,
        failed: last.failed_collections as usize,
        budget_denied: 0,
        source: source.statistics(),
        cost: source.cost_tracker().statistics(),
    };
    output::print_json(&summary)?;

    Ok(EXIT_INTERRUPTED)
}
