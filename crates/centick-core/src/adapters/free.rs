//! Free-tier adapter over a public chart API.
//!
//! Default construction runs in deterministic offline mode so the pipeline
//! and CLI work without network access; [`FreeAdapter::with_http_client`]
//! switches to real fetches.

use std::sync::Arc;

use serde::Deserialize;

use crate::backend::{FetchFuture, FetchRequest, QuoteBackend};
use crate::http_client::{HttpClient, HttpRequest, NoopHttpClient};
use crate::{FetchError, Quote, QuoteSource, UtcDateTime};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

pub struct FreeAdapter {
    http_client: Arc<dyn HttpClient>,
}

impl Default for FreeAdapter {
    fn default() -> Self {
        Self {
            http_client: Arc::new(NoopHttpClient),
        }
    }
}

impl FreeAdapter {
    pub fn with_http_client(http_client: Arc<dyn HttpClient>) -> Self {
        Self { http_client }
    }

    async fn fetch_remote(&self, request: &FetchRequest) -> Result<Quote, FetchError> {
        let url = format!("{CHART_URL}/{}", request.native_symbol);
        let http_request = HttpRequest::get(url)
            .with_header("accept", "application/json")
            .with_timeout(request.timeout);

        let response = self
            .http_client
            .execute(http_request)
            .await
            .map_err(|error| {
                if error.timed_out() {
                    FetchError::transport(format!("chart request timed out: {error}"))
                } else {
                    FetchError::transport(format!("chart request failed: {error}"))
                }
            })?;

        if !response.is_success() {
            return Err(FetchError::from_status(
                response.status,
                truncate(&response.body, 120),
            ));
        }

        let payload: ChartEnvelope = serde_json::from_str(&response.body)
            .map_err(|error| FetchError::parse(format!("chart payload not decodable: {error}")))?;
        normalize(payload, request)
    }

    /// Deterministic offline quote keyed on the symbol bytes, mirroring the
    /// shape a real chart response produces.
    fn fetch_offline(&self, request: &FetchRequest) -> Result<Quote, FetchError> {
        let seed = symbol_seed(&request.native_symbol);
        let price = 92.0 + (seed % 500) as f64 / 10.0;
        let previous_close = price - 0.35;

        Quote::new(
            request.symbol.clone(),
            request.asset_class,
            price,
            QuoteSource::Free,
            UtcDateTime::now(),
        )
        .and_then(|quote| {
            quote
                .with_change(Some(0.35), Some(0.35 / previous_close * 100.0))
                .with_volume(Some(50_000 + seed % 10_000))
                .with_day_range(Some(price - 0.8), Some(price + 1.2))?
                .with_session(Some(price - 0.5), Some(previous_close))?
                .with_currency("USD")
        })
        .map_err(|error| FetchError::parse(error.to_string()))
    }
}

impl QuoteBackend for FreeAdapter {
    fn name(&self) -> &'static str {
        "free"
    }

    fn fetch_quote<'a>(&'a self, request: FetchRequest) -> FetchFuture<'a> {
        Box::pin(async move {
            if self.http_client.is_mock() {
                return self.fetch_offline(&request);
            }
            self.fetch_remote(&request).await
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartEntry>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartEntry {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    previous_close: Option<f64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    regular_market_volume: Option<u64>,
    fifty_two_week_high: Option<f64>,
    fifty_two_week_low: Option<f64>,
    currency: Option<String>,
}

fn normalize(payload: ChartEnvelope, request: &FetchRequest) -> Result<Quote, FetchError> {
    if let Some(error) = payload.chart.error {
        return Err(FetchError::parse(format!("chart error payload: {error}")));
    }

    let meta = payload
        .chart
        .result
        .and_then(|mut entries| entries.pop())
        .map(|entry| entry.meta)
        .ok_or_else(|| FetchError::parse("chart response held no result entry"))?;

    let price = meta
        .regular_market_price
        .ok_or_else(|| FetchError::parse("chart meta is missing the market price"))?;

    let change = meta.previous_close.map(|close| price - close);
    let change_percent = match (change, meta.previous_close) {
        (Some(change), Some(close)) if close > 0.0 => Some(change / close * 100.0),
        _ => None,
    };

    let mut quote = Quote::new(
        request.symbol.clone(),
        request.asset_class,
        price,
        QuoteSource::Free,
        UtcDateTime::now(),
    )
    .map_err(|error| FetchError::parse(error.to_string()))?
    .with_change(change, change_percent)
    .with_volume(meta.regular_market_volume)
    .with_day_range(meta.regular_market_day_low, meta.regular_market_day_high)
    .and_then(|quote| quote.with_week_52_range(meta.fifty_two_week_low, meta.fifty_two_week_high))
    .and_then(|quote| quote.with_session(None, meta.previous_close))
    .map_err(|error| FetchError::parse(error.to_string()))?;

    if let Some(currency) = meta.currency {
        quote = quote
            .with_currency(currency)
            .map_err(|error| FetchError::parse(error.to_string()))?;
    }

    Ok(quote)
}

fn symbol_seed(native: &str) -> u64 {
    native.bytes().fold(0_u64, |acc, byte| {
        acc.wrapping_mul(33).wrapping_add(byte as u64)
    })
}

fn truncate(raw: &str, limit: usize) -> &str {
    match raw.char_indices().nth(limit) {
        Some((index, _)) => &raw[..index],
        None => raw,
    }
}
