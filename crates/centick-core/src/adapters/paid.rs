//! Paid scraping adapter.
//!
//! The provider takes a Bearer-authenticated JSON POST naming a target quote
//! page and answers with the page's raw HTML; the quote is extracted from
//! the JSON state embedded in that page. Every dispatched request is billed
//! by the provider whether or not the payload is usable, which is why the
//! cost policy upstream charges on any definite outcome.

use std::sync::Arc;
#[cfg(test)]
use std::time::Duration;

use serde::Serialize;

use crate::backend::{FetchFuture, FetchRequest, QuoteBackend};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, NoopHttpClient};
use crate::retry::RetryConfig;
use crate::{FetchError, Quote, QuoteSource, UtcDateTime};

const API_URL: &str = "https://api.brightdata.com/request";
const QUOTE_PAGE_URL: &str = "https://www.bloomberg.com/quote";

#[derive(Debug, Clone)]
pub struct PaidAdapterConfig {
    pub zone: String,
    pub retry: RetryConfig,
}

impl Default for PaidAdapterConfig {
    fn default() -> Self {
        Self {
            zone: String::from("bloomberg"),
            retry: RetryConfig::default(),
        }
    }
}

pub struct PaidAdapter {
    http_client: Arc<dyn HttpClient>,
    auth: HttpAuth,
    config: PaidAdapterConfig,
}

impl Default for PaidAdapter {
    fn default() -> Self {
        Self {
            http_client: Arc::new(NoopHttpClient),
            auth: HttpAuth::None,
            config: PaidAdapterConfig::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ScrapeRequestBody<'a> {
    zone: &'a str,
    url: String,
    format: &'static str,
}

impl PaidAdapter {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        token: impl Into<String>,
        config: PaidAdapterConfig,
    ) -> Self {
        Self {
            http_client,
            auth: HttpAuth::BearerToken(token.into()),
            config,
        }
    }

    async fn fetch_once(&self, request: &FetchRequest) -> Result<Quote, FetchError> {
        let body = ScrapeRequestBody {
            zone: &self.config.zone,
            url: format!("{QUOTE_PAGE_URL}/{}", request.native_symbol),
            format: "raw",
        };
        let body = serde_json::to_string(&body)
            .map_err(|error| FetchError::cancelled(format!("request not encodable: {error}")))?;

        let http_request = HttpRequest::post(API_URL)
            .with_auth(&self.auth)
            .with_header("content-type", "application/json")
            .with_body(body)
            .with_timeout(request.timeout);

        let response = self
            .http_client
            .execute(http_request)
            .await
            .map_err(|error| {
                if error.timed_out() {
                    FetchError::transport(format!("scrape request timed out: {error}"))
                } else {
                    FetchError::transport(format!("scrape request failed: {error}"))
                }
            })?;

        if !response.is_success() {
            return Err(FetchError::from_status(
                response.status,
                truncate(&response.body, 120),
            ));
        }

        parse_quote_page(&response.body, request)
    }

    /// Deterministic offline quote for transports that never hit the
    /// network.
    fn fetch_offline(&self, request: &FetchRequest) -> Result<Quote, FetchError> {
        let seed = symbol_seed(&request.native_symbol);
        let price = 95.0 + (seed % 400) as f64 / 10.0;

        Quote::new(
            request.symbol.clone(),
            request.asset_class,
            price,
            QuoteSource::Paid,
            UtcDateTime::now(),
        )
        .and_then(|quote| {
            quote
                .with_change(Some(-0.42), None)
                .with_session(Some(price + 0.2), Some(price + 0.42))?
                .with_currency("USD")
        })
        .map_err(|error| FetchError::parse(error.to_string()))
    }
}

impl QuoteBackend for PaidAdapter {
    fn name(&self) -> &'static str {
        "paid"
    }

    fn fetch_quote<'a>(&'a self, request: FetchRequest) -> FetchFuture<'a> {
        Box::pin(async move {
            if self.http_client.is_mock() {
                return self.fetch_offline(&request);
            }

            let mut attempt = 0;
            loop {
                match self.fetch_once(&request).await {
                    Ok(quote) => return Ok(quote),
                    Err(error) if self.config.retry.should_retry(&error, attempt) => {
                        let delay = self.config.retry.delay_for_attempt(attempt);
                        tracing::debug!(
                            native = %request.native_symbol,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            %error,
                            "paid fetch retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(error) => return Err(error),
                }
            }
        })
    }
}

/// Pull a quote out of the JSON state a quote page embeds in its markup.
fn parse_quote_page(html: &str, request: &FetchRequest) -> Result<Quote, FetchError> {
    let price = json_number_field(html, "price")
        .ok_or_else(|| FetchError::parse("quote page held no price field"))?;

    let change = json_number_field(html, "priceChange1Day");
    let change_percent = json_number_field(html, "percentChange1Day");
    let volume = json_number_field(html, "volume").map(|value| value.max(0.0) as u64);
    let day_low = json_number_field(html, "lowPrice");
    let day_high = json_number_field(html, "highPrice");
    let week_low = json_number_field(html, "lowPrice52Week");
    let week_high = json_number_field(html, "highPrice52Week");
    let open = json_number_field(html, "openPrice");
    let previous_close = json_number_field(html, "previousClosingPriceOneTradingDayAgo");

    let mut quote = Quote::new(
        request.symbol.clone(),
        request.asset_class,
        price,
        QuoteSource::Paid,
        UtcDateTime::now(),
    )
    .map_err(|error| FetchError::parse(error.to_string()))?
    .with_change(change, change_percent)
    .with_volume(volume)
    .with_day_range(day_low, day_high)
    .and_then(|quote| quote.with_week_52_range(week_low, week_high))
    .and_then(|quote| quote.with_session(open, previous_close))
    .map_err(|error| FetchError::parse(error.to_string()))?;

    if let Some(name) = json_string_field(html, "name") {
        quote = quote.with_name(name);
    }
    if let Some(currency) = json_string_field(html, "issuedCurrency") {
        if let Ok(tagged) = quote.clone().with_currency(&currency) {
            quote = tagged;
        }
    }

    Ok(quote)
}

/// Scan for `"key":<number>` or `"key":"<number>"` in embedded JSON.
fn json_number_field(html: &str, key: &str) -> Option<f64> {
    let value = raw_json_value(html, key)?;
    value.trim_matches('"').parse::<f64>().ok().filter(|v| v.is_finite())
}

fn json_string_field(html: &str, key: &str) -> Option<String> {
    let value = raw_json_value(html, key)?;
    let trimmed = value.strip_prefix('"')?.strip_suffix('"')?;
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn raw_json_value(html: &str, key: &str) -> Option<String> {
    let marker = format!("\"{key}\":");
    let start = html.find(&marker)? + marker.len();
    let rest = html[start..].trim_start();

    if let Some(inner) = rest.strip_prefix('"') {
        let end = inner.find('"')?;
        return Some(format!("\"{}\"", &inner[..end]));
    }

    let end = rest
        .find(|ch: char| ch == ',' || ch == '}' || ch == ']' || ch.is_whitespace())
        .unwrap_or(rest.len());
    let raw = &rest[..end];
    if raw.is_empty() || raw == "null" {
        None
    } else {
        Some(raw.to_owned())
    }
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
