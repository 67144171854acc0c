//! Backend adapter contract.
//!
//! An adapter owns HTTP, parsing and normalization for one provider and
//! nothing else: it never touches the cache, the cost tracker or a breaker.
//! Those policies live in the hybrid source that drives it.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::{AssetClass, FetchError, Quote, Symbol};

/// One quote fetch, already translated to the backend's native identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Canonical symbol, used for the normalized quote's identity.
    pub symbol: Symbol,
    /// Backend-native identifier (e.g. `AAPL:US`, `EURUSD=X`).
    pub native_symbol: String,
    pub asset_class: AssetClass,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn new(
        symbol: Symbol,
        native_symbol: impl Into<String>,
        asset_class: AssetClass,
        timeout: Duration,
    ) -> Self {
        Self {
            symbol,
            native_symbol: native_symbol.into(),
            asset_class,
            timeout,
        }
    }
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Quote, FetchError>> + Send + 'a>>;

/// Uniform quote provider interface.
///
/// Implementations must be `Send + Sync`; they are shared behind `Arc`
/// across concurrent batch fetches.
pub trait QuoteBackend: Send + Sync {
    /// Stable backend name used in logs and statistics.
    fn name(&self) -> &'static str;

    /// Fetch and normalize a single quote.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] classifying the failure; retryable kinds may
    /// be re-attempted inside the adapter itself, but one call is one
    /// logical request to every caller above it.
    fn fetch_quote<'a>(&'a self, request: FetchRequest) -> FetchFuture<'a>;
}
