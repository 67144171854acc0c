use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Symbol, UtcDateTime, ValidationError};

/// Coarse instrument category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Stocks,
    Forex,
    Commodities,
    Index,
    Crypto,
}

impl AssetClass {
    pub const ALL: [AssetClass; 5] = [
        Self::Stocks,
        Self::Forex,
        Self::Commodities,
        Self::Index,
        Self::Crypto,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stocks => "stocks",
            Self::Forex => "forex",
            Self::Commodities => "commodities",
            Self::Index => "index",
            Self::Crypto => "crypto",
        }
    }
}

impl Display for AssetClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stocks" | "equity" => Ok(Self::Stocks),
            "forex" | "currency" => Ok(Self::Forex),
            "commodities" => Ok(Self::Commodities),
            "index" | "indices" => Ok(Self::Index),
            "crypto" => Ok(Self::Crypto),
            _ => Err(ValidationError::InvalidAssetClass {
                value: value.to_owned(),
            }),
        }
    }
}

/// Which tier actually served a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    Cache,
    Free,
    Paid,
}

impl QuoteSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Free => "free",
            Self::Paid => "paid",
        }
    }
}

impl Display for QuoteSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical normalized market quote.
///
/// `symbol` and `asset_class` together form the identity used by the cache
/// and logs. Every numeric field except `price` is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub asset_class: AssetClass,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_52_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_52_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub source: QuoteSource,
    pub collected_at: UtcDateTime,
}

impl Quote {
    /// Validated constructor covering the mandatory fields; optional fields
    /// are attached with [`QuoteBuilder`]-style `with_*` methods.
    pub fn new(
        symbol: Symbol,
        asset_class: AssetClass,
        price: f64,
        source: QuoteSource,
        collected_at: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        validate_positive("price", price)?;

        Ok(Self {
            symbol,
            asset_class,
            price,
            name: None,
            change: None,
            change_percent: None,
            volume: None,
            day_high: None,
            day_low: None,
            week_52_high: None,
            week_52_low: None,
            open: None,
            previous_close: None,
            currency: None,
            source,
            collected_at,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_change(mut self, change: Option<f64>, change_percent: Option<f64>) -> Self {
        self.change = change;
        self.change_percent = change_percent;
        self
    }

    pub fn with_volume(mut self, volume: Option<u64>) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_day_range(
        mut self,
        low: Option<f64>,
        high: Option<f64>,
    ) -> Result<Self, ValidationError> {
        validate_optional_positive("day_low", low)?;
        validate_optional_positive("day_high", high)?;
        if let (Some(low), Some(high)) = (low, high) {
            if low > high {
                return Err(ValidationError::InvalidRange {
                    low: "day_low",
                    high: "day_high",
                });
            }
        }
        self.day_low = low;
        self.day_high = high;
        Ok(self)
    }

    pub fn with_week_52_range(
        mut self,
        low: Option<f64>,
        high: Option<f64>,
    ) -> Result<Self, ValidationError> {
        validate_optional_positive("week_52_low", low)?;
        validate_optional_positive("week_52_high", high)?;
        if let (Some(low), Some(high)) = (low, high) {
            if low > high {
                return Err(ValidationError::InvalidRange {
                    low: "week_52_low",
                    high: "week_52_high",
                });
            }
        }
        self.week_52_low = low;
        self.week_52_high = high;
        Ok(self)
    }

    pub fn with_session(
        mut self,
        open: Option<f64>,
        previous_close: Option<f64>,
    ) -> Result<Self, ValidationError> {
        validate_optional_positive("open", open)?;
        validate_optional_positive("previous_close", previous_close)?;
        self.open = open;
        self.previous_close = previous_close;
        Ok(self)
    }

    pub fn with_currency(mut self, currency: impl AsRef<str>) -> Result<Self, ValidationError> {
        self.currency = Some(validate_currency_code(currency.as_ref())?);
        Ok(self)
    }

    /// Re-tag a quote that was served from the cache rather than a backend.
    pub fn tagged(mut self, source: QuoteSource) -> Self {
        self.source = source;
        self
    }
}

/// Validate and normalize currency to an uppercase 3-letter code.
pub fn validate_currency_code(input: &str) -> Result<String, ValidationError> {
    let normalized = input.trim().to_ascii_uppercase();
    let is_valid = normalized.len() == 3 && normalized.chars().all(|ch| ch.is_ascii_alphabetic());

    if !is_valid {
        return Err(ValidationError::InvalidCurrency {
            value: input.to_owned(),
        });
    }

    Ok(normalized)
}

fn validate_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field });
    }
    Ok(())
}

fn validate_optional_positive(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    if let Some(value) = value {
        validate_positive(field, value)?;
    }
    Ok(())
}
