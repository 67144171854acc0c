mod models;
mod symbol;
mod timestamp;

pub use models::{validate_currency_code, AssetClass, Quote, QuoteSource};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
