//! Symbol translation between the canonical form and each backend's native
//! identifiers.
//!
//! | class       | canonical | free        | paid         |
//! |-------------|-----------|-------------|--------------|
//! | stocks      | `AAPL`    | `AAPL`      | `AAPL:US`    |
//! | forex       | `EURUSD`  | `EURUSD=X`  | `EURUSD:CUR` |
//! | commodities | `GC`      | `GC=F`      | `GC1:COM`    |
//! | index       | `SENSEX`  | n/a         | `SENSEX:IND` |
//! | crypto      | `BTCUSD`  | `BTC-USD`   | `XBTUSD:CUR` |

use crate::{AssetClass, Symbol};

/// Native identifier for the free backend, or `None` when the class has no
/// free-tier form (indices are paid-only).
pub fn free_symbol(symbol: &Symbol, asset_class: AssetClass) -> Option<String> {
    let base = symbol.base();

    match asset_class {
        AssetClass::Stocks => Some(base.to_owned()),
        AssetClass::Forex => Some(format!("{base}=X")),
        AssetClass::Commodities => Some(format!("{base}=F")),
        AssetClass::Index => None,
        AssetClass::Crypto => Some(dash_crypto_pair(base)),
    }
}

/// Native identifier for the paid backend. Symbols already carrying an
/// exchange qualifier pass through untouched.
pub fn paid_symbol(symbol: &Symbol, asset_class: AssetClass) -> String {
    if symbol.as_str().contains(':') {
        return symbol.as_str().to_owned();
    }
    let base = symbol.as_str();

    match asset_class {
        AssetClass::Stocks => format!("{base}:US"),
        AssetClass::Forex => format!("{base}:CUR"),
        AssetClass::Commodities => {
            // Front-month contract: GC -> GC1
            if base.ends_with(|ch: char| ch.is_ascii_digit()) {
                format!("{base}:COM")
            } else {
                format!("{base}1:COM")
            }
        }
        AssetClass::Index => format!("{base}:IND"),
        AssetClass::Crypto => {
            // Bloomberg quotes bitcoin under the XBT code.
            let coded = if let Some(rest) = base.strip_prefix("BTC") {
                format!("XBT{rest}")
            } else {
                base.to_owned()
            };
            format!("{coded}:CUR")
        }
    }
}

/// `BTCUSD` -> `BTC-USD`; pairs shorter than four characters pass through.
fn dash_crypto_pair(base: &str) -> String {
    if base.contains('-') || base.len() <= 3 {
        return base.to_owned();
    }
    let (head, tail) = base.split_at(base.len() - 3);
    format!("{head}-{tail}")
}
