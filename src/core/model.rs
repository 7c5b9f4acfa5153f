//! Records persisted or exchanged by the valuation core.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Chat user identifier.
pub type UserId = i64;

/// Identifier of a transaction in the journal.
pub type EntryRef = u64;

/// Canonical form of a currency or ticker: trimmed and upper-cased.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// How a symbol got priced. Decided at resolution time, never stored on the
/// asset itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolClass {
    Usd,
    Fiat,
    Crypto,
    Equity,
}

impl Display for SymbolClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SymbolClass::Usd => "usd",
                SymbolClass::Fiat => "fiat",
                SymbolClass::Crypto => "crypto",
                SymbolClass::Equity => "equity",
            }
        )
    }
}

/// A live USD price. Only persisted through [`CurrencyRate`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateQuote {
    pub symbol: String,
    pub unit_price_in_usd: f64,
    pub class: SymbolClass,
    pub fetched_at: DateTime<Utc>,
}

/// One historical USD rate per (symbol, date). First writer wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRate {
    pub symbol: String,
    pub date: NaiveDate,
    pub rate_to_usd: f64,
    pub source: String,
}

/// The (user, currency, category) key of a tracked asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetSlot {
    pub user_id: UserId,
    pub currency_code: String,
    pub category_name: String,
}

impl AssetSlot {
    pub fn new(user_id: UserId, currency_code: &str, category_name: &str) -> Self {
        Self {
            user_id,
            currency_code: normalize_symbol(currency_code),
            category_name: category_name.trim().to_string(),
        }
    }
}

/// An asset-mode transaction as recorded by the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub entry_ref: EntryRef,
    pub user_id: UserId,
    pub currency_code: String,
    pub category_name: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl AssetEntry {
    pub fn slot(&self) -> AssetSlot {
        AssetSlot::new(self.user_id, &self.currency_code, &self.category_name)
    }
}

/// Latest known amount of one asset slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetLatestValue {
    pub user_id: UserId,
    pub currency_code: String,
    pub category_name: String,
    pub amount: Decimal,
    pub last_updated: DateTime<Utc>,
    pub origin_transaction_ref: EntryRef,
}

/// Immutable dated capital total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalSnapshot {
    pub user_id: UserId,
    pub snapshot_date: NaiveDate,
    pub total_in_usd: f64,
    pub total_in_rub: f64,
}
