//! Rate source abstractions shared by the fiat, crypto and equity providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;

use super::error::ValuationError;

/// Symbol to unit price. The direction depends on the source, see [`RateKind`].
pub type RateTable = HashMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateKind {
    /// Units of the symbol per 1 USD.
    Fiat,
    /// USD per 1 unit of the symbol.
    Crypto,
    /// USD per 1 share.
    Equity,
}

impl Display for RateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                RateKind::Fiat => "fiat",
                RateKind::Crypto => "crypto",
                RateKind::Equity => "equity",
            }
        )
    }
}

#[async_trait]
pub trait RateSource: Send + Sync {
    fn kind(&self) -> RateKind;

    /// Refreshes the source when its cached table is stale or lacks one of
    /// `symbols`. An empty slice means "whatever the source tracks by default".
    ///
    /// Fiat and crypto sources always succeed: they fall back to cached or
    /// static rates.
    async fn update(&self, symbols: &[String]) -> Result<(), ValuationError>;

    /// Current table, possibly stale. Never triggers a fetch.
    async fn rates(&self) -> RateTable;
}

/// Drops entries that would poison a division or a sum.
pub fn usable_rates(table: RateTable) -> RateTable {
    table
        .into_iter()
        .filter(|(_, rate)| rate.is_finite() && *rate > 0.0)
        .map(|(symbol, rate)| (symbol.to_uppercase(), rate))
        .collect()
}
