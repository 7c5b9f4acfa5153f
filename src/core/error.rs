//! Valuation failures surfaced past the rate sources.

use thiserror::Error;

use super::rates::RateKind;

/// Errors a caller of the converter or the capital service has to handle.
///
/// Provider hiccups that a cache or a fallback table can absorb never show up
/// here. What remains is either a symbol nobody can price, an equity provider
/// that failed with nothing cached, or a call-order bug.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValuationError {
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("{provider} provider unavailable for {symbol}")]
    ProviderUnavailable { provider: RateKind, symbol: String },

    /// Equity prices are quoted in a local currency; its fiat rate has to be
    /// loaded before any equity update.
    #[error("Missing {0} fiat rate required to price equities")]
    MissingPivotRate(String),
}
