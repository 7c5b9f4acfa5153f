//! Currency conversion abstractions

use async_trait::async_trait;

use super::error::ValuationError;
use super::model::RateQuote;

#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    /// Converts `amount` of `from` into `to` at current rates.
    async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64, ValuationError>;

    /// Current USD price of one unit of `symbol`.
    async fn quote(&self, symbol: &str) -> Result<RateQuote, ValuationError>;
}

/// Whether an unrecognised symbol could be an exchange ticker.
pub fn is_equity_candidate(symbol: &str) -> bool {
    (1..=8).contains(&symbol.len()) && symbol.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equity_candidates() {
        assert!(is_equity_candidate("SBER"));
        assert!(is_equity_candidate("T"));
        assert!(is_equity_candidate("YDEX2024"));
        assert!(!is_equity_candidate(""));
        assert!(!is_equity_candidate("TOOLONGSYM"));
        assert!(!is_equity_candidate("US-D"));
        assert!(!is_equity_candidate("ТЕНГЕ"));
    }
}
