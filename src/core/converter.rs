//! Converts between fiat, crypto and equity symbols through USD.
//!
//! The fiat table holds units per USD while the crypto and equity tables hold
//! USD per unit. Each direction keeps its own branch below.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use super::currency::{CurrencyConverter, is_equity_candidate};
use super::error::ValuationError;
use super::model::{RateQuote, SymbolClass, normalize_symbol};
use super::rates::{RateSource, RateTable};

const USD: &str = "USD";

struct Tables {
    fiat: RateTable,
    crypto: RateTable,
    equity: RateTable,
}

impl Tables {
    /// USD per one unit of `symbol`. Crypto, then equity, then fiat.
    fn usd_price(&self, symbol: &str) -> Option<(f64, SymbolClass)> {
        if let Some(price) = self.crypto.get(symbol) {
            Some((*price, SymbolClass::Crypto))
        } else if let Some(price) = self.equity.get(symbol) {
            Some((*price, SymbolClass::Equity))
        } else if let Some(per_usd) = self.fiat.get(symbol) {
            Some((1.0 / per_usd, SymbolClass::Fiat))
        } else if symbol == USD {
            Some((1.0, SymbolClass::Usd))
        } else {
            None
        }
    }

    /// Expresses a USD amount in `symbol`. USD, then fiat, then crypto, then equity.
    fn from_usd(&self, amount_in_usd: f64, symbol: &str) -> Option<f64> {
        if symbol == USD {
            Some(amount_in_usd)
        } else if let Some(per_usd) = self.fiat.get(symbol) {
            Some(amount_in_usd * per_usd)
        } else if let Some(price) = self.crypto.get(symbol) {
            Some(amount_in_usd / price)
        } else {
            self.equity.get(symbol).map(|price| amount_in_usd / price)
        }
    }
}

pub struct UsdPivotConverter {
    fiat: Arc<dyn RateSource>,
    crypto: Arc<dyn RateSource>,
    equity: Arc<dyn RateSource>,
}

impl UsdPivotConverter {
    pub fn new(
        fiat: Arc<dyn RateSource>,
        crypto: Arc<dyn RateSource>,
        equity: Arc<dyn RateSource>,
    ) -> Self {
        Self {
            fiat,
            crypto,
            equity,
        }
    }

    /// Loads fiat and crypto rates, then probes the equity source for any of
    /// `symbols` that neither table knows.
    async fn resolve(&self, symbols: &[&str]) -> Result<Tables, ValuationError> {
        // Fiat before equity: equity prices are converted with the fiat table.
        let (fiat_update, crypto_update) =
            futures::join!(self.fiat.update(&[]), self.crypto.update(&[]));
        fiat_update?;
        crypto_update?;

        let fiat = self.fiat.rates().await;
        let crypto = self.crypto.rates().await;

        let mut candidates: Vec<String> = Vec::new();
        for symbol in symbols {
            let known = *symbol == USD || fiat.contains_key(*symbol) || crypto.contains_key(*symbol);
            if !known && is_equity_candidate(symbol) && !candidates.iter().any(|c| c == symbol) {
                candidates.push(symbol.to_string());
            }
        }

        let mut probe_error = None;
        if !candidates.is_empty() {
            debug!(source = %self.equity.kind(), ?candidates, "Probing for unresolved symbols");
            if let Err(e) = self.equity.update(&candidates).await {
                match e {
                    ValuationError::MissingPivotRate(_) => return Err(e),
                    other => probe_error = Some(other),
                }
            }
        }

        let tables = Tables {
            fiat,
            crypto,
            equity: self.equity.rates().await,
        };

        // A failed probe only matters for a symbol it left unpriced.
        if let Some(error) = probe_error
            && let ValuationError::ProviderUnavailable { symbol, .. } = &error
            && tables.usd_price(symbol).is_none()
        {
            return Err(error);
        }
        Ok(tables)
    }
}

#[async_trait]
impl CurrencyConverter for UsdPivotConverter {
    async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64, ValuationError> {
        let from = normalize_symbol(from);
        let to = normalize_symbol(to);
        let tables = self.resolve(&[&from, &to]).await?;

        let (usd_price, _) = tables
            .usd_price(&from)
            .ok_or_else(|| ValuationError::UnsupportedCurrency(from.clone()))?;
        let amount_in_usd = amount * usd_price;

        tables
            .from_usd(amount_in_usd, &to)
            .ok_or(ValuationError::UnsupportedCurrency(to))
    }

    async fn quote(&self, symbol: &str) -> Result<RateQuote, ValuationError> {
        let symbol = normalize_symbol(symbol);
        let tables = self.resolve(&[&symbol]).await?;
        let (unit_price_in_usd, class) = tables
            .usd_price(&symbol)
            .ok_or_else(|| ValuationError::UnsupportedCurrency(symbol.clone()))?;
        Ok(RateQuote {
            symbol,
            unit_price_in_usd,
            class,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rates::RateKind;
    use std::sync::Mutex;

    struct StaticRates {
        kind: RateKind,
        table: RateTable,
        probed: Mutex<Vec<String>>,
        failure: Option<ValuationError>,
    }

    impl StaticRates {
        fn new(kind: RateKind, rates: &[(&str, f64)]) -> Arc<Self> {
            Arc::new(Self {
                kind,
                table: rates.iter().map(|(s, r)| (s.to_string(), *r)).collect(),
                probed: Mutex::new(Vec::new()),
                failure: None,
            })
        }

        fn failing(kind: RateKind, failure: ValuationError) -> Arc<Self> {
            Arc::new(Self {
                kind,
                table: RateTable::new(),
                probed: Mutex::new(Vec::new()),
                failure: Some(failure),
            })
        }
    }

    #[async_trait]
    impl RateSource for StaticRates {
        fn kind(&self) -> RateKind {
            self.kind
        }

        async fn update(&self, symbols: &[String]) -> Result<(), ValuationError> {
            self.probed.lock().unwrap().extend(symbols.iter().cloned());
            match &self.failure {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }

        async fn rates(&self) -> RateTable {
            self.table.clone()
        }
    }

    fn converter_with(equity: Arc<StaticRates>) -> UsdPivotConverter {
        let fiat = StaticRates::new(RateKind::Fiat, &[("RUB", 80.0), ("EUR", 0.9), ("USD", 1.0)]);
        let crypto = StaticRates::new(RateKind::Crypto, &[("BTC", 100_000.0), ("USDT", 1.0)]);
        UsdPivotConverter::new(fiat, crypto, equity)
    }

    fn converter() -> UsdPivotConverter {
        converter_with(StaticRates::new(RateKind::Equity, &[("SBER", 3.0)]))
    }

    #[tokio::test]
    async fn test_fiat_round_trip() {
        let converter = converter();
        for symbol in ["RUB", "EUR", "USD"] {
            let there = converter.convert(1.0, "USD", symbol).await.unwrap();
            let back = converter.convert(there, symbol, "USD").await.unwrap();
            assert!((back - 1.0).abs() < 1e-9, "{symbol}: {back}");
        }
    }

    #[tokio::test]
    async fn test_fiat_multiplies_crypto_divides() {
        let converter = converter();
        assert_eq!(converter.convert(10.0, "USD", "RUB").await.unwrap(), 800.0);
        assert_eq!(converter.convert(50_000.0, "USD", "BTC").await.unwrap(), 0.5);
        assert_eq!(converter.convert(2.0, "BTC", "USD").await.unwrap(), 200_000.0);
        assert_eq!(converter.convert(800.0, "rub", " usd ").await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_crypto_to_fiat_through_usd() {
        let converter = converter();
        let rub = converter.convert(0.001, "BTC", "RUB").await.unwrap();
        assert!((rub - 8_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_equity_in_both_directions() {
        let converter = converter();
        assert_eq!(converter.convert(10.0, "SBER", "USD").await.unwrap(), 30.0);
        assert_eq!(converter.convert(30.0, "USD", "SBER").await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_only_unresolved_symbols_are_probed() {
        let equity = StaticRates::new(RateKind::Equity, &[("SBER", 3.0)]);
        let converter = converter_with(equity.clone());

        converter.convert(1.0, "BTC", "RUB").await.unwrap();
        assert!(equity.probed.lock().unwrap().is_empty());

        converter.convert(1.0, "sber", "RUB").await.unwrap();
        assert_eq!(*equity.probed.lock().unwrap(), vec!["SBER".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_unsupported() {
        let converter = converter();
        assert_eq!(
            converter.convert(1.0, "DOGE", "USD").await,
            Err(ValuationError::UnsupportedCurrency("DOGE".to_string()))
        );
        assert_eq!(
            converter.convert(1.0, "USD", "NOT-A-TICKER").await,
            Err(ValuationError::UnsupportedCurrency("NOT-A-TICKER".to_string()))
        );
    }

    #[tokio::test]
    async fn test_equity_failure_surfaces_for_unpriced_symbol() {
        let unavailable = ValuationError::ProviderUnavailable {
            provider: RateKind::Equity,
            symbol: "GAZP".to_string(),
        };
        let converter =
            converter_with(StaticRates::failing(RateKind::Equity, unavailable.clone()));
        assert_eq!(converter.convert(1.0, "GAZP", "USD").await, Err(unavailable));
    }

    #[tokio::test]
    async fn test_missing_pivot_is_propagated() {
        let converter = converter_with(StaticRates::failing(
            RateKind::Equity,
            ValuationError::MissingPivotRate("RUB".to_string()),
        ));
        assert_eq!(
            converter.convert(1.0, "SBER", "USD").await,
            Err(ValuationError::MissingPivotRate("RUB".to_string()))
        );
    }

    #[tokio::test]
    async fn test_quote_reports_class() {
        let converter = converter();
        let quote = converter.quote("eur").await.unwrap();
        assert_eq!(quote.class, SymbolClass::Fiat);
        assert!((quote.unit_price_in_usd - 1.0 / 0.9).abs() < 1e-12);

        assert_eq!(converter.quote("USD").await.unwrap().class, SymbolClass::Fiat);
        assert_eq!(converter.quote("BTC").await.unwrap().class, SymbolClass::Crypto);
        assert_eq!(converter.quote("SBER").await.unwrap().class, SymbolClass::Equity);
    }
}
