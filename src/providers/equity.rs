use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::util::{HttpSettings, with_retry};
use crate::core::cache::RateCache;
use crate::core::config::EquityProviderConfig;
use crate::core::error::ValuationError;
use crate::core::model::normalize_symbol;
use crate::core::rates::{RateKind, RateSource, RateTable};

/// Share prices from an exchange's security snapshot endpoint, one ticker per
/// request, converted to USD through the fiat rate of the exchange currency.
///
/// The fiat source must have been updated first. There is no fallback table:
/// a ticker that cannot be priced is absent from [`RateSource::rates`].
pub struct EquityRates {
    base_url: String,
    local_currency: String,
    boards: Vec<String>,
    price_fields: Vec<String>,
    http: HttpSettings,
    cache: Arc<RateCache<String, f64>>,
    /// Tickers that came back without a price; not requested again while fresh.
    misses: RateCache<String, Miss>,
    fiat: Arc<dyn RateSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Miss {
    /// Answered, but no configured board or field carried a price.
    NotListed,
    /// Transport error or non-2xx status.
    Unavailable,
}

#[derive(Debug, Default, Deserialize)]
struct IssBlock {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

impl IssBlock {
    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rows of `board` that belong to `ticker`.
    fn rows_for<'a>(&'a self, ticker: &'a str, board: &'a str) -> impl Iterator<Item = &'a [Value]> {
        let board_idx = self.column("BOARDID");
        let secid_idx = self.column("SECID");
        self.data.iter().map(Vec::as_slice).filter(move |row| {
            let on_board = board_idx
                .and_then(|i| row.get(i))
                .and_then(Value::as_str)
                .is_some_and(|b| b.eq_ignore_ascii_case(board));
            let same_security = secid_idx
                .and_then(|i| row.get(i))
                .and_then(Value::as_str)
                .is_none_or(|s| s.eq_ignore_ascii_case(ticker));
            on_board && same_security
        })
    }
}

#[derive(Debug, Deserialize)]
struct SecurityResponse {
    #[serde(default)]
    marketdata: IssBlock,
    #[serde(default)]
    securities: IssBlock,
}

fn as_price(value: &Value) -> Option<f64> {
    let price = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }?;
    (price.is_finite() && price > 0.0).then_some(price)
}

/// First usable price: boards in priority order, then fields in priority
/// order, live market data before the static security block.
fn pick_price(
    response: &SecurityResponse,
    ticker: &str,
    boards: &[String],
    fields: &[String],
) -> Option<f64> {
    let blocks = [&response.marketdata, &response.securities];
    boards.iter().find_map(|board| {
        fields.iter().find_map(|field| {
            blocks.iter().find_map(|block| {
                let idx = block.column(field)?;
                block
                    .rows_for(ticker, board)
                    .find_map(|row| row.get(idx).and_then(as_price))
            })
        })
    })
}

impl EquityRates {
    pub fn new(
        config: &EquityProviderConfig,
        http: HttpSettings,
        cache: Arc<RateCache<String, f64>>,
        fiat: Arc<dyn RateSource>,
    ) -> Self {
        EquityRates {
            base_url: config.base_url.clone(),
            local_currency: normalize_symbol(&config.local_currency),
            boards: config.boards.clone(),
            price_fields: config.price_fields.clone(),
            http,
            misses: RateCache::new(cache.ttl()),
            cache,
            fiat,
        }
    }

    /// Last price in the exchange currency, `None` when no board or field matched.
    #[instrument(name = "EquityPriceFetch", skip(self), fields(ticker = %ticker))]
    async fn fetch_local_price(&self, ticker: &str) -> Result<Option<f64>> {
        let url = format!(
            "{}/iss/engines/stock/markets/shares/securities/{}.json?iss.meta=off",
            self.base_url, ticker
        );
        debug!("Requesting security snapshot from {}", url);

        let client = self.http.client()?;
        let response = with_retry(
            || client.get(&url).send(),
            self.http.retries,
            self.http.retry_delay,
        )
        .await
        .map_err(|e| anyhow!("Request error: {} for ticker: {}", e, ticker))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for ticker: {}",
                response.status(),
                ticker
            ));
        }

        let text = response.text().await?;
        let data: SecurityResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse security response for {}: {}", ticker, e))?;

        Ok(pick_price(&data, ticker, &self.boards, &self.price_fields))
    }

    async fn pivot_rate(&self) -> Result<f64, ValuationError> {
        if self.local_currency == "USD" {
            return Ok(1.0);
        }
        self.fiat
            .rates()
            .await
            .get(&self.local_currency)
            .copied()
            .ok_or_else(|| ValuationError::MissingPivotRate(self.local_currency.clone()))
    }
}

#[async_trait]
impl RateSource for EquityRates {
    fn kind(&self) -> RateKind {
        RateKind::Equity
    }

    async fn update(&self, symbols: &[String]) -> Result<(), ValuationError> {
        let mut tickers: Vec<String> = Vec::new();
        for ticker in symbols.iter().map(|s| normalize_symbol(s)) {
            if !ticker.is_empty() && !tickers.contains(&ticker) {
                tickers.push(ticker);
            }
        }

        let mut failure = None;
        let mut pending = Vec::new();
        for ticker in tickers {
            let cached = self.cache.get(&ticker).await;
            if cached.as_ref().is_some_and(|c| c.fresh) {
                continue;
            }
            match self.misses.get(&ticker).await {
                Some(miss) if miss.fresh => {
                    debug!("Skipping {} after a recent {:?}", ticker, miss.value);
                    if miss.value == Miss::Unavailable && cached.is_none() {
                        failure.get_or_insert(ValuationError::ProviderUnavailable {
                            provider: RateKind::Equity,
                            symbol: ticker,
                        });
                    }
                }
                _ => pending.push(ticker),
            }
        }
        if pending.is_empty() {
            return failure.map_or(Ok(()), Err);
        }

        // Local currency units per USD.
        let pivot = self.pivot_rate().await?;

        for ticker in pending {
            match self.fetch_local_price(&ticker).await {
                Ok(Some(local_price)) => {
                    self.cache.put(ticker, local_price / pivot).await;
                }
                Ok(None) => {
                    debug!("No price found on configured boards for {}", ticker);
                    self.misses.put(ticker, Miss::NotListed).await;
                }
                Err(e) => {
                    self.misses.put(ticker.clone(), Miss::Unavailable).await;
                    if self.cache.get(&ticker).await.is_some() {
                        warn!("Equity API error, using cached price for {ticker}: {e}");
                    } else {
                        warn!("Equity API error, no price available for {ticker}: {e}");
                        failure.get_or_insert(ValuationError::ProviderUnavailable {
                            provider: RateKind::Equity,
                            symbol: ticker,
                        });
                    }
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rates(&self) -> RateTable {
        self.cache.entries().await.into_iter().collect()
    }
}
