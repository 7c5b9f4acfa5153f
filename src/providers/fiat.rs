use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::util::{HttpSettings, with_retry};
use crate::core::cache::RateCache;
use crate::core::config::FiatProviderConfig;
use crate::core::error::ValuationError;
use crate::core::rates::{RateKind, RateSource, RateTable, usable_rates};

/// Fiat table from an exchange-rate API, held as units of each currency per
/// one USD whichever base the API is asked for.
pub struct FiatRates {
    base_url: String,
    base_currency: String,
    fallback: RateTable,
    http: HttpSettings,
    cache: Arc<RateCache<RateKind, RateTable>>,
    /// Set when a refresh fails; no new request is made while it is fresh.
    failures: RateCache<RateKind, ()>,
}

#[derive(Debug, Deserialize)]
struct FiatResponse {
    rates: Option<HashMap<String, f64>>,
}

impl FiatRates {
    pub fn new(
        config: &FiatProviderConfig,
        http: HttpSettings,
        cache: Arc<RateCache<RateKind, RateTable>>,
    ) -> Self {
        // The configured fallback is USD per unit; the table is the other way round.
        let fallback = config
            .fallback_usd_per_unit
            .iter()
            .map(|(symbol, usd_per_unit)| (symbol.clone(), 1.0 / usd_per_unit))
            .collect();
        FiatRates {
            base_url: config.base_url.clone(),
            base_currency: config.base_currency.to_uppercase(),
            fallback: usable_rates(fallback),
            http,
            failures: RateCache::new(cache.ttl()),
            cache,
        }
    }

    #[instrument(name = "FiatRatesFetch", skip(self), fields(base = %self.base_currency))]
    async fn fetch(&self) -> Result<RateTable> {
        let url = format!("{}/v6/latest/{}", self.base_url, self.base_currency);
        debug!("Requesting fiat rates from {}", url);

        let client = self.http.client()?;
        let response = with_retry(
            || client.get(&url).send(),
            self.http.retries,
            self.http.retry_delay,
        )
        .await
        .map_err(|e| anyhow!("Request error: {} for fiat base: {}", e, self.base_currency))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for fiat base: {}",
                response.status(),
                self.base_currency
            ));
        }

        let text = response.text().await?;
        let data: FiatResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse fiat response: {}", e))?;
        let rates = data
            .rates
            .ok_or_else(|| anyhow!("Missing 'rates' in fiat response"))?;

        let mut table = usable_rates(rates);
        table.insert(self.base_currency.clone(), 1.0);

        // Units per base to units per USD.
        let usd_per_base = table
            .get("USD")
            .copied()
            .ok_or_else(|| anyhow!("Missing USD rate for fiat base: {}", self.base_currency))?;
        for rate in table.values_mut() {
            *rate /= usd_per_base;
        }
        Ok(table)
    }
}

#[async_trait]
impl RateSource for FiatRates {
    fn kind(&self) -> RateKind {
        RateKind::Fiat
    }

    async fn update(&self, _symbols: &[String]) -> Result<(), ValuationError> {
        let cached = self.cache.get(&RateKind::Fiat).await;
        if cached.as_ref().is_some_and(|c| c.fresh) {
            return Ok(());
        }
        if self
            .failures
            .get(&RateKind::Fiat)
            .await
            .is_some_and(|c| c.fresh)
        {
            debug!("Fiat refresh failed recently, not retrying yet");
            return Ok(());
        }

        match self.fetch().await {
            Ok(table) => {
                self.cache.put(RateKind::Fiat, table).await;
                return Ok(());
            }
            Err(e) if cached.is_some() => warn!("Fiat API error, using cached rates: {e}"),
            Err(e) => warn!("Fiat API error, using fallback rates: {e}"),
        }
        self.failures.put(RateKind::Fiat, ()).await;
        Ok(())
    }

    async fn rates(&self) -> RateTable {
        match self.cache.get(&RateKind::Fiat).await {
            Some(cached) => cached.value,
            None => self.fallback.clone(),
        }
    }
}
