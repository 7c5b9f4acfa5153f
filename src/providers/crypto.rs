use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::util::{HttpSettings, with_retry};
use crate::core::cache::RateCache;
use crate::core::config::CryptoProviderConfig;
use crate::core::error::ValuationError;
use crate::core::model::normalize_symbol;
use crate::core::rates::{RateKind, RateSource, RateTable, usable_rates};

/// Coin prices in USD from a price aggregator, fetched in one batch request.
pub struct CryptoRates {
    base_url: String,
    /// Ticker to aggregator id, ordered so batch URLs are stable.
    ids: BTreeMap<String, String>,
    fallback: RateTable,
    http: HttpSettings,
    cache: Arc<RateCache<RateKind, RateTable>>,
    /// Tickers asked for within the TTL, whether or not the aggregator priced them.
    requested: RateCache<String, ()>,
}

enum FetchOutcome {
    Rates(RateTable),
    RateLimited,
}

type PriceResponse = HashMap<String, HashMap<String, f64>>;

impl CryptoRates {
    pub fn new(
        config: &CryptoProviderConfig,
        http: HttpSettings,
        cache: Arc<RateCache<RateKind, RateTable>>,
    ) -> Self {
        CryptoRates {
            base_url: config.base_url.clone(),
            ids: config
                .ids
                .iter()
                .map(|(symbol, id)| (normalize_symbol(symbol), id.clone()))
                .collect(),
            fallback: usable_rates(config.fallback_usd.clone()),
            http,
            requested: RateCache::new(cache.ttl()),
            cache,
        }
    }

    /// Requested tickers that have an aggregator id; all known ones when none
    /// are requested.
    fn tracked(&self, symbols: &[String]) -> Vec<String> {
        let known: Vec<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| self.ids.contains_key(s))
            .collect();
        if known.is_empty() && symbols.is_empty() {
            return self.ids.keys().cloned().collect();
        }
        known
    }

    #[instrument(name = "CryptoRatesFetch", skip(self))]
    async fn fetch(&self, symbols: &[String]) -> Result<FetchOutcome> {
        let ids: Vec<&str> = symbols
            .iter()
            .filter_map(|s| self.ids.get(s).map(String::as_str))
            .collect();
        let url = format!(
            "{}/api/v3/simple/price?ids={}&vs_currencies=usd",
            self.base_url,
            ids.join(",")
        );
        debug!("Requesting crypto prices from {}", url);

        let client = self.http.client()?;
        let response = with_retry(
            || client.get(&url).send(),
            self.http.retries,
            self.http.retry_delay,
        )
        .await
        .map_err(|e| anyhow!("Request error: {} for crypto batch", e))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Ok(FetchOutcome::RateLimited);
        }
        if !response.status().is_success() {
            return Err(anyhow!("HTTP error: {} for crypto batch", response.status()));
        }

        let text = response.text().await?;
        let data: PriceResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse crypto response: {}", e))?;

        let table = symbols
            .iter()
            .filter_map(|symbol| {
                let id = self.ids.get(symbol)?;
                let usd = data.get(id)?.get("usd")?;
                Some((symbol.clone(), *usd))
            })
            .collect();
        Ok(FetchOutcome::Rates(usable_rates(table)))
    }
}

#[async_trait]
impl RateSource for CryptoRates {
    fn kind(&self) -> RateKind {
        RateKind::Crypto
    }

    async fn update(&self, symbols: &[String]) -> Result<(), ValuationError> {
        let mut pending = Vec::new();
        for symbol in self.tracked(symbols) {
            if !self.requested.get(&symbol).await.is_some_and(|c| c.fresh) {
                pending.push(symbol);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let cached = self.cache.get(&RateKind::Crypto).await;
        let outcome = self.fetch(&pending).await;
        for symbol in pending {
            self.requested.put(symbol, ()).await;
        }

        match outcome {
            Ok(FetchOutcome::Rates(fetched)) => {
                let mut table = cached.map(|c| c.value).unwrap_or_default();
                table.extend(fetched);
                self.cache.put(RateKind::Crypto, table).await;
            }
            Ok(FetchOutcome::RateLimited) if cached.is_some() => {
                debug!("Crypto API rate limited, keeping cached rates");
            }
            Ok(FetchOutcome::RateLimited) => {
                warn!("Crypto API rate limited with nothing cached, using fallback rates");
            }
            Err(e) if cached.is_some() => warn!("Crypto API error, using cached rates: {e}"),
            Err(e) => warn!("Crypto API error, using fallback rates: {e}"),
        }
        Ok(())
    }

    async fn rates(&self) -> RateTable {
        match self.cache.get(&RateKind::Crypto).await {
            Some(cached) => cached.value,
            None => self.fallback.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(uri: &str, ttl: Duration) -> CryptoRates {
        CryptoRates::new(
            &CryptoProviderConfig {
                base_url: uri.to_string(),
                ..CryptoProviderConfig::default()
            },
            HttpSettings {
                retries: 0,
                ..HttpSettings::default()
            },
            Arc::new(RateCache::new(ttl)),
        )
    }

    #[tokio::test]
    async fn test_successful_batch_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .and(query_param("ids", "bitcoin,ethereum"))
            .and(query_param("vs_currencies", "usd"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"bitcoin": {"usd": 65000.5}, "ethereum": {"usd": 3100.0}}"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let crypto = provider(&mock_server.uri(), Duration::from_secs(600));
        let symbols = vec!["btc".to_string(), "ETH".to_string(), "DOGE".to_string()];
        crypto.update(&symbols).await.unwrap();
        crypto.update(&symbols).await.unwrap();

        let rates = crypto.rates().await;
        assert_eq!(rates.get("BTC"), Some(&65000.5));
        assert_eq!(rates.get("ETH"), Some(&3100.0));
        assert!(!rates.contains_key("DOGE"));
    }

    #[tokio::test]
    async fn test_partial_response_is_not_refetched_within_ttl() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"bitcoin": {"usd": 60000.0}}"#),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let crypto = provider(&mock_server.uri(), Duration::from_secs(600));
        for _ in 0..5 {
            crypto.update(&[]).await.unwrap();
        }

        let rates = crypto.rates().await;
        assert_eq!(rates.get("BTC"), Some(&60000.0));
        assert!(!rates.contains_key("ETH"));
    }

    #[tokio::test]
    async fn test_only_new_symbols_are_fetched() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .and(query_param("ids", "bitcoin"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"bitcoin": {"usd": 60000.0}}"#),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .and(query_param("ids", "ethereum"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"ethereum": {"usd": 3000.0}}"#),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let crypto = provider(&mock_server.uri(), Duration::from_secs(600));
        crypto.update(&["BTC".to_string()]).await.unwrap();
        crypto
            .update(&["BTC".to_string(), "ETH".to_string()])
            .await
            .unwrap();
        crypto.update(&["ETH".to_string()]).await.unwrap();

        let rates = crypto.rates().await;
        assert_eq!(rates.get("BTC"), Some(&60000.0));
        assert_eq!(rates.get("ETH"), Some(&3000.0));
    }

    #[tokio::test]
    async fn test_failed_refresh_is_not_retried_within_ttl() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let crypto = provider(&mock_server.uri(), Duration::from_secs(600));
        for _ in 0..5 {
            crypto.update(&[]).await.unwrap();
        }
        assert_eq!(crypto.rates().await.get("BTC"), Some(&120000.0));
    }

    #[tokio::test]
    async fn test_rate_limit_with_cache_returns_previous_rates() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"bitcoin": {"usd": 60000.0}}"#),
            )
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let crypto = provider(&mock_server.uri(), Duration::from_millis(10));
        let symbols = vec!["BTC".to_string()];
        crypto.update(&symbols).await.unwrap();
        let before = crypto.rates().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = crypto.update(&symbols).await;

        assert!(result.is_ok());
        assert_eq!(crypto.rates().await, before);
        assert_eq!(before.get("BTC"), Some(&60000.0));
    }

    #[tokio::test]
    async fn test_rate_limit_without_cache_uses_fallback() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&mock_server)
            .await;

        let crypto = provider(&mock_server.uri(), Duration::from_secs(600));
        assert!(crypto.update(&[]).await.is_ok());
        assert!(crypto.update(&[]).await.is_ok());

        let rates = crypto.rates().await;
        assert_eq!(rates.get("BTC"), Some(&120000.0));
        assert_eq!(rates.get("USDT"), Some(&1.0));
    }

    #[tokio::test]
    async fn test_malformed_response_falls_back() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/simple/price"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let crypto = provider(&mock_server.uri(), Duration::from_secs(600));
        let outcome = crypto.fetch(&["BTC".to_string()]).await;
        assert!(
            outcome
                .err()
                .unwrap()
                .to_string()
                .contains("Failed to parse crypto response")
        );

        crypto.update(&["BTC".to_string()]).await.unwrap();
        assert_eq!(crypto.rates().await.get("ETH"), Some(&4300.0));
    }

    #[tokio::test]
    async fn test_unknown_symbols_are_never_requested() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(0)
            .mount(&mock_server)
            .await;

        let crypto = provider(&mock_server.uri(), Duration::from_secs(600));
        crypto.update(&["SBER".to_string()]).await.unwrap();
    }
}
