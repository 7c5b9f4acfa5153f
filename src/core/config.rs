use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct FiatProviderConfig {
    pub base_url: String,
    /// Quote base sent to the API; the stored table is always per USD.
    pub base_currency: String,
    /// Last-resort prices, USD per unit.
    pub fallback_usd_per_unit: HashMap<String, f64>,
}

impl Default for FiatProviderConfig {
    fn default() -> Self {
        FiatProviderConfig {
            base_url: "https://open.er-api.com".to_string(),
            base_currency: "USD".to_string(),
            fallback_usd_per_unit: HashMap::from([
                ("RUB".to_string(), 0.012),
                ("EUR".to_string(), 1.1),
            ]),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CryptoProviderConfig {
    pub base_url: String,
    /// Ticker to aggregator coin id.
    pub ids: HashMap<String, String>,
    /// Last-resort prices, USD per coin.
    pub fallback_usd: HashMap<String, f64>,
}

impl Default for CryptoProviderConfig {
    fn default() -> Self {
        let ids = [
            ("BTC", "bitcoin"),
            ("ETH", "ethereum"),
            ("BNB", "binancecoin"),
            ("USDT", "tether"),
            ("USDC", "usd-coin"),
            ("SOL", "solana"),
            ("TRX", "tron"),
        ];
        let fallback = [
            ("BTC", 120000.0),
            ("ETH", 4300.0),
            ("SOL", 220.0),
            ("TRX", 0.34),
            ("USDT", 1.0),
            ("USDC", 1.0),
            ("BNB", 300.0),
        ];
        CryptoProviderConfig {
            base_url: "https://api.coingecko.com".to_string(),
            ids: ids
                .into_iter()
                .map(|(s, id)| (s.to_string(), id.to_string()))
                .collect(),
            fallback_usd: fallback
                .into_iter()
                .map(|(s, p)| (s.to_string(), p))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EquityProviderConfig {
    pub base_url: String,
    /// Currency the exchange quotes in; priced through the fiat table.
    pub local_currency: String,
    /// Market boards, tried in order.
    pub boards: Vec<String>,
    /// Price columns, tried in order for each board.
    pub price_fields: Vec<String>,
}

impl Default for EquityProviderConfig {
    fn default() -> Self {
        EquityProviderConfig {
            base_url: "https://iss.moex.com".to_string(),
            local_currency: "RUB".to_string(),
            boards: ["TQBR", "TQTF", "TQTD", "TQIF", "TQPI", "SMAL"]
                .map(String::from)
                .to_vec(),
            price_fields: ["LAST", "LCURRENTPRICE", "MARKETPRICE", "PREVPRICE", "OPEN"]
                .map(String::from)
                .to_vec(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    pub fiat: FiatProviderConfig,
    pub crypto: CryptoProviderConfig,
    pub equity: EquityProviderConfig,
    pub cache_ttl_secs: u64,
    pub timeout_secs: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            fiat: FiatProviderConfig::default(),
            crypto: CryptoProviderConfig::default(),
            equity: EquityProviderConfig::default(),
            cache_ttl_secs: 600,
            timeout_secs: 10,
            retries: 1,
            retry_delay_ms: 250,
        }
    }
}

impl ProvidersConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_report_currencies() -> Vec<String> {
    vec!["USD".to_string(), "RUB".to_string()]
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default = "default_report_currencies")]
    pub report_currencies: Vec<String>,
    pub data_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            providers: ProvidersConfig::default(),
            report_currencies: default_report_currencies(),
            data_path: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "kapital", "kapital")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "kapital", "kapital")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}
