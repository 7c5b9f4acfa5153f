pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::core::assets::AssetValuationStore;
use crate::core::cache::RateCache;
use crate::core::config::AppConfig;
use crate::core::history::RateHistory;
use crate::core::model::{EntryRef, UserId};
use crate::core::snapshots::SnapshotBook;
use crate::core::{CapitalSnapshotService, RateKind, RateSource, RateTable, UsdPivotConverter};
use crate::providers::{CryptoRates, EquityRates, FiatRates, HttpSettings};
use crate::store::KeyValueStore;
use crate::store::journal::EntryJournal;
use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Convert {
        amount: f64,
        from: String,
        to: String,
    },
    Capital {
        user: UserId,
        as_of: Option<NaiveDate>,
        currencies: Vec<String>,
    },
    Growth {
        user: UserId,
        from: NaiveDate,
        to: NaiveDate,
    },
    Snapshot {
        user: Option<UserId>,
        date: Option<NaiveDate>,
    },
    Snapshots {
        user: UserId,
        limit: usize,
    },
    AssetAdd {
        user: UserId,
        currency: String,
        category: String,
        amount: Decimal,
    },
    AssetRemove {
        user: UserId,
        entry_ref: EntryRef,
    },
    Assets {
        user: UserId,
    },
}

/// Rate sources, converter and services wired over one store.
pub struct App {
    pub config: AppConfig,
    pub converter: Arc<UsdPivotConverter>,
    pub journal: Arc<EntryJournal>,
    pub capital: CapitalSnapshotService,
    store: KeyValueStore,
}

impl App {
    pub fn build(config: AppConfig, store: KeyValueStore) -> Result<Self> {
        let providers = &config.providers;
        let http = HttpSettings {
            timeout: providers.timeout(),
            retries: providers.retries,
            retry_delay: std::time::Duration::from_millis(providers.retry_delay_ms),
        };

        // One cache per source, shared by every request in the process.
        let fiat_cache = Arc::new(RateCache::<RateKind, RateTable>::new(providers.cache_ttl()));
        let crypto_cache = Arc::new(RateCache::<RateKind, RateTable>::new(providers.cache_ttl()));
        let equity_cache = Arc::new(RateCache::<String, f64>::new(providers.cache_ttl()));

        let fiat: Arc<dyn RateSource> =
            Arc::new(FiatRates::new(&providers.fiat, http.clone(), fiat_cache));
        let crypto: Arc<dyn RateSource> =
            Arc::new(CryptoRates::new(&providers.crypto, http.clone(), crypto_cache));
        let equity: Arc<dyn RateSource> = Arc::new(EquityRates::new(
            &providers.equity,
            http,
            equity_cache,
            Arc::clone(&fiat),
        ));
        let converter = Arc::new(UsdPivotConverter::new(fiat, crypto, equity));

        let journal = Arc::new(EntryJournal::new(
            store.collection("entries")?,
            store.collection("sequences")?,
        ));
        let assets = Arc::new(AssetValuationStore::new(
            store.collection("asset_latest_values")?,
            journal.clone(),
        ));
        let capital = CapitalSnapshotService::new(
            converter.clone(),
            journal.clone(),
            assets,
            RateHistory::new(store.collection("currency_rates")?),
            SnapshotBook::new(store.collection("capital_snapshots")?),
        );

        Ok(Self {
            config,
            converter,
            journal,
            capital,
            store,
        })
    }

    pub async fn execute(&self, command: AppCommand) -> Result<()> {
        match command {
            AppCommand::Convert { amount, from, to } => {
                cli::convert::run(self.converter.as_ref(), amount, &from, &to).await
            }
            AppCommand::Capital {
                user,
                as_of,
                currencies,
            } => {
                let currencies = if currencies.is_empty() {
                    self.config.report_currencies.clone()
                } else {
                    currencies
                };
                cli::capital::run(&self.capital, user, as_of, &currencies).await
            }
            AppCommand::Growth { user, from, to } => {
                cli::capital::growth(&self.capital, user, from, to).await
            }
            AppCommand::Snapshot {
                user: Some(user),
                date,
            } => cli::snapshot::create(&self.capital, user, date).await,
            AppCommand::Snapshot { user: None, date } => {
                cli::snapshot::create_for_all(&self.capital, date).await
            }
            AppCommand::Snapshots { user, limit } => {
                cli::capital::list_snapshots(&self.capital, user, limit).await
            }
            AppCommand::AssetAdd {
                user,
                currency,
                category,
                amount,
            } => cli::assets::add(&self.journal, &self.capital, user, &currency, &category, amount).await,
            AppCommand::AssetRemove { user, entry_ref } => {
                cli::assets::remove(&self.journal, &self.capital, user, entry_ref).await
            }
            AppCommand::Assets { user } => cli::assets::list(&self.capital, user).await,
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}

fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    match config_path {
        Some(path) => AppConfig::load_from_path(path),
        None => {
            let path = AppConfig::default_config_path()?;
            if path.exists() {
                AppConfig::load_from_path(&path)
            } else {
                debug!("No config at {}, using defaults", path.display());
                Ok(AppConfig::default())
            }
        }
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("kapital starting...");

    let config = load_config(config_path)?;
    debug!("Loaded config: {config:#?}");

    let store = KeyValueStore::open(&config.default_data_path()?)?;
    let app = App::build(config, store)?;

    let result = app.execute(command).await;
    app.flush()?;
    result
}
