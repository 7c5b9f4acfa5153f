//! Current and point-in-time capital.
//!
//! Current capital values the asset slots at live rates. Capital as of a past
//! date comes from a stored snapshot when there is one, otherwise it is rebuilt
//! from the journal with the per-day rate history.

use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::assets::{AssetValuationStore, SlotChange};
use super::currency::CurrencyConverter;
use super::entries::EntryLog;
use super::error::ValuationError;
use super::history::RateHistory;
use super::model::{
    AssetEntry, AssetLatestValue, AssetSlot, CapitalSnapshot, CurrencyRate, EntryRef, UserId,
    normalize_symbol,
};
use super::snapshots::SnapshotBook;

const USD: &str = "USD";
const RUB: &str = "RUB";

/// An asset, or a whole target, left out of a total.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedAsset {
    pub currency: String,
    /// `None` when the target itself could not be priced.
    pub category: Option<String>,
    pub target: String,
    pub reason: ValuationError,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CapitalReport {
    pub totals: BTreeMap<String, f64>,
    pub skipped: Vec<SkippedAsset>,
}

impl CapitalReport {
    fn zeroed(targets: &[String]) -> Self {
        Self {
            totals: targets.iter().map(|t| (t.clone(), 0.0)).collect(),
            skipped: Vec::new(),
        }
    }

    pub fn total(&self, target: &str) -> f64 {
        self.totals
            .get(&normalize_symbol(target))
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapitalGrowth {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_usd: f64,
    pub end_usd: f64,
    pub absolute_usd: f64,
    /// Zero when the starting capital is not positive.
    pub relative_percent: f64,
    pub period_days: i64,
}

/// Outcome of a scheduled snapshot run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotRun {
    pub created: usize,
    pub existing: usize,
    pub failed: usize,
}

fn to_f64(amount: Decimal) -> f64 {
    amount.to_f64().unwrap_or_default()
}

fn normalize_targets(targets: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(targets.len());
    for target in targets {
        let target = normalize_symbol(target);
        if !normalized.contains(&target) {
            normalized.push(target);
        }
    }
    normalized
}

/// Splits a failed lookup into a per-item valuation failure or a hard error.
fn valuation_failure(err: anyhow::Error) -> Result<ValuationError> {
    err.downcast::<ValuationError>()
}

pub struct CapitalSnapshotService {
    converter: Arc<dyn CurrencyConverter>,
    entries: Arc<dyn EntryLog>,
    assets: Arc<AssetValuationStore>,
    history: RateHistory,
    snapshots: SnapshotBook,
}

impl CapitalSnapshotService {
    pub fn new(
        converter: Arc<dyn CurrencyConverter>,
        entries: Arc<dyn EntryLog>,
        assets: Arc<AssetValuationStore>,
        history: RateHistory,
        snapshots: SnapshotBook,
    ) -> Self {
        Self {
            converter,
            entries,
            assets,
            history,
            snapshots,
        }
    }

    pub fn assets(&self) -> &AssetValuationStore {
        &self.assets
    }

    /// Sum of every asset slot of `user`, in each of `targets`, at live rates.
    #[instrument(skip(self))]
    pub async fn current_capital(&self, user: UserId, targets: &[String]) -> Result<CapitalReport> {
        let targets = normalize_targets(targets);
        let mut report = CapitalReport::zeroed(&targets);

        for row in self.assets.latest_for_user(user).await? {
            let amount = to_f64(row.amount);
            for target in &targets {
                match self
                    .converter
                    .convert(amount, &row.currency_code, target)
                    .await
                {
                    Ok(value) => {
                        *report.totals.entry(target.clone()).or_default() += value;
                    }
                    Err(reason) => {
                        warn!(
                            currency = %row.currency_code,
                            category = %row.category_name,
                            %target,
                            "Skipping asset: {reason}"
                        );
                        report.skipped.push(SkippedAsset {
                            currency: row.currency_code.clone(),
                            category: Some(row.category_name.clone()),
                            target: target.clone(),
                            reason,
                        });
                    }
                }
            }
        }
        Ok(report)
    }

    /// Capital of `user` at the end of `date`.
    #[instrument(skip(self))]
    pub async fn capital_as_of(
        &self,
        user: UserId,
        date: NaiveDate,
        targets: &[String],
    ) -> Result<CapitalReport> {
        let targets = normalize_targets(targets);
        match self.snapshots.get(user, date).await? {
            Some(snapshot) => {
                debug!(user, %date, "Answering from stored snapshot");
                Ok(self.report_from_snapshot(&snapshot, &targets).await)
            }
            None => self.reconstruct(user, date, &targets).await,
        }
    }

    async fn report_from_snapshot(
        &self,
        snapshot: &CapitalSnapshot,
        targets: &[String],
    ) -> CapitalReport {
        let mut report = CapitalReport::zeroed(targets);
        for target in targets {
            let value = match target.as_str() {
                USD => Ok(snapshot.total_in_usd),
                RUB => Ok(snapshot.total_in_rub),
                other => self.converter.convert(snapshot.total_in_usd, USD, other).await,
            };
            match value {
                Ok(value) => {
                    report.totals.insert(target.clone(), value);
                }
                Err(reason) => report.skipped.push(SkippedAsset {
                    currency: USD.to_string(),
                    category: None,
                    target: target.clone(),
                    reason,
                }),
            }
        }
        report
    }

    /// Rebuilds the capital at the end of `date` from the journal.
    async fn reconstruct(
        &self,
        user: UserId,
        date: NaiveDate,
        targets: &[String],
    ) -> Result<CapitalReport> {
        let cutoff = (date + Duration::days(1)).and_time(NaiveTime::MIN).and_utc();
        let entries = self.entries.asset_entries_before(user, cutoff).await?;
        debug!(user, %date, entries = entries.len(), "Reconstructing capital");

        let mut latest: HashMap<AssetSlot, AssetEntry> = HashMap::new();
        for entry in entries {
            let slot = entry.slot();
            let newer = latest.get(&slot).is_none_or(|current| {
                (entry.created_at, entry.entry_ref) > (current.created_at, current.entry_ref)
            });
            if newer {
                latest.insert(slot, entry);
            }
        }

        let mut report = CapitalReport::zeroed(targets);
        let mut total_usd = 0.0;
        for (slot, entry) in latest {
            match self.historical_rate(&slot.currency_code, date).await {
                Ok(rate) => total_usd += to_f64(entry.amount) * rate,
                Err(err) => {
                    let reason = valuation_failure(err)?;
                    warn!(currency = %slot.currency_code, %date, "Skipping asset: {reason}");
                    for target in targets {
                        report.skipped.push(SkippedAsset {
                            currency: slot.currency_code.clone(),
                            category: Some(slot.category_name.clone()),
                            target: target.clone(),
                            reason: reason.clone(),
                        });
                    }
                }
            }
        }

        for target in targets {
            match self.historical_rate(target, date).await {
                Ok(rate) => {
                    report.totals.insert(target.clone(), total_usd / rate);
                }
                Err(err) => {
                    let reason = valuation_failure(err)?;
                    warn!(%target, %date, "Cannot express capital: {reason}");
                    report.skipped.push(SkippedAsset {
                        currency: target.clone(),
                        category: None,
                        target: target.clone(),
                        reason,
                    });
                }
            }
        }
        Ok(report)
    }

    /// USD per unit of `symbol` on `date`: the stored rate for that day, else
    /// the nearest earlier one, else today's live rate.
    ///
    /// Pricing failures come back as a [`ValuationError`] inside the error.
    pub async fn historical_rate(&self, symbol: &str, date: NaiveDate) -> Result<f64> {
        let symbol = normalize_symbol(symbol);
        if symbol == USD {
            return Ok(1.0);
        }
        if let Some(row) = self.history.get(&symbol, date).await? {
            return Ok(row.rate_to_usd);
        }
        if let Some(row) = self.history.on_or_before(&symbol, date).await? {
            debug!(%symbol, %date, found = %row.date, "Using nearest earlier rate");
            return Ok(row.rate_to_usd);
        }

        let quote = self.converter.quote(&symbol).await?;
        warn!(%symbol, %date, "No stored rate, using the live rate");
        Ok(quote.unit_price_in_usd)
    }

    /// Stores an immutable snapshot for `date` (today by default). Returns
    /// false when one already exists.
    #[instrument(skip(self))]
    pub async fn create_snapshot(&self, user: UserId, date: Option<NaiveDate>) -> Result<bool> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        if self.snapshots.get(user, date).await?.is_some() {
            debug!(user, %date, "Snapshot already exists");
            return Ok(false);
        }

        let report = self
            .reconstruct(user, date, &[USD.to_string(), RUB.to_string()])
            .await?;
        if !report.skipped.is_empty() {
            warn!(user, %date, skipped = report.skipped.len(), "Snapshot leaves out some assets");
        }

        let snapshot = CapitalSnapshot {
            user_id: user,
            snapshot_date: date,
            total_in_usd: report.total(USD),
            total_in_rub: report.total(RUB),
        };
        let created = self.snapshots.insert_if_absent(&snapshot).await?;
        if created {
            info!(user, %date, total_in_usd = snapshot.total_in_usd, "Snapshot created");
        }
        Ok(created)
    }

    /// Runs [`Self::create_snapshot`] for every user with journal entries.
    /// A failing user is logged and counted, never fatal for the run.
    ///
    /// `on_progress` receives (done, total) after each user.
    pub async fn create_snapshots_for_all(
        &self,
        date: Option<NaiveDate>,
        on_progress: &(dyn Fn(u64, u64) + Sync),
    ) -> Result<SnapshotRun> {
        let users = self.entries.users().await?;
        let total = users.len() as u64;
        let mut run = SnapshotRun::default();
        for (done, user) in users.into_iter().enumerate() {
            match self.create_snapshot(user, date).await {
                Ok(true) => run.created += 1,
                Ok(false) => run.existing += 1,
                Err(e) => {
                    error!(user, "Snapshot failed: {e:#}");
                    run.failed += 1;
                }
            }
            on_progress(done as u64 + 1, total);
        }
        Ok(run)
    }

    /// Stores today's live USD rate for `symbol` unless a row for today
    /// exists. Returns whether a row was written; failures are logged only.
    pub async fn record_rate_for_today(&self, symbol: &str) -> bool {
        let symbol = normalize_symbol(symbol);
        match self.store_rate(&symbol, Utc::now().date_naive()).await {
            Ok(written) => written,
            Err(e) => {
                error!(%symbol, "Failed to record today's rate: {e:#}");
                false
            }
        }
    }

    async fn store_rate(&self, symbol: &str, date: NaiveDate) -> Result<bool> {
        if self.history.get(symbol, date).await?.is_some() {
            return Ok(false);
        }
        let quote = self.converter.quote(symbol).await?;
        self.history
            .insert_if_absent(&CurrencyRate {
                symbol: symbol.to_string(),
                date,
                rate_to_usd: quote.unit_price_in_usd,
                source: quote.class.to_string(),
            })
            .await
    }

    /// Hook for every asset-mode journal write.
    pub async fn on_asset_transaction_written(
        &self,
        user: UserId,
        currency: &str,
        category: &str,
        amount: Decimal,
        entry_ref: EntryRef,
    ) -> Result<AssetLatestValue> {
        let row = self
            .assets
            .upsert(user, currency, category, amount, entry_ref)
            .await?;
        self.record_rate_for_today(&row.currency_code).await;
        Ok(row)
    }

    /// Hook for every asset-mode journal delete.
    pub async fn on_asset_transaction_deleted(
        &self,
        user: UserId,
        currency: &str,
        category: &str,
        entry_ref: EntryRef,
    ) -> Result<SlotChange> {
        self.assets
            .remove_or_repoint(user, currency, category, entry_ref)
            .await
    }

    /// USD capital change between the ends of `start` and `end`.
    pub async fn capital_growth(
        &self,
        user: UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CapitalGrowth> {
        let usd = [USD.to_string()];
        let start_usd = self.capital_as_of(user, start, &usd).await?.total(USD);
        let end_usd = self.capital_as_of(user, end, &usd).await?.total(USD);
        let absolute_usd = end_usd - start_usd;
        let relative_percent = if start_usd > 0.0 {
            absolute_usd / start_usd * 100.0
        } else {
            0.0
        };

        Ok(CapitalGrowth {
            start_date: start,
            end_date: end,
            start_usd,
            end_usd,
            absolute_usd,
            relative_percent,
            period_days: (end - start).num_days(),
        })
    }

    pub async fn recent_snapshots(&self, user: UserId, limit: usize) -> Result<Vec<CapitalSnapshot>> {
        self.snapshots.recent(user, limit).await
    }
}
