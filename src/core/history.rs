//! Per-day USD rates used to value holdings at a past date.

use anyhow::Result;
use chrono::NaiveDate;
use std::sync::Arc;

use super::model::{CurrencyRate, normalize_symbol};
use crate::store::{KeyValueCollection, compose_key, get_json, scan_json};

pub struct RateHistory {
    rows: Arc<dyn KeyValueCollection>,
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

impl RateHistory {
    pub fn new(rows: Arc<dyn KeyValueCollection>) -> Self {
        Self { rows }
    }

    pub async fn get(&self, symbol: &str, date: NaiveDate) -> Result<Option<CurrencyRate>> {
        let key = compose_key(&[&normalize_symbol(symbol), &date_key(date)]);
        get_json(self.rows.as_ref(), &key).await
    }

    /// Latest row for `symbol` dated on or before `date`.
    pub async fn on_or_before(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<CurrencyRate>> {
        let prefix = compose_key(&[&normalize_symbol(symbol)]);
        let rows: Vec<CurrencyRate> = scan_json(self.rows.as_ref(), &prefix).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.date <= date)
            .max_by_key(|row| row.date))
    }

    /// Stores `rate` unless a row for its (symbol, date) exists. Returns whether it wrote.
    pub async fn insert_if_absent(&self, rate: &CurrencyRate) -> Result<bool> {
        let key = compose_key(&[&normalize_symbol(&rate.symbol), &date_key(rate.date)]);
        self.rows
            .insert_if_absent(&key, &serde_json::to_vec(rate)?)
            .await
    }
}
