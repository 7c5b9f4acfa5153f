//! Latest known amount per (user, currency, category) asset slot.
//!
//! A projection of the asset-mode journal: every write replaces the slot's row,
//! every delete either re-points it at the next most recent entry or drops it.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::entries::EntryLog;
use super::model::{AssetLatestValue, AssetSlot, EntryRef, UserId};
use crate::store::{KeyValueCollection, compose_key, get_json, put_json, scan_json};

/// What happened to a slot after one of its entries was deleted.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotChange {
    Repointed(AssetLatestValue),
    Removed,
    /// The deleted entry was not the slot's origin, or the slot was absent.
    Unchanged,
}

pub struct AssetValuationStore {
    rows: Arc<dyn KeyValueCollection>,
    entries: Arc<dyn EntryLog>,
}

impl AssetValuationStore {
    pub fn new(rows: Arc<dyn KeyValueCollection>, entries: Arc<dyn EntryLog>) -> Self {
        Self { rows, entries }
    }

    fn key(slot: &AssetSlot) -> Vec<u8> {
        compose_key(&[
            &slot.user_id.to_string(),
            &slot.currency_code,
            &slot.category_name,
        ])
    }

    pub async fn get(&self, slot: &AssetSlot) -> Result<Option<AssetLatestValue>> {
        get_json(self.rows.as_ref(), &Self::key(slot)).await
    }

    /// Replaces the slot's row. Last write wins.
    pub async fn upsert(
        &self,
        user: UserId,
        currency: &str,
        category: &str,
        amount: Decimal,
        origin_ref: EntryRef,
    ) -> Result<AssetLatestValue> {
        self.upsert_at(user, currency, category, amount, origin_ref, Utc::now())
            .await
    }

    async fn upsert_at(
        &self,
        user: UserId,
        currency: &str,
        category: &str,
        amount: Decimal,
        origin_ref: EntryRef,
        last_updated: DateTime<Utc>,
    ) -> Result<AssetLatestValue> {
        let slot = AssetSlot::new(user, currency, category);
        let row = AssetLatestValue {
            user_id: slot.user_id,
            currency_code: slot.currency_code.clone(),
            category_name: slot.category_name.clone(),
            amount,
            last_updated,
            origin_transaction_ref: origin_ref,
        };
        put_json(self.rows.as_ref(), &Self::key(&slot), &row).await?;
        debug!(?slot, %amount, origin_ref, "Asset slot updated");
        Ok(row)
    }

    pub async fn latest_for_user(&self, user: UserId) -> Result<Vec<AssetLatestValue>> {
        scan_json(self.rows.as_ref(), &compose_key(&[&user.to_string()])).await
    }

    /// Handles the deletion of `entry_ref` from the slot. Call after the entry
    /// has left the journal, or before: it is excluded either way.
    pub async fn remove_or_repoint(
        &self,
        user: UserId,
        currency: &str,
        category: &str,
        entry_ref: EntryRef,
    ) -> Result<SlotChange> {
        let slot = AssetSlot::new(user, currency, category);
        match self.get(&slot).await? {
            Some(row) if row.origin_transaction_ref == entry_ref => {}
            _ => return Ok(SlotChange::Unchanged),
        }

        let next = self
            .entries
            .slot_entries(&slot)
            .await?
            .into_iter()
            .find(|entry| entry.entry_ref != entry_ref);

        match next {
            Some(entry) => {
                let row = self
                    .upsert_at(
                        user,
                        &slot.currency_code,
                        &slot.category_name,
                        entry.amount,
                        entry.entry_ref,
                        entry.created_at,
                    )
                    .await?;
                Ok(SlotChange::Repointed(row))
            }
            None => {
                self.rows.remove(&Self::key(&slot)).await?;
                debug!(?slot, "Asset slot removed");
                Ok(SlotChange::Removed)
            }
        }
    }

    /// The user's slots grouped by currency code.
    pub async fn assets_by_currency(
        &self,
        user: UserId,
    ) -> Result<BTreeMap<String, Vec<AssetLatestValue>>> {
        let mut grouped: BTreeMap<String, Vec<AssetLatestValue>> = BTreeMap::new();
        for row in self.latest_for_user(user).await? {
            grouped.entry(row.currency_code.clone()).or_default().push(row);
        }
        Ok(grouped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::journal::EntryJournal;
    use crate::store::memory::MemoryCollection;
    use chrono::TimeZone;

    fn journal() -> Arc<EntryJournal> {
        Arc::new(EntryJournal::new(
            Arc::new(MemoryCollection::new()),
            Arc::new(MemoryCollection::new()),
        ))
    }

    fn store(journal: Arc<EntryJournal>) -> AssetValuationStore {
        AssetValuationStore::new(Arc::new(MemoryCollection::new()), journal)
    }

    #[tokio::test]
    async fn test_upsert_is_last_write_wins() -> Result<()> {
        let assets = store(journal());
        assets.upsert(1, "BTC", "Crypto", Decimal::from(1), 1).await?;
        assets.upsert(1, "btc", "Crypto", Decimal::from(2), 2).await?;

        let rows = assets.latest_for_user(1).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, Decimal::from(2));
        assert_eq!(rows[0].origin_transaction_ref, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_slots_are_per_category_and_user() -> Result<()> {
        let assets = store(journal());
        assets.upsert(1, "USD", "Cash", Decimal::from(10), 1).await?;
        assets.upsert(1, "USD", "Bank", Decimal::from(20), 2).await?;
        assets.upsert(1, "RUB", "Cash", Decimal::from(1000), 3).await?;
        assets.upsert(12, "USD", "Cash", Decimal::from(5), 4).await?;

        assert_eq!(assets.latest_for_user(1).await?.len(), 3);
        assert_eq!(assets.latest_for_user(12).await?.len(), 1);

        let grouped = assets.assets_by_currency(1).await?;
        assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["RUB", "USD"]);
        assert_eq!(grouped["USD"].len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_repoints_to_next_most_recent() -> Result<()> {
        let journal = journal();
        let assets = store(journal.clone());
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap();

        let older = journal
            .add_at(1, "BTC", "Crypto", Decimal::new(5, 1), t0)
            .await?;
        let newer = journal
            .add_at(1, "BTC", "Crypto", Decimal::from(2), t1)
            .await?;
        assets
            .upsert(1, "BTC", "Crypto", newer.amount, newer.entry_ref)
            .await?;

        journal.remove(1, newer.entry_ref).await?;
        let change = assets
            .remove_or_repoint(1, "BTC", "Crypto", newer.entry_ref)
            .await?;

        let SlotChange::Repointed(row) = change else {
            panic!("expected repoint, got {change:?}");
        };
        assert_eq!(row.origin_transaction_ref, older.entry_ref);
        assert_eq!(row.amount, Decimal::new(5, 1));
        assert_eq!(row.last_updated, t0);
        assert_eq!(assets.latest_for_user(1).await?, vec![row]);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_of_last_entry_removes_slot() -> Result<()> {
        let journal = journal();
        let assets = store(journal.clone());
        let only = journal.add(1, "EUR", "Bank", Decimal::from(300)).await?;
        assets
            .upsert(1, "EUR", "Bank", only.amount, only.entry_ref)
            .await?;

        // Still in the journal: the deleted ref is excluded anyway.
        let change = assets
            .remove_or_repoint(1, "EUR", "Bank", only.entry_ref)
            .await?;
        assert_eq!(change, SlotChange::Removed);
        assert!(assets.latest_for_user(1).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_of_older_entry_keeps_slot() -> Result<()> {
        let journal = journal();
        let assets = store(journal.clone());
        let old = journal.add(1, "USD", "Cash", Decimal::from(1)).await?;
        let new = journal.add(1, "USD", "Cash", Decimal::from(2)).await?;
        assets.upsert(1, "USD", "Cash", new.amount, new.entry_ref).await?;

        let change = assets
            .remove_or_repoint(1, "USD", "Cash", old.entry_ref)
            .await?;
        assert_eq!(change, SlotChange::Unchanged);
        assert_eq!(assets.latest_for_user(1).await?[0].amount, Decimal::from(2));
        Ok(())
    }
}
