use super::{KeyValueCollection, compose_key, get_json, scan_json};
use crate::core::entries::EntryLog;
use crate::core::model::{AssetEntry, AssetSlot, EntryRef, UserId, normalize_symbol};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const SEQUENCE_KEY: &[u8] = b"entry_ref";

/// Store-backed log of asset-mode transactions.
///
/// Entries are keyed by user then by zero-padded reference, so a user's
/// entries come back in insertion order.
pub struct EntryJournal {
    entries: Arc<dyn KeyValueCollection>,
    sequences: Arc<dyn KeyValueCollection>,
    sequence_guard: Mutex<()>,
}

impl EntryJournal {
    pub fn new(
        entries: Arc<dyn KeyValueCollection>,
        sequences: Arc<dyn KeyValueCollection>,
    ) -> Self {
        Self {
            entries,
            sequences,
            sequence_guard: Mutex::new(()),
        }
    }

    fn entry_key(user: UserId, entry_ref: EntryRef) -> Vec<u8> {
        compose_key(&[&user.to_string(), &format!("{entry_ref:020}")])
    }

    async fn next_ref(&self) -> Result<EntryRef> {
        let _guard = self.sequence_guard.lock().await;
        let current: EntryRef = get_json(self.sequences.as_ref(), SEQUENCE_KEY)
            .await?
            .unwrap_or(0);
        let next = current + 1;
        self.sequences
            .put(SEQUENCE_KEY, &serde_json::to_vec(&next)?)
            .await?;
        Ok(next)
    }

    /// Records a new asset-mode entry stamped now.
    pub async fn add(
        &self,
        user: UserId,
        currency: &str,
        category: &str,
        amount: Decimal,
    ) -> Result<AssetEntry> {
        self.add_at(user, currency, category, amount, Utc::now())
            .await
    }

    /// Records a new asset-mode entry with an explicit creation time.
    pub async fn add_at(
        &self,
        user: UserId,
        currency: &str,
        category: &str,
        amount: Decimal,
        created_at: DateTime<Utc>,
    ) -> Result<AssetEntry> {
        let entry = AssetEntry {
            entry_ref: self.next_ref().await?,
            user_id: user,
            currency_code: normalize_symbol(currency),
            category_name: category.trim().to_string(),
            amount,
            created_at,
        };
        self.entries
            .put(
                &Self::entry_key(user, entry.entry_ref),
                &serde_json::to_vec(&entry)?,
            )
            .await
            .with_context(|| format!("Failed to store entry {}", entry.entry_ref))?;
        debug!(entry_ref = entry.entry_ref, user, "Recorded asset entry");
        Ok(entry)
    }

    pub async fn get(&self, user: UserId, entry_ref: EntryRef) -> Result<Option<AssetEntry>> {
        get_json(self.entries.as_ref(), &Self::entry_key(user, entry_ref)).await
    }

    pub async fn remove(&self, user: UserId, entry_ref: EntryRef) -> Result<AssetEntry> {
        let entry = self
            .get(user, entry_ref)
            .await?
            .ok_or_else(|| anyhow!("Entry {entry_ref} not found for user {user}"))?;
        self.entries
            .remove(&Self::entry_key(user, entry_ref))
            .await?;
        Ok(entry)
    }

    async fn user_entries(&self, user: UserId) -> Result<Vec<AssetEntry>> {
        scan_json(self.entries.as_ref(), &compose_key(&[&user.to_string()])).await
    }
}

#[async_trait]
impl EntryLog for EntryJournal {
    async fn asset_entries_before(
        &self,
        user: UserId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AssetEntry>> {
        Ok(self
            .user_entries(user)
            .await?
            .into_iter()
            .filter(|entry| entry.created_at < cutoff)
            .collect())
    }

    async fn slot_entries(&self, slot: &AssetSlot) -> Result<Vec<AssetEntry>> {
        let mut entries: Vec<AssetEntry> = self
            .user_entries(slot.user_id)
            .await?
            .into_iter()
            .filter(|entry| entry.slot() == *slot)
            .collect();
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.entry_ref.cmp(&a.entry_ref))
        });
        Ok(entries)
    }

    async fn users(&self) -> Result<Vec<UserId>> {
        let users: BTreeSet<UserId> = scan_json::<AssetEntry>(self.entries.as_ref(), &[])
            .await?
            .into_iter()
            .map(|entry| entry.user_id)
            .collect();
        Ok(users.into_iter().collect())
    }
}
