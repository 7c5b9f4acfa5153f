//! Read contract over the transaction log owned by the bookkeeping layer.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::{AssetEntry, AssetSlot, UserId};

#[async_trait]
pub trait EntryLog: Send + Sync {
    /// Asset-mode entries of `user` created strictly before `cutoff`.
    async fn asset_entries_before(
        &self,
        user: UserId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AssetEntry>>;

    /// Asset-mode entries of one slot, newest first.
    async fn slot_entries(&self, slot: &AssetSlot) -> Result<Vec<AssetEntry>>;

    /// Every user with at least one entry.
    async fn users(&self) -> Result<Vec<UserId>>;
}
