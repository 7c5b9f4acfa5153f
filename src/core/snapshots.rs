//! Immutable dated capital totals.

use anyhow::Result;
use chrono::NaiveDate;
use std::sync::Arc;

use super::model::{CapitalSnapshot, UserId};
use crate::store::{KeyValueCollection, compose_key, get_json, scan_json};

pub struct SnapshotBook {
    rows: Arc<dyn KeyValueCollection>,
}

impl SnapshotBook {
    pub fn new(rows: Arc<dyn KeyValueCollection>) -> Self {
        Self { rows }
    }

    fn key(user: UserId, date: NaiveDate) -> Vec<u8> {
        compose_key(&[&user.to_string(), &date.format("%Y-%m-%d").to_string()])
    }

    pub async fn get(&self, user: UserId, date: NaiveDate) -> Result<Option<CapitalSnapshot>> {
        get_json(self.rows.as_ref(), &Self::key(user, date)).await
    }

    /// Returns false when a snapshot for the same (user, date) already exists.
    pub async fn insert_if_absent(&self, snapshot: &CapitalSnapshot) -> Result<bool> {
        self.rows
            .insert_if_absent(
                &Self::key(snapshot.user_id, snapshot.snapshot_date),
                &serde_json::to_vec(snapshot)?,
            )
            .await
    }

    /// Newest first.
    pub async fn recent(&self, user: UserId, limit: usize) -> Result<Vec<CapitalSnapshot>> {
        let mut rows: Vec<CapitalSnapshot> =
            scan_json(self.rows.as_ref(), &compose_key(&[&user.to_string()])).await?;
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }
}
