//! Typed façade over the key-value store: feed watermark, poll interval,
//! owner/admin identities and the destination registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{KvStore, Namespace, StoreError};

const KEY_WATERMARK: &str = "last_feed_date";
const KEY_INTERVAL: &str = "interval_secs";
const KEY_OWNER: &str = "owner";
const KEY_ADMINS: &str = "admins";

/// Kind of conversation a destination is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// One-to-one chat with a user.
    Direct,
    /// Group or supergroup.
    Group,
    /// Broadcast channel.
    Channel,
}

/// Snapshot of a destination's metadata, refreshed on contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationMeta {
    /// Chat title, or the user's full name for direct chats.
    pub title: String,
    /// Public username, if any.
    #[serde(default)]
    pub username: Option<String>,
    /// Conversation kind.
    pub kind: ChatKind,
    /// Members excluding the bot, when known.
    #[serde(default)]
    pub members: Option<u32>,
}

/// A registered broadcast target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Transport chat identifier.
    pub id: i64,
    /// Last known metadata.
    pub meta: DestinationMeta,
}

/// Persistent bot state.
#[derive(Clone)]
pub struct WatermarkStore {
    kv: Arc<dyn KvStore>,
}

impl WatermarkStore {
    /// Wrap a key-value backend.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    // ── Watermark ──────────────────────────────────────────────

    /// Timestamp of the most recently broadcast feed item.
    pub async fn watermark(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let value = self.kv.get(Namespace::Config, KEY_WATERMARK).await?;
        Ok(value
            .as_ref()
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Store `at` as the watermark if it is newer than the current one (or
    /// none exists). Returns `true` when the stored value changed.
    pub async fn advance_watermark(&self, at: DateTime<Utc>) -> Result<bool, StoreError> {
        if let Some(current) = self.watermark().await? {
            if at <= current {
                return Ok(false);
            }
        }
        self.kv
            .put(Namespace::Config, KEY_WATERMARK, &json!(at.to_rfc3339()))
            .await?;
        info!(watermark = %at, "watermark advanced");
        Ok(true)
    }

    // ── Poll interval ──────────────────────────────────────────

    /// Persisted poll interval, or `default` if none was set.
    pub async fn interval(&self, default: Duration) -> Result<Duration, StoreError> {
        let value = self.kv.get(Namespace::Config, KEY_INTERVAL).await?;
        Ok(value
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .filter(|secs| *secs > 0)
            .map_or(default, Duration::from_secs))
    }

    /// Persist a new poll interval in seconds.
    pub async fn set_interval(&self, secs: u64) -> Result<(), StoreError> {
        self.kv
            .put(Namespace::Config, KEY_INTERVAL, &json!(secs))
            .await
    }

    // ── Owner / admins ─────────────────────────────────────────

    /// The owner's user id.
    pub async fn owner(&self) -> Result<Option<u64>, StoreError> {
        let value = self.kv.get(Namespace::Config, KEY_OWNER).await?;
        Ok(value.as_ref().and_then(serde_json::Value::as_u64))
    }

    /// Persist the owner's user id.
    pub async fn set_owner(&self, user_id: u64) -> Result<(), StoreError> {
        self.kv.put(Namespace::Config, KEY_OWNER, &json!(user_id)).await
    }

    /// Admin user ids.
    pub async fn admins(&self) -> Result<Vec<u64>, StoreError> {
        match self.kv.get(Namespace::Config, KEY_ADMINS).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// Persist the admin set.
    pub async fn set_admins(&self, admins: &[u64]) -> Result<(), StoreError> {
        self.kv
            .put(Namespace::Config, KEY_ADMINS, &serde_json::to_value(admins)?)
            .await
    }

    // ── Destinations ───────────────────────────────────────────

    /// Insert or refresh a destination. Returns `true` if it was new.
    pub async fn upsert_destination(&self, dest: &Destination) -> Result<bool, StoreError> {
        let key = dest.id.to_string();
        let existed = self.kv.get(Namespace::Chats, &key).await?.is_some();
        self.kv
            .put(Namespace::Chats, &key, &serde_json::to_value(&dest.meta)?)
            .await?;
        debug!(chat_id = dest.id, new = !existed, "destination saved");
        Ok(!existed)
    }

    /// Remove a destination. Returns `true` if it was registered.
    pub async fn remove_destination(&self, id: i64) -> Result<bool, StoreError> {
        let removed = self.kv.delete(Namespace::Chats, &id.to_string()).await?;
        if removed {
            info!(chat_id = id, "destination removed");
        }
        Ok(removed)
    }

    /// Remove several destinations, returning how many were registered.
    pub async fn remove_destinations(&self, ids: &[i64]) -> Result<usize, StoreError> {
        let mut removed = 0usize;
        for id in ids {
            if self.remove_destination(*id).await? {
                removed = removed.saturating_add(1);
            }
        }
        Ok(removed)
    }

    /// Look up one destination.
    pub async fn destination(&self, id: i64) -> Result<Option<Destination>, StoreError> {
        match self.kv.get(Namespace::Chats, &id.to_string()).await? {
            Some(value) => Ok(Some(Destination {
                id,
                meta: serde_json::from_value(value)?,
            })),
            None => Ok(None),
        }
    }

    /// Every registered destination. Entries with unreadable keys or
    /// metadata are skipped.
    pub async fn destinations(&self) -> Result<Vec<Destination>, StoreError> {
        let entries = self.kv.iterate(Namespace::Chats).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| {
                let id = key.parse::<i64>().ok()?;
                let meta = serde_json::from_value(value).ok()?;
                Some(Destination { id, meta })
            })
            .collect())
    }

    /// Registered destination ids.
    pub async fn destination_ids(&self) -> Result<Vec<i64>, StoreError> {
        Ok(self.destinations().await?.into_iter().map(|d| d.id).collect())
    }
}
