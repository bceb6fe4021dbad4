//! Error sink: surfaces unexpected conditions to the bot owner.
//!
//! Reporting is best-effort. A failing report is logged and swallowed so the
//! calling operation never fails because of it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

use crate::markup::escape_html;
use crate::store::WatermarkStore;
use crate::transport::Transport;

/// Longest context value forwarded to the owner, in characters.
const MAX_CONTEXT_CHARS: usize = 1500;

/// An unexpected condition worth a maintainer's attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    /// Short machine-friendly category (e.g. `segment`, `fanout`).
    pub tag: String,
    /// Human-readable summary.
    pub message: String,
    /// Extra diagnostic fields, in insertion order.
    pub context: Vec<(String, String)>,
}

impl ErrorEvent {
    /// New event without context.
    pub fn new(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Attach a context field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.push((key.into(), value.to_string()));
        self
    }
}

/// Destination for [`ErrorEvent`]s.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    /// Record an event. Never fails.
    async fn report(&self, event: ErrorEvent);
}

/// Aggregated statistics for one tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BugEntry {
    /// Number of events seen.
    pub count: u64,
    /// Message of the latest event.
    pub last_message: String,
    /// When the tag was first seen.
    pub first_seen: DateTime<Utc>,
    /// When the tag was last seen.
    pub last_seen: DateTime<Utc>,
}

/// In-memory aggregation of reported events, keyed by tag.
#[derive(Debug, Default)]
pub struct BugLog {
    entries: Mutex<BTreeMap<String, BugEntry>>,
}

impl BugLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an event.
    pub fn record(&self, event: &ErrorEvent) {
        let now = Utc::now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .entry(event.tag.clone())
            .and_modify(|entry| {
                entry.count = entry.count.saturating_add(1);
                entry.last_message.clone_from(&event.message);
                entry.last_seen = now;
            })
            .or_insert_with(|| BugEntry {
                count: 1,
                last_message: event.message.clone(),
                first_seen: now,
                last_seen: now,
            });
    }

    /// Copy of the current entries.
    pub fn snapshot(&self) -> BTreeMap<String, BugEntry> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Write the entries as pretty JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn dump(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.snapshot())
            .context("failed to serialize bug log")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write bug log to {}", path.display()))
    }
}

/// Logs, aggregates, and forwards events to the owner's private chat.
pub struct OwnerReporter {
    transport: Arc<dyn Transport>,
    store: WatermarkStore,
    log: Arc<BugLog>,
}

impl OwnerReporter {
    /// Create a reporter that notifies whoever owns the bot at report time.
    pub fn new(transport: Arc<dyn Transport>, store: WatermarkStore, log: Arc<BugLog>) -> Self {
        Self {
            transport,
            store,
            log,
        }
    }
}

/// HTML summary of an event for the owner.
pub fn format_event(event: &ErrorEvent) -> String {
    let mut text = format!(
        "<b>\u{26a0}\u{fe0f} {tag}</b>\n{message}",
        tag = escape_html(&event.tag),
        message = escape_html(&event.message),
    );
    for (key, value) in &event.context {
        let value: String = value.chars().take(MAX_CONTEXT_CHARS).collect();
        text.push_str(&format!(
            "\n\n<b>{key}:</b>\n<pre>{value}</pre>",
            key = escape_html(key),
            value = escape_html(&value),
        ));
    }
    text
}

#[async_trait]
impl ErrorSink for OwnerReporter {
    async fn report(&self, event: ErrorEvent) {
        error!(tag = %event.tag, context = ?event.context, "{}", event.message);
        self.log.record(&event);

        let owner = match self.store.owner().await {
            Ok(Some(owner)) => owner,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to look up owner for error report");
                return;
            }
        };
        let Ok(chat_id) = i64::try_from(owner) else {
            return;
        };
        if let Err(e) = self
            .transport
            .send_text(chat_id, &format_event(&event), true, None)
            .await
        {
            warn!(error = %e, "failed to forward error report to owner");
        }
    }
}
