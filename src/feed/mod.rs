//! Feed ingestion: fetching, parsing and the periodic poll loop.
//!
//! The feed is a standard RSS 2.0 document. Items are kept in document order,
//! which for the feeds this bot follows means newest first.

pub mod poller;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

pub use poller::{select_latest, LatestError, LatestItem, PollOutcome, Poller};
pub use retry::RetryPolicy;

/// One parsed feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    /// Entry title (plain text).
    pub title: String,
    /// Permalink of the entry.
    pub link: String,
    /// Publication time; `None` when the entry has no parseable `pubDate`.
    pub published_at: Option<DateTime<Utc>>,
    /// Entry body as markup.
    pub raw_body: String,
}

/// Errors from fetching or parsing the feed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Network failure, timeout, or a server-side status worth retrying.
    #[error("transient feed failure: {0}")]
    Transient(String),
    /// Non-retryable fetch failure (bad status, invalid URL).
    #[error("feed fetch failed: {0}")]
    Fetch(String),
    /// The document or an entry could not be parsed.
    #[error("feed parse failed: {0}")]
    Parse(String),
}

impl FeedError {
    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Source of raw feed documents.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the current feed document.
    async fn fetch(&self) -> Result<String, FeedError>;
}

/// Fetches the feed over HTTP.
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
}

impl HttpFeedSource {
    /// Build a source for `url` with a request timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Fetch`] if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration, user_agent: &str) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FeedError::Fetch(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self) -> Result<String, FeedError> {
        debug!(url = %self.url, "fetching feed");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::Transient(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(FeedError::Fetch(format!("HTTP {}", status.as_u16())));
        }

        response.text().await.map_err(classify_reqwest_error)
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> FeedError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        FeedError::Transient(e.to_string())
    } else {
        FeedError::Fetch(e.to_string())
    }
}

/// Parse an RSS document into items, in document order.
///
/// The body is the item's `description`, falling back to `content:encoded`.
///
/// # Errors
///
/// Returns [`FeedError::Parse`] if the document is not valid RSS.
pub fn parse_feed(content: &str) -> Result<Vec<FeedItem>, FeedError> {
    let channel = content
        .parse::<rss::Channel>()
        .map_err(|e| FeedError::Parse(e.to_string()))?;

    let items = channel
        .items()
        .iter()
        .map(|item| FeedItem {
            title: item.title().unwrap_or_default().trim().to_owned(),
            link: item.link().unwrap_or_default().trim().to_owned(),
            published_at: item.pub_date().and_then(parse_pub_date),
            raw_body: item
                .description()
                .or_else(|| item.content())
                .unwrap_or_default()
                .to_owned(),
        })
        .collect();
    Ok(items)
}

/// Parse an RSS `pubDate` (RFC 2822, with an RFC 3339 fallback).
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
