//! Periodic feed check.
//!
//! Each cycle fetches the feed, segments the newest non-skipped item and
//! broadcasts it if it is newer than the watermark. The first cycle on an
//! empty store only records a baseline. The watermark is advanced before
//! fan-out starts, so an item is never sent twice even if delivery is
//! interrupted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{parse_feed, FeedError, FeedItem, FeedSource, RetryPolicy};
use crate::fanout::{feed_envelopes, BroadcastReport, FanoutEngine};
use crate::markup::{segment, Segmented};
use crate::message::MessageSegment;
use crate::reporter::{ErrorEvent, ErrorSink};
use crate::store::{StoreError, WatermarkStore};
use crate::strings::{keys, Strings};

/// Longest raw body attached to a segmentation report.
const MAX_REPORTED_BODY: usize = 3000;

/// What a poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No watermark existed; the newest item's time was stored without sending.
    Baseline(DateTime<Utc>),
    /// A newer item was broadcast.
    Broadcast(BroadcastReport),
    /// The newest item is not newer than the watermark.
    UpToDate,
    /// The feed has no broadcastable item.
    NoItems,
    /// The cycle was aborted; nothing was changed.
    Failed,
}

/// Newest broadcastable item, segmented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestItem {
    /// The item.
    pub item: FeedItem,
    /// Its segments, undecorated.
    pub segments: Vec<MessageSegment>,
}

/// Why the newest item could not be produced.
#[derive(Debug)]
pub enum LatestError {
    /// Fetch or document parse failure.
    Feed(FeedError),
    /// The item body could not be segmented.
    Segment {
        /// The offending item.
        item: FeedItem,
        /// Segmenter diagnosis.
        error: crate::markup::SegmentError,
    },
}

/// The first item without the skip marker, segmented.
///
/// # Errors
///
/// Returns [`LatestError::Segment`] if that item cannot be segmented.
pub fn select_latest(items: Vec<FeedItem>) -> Result<Option<LatestItem>, LatestError> {
    for item in items {
        match segment(&item) {
            Ok(Segmented::Skipped) => {
                debug!(title = %item.title, "item carries skip marker");
            }
            Ok(Segmented::Segments(segments)) => {
                return Ok(Some(LatestItem { item, segments }));
            }
            Err(error) => return Err(LatestError::Segment { item, error }),
        }
    }
    Ok(None)
}

/// Drives the periodic feed check.
pub struct Poller {
    source: Arc<dyn FeedSource>,
    retry: RetryPolicy<FeedError>,
    store: WatermarkStore,
    fanout: Arc<FanoutEngine>,
    sink: Arc<dyn ErrorSink>,
    strings: Arc<Strings>,
    default_interval: Duration,
    /// Identity of the last item reported as unsegmentable, to report once.
    last_reported: Mutex<Option<String>>,
}

impl Poller {
    /// Create a poller.
    pub fn new(
        source: Arc<dyn FeedSource>,
        retry: RetryPolicy<FeedError>,
        store: WatermarkStore,
        fanout: Arc<FanoutEngine>,
        sink: Arc<dyn ErrorSink>,
        strings: Arc<Strings>,
        default_interval: Duration,
    ) -> Self {
        Self {
            source,
            retry,
            store,
            fanout,
            sink,
            strings,
            default_interval,
            last_reported: Mutex::new(None),
        }
    }

    /// Fetch the feed with retries and parse it.
    ///
    /// # Errors
    ///
    /// Returns the last fetch error or a parse error.
    pub async fn fetch_items(&self) -> Result<Vec<FeedItem>, FeedError> {
        let raw = self.retry.run(|| self.source.fetch()).await?;
        parse_feed(&raw)
    }

    /// The newest non-skipped item and its segments, or `None` if the feed
    /// has no such item.
    ///
    /// # Errors
    ///
    /// Returns [`LatestError`] on fetch, parse or segmentation failure.
    pub async fn latest(&self) -> Result<Option<LatestItem>, LatestError> {
        let items = self.fetch_items().await.map_err(LatestError::Feed)?;
        select_latest(items)
    }

    /// Report a [`LatestError`] to the sink. Segmentation failures are
    /// reported once per item.
    pub async fn report_latest_error(&self, err: &LatestError) {
        match err {
            LatestError::Feed(e) => {
                self.sink
                    .report(ErrorEvent::new("feed", e.to_string()))
                    .await;
            }
            LatestError::Segment { item, error } => {
                let identity = format!("{}|{:?}", item.link, item.published_at);
                {
                    let mut last = self
                        .last_reported
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    if last.as_deref() == Some(identity.as_str()) {
                        return;
                    }
                    *last = Some(identity);
                }
                let body: String = item.raw_body.chars().take(MAX_REPORTED_BODY).collect();
                let event = ErrorEvent::new("segment", format!("item unavailable: {error}"))
                    .with("title", &item.title)
                    .with("link", &item.link)
                    .with("raw", body);
                self.sink.report(event).await;
            }
        }
    }

    /// Run one poll cycle.
    ///
    /// # Errors
    ///
    /// Only persistence failures propagate; everything else is reported and
    /// yields [`PollOutcome::Failed`].
    pub async fn poll_once(&self) -> Result<PollOutcome, StoreError> {
        let latest = match self.latest().await {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                debug!("feed has no broadcastable item");
                return Ok(PollOutcome::NoItems);
            }
            Err(e) => {
                warn!(error = ?e, "poll cycle aborted");
                self.report_latest_error(&e).await;
                return Ok(PollOutcome::Failed);
            }
        };

        let Some(published_at) = latest.item.published_at else {
            self.sink
                .report(
                    ErrorEvent::new("feed", "newest item has no valid publication date")
                        .with("title", &latest.item.title)
                        .with("link", &latest.item.link),
                )
                .await;
            return Ok(PollOutcome::Failed);
        };

        match self.store.watermark().await? {
            None => {
                self.store.advance_watermark(published_at).await?;
                info!(watermark = %published_at, "feed baseline recorded");
                return Ok(PollOutcome::Baseline(published_at));
            }
            Some(current) if published_at <= current => {
                debug!(published = %published_at, watermark = %current, "no new item");
                return Ok(PollOutcome::UpToDate);
            }
            Some(_) => {}
        }

        // Advance before sending: an interrupted fan-out is never repeated.
        if !self.store.advance_watermark(published_at).await? {
            return Ok(PollOutcome::UpToDate);
        }

        info!(title = %latest.item.title, published = %published_at, "broadcasting new item");
        let envelopes = feed_envelopes(
            &latest.item,
            &latest.segments,
            self.strings.get(keys::NEW_FEED),
        );
        let destinations = self.store.destination_ids().await?;
        let report = self.fanout.broadcast(&envelopes, &destinations).await;
        let gone = report.gone();
        if !gone.is_empty() {
            let removed = self.store.remove_destinations(&gone).await?;
            info!(removed, "unreachable destinations removed");
        }
        Ok(PollOutcome::Broadcast(report))
    }

    /// Send the newest item to `destinations` with the last-feed label,
    /// leaving the watermark untouched. Returns `None` when there was nothing
    /// to send; failures are reported to the sink.
    ///
    /// # Errors
    ///
    /// Returns a storage failure raised while pruning gone destinations.
    pub async fn send_latest(&self, destinations: &[i64]) -> Result<Option<BroadcastReport>, StoreError> {
        let latest = match self.latest().await {
            Ok(Some(latest)) => latest,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(error = ?e, "latest item unavailable");
                self.report_latest_error(&e).await;
                return Ok(None);
            }
        };
        let envelopes = feed_envelopes(
            &latest.item,
            &latest.segments,
            self.strings.get(keys::LAST_FEED),
        );
        let report = self.fanout.broadcast(&envelopes, destinations).await;
        let gone = report.gone();
        if !gone.is_empty() {
            self.store.remove_destinations(&gone).await?;
        }
        Ok(Some(report))
    }

    /// Poll until `shutdown` flips to `true`. The interval is re-read from the
    /// store after every cycle; an in-flight cycle always completes.
    ///
    /// # Errors
    ///
    /// Returns the storage failure that stopped the loop.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        info!("poller started");
        loop {
            match self.poll_once().await {
                Ok(outcome) => debug!(?outcome, "poll cycle finished"),
                Err(e) => {
                    error!(error = %e, "storage failure during poll, stopping poller");
                    return Err(e);
                }
            }
            let interval = self.store.interval(self.default_interval).await?;

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }
        info!("poller stopped");
        Ok(())
    }
}
