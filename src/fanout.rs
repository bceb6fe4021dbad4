//! Fan-out engine: delivers a segment sequence to many destinations.
//!
//! Destinations are served concurrently through a bounded worker pool. Within
//! one destination segments go out strictly in order, and a failing
//! destination never blocks the others.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::feed::FeedItem;
use crate::markup::escape_html;
use crate::message::MessageSegment;
use crate::reporter::{ErrorEvent, ErrorSink};
use crate::transport::{send_segment, Button, DeliveryError, Markup, MessageRef, Transport};

/// Appended to a segment resent as literal text after its markup was rejected.
pub const FORMAT_WARNING: &str = "\n\n\u{26a0}\u{fe0f} Formatting could not be displayed.";

/// Label of the trailing link button on feed broadcasts.
pub const VIEW_POST_LABEL: &str = "View post";

/// Label of the button attached to images that were links in the feed.
pub const IMAGE_LINK_LABEL: &str = "Open image link";

/// Wait used for a transient failure without a retry-after hint.
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(1);

/// A segment plus the inline buttons to attach to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Content to send.
    pub segment: MessageSegment,
    /// Inline keyboard rows; empty for none.
    pub buttons: Vec<Vec<Button>>,
}

impl Envelope {
    /// Envelope without buttons.
    pub fn plain(segment: MessageSegment) -> Self {
        Self {
            segment,
            buttons: Vec::new(),
        }
    }

    /// Envelopes for segments, adding a link button to linked images.
    pub fn wrap_all(segments: &[MessageSegment]) -> Vec<Self> {
        segments
            .iter()
            .map(|segment| {
                let mut envelope = Self::plain(segment.clone());
                if let MessageSegment::Image {
                    link_url: Some(url),
                    ..
                } = segment
                {
                    envelope.buttons.push(vec![Button::url(IMAGE_LINK_LABEL, url)]);
                }
                envelope
            })
            .collect()
    }

    fn markup(&self) -> Option<Markup> {
        Markup::inline(self.buttons.clone())
    }
}

/// Decorate a feed item's segments for broadcast: a header with `label`, the
/// title and the link goes on the first segment, a "view post" button on the
/// last.
pub fn feed_envelopes(item: &FeedItem, segments: &[MessageSegment], label: &str) -> Vec<Envelope> {
    let mut envelopes = Envelope::wrap_all(segments);
    if envelopes.is_empty() {
        envelopes.push(Envelope::plain(MessageSegment::text(String::new(), true)));
    }

    let header = feed_header(item, label);
    if let Some(first) = envelopes.first_mut() {
        let separator = if first.segment.markup().is_empty() {
            ""
        } else {
            "\n\n"
        };
        first.segment.prepend_markup(&format!("{header}{separator}"));
    }
    if !item.link.is_empty() {
        if let Some(last) = envelopes.last_mut() {
            last.buttons.push(vec![Button::url(VIEW_POST_LABEL, &item.link)]);
        }
    }
    envelopes
}

fn feed_header(item: &FeedItem, label: &str) -> String {
    let title = escape_html(&item.title);
    let title = if item.link.is_empty() {
        format!("<b>{title}</b>")
    } else {
        format!(
            "<b><a href=\"{link}\">{title}</a></b>",
            link = escape_html(&item.link)
        )
    };
    format!("<i>{label}</i>\n\n{title}", label = escape_html(label))
}

/// Outcome of a broadcast, for diagnostics and registry cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Destinations delivery was attempted at.
    pub attempted: usize,
    /// Destinations that received every segment.
    pub delivered: usize,
    /// Segments that had to be resent as literal text.
    pub fallbacks: usize,
    /// Destinations that did not receive everything, with the error that
    /// stopped delivery.
    pub failures: Vec<(i64, DeliveryError)>,
}

impl BroadcastReport {
    /// Destinations that reported themselves permanently unreachable.
    pub fn gone(&self) -> Vec<i64> {
        self.failures
            .iter()
            .filter(|(_, e)| e.is_gone())
            .map(|(id, _)| *id)
            .collect()
    }

    fn absorb(&mut self, chat_id: i64, outcome: DestinationOutcome) {
        self.attempted = self.attempted.saturating_add(1);
        self.fallbacks = self.fallbacks.saturating_add(outcome.fallbacks);
        match outcome.error {
            None => self.delivered = self.delivered.saturating_add(1),
            Some(error) => self.failures.push((chat_id, error)),
        }
    }
}

/// The live canary destination rejected the markup; nothing else was sent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("segment {segment_index} was rejected: {reason}")]
pub struct CanaryRejected {
    /// 0-based index of the offending segment.
    pub segment_index: usize,
    /// Transport-provided reason.
    pub reason: String,
}

#[derive(Debug)]
struct DestinationOutcome {
    fallbacks: usize,
    error: Option<DeliveryError>,
    /// Index of the segment that stopped delivery.
    failed_at: Option<usize>,
}

/// Delivers envelopes with per-destination isolation.
pub struct FanoutEngine {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ErrorSink>,
    concurrency: usize,
    retry_after_cap: Duration,
}

impl FanoutEngine {
    /// Create an engine serving at most `concurrency` destinations at once.
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn ErrorSink>, concurrency: usize) -> Self {
        Self {
            transport,
            sink,
            concurrency: concurrency.max(1),
            retry_after_cap: Duration::from_secs(30),
        }
    }

    /// Upper bound on how long a transient failure's retry-after is honoured.
    #[must_use]
    pub fn with_retry_after_cap(mut self, cap: Duration) -> Self {
        self.retry_after_cap = cap;
        self
    }

    /// Deliver `envelopes` to every destination.
    pub async fn broadcast(&self, envelopes: &[Envelope], destinations: &[i64]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        self.fan_out(envelopes, destinations, &mut report).await;
        self.summarize(&report).await;
        report
    }

    /// Deliver to `canary` first, aborting on a formatting rejection before any
    /// other destination is touched. `canary` is skipped in `destinations`.
    ///
    /// # Errors
    ///
    /// Returns [`CanaryRejected`] when the canary rejects the markup.
    pub async fn broadcast_with_canary(
        &self,
        envelopes: &[Envelope],
        canary: i64,
        destinations: &[i64],
    ) -> Result<BroadcastReport, CanaryRejected> {
        let outcome = deliver_to(
            self.transport.as_ref(),
            canary,
            envelopes,
            self.retry_after_cap,
            true,
        )
        .await;
        if let (Some(DeliveryError::Format(reason)), Some(index)) =
            (&outcome.error, outcome.failed_at)
        {
            warn!(chat_id = canary, segment = index, "canary rejected broadcast markup");
            return Err(CanaryRejected {
                segment_index: index,
                reason: reason.clone(),
            });
        }

        let mut report = BroadcastReport::default();
        report.absorb(canary, outcome);
        let rest: Vec<i64> = destinations
            .iter()
            .copied()
            .filter(|id| *id != canary)
            .collect();
        self.fan_out(envelopes, &rest, &mut report).await;
        self.summarize(&report).await;
        Ok(report)
    }

    async fn fan_out(&self, envelopes: &[Envelope], destinations: &[i64], report: &mut BroadcastReport) {
        if destinations.is_empty() {
            return;
        }
        let envelopes: Arc<[Envelope]> = Arc::from(envelopes.to_vec());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for &chat_id in destinations {
            let transport = Arc::clone(&self.transport);
            let envelopes = Arc::clone(&envelopes);
            let semaphore = Arc::clone(&semaphore);
            let cap = self.retry_after_cap;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = deliver_to(transport.as_ref(), chat_id, &envelopes, cap, false).await;
                (chat_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((chat_id, outcome)) => report.absorb(chat_id, outcome),
                Err(e) => warn!(error = %e, "delivery task failed"),
            }
        }
    }

    async fn summarize(&self, report: &BroadcastReport) {
        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            fallbacks = report.fallbacks,
            failed = report.failures.len(),
            "broadcast finished"
        );
        let failures: Vec<&(i64, DeliveryError)> = report
            .failures
            .iter()
            .filter(|(_, e)| !e.is_gone())
            .collect();
        if failures.is_empty() && report.fallbacks == 0 {
            return;
        }
        let details = failures
            .iter()
            .map(|(id, e)| format!("{id}: {e}"))
            .collect::<Vec<_>>()
            .join("\n");
        let event = ErrorEvent::new(
            "fanout",
            format!(
                "{} of {} destinations failed, {} segments sent as literal text",
                failures.len(),
                report.attempted,
                report.fallbacks
            ),
        )
        .with("failures", if details.is_empty() { "-".to_owned() } else { details });
        self.sink.report(event).await;
    }
}

/// Send every envelope to one destination, in order.
///
/// In `strict` mode a formatting rejection stops delivery instead of falling
/// back to literal text.
async fn deliver_to(
    transport: &dyn Transport,
    chat_id: i64,
    envelopes: &[Envelope],
    cap: Duration,
    strict: bool,
) -> DestinationOutcome {
    let mut fallbacks = 0usize;
    for (index, envelope) in envelopes.iter().enumerate() {
        let markup = envelope.markup();
        let result = send_with_retry(transport, chat_id, &envelope.segment, markup.as_ref(), cap).await;
        let error = match result {
            Ok(_) => continue,
            Err(DeliveryError::Format(reason)) if !strict => {
                debug!(chat_id, segment = index, reason = %reason, "markup rejected, sending literal");
                fallbacks = fallbacks.saturating_add(1);
                let literal = envelope.segment.as_literal(FORMAT_WARNING);
                match send_with_retry(transport, chat_id, &literal, markup.as_ref(), cap).await {
                    Ok(_) => continue,
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };
        warn!(chat_id, segment = index, error = %error, "delivery stopped for destination");
        return DestinationOutcome {
            fallbacks,
            error: Some(error),
            failed_at: Some(index),
        };
    }
    DestinationOutcome {
        fallbacks,
        error: None,
        failed_at: None,
    }
}

/// Send a segment, retrying once after a transient failure.
async fn send_with_retry(
    transport: &dyn Transport,
    chat_id: i64,
    segment: &MessageSegment,
    markup: Option<&Markup>,
    cap: Duration,
) -> Result<MessageRef, DeliveryError> {
    match send_segment(transport, chat_id, segment, markup).await {
        Err(DeliveryError::Transient { retry_after, .. }) => {
            let wait = retry_after.unwrap_or(DEFAULT_RETRY_WAIT).min(cap);
            tokio::time::sleep(wait).await;
            send_segment(transport, chat_id, segment, markup).await
        }
        other => other,
    }
}
