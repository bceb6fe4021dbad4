//! Per-destination ordering, isolation, fallbacks and the canary.

use std::sync::Arc;
use std::time::Duration;

use feedcast::fanout::{CanaryRejected, Envelope, FanoutEngine, FORMAT_WARNING};
use feedcast::message::MessageSegment;
use feedcast::transport::DeliveryError;

use crate::common::{Call, CollectingSink, RecordingTransport};

fn engine(transport: &Arc<RecordingTransport>, sink: &Arc<CollectingSink>) -> FanoutEngine {
    FanoutEngine::new(transport.clone(), sink.clone(), 2)
}

fn envelopes() -> Vec<Envelope> {
    Envelope::wrap_all(&[
        MessageSegment::text("first", true),
        MessageSegment::image_url("https://x/a.png"),
        MessageSegment::text("<b>third</b>", true),
    ])
}

fn transient(secs: u64) -> DeliveryError {
    DeliveryError::Transient {
        reason: "Too Many Requests".to_owned(),
        retry_after: Some(Duration::from_secs(secs)),
    }
}

#[tokio::test]
async fn every_destination_gets_segments_in_order() {
    let transport = RecordingTransport::new();
    let sink = CollectingSink::new();

    let report = engine(&transport, &sink)
        .broadcast(&envelopes(), &[1, 2, 3, 4, 5])
        .await;

    assert_eq!(report.attempted, 5);
    assert_eq!(report.delivered, 5);
    assert!(report.failures.is_empty());
    for chat in 1..=5 {
        let sent = transport.sent_to(chat);
        assert_eq!(sent.len(), 3, "chat {chat}");
        assert!(matches!(&sent[0], Call::SendText { body, .. } if body == "first"));
        assert!(matches!(&sent[1], Call::SendImage { source, .. } if source == "https://x/a.png"));
        assert!(matches!(&sent[2], Call::SendText { body, .. } if body == "<b>third</b>"));
    }
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn failing_destination_does_not_block_others() {
    let transport = RecordingTransport::new();
    let sink = CollectingSink::new();
    transport.fail_always(2, DeliveryError::Rejected("chat not found".to_owned()));

    let report = engine(&transport, &sink)
        .broadcast(&envelopes(), &[1, 2, 3])
        .await;

    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, 2);
    assert!(transport.sent_to(2).is_empty());
    assert_eq!(transport.sent_to(3).len(), 3);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tag, "fanout");
    assert!(events[0].message.starts_with("1 of 3 destinations failed"));
}

#[tokio::test]
async fn rejected_markup_is_resent_as_literal_text() {
    let transport = RecordingTransport::new();
    let sink = CollectingSink::new();
    transport.reject_markup("<b>");

    let report = engine(&transport, &sink).broadcast(&envelopes(), &[1]).await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.fallbacks, 1);
    let sent = transport.sent_to(1);
    assert_eq!(sent.len(), 3);
    let Call::SendText {
        body, formatted, ..
    } = &sent[2]
    else {
        panic!("expected text");
    };
    assert!(!formatted);
    assert_eq!(body, &format!("<b>third</b>{FORMAT_WARNING}"));
    assert_eq!(sink.tags(), vec!["fanout".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_once_after_capped_wait() {
    let transport = RecordingTransport::new();
    let sink = CollectingSink::new();
    transport.fail_next(1, transient(120));
    let engine = engine(&transport, &sink).with_retry_after_cap(Duration::from_secs(30));

    let started = tokio::time::Instant::now();
    let report = engine.broadcast(&envelopes(), &[1]).await;

    assert_eq!(report.delivered, 1);
    assert_eq!(transport.sent_to(1).len(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn second_transient_failure_stops_that_destination() {
    let transport = RecordingTransport::new();
    let sink = CollectingSink::new();
    transport.fail_next(1, transient(1));
    transport.fail_next(1, transient(1));

    let report = engine(&transport, &sink).broadcast(&envelopes(), &[1, 2]).await;

    assert_eq!(report.delivered, 1);
    assert!(matches!(
        report.failures.as_slice(),
        [(1, DeliveryError::Transient { .. })]
    ));
    assert!(transport.sent_to(1).is_empty());
    assert_eq!(transport.sent_to(2).len(), 3);
}

#[tokio::test]
async fn canary_rejection_aborts_before_other_destinations() {
    let transport = RecordingTransport::new();
    let sink = CollectingSink::new();
    transport.reject_markup("<b>");

    let result = engine(&transport, &sink)
        .broadcast_with_canary(&envelopes(), 10, &[1, 2, 10])
        .await;

    let err = result.expect_err("canary should reject");
    assert_eq!(err.segment_index, 2);
    assert!(err.reason.contains("<b>"));
    assert!(transport.sent_to(1).is_empty());
    assert!(transport.sent_to(2).is_empty());
    // No literal fallback on the canary.
    assert!(transport
        .sent_to(10)
        .iter()
        .all(|call| !matches!(call, Call::SendText { formatted: false, .. })));
}

#[tokio::test]
async fn accepted_canary_counts_once_and_is_not_resent() {
    let transport = RecordingTransport::new();
    let sink = CollectingSink::new();

    let report = engine(&transport, &sink)
        .broadcast_with_canary(&envelopes(), 10, &[1, 10, 2])
        .await
        .expect("canary should accept");

    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 3);
    assert_eq!(transport.sent_to(10).len(), 3);
}

#[tokio::test]
async fn canary_non_format_failure_does_not_abort() {
    let transport = RecordingTransport::new();
    let sink = CollectingSink::new();
    transport.fail_always(10, DeliveryError::Rejected("blocked".to_owned()));

    let report = engine(&transport, &sink)
        .broadcast_with_canary(&envelopes(), 10, &[1])
        .await
        .expect("only formatting rejections abort");

    assert_eq!(report.attempted, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(transport.sent_to(1).len(), 3);
}

#[test]
fn canary_error_displays_segment_and_reason() {
    let err = CanaryRejected {
        segment_index: 1,
        reason: "unclosed tag".to_owned(),
    };
    assert_eq!(err.to_string(), "segment 1 was rejected: unclosed tag");
}

#[tokio::test]
async fn gone_destinations_are_listed_but_not_reported() {
    let transport = RecordingTransport::new();
    let sink = CollectingSink::new();
    transport.fail_always(5, DeliveryError::DestinationGone("kicked".to_owned()));

    let report = engine(&transport, &sink).broadcast(&envelopes(), &[4, 5]).await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.gone(), vec![5]);
    assert!(sink.events().is_empty());
}
