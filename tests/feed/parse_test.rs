//! RSS document parsing.

use chrono::{TimeZone, Utc};
use feedcast::feed::{parse_feed, parse_pub_date, FeedError};

use crate::common::{rss, Item};

#[test]
fn items_keep_document_order_and_fields() {
    let doc = rss(&[
        Item {
            title: " Second ",
            link: "https://blog.example/2",
            pub_date: Some("Wed, 11 Jun 2025 08:30:00 +0000"),
            body: "<p>two</p>",
        },
        Item {
            title: "First",
            link: "https://blog.example/1",
            pub_date: Some("Tue, 10 Jun 2025 08:30:00 +0000"),
            body: "<p>one</p>",
        },
    ]);
    let items = parse_feed(&doc).expect("should parse feed");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].title, "Second");
    assert_eq!(items[0].link, "https://blog.example/2");
    assert_eq!(items[0].raw_body, "<p>two</p>");
    assert_eq!(
        items[0].published_at,
        Some(Utc.with_ymd_and_hms(2025, 6, 11, 8, 30, 0).single().expect("valid date"))
    );
    assert_eq!(items[1].title, "First");
}

#[test]
fn missing_or_invalid_pub_date_is_none() {
    let doc = rss(&[
        Item {
            title: "No date",
            link: "https://blog.example/a",
            pub_date: None,
            body: "x",
        },
        Item {
            title: "Bad date",
            link: "https://blog.example/b",
            pub_date: Some("sometime last week"),
            body: "y",
        },
    ]);
    let items = parse_feed(&doc).expect("should parse feed");
    assert!(items.iter().all(|item| item.published_at.is_none()));
}

#[test]
fn empty_channel_has_no_items() {
    let items = parse_feed(&rss(&[])).expect("should parse feed");
    assert!(items.is_empty());
}

#[test]
fn garbage_is_a_parse_error() {
    let err = parse_feed("this is not xml").expect_err("should fail");
    assert!(matches!(err, FeedError::Parse(_)));
    assert!(!err.is_transient());
}

#[test]
fn pub_date_offsets_are_normalized_to_utc() {
    let local = parse_pub_date("Tue, 10 Jun 2025 10:00:00 +0200").expect("should parse");
    let utc = parse_pub_date("Tue, 10 Jun 2025 08:00:00 GMT").expect("should parse");
    assert_eq!(local, utc);
}
