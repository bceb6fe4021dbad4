//! Allow-list sanitizer behavior.

use feedcast::markup::{escape_html, sanitize};

#[test]
fn keeps_allowed_inline_elements() {
    let out = sanitize("<b>bold</b> <i>it</i> <code>x</code> <u>u</u>", false);
    assert_eq!(out.as_str(), "<b>bold</b> <i>it</i> <code>x</code> <u>u</u>");
}

#[test]
fn strips_unknown_elements_but_keeps_their_text() {
    let out = sanitize("<p>Hello <span class=\"x\">world</span></p><div>!</div>", false);
    assert_eq!(out.as_str(), "Hello world!");
}

#[test]
fn anchor_keeps_only_href() {
    let out = sanitize(
        "<a href=\"https://example.com\" target=\"_blank\" rel=\"x\">link</a>",
        false,
    );
    assert_eq!(out.as_str(), "<a href=\"https://example.com\">link</a>");
}

#[test]
fn other_elements_lose_all_attributes() {
    let out = sanitize("<b class=\"big\" style=\"color:red\">x</b>", false);
    assert_eq!(out.as_str(), "<b>x</b>");
}

#[test]
fn unclosed_elements_are_closed_at_end() {
    let out = sanitize("<b>open <i>nested", false);
    assert_eq!(out.as_str(), "<b>open <i>nested</i></b>");
}

#[test]
fn stray_closing_tags_are_dropped() {
    let out = sanitize("text</b> more", false);
    assert_eq!(out.as_str(), "text more");
}

#[test]
fn bare_angle_brackets_and_ampersands_are_escaped() {
    let out = sanitize("1 < 2 & 3 > 2", false);
    assert_eq!(out.as_str(), "1 &lt; 2 &amp; 3 &gt; 2");
}

#[test]
fn supported_entities_are_kept_and_common_ones_decoded() {
    let out = sanitize("a &amp; b &lt;c&gt; d&nbsp;e &hellip;", false);
    assert_eq!(out.as_str(), "a &amp; b &lt;c&gt; d\u{a0}e \u{2026}");
}

#[test]
fn images_are_dropped_unless_allowed() {
    let markup = "before <img src=\"https://x/a.png\"> after";
    assert_eq!(sanitize(markup, false).as_str(), "before  after");
    assert_eq!(
        sanitize(markup, true).as_str(),
        "before <img src=\"https://x/a.png\"> after"
    );
}

#[test]
fn sanitizing_is_idempotent() {
    let inputs = [
        "<p>Hi <b>there</b> & <a href=\"https://x?a=1&b=2\">go</a></p>",
        "<b>unclosed <i>x",
        "plain &lt;text&gt; with &amp;",
        "<pre language=\"rust\">fn main() {}</pre>",
    ];
    for input in inputs {
        let once = sanitize(input, true);
        let twice = sanitize(once.as_str(), true);
        assert_eq!(once, twice, "not idempotent for {input:?}");
    }
}

#[test]
fn dropped_block_tags_leave_only_whitespace() {
    assert!(sanitize("<div>  \n </div>", false).as_str().trim().is_empty());
    assert_eq!(sanitize("<b>x</b>", false).as_str(), "<b>x</b>");
}

#[test]
fn escape_html_escapes_markup_characters() {
    assert_eq!(
        escape_html("<b>\"Tom & Jerry\"</b>"),
        "&lt;b&gt;&quot;Tom &amp; Jerry&quot;&lt;/b&gt;"
    );
}
