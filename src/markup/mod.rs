//! Markup handling: allow-list sanitizing and feed item segmentation.

mod lexer;
pub mod sanitize;
pub mod segment;

pub use sanitize::{sanitize, SafeMarkup, ALLOWED_TAGS};
pub use segment::{has_skip_marker, segment, segment_markup, SegmentError, Segmented};

/// Escape text for inclusion in HTML messages.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
