//! Message segments: the unit of delivery shared by the feed path and the
//! operator broadcast path.
//!
//! A segment is either a text message or a single image with an optional
//! caption. The `formatted` flag tells the transport whether `body` /
//! `caption` is rich markup (HTML) or literal text.

use serde::{Deserialize, Serialize};

/// Where an image segment's picture comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImageSource {
    /// Public URL taken from feed markup.
    Url(String),
    /// Transport-side file identifier of a photo uploaded by an operator.
    FileId(String),
}

impl ImageSource {
    /// Raw string form (URL or file identifier).
    pub fn as_str(&self) -> &str {
        match self {
            Self::Url(s) | Self::FileId(s) => s,
        }
    }
}

/// One deliverable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageSegment {
    /// A text message.
    Text {
        /// Sanitized markup, or literal text when `formatted` is false.
        body: String,
        /// Whether `body` should be interpreted as rich markup.
        formatted: bool,
    },
    /// A single picture, optionally captioned.
    Image {
        /// Picture source.
        source: ImageSource,
        /// Sanitized caption markup; empty when there is no caption.
        caption: String,
        /// Whether `caption` should be interpreted as rich markup.
        formatted: bool,
        /// Target of the link that wrapped the image in the source markup.
        link_url: Option<String>,
    },
}

impl MessageSegment {
    /// Build a text segment.
    pub fn text(body: impl Into<String>, formatted: bool) -> Self {
        Self::Text {
            body: body.into(),
            formatted,
        }
    }

    /// Build an image segment from a URL with no caption.
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource::Url(url.into()),
            caption: String::new(),
            formatted: true,
            link_url: None,
        }
    }

    /// Returns `true` for image segments.
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }

    /// Whether the transport should parse this segment's markup.
    pub fn formatted(&self) -> bool {
        match self {
            Self::Text { formatted, .. } | Self::Image { formatted, .. } => *formatted,
        }
    }

    /// The text part of the segment: the body of a text segment or the
    /// caption of an image segment.
    pub fn markup(&self) -> &str {
        match self {
            Self::Text { body, .. } => body,
            Self::Image { caption, .. } => caption,
        }
    }

    /// Prepend `prefix` to the text part of the segment.
    pub fn prepend_markup(&mut self, prefix: &str) {
        match self {
            Self::Text { body, .. } => body.insert_str(0, prefix),
            Self::Image { caption, .. } => caption.insert_str(0, prefix),
        }
    }

    /// Literal-text copy of this segment with `suffix` appended, used when the
    /// transport rejected the markup.
    pub fn as_literal(&self, suffix: &str) -> Self {
        match self {
            Self::Text { body, .. } => Self::Text {
                body: format!("{body}{suffix}"),
                formatted: false,
            },
            Self::Image {
                source, link_url, caption, ..
            } => Self::Image {
                source: source.clone(),
                caption: format!("{caption}{suffix}"),
                formatted: false,
                link_url: link_url.clone(),
            },
        }
    }
}
