//! Feed item segmentation.
//!
//! Splits a sanitized item body on every embedded image. Text between images
//! becomes text segments, each image becomes its own image segment, and the
//! document order of the two is preserved exactly. Runs of text are rebuilt
//! with only the enclosing elements they need, so a split inside `<b>` yields
//! two well-formed `<b>` runs.

use thiserror::Error;
use url::Url;

use super::lexer::{tokenize, Token};
use super::sanitize::{parse_tree, write_open_tag, Node};
use crate::feed::FeedItem;
use crate::message::{ImageSource, MessageSegment};

/// Attribute value that excludes an item from broadcast.
pub const SKIP_MARKER: &str = "skip";

/// Why an item could not be segmented.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    /// An `<img>` element without a `src` attribute.
    #[error("image #{position} has no source")]
    ImageWithoutSource {
        /// 1-based position of the image in the item.
        position: usize,
    },
    /// An image source that is not a usable URL.
    #[error("image #{position} has an invalid source {src:?}")]
    InvalidImageSource {
        /// 1-based position of the image in the item.
        position: usize,
        /// The offending attribute value.
        src: String,
    },
}

/// Result of segmenting one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segmented {
    /// The item carries the skip marker and must not be broadcast.
    Skipped,
    /// Ordered segments; empty when the body has neither text nor images.
    Segments(Vec<MessageSegment>),
}

/// Segment a feed item's body. Relative image sources are resolved against
/// the item's link.
pub fn segment(item: &FeedItem) -> Result<Segmented, SegmentError> {
    segment_markup(&item.raw_body, Url::parse(&item.link).ok().as_ref())
}

/// Segment raw markup.
pub fn segment_markup(raw: &str, base: Option<&Url>) -> Result<Segmented, SegmentError> {
    if has_skip_marker(raw) {
        return Ok(Segmented::Skipped);
    }

    let tree = parse_tree(raw, true);
    let mut leaves = Vec::new();
    let mut next_id = 0usize;
    flatten(&tree, &mut Vec::new(), &mut next_id, &mut leaves);

    let mut segments = Vec::new();
    let mut run = RunBuilder::default();
    let mut image_position = 0usize;

    for leaf in leaves {
        match leaf {
            Leaf::Text { text, path } => run.push_text(&path, text),
            Leaf::Image { src, link } => {
                image_position = image_position.saturating_add(1);
                if let Some(body) = run.finish() {
                    segments.push(MessageSegment::text(body, true));
                }
                let src = src.ok_or(SegmentError::ImageWithoutSource {
                    position: image_position,
                })?;
                let url = resolve(src, base).ok_or_else(|| SegmentError::InvalidImageSource {
                    position: image_position,
                    src: src.to_owned(),
                })?;
                segments.push(MessageSegment::Image {
                    source: ImageSource::Url(url),
                    caption: String::new(),
                    formatted: true,
                    link_url: link.and_then(|href| resolve(href, base)),
                });
            }
        }
    }
    if let Some(body) = run.finish() {
        segments.push(MessageSegment::text(body, true));
    }
    Ok(Segmented::Segments(segments))
}

/// Returns `true` if any element in `raw` carries `name="skip"`.
pub fn has_skip_marker(raw: &str) -> bool {
    tokenize(raw).iter().any(|token| match token {
        Token::Start { attrs, .. } => attrs
            .iter()
            .any(|(name, value)| name == "name" && value.trim().eq_ignore_ascii_case(SKIP_MARKER)),
        _ => false,
    })
}

fn resolve(target: &str, base: Option<&Url>) -> Option<String> {
    let target = target.trim();
    let url = match Url::parse(target) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(target).ok()?,
        Err(_) => return None,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Ancestor chain entry: element id and node.
type PathEntry<'a> = (usize, &'a Node);

enum Leaf<'a> {
    Text {
        text: &'a str,
        path: Vec<PathEntry<'a>>,
    },
    Image {
        src: Option<&'a str>,
        link: Option<&'a str>,
    },
}

fn flatten<'a>(
    nodes: &'a [Node],
    path: &mut Vec<PathEntry<'a>>,
    next_id: &mut usize,
    out: &mut Vec<Leaf<'a>>,
) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push(Leaf::Text {
                text,
                path: path.clone(),
            }),
            Node::Image { src } => {
                let link = path.last().and_then(|&(_, parent)| match parent {
                    Node::Element {
                        name: "a",
                        attr: Some((_, href)),
                        ..
                    } => Some(href.as_str()),
                    _ => None,
                });
                out.push(Leaf::Image {
                    src: src.as_deref(),
                    link,
                });
            }
            Node::Element { children, .. } => {
                let id = *next_id;
                *next_id = next_id.saturating_add(1);
                path.push((id, node));
                flatten(children, path, next_id, out);
                path.pop();
            }
        }
    }
}

/// Accumulates one run of text, opening and closing elements lazily.
#[derive(Default)]
struct RunBuilder {
    out: String,
    open: Vec<(usize, &'static str)>,
    visible: bool,
}

impl RunBuilder {
    fn push_text(&mut self, path: &[PathEntry<'_>], text: &str) {
        let common = self
            .open
            .iter()
            .zip(path)
            .take_while(|((open_id, _), (id, _))| open_id == id)
            .count();
        while self.open.len() > common {
            if let Some((_, name)) = self.open.pop() {
                close_tag(name, &mut self.out);
            }
        }
        for (id, node) in &path[common..] {
            if let Node::Element { name, attr, .. } = node {
                write_open_tag(name, attr.as_ref(), &mut self.out);
                self.open.push((*id, *name));
            }
        }
        self.out.push_str(text);
        if !text.trim().is_empty() {
            self.visible = true;
        }
    }

    /// Close the run; `None` if it holds no visible text.
    fn finish(&mut self) -> Option<String> {
        while let Some((_, name)) = self.open.pop() {
            close_tag(name, &mut self.out);
        }
        let body = std::mem::take(&mut self.out);
        let visible = std::mem::replace(&mut self.visible, false);
        visible.then(|| body.trim().to_owned())
    }
}

fn close_tag(name: &str, out: &mut String) {
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}
