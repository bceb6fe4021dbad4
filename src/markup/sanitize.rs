//! Allow-list markup filter.
//!
//! Keeps the handful of inline elements the transport can render, with at most
//! one attribute each, and strips everything else while preserving the text.
//! The output is always balanced and escaped, so `sanitize` is idempotent.

use std::fmt;

use super::lexer::{tokenize, Token};

/// Elements kept by the sanitizer (`img` is handled separately).
pub const ALLOWED_TAGS: &[&str] = &[
    "a", "b", "strong", "i", "em", "code", "pre", "s", "strike", "del", "u",
];

/// Named entities the transport understands verbatim.
const SUPPORTED_ENTITIES: &[&str] = &["lt", "gt", "amp", "quot"];

/// Named entities common in feeds, decoded to their character.
const DECODED_ENTITIES: &[(&str, char)] = &[
    ("nbsp", '\u{a0}'),
    ("apos", '\''),
    ("zwnj", '\u{200c}'),
    ("zwj", '\u{200d}'),
    ("hellip", '\u{2026}'),
    ("mdash", '\u{2014}'),
    ("ndash", '\u{2013}'),
    ("laquo", '\u{ab}'),
    ("raquo", '\u{bb}'),
    ("lsquo", '\u{2018}'),
    ("rsquo", '\u{2019}'),
    ("ldquo", '\u{201c}'),
    ("rdquo", '\u{201d}'),
    ("copy", '\u{a9}'),
    ("reg", '\u{ae}'),
];

/// Markup that passed through [`sanitize`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SafeMarkup(String);

impl SafeMarkup {
    /// Borrow the markup.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take ownership of the markup string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SafeMarkup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeMarkup {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Sanitized document node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    /// Escaped character data.
    Text(String),
    /// An allowed element with its single permitted attribute.
    Element {
        name: &'static str,
        attr: Option<(&'static str, String)>,
        children: Vec<Node>,
    },
    /// `<img>`; `src` is absent when the source markup had none.
    Image { src: Option<String> },
}

/// Filter `markup` down to the allow-list.
///
/// Never fails: malformed input is parsed best-effort, stray closing tags are
/// dropped and unclosed elements are closed at the end of the input.
pub fn sanitize(markup: &str, allow_images: bool) -> SafeMarkup {
    let tree = parse_tree(markup, allow_images);
    let mut out = String::with_capacity(markup.len());
    write_nodes(&tree, &mut out);
    SafeMarkup(out)
}

/// Parse `markup` into a sanitized node tree.
pub(crate) fn parse_tree(markup: &str, allow_images: bool) -> Vec<Node> {
    struct Open {
        name: &'static str,
        attr: Option<(&'static str, String)>,
        children: Vec<Node>,
    }

    fn attach(stack: &mut [Open], root: &mut Vec<Node>, node: Node) {
        match stack.last_mut() {
            Some(open) => open.children.push(node),
            None => root.push(node),
        }
    }

    fn close(stack: &mut Vec<Open>, root: &mut Vec<Node>) {
        if let Some(open) = stack.pop() {
            let node = Node::Element {
                name: open.name,
                attr: open.attr,
                children: open.children,
            };
            attach(stack, root, node);
        }
    }

    let mut root = Vec::new();
    let mut stack: Vec<Open> = Vec::new();

    for token in tokenize(markup) {
        match token {
            Token::Text(text) => {
                if !text.is_empty() {
                    attach(&mut stack, &mut root, Node::Text(escape_text(text)));
                }
            }
            Token::Start {
                name,
                attrs,
                self_closing,
            } => {
                if name == "img" {
                    if allow_images {
                        let src = find_attr(&attrs, "src").map(decode_attr_value);
                        attach(&mut stack, &mut root, Node::Image { src });
                    }
                    continue;
                }
                let Some(tag) = allowed_tag(&name) else {
                    continue;
                };
                if self_closing {
                    continue;
                }
                let attr = allowed_attr(tag).and_then(|attr_name| {
                    find_attr(&attrs, attr_name).map(|v| (attr_name, decode_attr_value(v)))
                });
                stack.push(Open {
                    name: tag,
                    attr,
                    children: Vec::new(),
                });
            }
            Token::End { name } => {
                if let Some(idx) = stack.iter().rposition(|open| open.name == name) {
                    while stack.len() > idx {
                        close(&mut stack, &mut root);
                    }
                }
            }
            Token::Ignored => {}
        }
    }

    while !stack.is_empty() {
        close(&mut stack, &mut root);
    }
    root
}

fn allowed_tag(name: &str) -> Option<&'static str> {
    ALLOWED_TAGS.iter().copied().find(|tag| *tag == name)
}

/// The single attribute an element may keep.
fn allowed_attr(tag: &str) -> Option<&'static str> {
    match tag {
        "a" => Some("href"),
        "img" => Some("src"),
        "pre" => Some("language"),
        _ => None,
    }
}

fn find_attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(attr, _)| attr == name)
        .map(|(_, value)| value.as_str())
}

/// Serialize a node list back to markup.
pub(crate) fn write_nodes(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element {
                name,
                attr,
                children,
            } => {
                write_open_tag(name, attr.as_ref(), out);
                write_nodes(children, out);
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            Node::Image { src } => {
                out.push_str("<img");
                if let Some(src) = src {
                    out.push_str(" src=\"");
                    out.push_str(&escape_attr(src));
                    out.push('"');
                }
                out.push('>');
            }
        }
    }
}

/// Write `<name attr="value">`.
pub(crate) fn write_open_tag(name: &str, attr: Option<&(&'static str, String)>, out: &mut String) {
    out.push('<');
    out.push_str(name);
    if let Some((attr_name, value)) = attr {
        out.push(' ');
        out.push_str(attr_name);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    out.push('>');
}

/// Escape character data, keeping valid entities.
fn escape_text(text: &str) -> String {
    escape(text, false)
}

fn escape_attr(value: &str) -> String {
    escape(value, true)
}

/// Resolve entities in a raw attribute value so it can be re-escaped on output.
fn decode_attr_value(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn escape(input: &str, in_attr: bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(c) = rest.chars().next() {
        let width = c.len_utf8();
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attr => out.push_str("&quot;"),
            '&' => match entity_at(rest) {
                Some((len, Entity::Keep)) => {
                    out.push_str(&rest[..len]);
                    rest = &rest[len..];
                    continue;
                }
                Some((len, Entity::Decode(ch))) => {
                    out.push(ch);
                    rest = &rest[len..];
                    continue;
                }
                None => out.push_str("&amp;"),
            },
            other => out.push(other),
        }
        rest = &rest[width..];
    }
    out
}

enum Entity {
    Keep,
    Decode(char),
}

/// Recognize an entity at the start of `s` (which begins with `&`).
fn entity_at(s: &str) -> Option<(usize, Entity)> {
    let semi = s.get(1..)?.find(';')?;
    let body = &s[1..semi.checked_add(1)?];
    let len = semi.checked_add(2)?;
    if let Some(num) = body.strip_prefix('#') {
        let valid = match num.strip_prefix(['x', 'X']) {
            Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
            None => !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()),
        };
        return valid.then_some((len, Entity::Keep));
    }
    if SUPPORTED_ENTITIES.contains(&body) {
        return Some((len, Entity::Keep));
    }
    DECODED_ENTITIES
        .iter()
        .find(|(name, _)| *name == body)
        .map(|(_, ch)| (len, Entity::Decode(*ch)))
}
