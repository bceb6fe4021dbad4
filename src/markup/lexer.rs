//! Forgiving HTML tokenizer.
//!
//! Splits markup into text runs, start tags, end tags and ignorable markup
//! (comments, doctypes, processing instructions). Never fails: anything that
//! does not form a complete tag is treated as text.

/// A lexical unit of markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    /// Raw character data between tags.
    Text(&'a str),
    /// `<name attr=...>` or `<name ... />`.
    Start {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    /// `</name>`.
    End { name: String },
    /// Comment, doctype or processing instruction.
    Ignored,
}

/// Tokenize `input` in document order.
pub(crate) fn tokenize(input: &str) -> Vec<Token<'_>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0usize;
    let mut text_start = 0usize;

    while pos < bytes.len() {
        if bytes[pos] == b'<' {
            match lex_tag(input, pos) {
                Lexed::Tag(token, end) => {
                    if text_start < pos {
                        tokens.push(Token::Text(&input[text_start..pos]));
                    }
                    tokens.push(token);
                    pos = end;
                    text_start = end;
                    continue;
                }
                // No later '<' can close either; the rest is text.
                Lexed::Unterminated => break,
                Lexed::NotTag => {}
            }
        }
        pos = pos.saturating_add(1);
    }

    if text_start < bytes.len() {
        tokens.push(Token::Text(&input[text_start..]));
    }
    tokens
}

/// Result of lexing at a `<`.
enum Lexed<'a> {
    /// A complete tag and the byte offset just past it.
    Tag(Token<'a>, usize),
    /// The `<` does not open a tag.
    NotTag,
    /// The tag runs to the end of input without closing.
    Unterminated,
}

/// Try to lex a tag starting at `start` (which holds `<`).
fn lex_tag(input: &str, start: usize) -> Lexed<'_> {
    match scan_tag(input, start) {
        Some(Ok((token, end))) => Lexed::Tag(token, end),
        Some(Err(Unterminated)) => Lexed::Unterminated,
        None => Lexed::NotTag,
    }
}

struct Unterminated;

/// `None` when the `<` does not open a tag; `Some(Err(_))` when the tag
/// never closes.
fn scan_tag(input: &str, start: usize) -> Option<Result<(Token<'_>, usize), Unterminated>> {
    let after_lt = start.checked_add(1)?;
    let rest = input.get(after_lt..)?;

    if let Some(comment) = rest.strip_prefix("!--") {
        let body_start = after_lt.checked_add(3)?;
        let end = match comment.find("-->") {
            Some(i) => body_start.checked_add(i)?.checked_add(3)?,
            None => input.len(),
        };
        return Some(Ok((Token::Ignored, end)));
    }
    if rest.starts_with('!') || rest.starts_with('?') {
        let Some(close) = rest.find('>') else {
            return Some(Err(Unterminated));
        };
        return Some(Ok((Token::Ignored, after_lt.checked_add(close)?.checked_add(1)?)));
    }

    let closing = rest.starts_with('/');
    let name_start = if closing {
        after_lt.checked_add(1)?
    } else {
        after_lt
    };
    let bytes = input.as_bytes();
    if !bytes.get(name_start)?.is_ascii_alphabetic() {
        return None;
    }
    let name_len = input[name_start..]
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b':')
        .count();
    let name_end = name_start.checked_add(name_len)?;
    let name = input[name_start..name_end].to_ascii_lowercase();

    // Find the closing '>' while honouring quoted attribute values.
    let mut i = name_end;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => break,
            None => {}
        }
        i = i.saturating_add(1);
    }
    if i >= bytes.len() {
        return Some(Err(Unterminated));
    }
    let end = i.checked_add(1)?;

    if closing {
        return Some(Ok((Token::End { name }, end)));
    }

    let inner = input[name_end..i].trim_end();
    let self_closing = inner.ends_with('/');
    let inner = inner.strip_suffix('/').unwrap_or(inner);
    Some(Ok((
        Token::Start {
            name,
            attrs: parse_attrs(inner),
            self_closing,
        },
        end,
    )))
}

/// Parse the attribute section of a start tag.
fn parse_attrs(section: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = section.trim_start();

    while !rest.is_empty() {
        let name_len = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '/')
            .unwrap_or(rest.len());
        if name_len == 0 {
            let skip = rest.chars().next().map_or(1, char::len_utf8);
            rest = rest.get(skip..).unwrap_or("").trim_start();
            continue;
        }
        let name = rest[..name_len].to_ascii_lowercase();
        rest = rest[name_len..].trim_start();

        let value = match rest.strip_prefix('=') {
            Some(after_eq) => {
                let after_eq = after_eq.trim_start();
                match after_eq.chars().next() {
                    Some(q @ ('"' | '\'')) => {
                        let body = &after_eq[1..];
                        let close = body.find(q).unwrap_or(body.len());
                        rest = body.get(close.saturating_add(1)..).unwrap_or("");
                        body[..close].to_owned()
                    }
                    _ => {
                        let len = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
                        rest = &after_eq[len..];
                        after_eq[..len].to_owned()
                    }
                }
            }
            None => String::new(),
        };
        attrs.push((name, value));
        rest = rest.trim_start();
    }
    attrs
}
