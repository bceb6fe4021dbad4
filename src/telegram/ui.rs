//! HTML formatting and keyboard helpers for bot replies.
//!
//! Everything returned here is HTML.

use crate::markup::escape_html;
use crate::store::Destination;
use crate::transport::{Button, Markup};

/// Longest text Telegram accepts in one message.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Callback prefix of the owner's accept button.
pub const ACCEPT_PREFIX: &str = "accept-";
/// Callback prefix of the owner's decline button.
pub const DECLINE_PREFIX: &str = "decline-";

/// Accept/Decline buttons for an admin request carrying `token`.
pub fn admin_request_keyboard(token: &str) -> Markup {
    Markup::Inline(vec![vec![
        Button::callback("✅ Accept", format!("{ACCEPT_PREFIX}{token}")),
        Button::callback("❌ Decline", format!("{DECLINE_PREFIX}{token}")),
    ]])
}

/// Decode an accept/decline callback into `(approve, token)`.
pub fn parse_admin_callback(data: &str) -> Option<(bool, &str)> {
    if let Some(token) = data.strip_prefix(ACCEPT_PREFIX) {
        Some((true, token))
    } else {
        data.strip_prefix(DECLINE_PREFIX).map(|token| (false, token))
    }
}

/// Owner notification about a pending admin request.
pub fn format_admin_request(user_id: u64, username: Option<&str>, name: &str) -> String {
    format!(
        "Hi, A user wants to be admin:\ntel-id:\t{user_id}\nuser-id:\t{}\nname:\t{}",
        escape_html(username.unwrap_or("-")),
        escape_html(name)
    )
}

/// Registry statistics.
pub fn format_state(chats: usize, members: u64, admins: usize) -> String {
    format!("👥chats:\t{chats}\n👤members:\t{members}\n🤵admins:\t{admins}")
}

/// Escaped, pretty-printed JSON of a destination record.
pub fn format_destination(dest: &Destination) -> String {
    let mut value = serde_json::to_value(dest).unwrap_or_else(|e| serde_json::json!({
        "id": dest.id,
        "error": e.to_string(),
    }));
    if let Some(username) = dest.meta.username.as_deref() {
        if let Some(meta) = value.get_mut("meta").and_then(|m| m.as_object_mut()) {
            meta.insert("username".to_owned(), format!("@{username}").into());
        }
    }
    let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    escape_html(&pretty)
}

/// Notice sent to the owner when the bot joins or leaves a chat.
pub fn format_membership(joined: bool, dest: &Destination) -> String {
    let heading = if joined {
        "<i>Joined to a chat:</i>"
    } else {
        "<i>Kicked from a chat:</i>"
    };
    format!("{heading}\n{}", format_destination(dest))
}

/// Split `text` into chunks of at most `limit` characters, breaking at line
/// ends where possible. Lines longer than `limit` are cut hard.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len.saturating_add(line_len) > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                let piece: String = piece.iter().collect();
                if piece.chars().count() == limit {
                    chunks.push(piece);
                } else {
                    current_len = piece.chars().count();
                    current = piece;
                }
            }
            continue;
        }
        current.push_str(line);
        current_len = current_len.saturating_add(line_len);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
