//! Composer labels, keyboards and prompt texts.

use super::{Composer, ComposerState, FormatMode, Input, Prompt};
use crate::transport::{Button, Markup};

/// Reply-keyboard label: rich mode is on.
pub const HTML_ENABLED: &str = "✅ HTML Enabled";
/// Reply-keyboard label: rich mode is off.
pub const HTML_DISABLED: &str = "◻️ HTML Disabled";
/// Reply-keyboard label: broadcast the draft.
pub const SEND: &str = "✅Send";
/// Reply-keyboard label: render the draft.
pub const PREVIEW: &str = "👁Preview";
/// Reply-keyboard label: abort.
pub const CANCEL: &str = "❌Cancel";

/// Callback data of the edit control.
pub const EDIT_DATA: &str = "edit";
/// Callback data of the caption-only edit control.
pub const EDIT_CAPTION_DATA: &str = "edit-cap";
/// Callback data of the delete control.
pub const DELETE_DATA: &str = "delete";
/// Callback data of a positive confirmation.
pub const YES_DATA: &str = "yes";
/// Callback data of a negative confirmation.
pub const NO_DATA: &str = "no";
/// Callback data of a button that does nothing.
pub const NOOP_DATA: &str = "noop";

/// Callback acknowledgement after a delete.
pub const DELETED_NOTICE: &str = "✅ Deleted";
/// Callback acknowledgement after an aborted delete.
pub const CANCELED_NOTICE: &str = "❌ Canceled";
/// Callback acknowledgement when the broadcast starts.
pub const SENDING_NOTICE: &str = "✅ Done\nSending message to all users, groups and channels";
/// Callback acknowledgement for a stale or unknown button.
pub const UNKNOWN_ANSWER: &str = "❌ ERROR\nUnknown answer";

/// Text a collapsed preview message is replaced with.
pub const COLLAPSED_PREVIEW: &str = "❌";
/// Stand-in for a preview the transport refused outright.
pub const UNRENDERED_PREVIEW: &str = "⚠️ This message could not be previewed.";
/// Suffix of a preview that could not be rendered as markup.
pub const CANNOT_PARSE: &str = "\n\n⚠️ CAN NOT PARSE.\n";

const WHAT_NOW: &str = "OK, now what?  (send a message to add)";
const FIX_ERRORS: &str = "🛑 there is a problem with your messages, please fix them.";

/// Decode a text message sent during a session.
pub fn parse_text(text: &str) -> Input {
    match text.trim() {
        HTML_ENABLED | HTML_DISABLED => Input::ToggleFormat,
        SEND => Input::Send,
        PREVIEW => Input::Preview,
        CANCEL => Input::Cancel,
        _ => Input::Text(text.to_owned()),
    }
}

/// Decode a button press on message `message_id`.
pub fn parse_callback(data: &str, message_id: i32) -> Input {
    match data {
        EDIT_DATA => Input::EditControl {
            preview: message_id,
            caption_only: false,
        },
        EDIT_CAPTION_DATA => Input::EditControl {
            preview: message_id,
            caption_only: true,
        },
        DELETE_DATA => Input::DeleteControl {
            preview: message_id,
        },
        YES_DATA => Input::ConfirmYes,
        NO_DATA => Input::ConfirmNo,
        _ => Input::Unsupported,
    }
}

/// Whether `data` belongs to the composer.
pub fn is_composer_callback(data: &str) -> bool {
    matches!(
        data,
        EDIT_DATA | EDIT_CAPTION_DATA | DELETE_DATA | YES_DATA | NO_DATA | NOOP_DATA
    )
}

/// Edit/delete controls under a preview message.
pub fn preview_controls(is_image: bool) -> Markup {
    let mut row = vec![Button::callback("✏️Edit", EDIT_DATA)];
    if is_image {
        row.push(Button::callback("📝Edit caption", EDIT_CAPTION_DATA));
    }
    row.push(Button::callback("❌Delete", DELETE_DATA));
    Markup::Inline(vec![row])
}

/// Delete confirmation shown in place of the preview controls.
pub fn delete_confirm_controls() -> Markup {
    Markup::Inline(vec![
        vec![Button::callback("🛑 Are you sure?", NOOP_DATA)],
        vec![
            Button::callback("🔴 Yes", YES_DATA),
            Button::callback("🟢 No", NO_DATA),
        ],
    ])
}

/// Broadcast confirmation buttons.
pub fn send_confirm_controls() -> Markup {
    Markup::Inline(vec![vec![
        Button::callback("👍Yes, that's OK!", YES_DATA),
        Button::callback("✋No, stop!", NO_DATA),
    ]])
}

fn toggle_label(mode: FormatMode) -> String {
    match mode {
        FormatMode::Rich => HTML_ENABLED.to_owned(),
        FormatMode::Plain => HTML_DISABLED.to_owned(),
    }
}

/// Keyboard matching the composer's current state.
pub fn keyboard(composer: &Composer) -> Markup {
    let toggle = vec![toggle_label(composer.draft().mode())];
    match composer.state() {
        ComposerState::Add if composer.draft().is_empty() => {
            Markup::Reply(vec![toggle, vec![CANCEL.to_owned()]])
        }
        ComposerState::Add => Markup::Reply(vec![
            toggle,
            vec![SEND.to_owned(), PREVIEW.to_owned(), CANCEL.to_owned()],
        ]),
        ComposerState::Edit { .. } => Markup::Reply(vec![toggle, vec![CANCEL.to_owned()]]),
        ComposerState::SendConfirm => send_confirm_controls(),
        ComposerState::DeleteConfirm { .. } | ComposerState::Done => Markup::RemoveReply,
    }
}

/// Text of `prompt` given the composer's state after the transition.
pub fn prompt_text(prompt: &Prompt, composer: &Composer) -> String {
    let had_error = composer.draft().had_error();
    match prompt {
        Prompt::Started => {
            "OK, Send a message to forward it to all users\nYou can send text or photo.".to_owned()
        }
        Prompt::Added { photo: false } => {
            "OK, I received your message now what? (send a message to add)".to_owned()
        }
        Prompt::Added { photo: true } => {
            "OK, I received your photo now what? (send a message to add)".to_owned()
        }
        Prompt::ModeChanged => match composer.draft().mode() {
            FormatMode::Rich => "HTML formatting enabled for new messages.".to_owned(),
            FormatMode::Plain => "HTML formatting disabled for new messages.".to_owned(),
        },
        Prompt::AfterPreview | Prompt::FixErrors if had_error => FIX_ERRORS.to_owned(),
        Prompt::AfterPreview | Prompt::Resumed | Prompt::FixErrors => WHAT_NOW.to_owned(),
        Prompt::Editing { caption_only: true } => {
            "✏️ EDITING CAPTION\nSend new caption.".to_owned()
        }
        Prompt::Editing { caption_only: false } => "✏️ EDITING\nSend new edition.".to_owned(),
        Prompt::AfterEdit if had_error => FIX_ERRORS.to_owned(),
        Prompt::AfterEdit => {
            "✅ Message edited; now you can add more messages or send it".to_owned()
        }
        Prompt::Deleting => "⏳ Deleting a message...".to_owned(),
        Prompt::Deleted => "OK, now you can send message to add".to_owned(),
        Prompt::ConfirmSend { count } => format!(
            "Are you sure, you want to send {count} message(s) to all users, groups and channels?"
        ),
        Prompt::CanaryRejected { index, reason } => format!(
            "🛑 Message {} could not be sent: {reason}\nPlease fix it and try again.",
            index.saturating_add(1)
        ),
        Prompt::Sent {
            delivered,
            attempted,
        } => format!("✅ Sent to {delivered} of {attempted} chats."),
        Prompt::Cancelled => "Canceled".to_owned(),
    }
}

/// Notice shown on a preview whose entry changed kind.
pub fn kind_changed_notice(was_image: bool) -> &'static str {
    if was_image {
        "⚠️ This message type had been changed from photo to text. You can request for a new preview to see this message."
    } else {
        "⚠️ This message type had been changed from text to photo. You can request for a new preview to see this message."
    }
}
