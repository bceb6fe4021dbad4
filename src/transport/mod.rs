//! Message transport abstraction.
//!
//! Everything that talks to the chat service goes through [`Transport`]. The
//! Telegram implementation lives in [`telegram`]; tests use a recording
//! double.

pub mod telegram;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{ImageSource, MessageSegment};

/// Handle to a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    /// Conversation the message lives in.
    pub chat_id: i64,
    /// Message id within the conversation.
    pub message_id: i32,
}

/// A single keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Button {
    /// Inline button that sends `data` back as a callback.
    Callback {
        /// Visible label.
        label: String,
        /// Callback payload.
        data: String,
    },
    /// Inline button opening a URL.
    Url {
        /// Visible label.
        label: String,
        /// Target URL.
        url: String,
    },
}

impl Button {
    /// Callback button.
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Callback {
            label: label.into(),
            data: data.into(),
        }
    }

    /// URL button.
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Url {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Keyboard attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Markup {
    /// Buttons attached to the message itself.
    Inline(Vec<Vec<Button>>),
    /// Persistent reply keyboard; each string is a button label.
    Reply(Vec<Vec<String>>),
    /// Remove a previously shown reply keyboard.
    RemoveReply,
}

impl Markup {
    /// Inline markup, or `None` when there are no buttons.
    pub fn inline(rows: Vec<Vec<Button>>) -> Option<Self> {
        let rows: Vec<Vec<Button>> = rows.into_iter().filter(|row| !row.is_empty()).collect();
        if rows.is_empty() {
            None
        } else {
            Some(Self::Inline(rows))
        }
    }
}

/// Delivery failure, classified for the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The transport could not parse the rich markup.
    #[error("formatting rejected: {0}")]
    Format(String),
    /// The destination no longer accepts messages from the bot.
    #[error("destination gone: {0}")]
    DestinationGone(String),
    /// Network failure or rate limiting; may succeed later.
    #[error("transient failure: {reason}")]
    Transient {
        /// Transport-provided description.
        reason: String,
        /// Suggested wait before retrying.
        retry_after: Option<Duration>,
    },
    /// Any other refusal.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    /// Markup was rejected.
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }

    /// The destination should be dropped from the registry.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::DestinationGone(_))
    }
}

/// Outbound half of the chat service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message.
    async fn send_text(
        &self,
        chat_id: i64,
        body: &str,
        formatted: bool,
        markup: Option<&Markup>,
    ) -> Result<MessageRef, DeliveryError>;

    /// Send a single picture with an optional caption.
    async fn send_image(
        &self,
        chat_id: i64,
        source: &ImageSource,
        caption: &str,
        formatted: bool,
        markup: Option<&Markup>,
    ) -> Result<MessageRef, DeliveryError>;

    /// Replace the text of a text message.
    async fn edit_text(
        &self,
        msg: MessageRef,
        body: &str,
        formatted: bool,
        markup: Option<&Markup>,
    ) -> Result<(), DeliveryError>;

    /// Replace the caption of a picture message.
    async fn edit_caption(
        &self,
        msg: MessageRef,
        caption: &str,
        formatted: bool,
        markup: Option<&Markup>,
    ) -> Result<(), DeliveryError>;

    /// Replace the picture (and caption) of a picture message.
    async fn edit_media(
        &self,
        msg: MessageRef,
        source: &ImageSource,
        caption: &str,
        formatted: bool,
        markup: Option<&Markup>,
    ) -> Result<(), DeliveryError>;

    /// Replace or remove (`None`) the inline keyboard of a message.
    async fn edit_markup(&self, msg: MessageRef, markup: Option<&Markup>)
        -> Result<(), DeliveryError>;

    /// Delete a message.
    async fn delete(&self, msg: MessageRef) -> Result<(), DeliveryError>;

    /// Acknowledge a button press, optionally showing `text`.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), DeliveryError>;

    /// Number of members in a conversation, including the bot.
    async fn member_count(&self, chat_id: i64) -> Result<u32, DeliveryError>;
}

/// Send one segment as the matching message kind.
pub async fn send_segment(
    transport: &dyn Transport,
    chat_id: i64,
    segment: &MessageSegment,
    markup: Option<&Markup>,
) -> Result<MessageRef, DeliveryError> {
    match segment {
        MessageSegment::Text { body, formatted } => {
            transport.send_text(chat_id, body, *formatted, markup).await
        }
        MessageSegment::Image {
            source,
            caption,
            formatted,
            ..
        } => {
            transport
                .send_image(chat_id, source, caption, *formatted, markup)
                .await
        }
    }
}
