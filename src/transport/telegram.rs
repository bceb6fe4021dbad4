//! Telegram implementation of [`Transport`] on top of teloxide.
//!
//! All output uses HTML parse mode when a segment is formatted. API errors
//! are folded into [`DeliveryError`] so callers never see teloxide types.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, InputFile, InputMedia, InputMediaPhoto,
    KeyboardButton, KeyboardMarkup, KeyboardRemove, MessageId, ParseMode, ReplyMarkup,
};
use teloxide::{ApiError, RequestError};
use tracing::debug;
use url::Url;

use super::{Button, DeliveryError, Markup, MessageRef, Transport};
use crate::message::ImageSource;

/// Transport backed by a teloxide [`Bot`].
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Wrap an existing bot handle.
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Classify a teloxide error.
pub fn classify(err: RequestError) -> DeliveryError {
    match err {
        RequestError::Api(api) => classify_api(api),
        RequestError::MigrateToChatId(new_id) => {
            DeliveryError::DestinationGone(format!("chat migrated to {}", new_id.0))
        }
        RequestError::RetryAfter(wait) => DeliveryError::Transient {
            reason: "rate limited".to_owned(),
            retry_after: Some(wait.duration()),
        },
        RequestError::Network(e) => DeliveryError::Transient {
            reason: e.to_string(),
            retry_after: None,
        },
        RequestError::Io(e) => DeliveryError::Transient {
            reason: e.to_string(),
            retry_after: None,
        },
        other => DeliveryError::Rejected(other.to_string()),
    }
}

fn classify_api(api: ApiError) -> DeliveryError {
    let text = api.to_string();
    match api {
        ApiError::BotBlocked
        | ApiError::ChatNotFound
        | ApiError::UserDeactivated
        | ApiError::BotKicked
        | ApiError::BotKickedFromSupergroup => DeliveryError::DestinationGone(text),
        ApiError::CantParseEntities(reason) => DeliveryError::Format(reason),
        ApiError::Unknown(reason) if is_entity_error(&reason) => DeliveryError::Format(reason),
        _ => DeliveryError::Rejected(text),
    }
}

/// Markup parse failures that teloxide does not map to a dedicated variant.
fn is_entity_error(reason: &str) -> bool {
    let lower = reason.to_ascii_lowercase();
    lower.contains("can't parse entities")
        || lower.contains("unsupported start tag")
        || lower.contains("unclosed start tag")
        || lower.contains("can't find end tag")
}

fn to_reply_markup(markup: &Markup) -> ReplyMarkup {
    match markup {
        Markup::Inline(rows) => ReplyMarkup::InlineKeyboard(to_inline(rows)),
        Markup::Reply(rows) => {
            let keyboard = rows
                .iter()
                .map(|row| row.iter().map(|label| KeyboardButton::new(label.clone())).collect())
                .collect::<Vec<Vec<KeyboardButton>>>();
            ReplyMarkup::Keyboard(KeyboardMarkup::new(keyboard))
        }
        Markup::RemoveReply => ReplyMarkup::KeyboardRemove(KeyboardRemove::new()),
    }
}

fn to_inline(rows: &[Vec<Button>]) -> InlineKeyboardMarkup {
    let rows = rows
        .iter()
        .map(|row| row.iter().filter_map(to_inline_button).collect::<Vec<_>>())
        .filter(|row| !row.is_empty())
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

fn to_inline_button(button: &Button) -> Option<InlineKeyboardButton> {
    match button {
        Button::Callback { label, data } => {
            Some(InlineKeyboardButton::callback(label.clone(), data.clone()))
        }
        Button::Url { label, url } => match Url::parse(url) {
            Ok(url) => Some(InlineKeyboardButton::url(label.clone(), url)),
            Err(e) => {
                debug!(url = %url, error = %e, "dropping button with invalid URL");
                None
            }
        },
    }
}

/// Only inline keyboards can be attached when editing.
fn inline_only(markup: Option<&Markup>) -> Option<InlineKeyboardMarkup> {
    match markup {
        Some(Markup::Inline(rows)) => Some(to_inline(rows)),
        _ => None,
    }
}

fn to_input_file(source: &ImageSource) -> Result<InputFile, DeliveryError> {
    match source {
        ImageSource::Url(raw) => Url::parse(raw)
            .map(InputFile::url)
            .map_err(|e| DeliveryError::Rejected(format!("invalid image URL {raw:?}: {e}"))),
        ImageSource::FileId(id) => Ok(InputFile::file_id(id.clone())),
    }
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(
        &self,
        chat_id: i64,
        body: &str,
        formatted: bool,
        markup: Option<&Markup>,
    ) -> Result<MessageRef, DeliveryError> {
        let mut req = self.bot.send_message(ChatId(chat_id), body);
        if formatted {
            req = req.parse_mode(ParseMode::Html);
        }
        if let Some(markup) = markup {
            req = req.reply_markup(to_reply_markup(markup));
        }
        let msg = req.await.map_err(classify)?;
        Ok(message_ref(&msg))
    }

    async fn send_image(
        &self,
        chat_id: i64,
        source: &ImageSource,
        caption: &str,
        formatted: bool,
        markup: Option<&Markup>,
    ) -> Result<MessageRef, DeliveryError> {
        let mut req = self.bot.send_photo(ChatId(chat_id), to_input_file(source)?);
        if !caption.is_empty() {
            req = req.caption(caption);
            if formatted {
                req = req.parse_mode(ParseMode::Html);
            }
        }
        if let Some(markup) = markup {
            req = req.reply_markup(to_reply_markup(markup));
        }
        let msg = req.await.map_err(classify)?;
        Ok(message_ref(&msg))
    }

    async fn edit_text(
        &self,
        msg: MessageRef,
        body: &str,
        formatted: bool,
        markup: Option<&Markup>,
    ) -> Result<(), DeliveryError> {
        let mut req =
            self.bot
                .edit_message_text(ChatId(msg.chat_id), MessageId(msg.message_id), body);
        if formatted {
            req = req.parse_mode(ParseMode::Html);
        }
        if let Some(keyboard) = inline_only(markup) {
            req = req.reply_markup(keyboard);
        }
        req.await.map(|_| ()).map_err(classify)
    }

    async fn edit_caption(
        &self,
        msg: MessageRef,
        caption: &str,
        formatted: bool,
        markup: Option<&Markup>,
    ) -> Result<(), DeliveryError> {
        let mut req = self
            .bot
            .edit_message_caption(ChatId(msg.chat_id), MessageId(msg.message_id))
            .caption(caption);
        if formatted {
            req = req.parse_mode(ParseMode::Html);
        }
        if let Some(keyboard) = inline_only(markup) {
            req = req.reply_markup(keyboard);
        }
        req.await.map(|_| ()).map_err(classify)
    }

    async fn edit_media(
        &self,
        msg: MessageRef,
        source: &ImageSource,
        caption: &str,
        formatted: bool,
        markup: Option<&Markup>,
    ) -> Result<(), DeliveryError> {
        let mut photo = InputMediaPhoto::new(to_input_file(source)?);
        if !caption.is_empty() {
            photo = photo.caption(caption);
            if formatted {
                photo = photo.parse_mode(ParseMode::Html);
            }
        }
        let mut req = self.bot.edit_message_media(
            ChatId(msg.chat_id),
            MessageId(msg.message_id),
            InputMedia::Photo(photo),
        );
        if let Some(keyboard) = inline_only(markup) {
            req = req.reply_markup(keyboard);
        }
        req.await.map(|_| ()).map_err(classify)
    }

    async fn edit_markup(
        &self,
        msg: MessageRef,
        markup: Option<&Markup>,
    ) -> Result<(), DeliveryError> {
        let mut req = self
            .bot
            .edit_message_reply_markup(ChatId(msg.chat_id), MessageId(msg.message_id));
        if let Some(keyboard) = inline_only(markup) {
            req = req.reply_markup(keyboard);
        }
        match req.await {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(classify(e)),
        }
    }

    async fn delete(&self, msg: MessageRef) -> Result<(), DeliveryError> {
        self.bot
            .delete_message(ChatId(msg.chat_id), MessageId(msg.message_id))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), DeliveryError> {
        let mut req = self.bot.answer_callback_query(callback_id.to_owned());
        if let Some(text) = text {
            req = req.text(text).show_alert(alert);
        }
        req.await.map(|_| ()).map_err(classify)
    }

    async fn member_count(&self, chat_id: i64) -> Result<u32, DeliveryError> {
        self.bot
            .get_chat_member_count(ChatId(chat_id))
            .await
            .map_err(classify)
    }
}
