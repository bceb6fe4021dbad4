//! Telegram adapter: update conversion, reply formatting, and the bot
//! dispatcher.
//!
//! Updates are converted into [`commands::Inbound`] events and applied by
//! [`commands::BotContext`]. Storage failures are fatal: the handler reports
//! them on the shutdown channel and the process exits.

use std::sync::Arc;

use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::{Chat, ChatMemberUpdated, PhotoSize, User};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::store::ChatKind;
use crate::transport::MessageRef;

pub mod commands;
pub mod ui;

pub use commands::{BotContext, BotDeps, Caller, ChatInfo, Inbound};

// ---------------------------------------------------------------------------
// Shared state for handler injection
// ---------------------------------------------------------------------------

/// Shared dependencies injected into teloxide handlers via `dptree::deps!`.
#[derive(Clone)]
struct SharedState {
    context: Arc<BotContext>,
    fatal: Arc<watch::Sender<bool>>,
}

impl SharedState {
    async fn apply(&self, event: Inbound) {
        if let Err(e) = self.context.handle(event).await {
            error!(error = %e, "storage failure while handling update");
            self.fatal.send_replace(true);
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Run the Telegram dispatcher until Ctrl+C or until `fatal` is raised by a
/// storage failure.
///
/// # Errors
///
/// Returns an error if the bot identity cannot be fetched.
pub async fn run_telegram(
    bot: Bot,
    context: Arc<BotContext>,
    fatal: Arc<watch::Sender<bool>>,
) -> anyhow::Result<()> {
    let me = bot
        .get_me()
        .await
        .map_err(|e| anyhow::anyhow!("failed to fetch bot identity: {e}"))?;
    info!(username = ?me.user.username, "bot identity confirmed");

    let shared = SharedState {
        context,
        fatal: Arc::clone(&fatal),
    };

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_edited_message().endpoint(handle_edited))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_my_chat_member().endpoint(handle_membership));

    info!("telegram dispatcher starting");

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![shared])
        .enable_ctrlc_handler()
        .build();

    let token = dispatcher.shutdown_token();
    let mut fatal_rx = fatal.subscribe();
    tokio::spawn(async move {
        while fatal_rx.changed().await.is_ok() {
            if *fatal_rx.borrow() {
                if let Ok(wait) = token.shutdown() {
                    wait.await;
                }
                break;
            }
        }
    });

    dispatcher.dispatch().await;
    info!("telegram dispatcher stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Update conversion
// ---------------------------------------------------------------------------

fn chat_info(chat: &Chat) -> ChatInfo {
    let kind = if chat.is_private() {
        ChatKind::Direct
    } else if chat.is_channel() {
        ChatKind::Channel
    } else {
        ChatKind::Group
    };
    let title = chat
        .title()
        .map(str::to_owned)
        .or_else(|| {
            let first = chat.first_name()?;
            Some(match chat.last_name() {
                Some(last) => format!("{first} {last}"),
                None => first.to_owned(),
            })
        })
        .unwrap_or_default();
    ChatInfo {
        id: chat.id.0,
        kind,
        title,
        username: chat.username().map(str::to_owned),
    }
}

fn caller(user: &User) -> Caller {
    Caller {
        user_id: user.id.0,
        username: user.username.clone(),
        full_name: user.full_name(),
    }
}

fn largest_photo(photos: &[PhotoSize]) -> Option<&PhotoSize> {
    photos
        .iter()
        .max_by_key(|p| u64::from(p.width).saturating_mul(u64::from(p.height)))
}

/// Convert a message into an inbound event.
fn message_event(msg: &Message) -> Option<Inbound> {
    let user = msg.from.as_ref()?;
    let caller = caller(user);
    let chat = chat_info(&msg.chat);

    if let Some(text) = msg.text() {
        if let Some((name, args)) = commands::parse_command(text) {
            return Some(Inbound::Command {
                caller,
                chat,
                name,
                args,
            });
        }
        return Some(Inbound::Text {
            caller,
            chat,
            text: text.to_owned(),
        });
    }

    if let Some(photo) = msg.photo().and_then(largest_photo) {
        return Some(Inbound::Photo {
            caller,
            chat,
            file_id: photo.file.id.to_string(),
            caption: msg.caption().map(str::to_owned),
        });
    }

    // Service messages (joins, pins, title changes) are not operator input.
    if msg.new_chat_members().is_some() || msg.left_chat_member().is_some() {
        return None;
    }
    Some(Inbound::Other { caller, chat })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_message(msg: Message, state: SharedState) -> ResponseResult<()> {
    match message_event(&msg) {
        Some(event) => state.apply(event).await,
        None => debug!(chat_id = msg.chat.id.0, "message ignored"),
    }
    Ok(())
}

async fn handle_edited(msg: Message, state: SharedState) -> ResponseResult<()> {
    state
        .apply(Inbound::Edited {
            chat_id: msg.chat.id.0,
        })
        .await;
    Ok(())
}

async fn handle_callback(query: CallbackQuery, state: SharedState) -> ResponseResult<()> {
    let message = query.regular_message();
    let event = Inbound::Callback {
        id: query.id.clone(),
        user_id: query.from.id.0,
        message: message.map(|m| MessageRef {
            chat_id: m.chat.id.0,
            message_id: m.id.0,
        }),
        message_text: message.and_then(|m| m.text()).map(str::to_owned),
        data: query.data.clone().unwrap_or_default(),
    };
    state.apply(event).await;
    Ok(())
}

async fn handle_membership(update: ChatMemberUpdated, state: SharedState) -> ResponseResult<()> {
    let was_present = update.old_chat_member.kind.is_present();
    let is_present = update.new_chat_member.kind.is_present();
    // Private chats register through /start; leaving one means the user
    // blocked the bot.
    let event = match (was_present, is_present) {
        (false, true) if update.chat.is_private() => return Ok(()),
        (false, true) => Inbound::Joined {
            chat: chat_info(&update.chat),
        },
        (true, false) => Inbound::Left {
            chat_id: update.chat.id.0,
        },
        _ => return Ok(()),
    };
    state.apply(event).await;
    Ok(())
}
