//! Bot command surface.
//!
//! The dispatcher in [`super`] turns Telegram updates into [`Inbound`] events;
//! [`BotContext::handle`] applies them. Replies are HTML and go out through
//! the crate's [`Transport`], so the whole surface runs against a recording
//! transport in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ui;
use crate::admin::{AdminRegistry, ClaimResult, RequestResult, Resolution, Role};
use crate::compose::{self, ComposerDriver, Input, SessionStore};
use crate::feed::Poller;
use crate::markup::escape_html;
use crate::store::{ChatKind, Destination, DestinationMeta, StoreError, WatermarkStore};
use crate::strings::{keys, Strings};
use crate::transport::{Markup, MessageRef, Transport};

/// Conversation an update came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    /// Chat id.
    pub id: i64,
    /// Conversation kind.
    pub kind: ChatKind,
    /// Title, or the user's name for direct chats.
    pub title: String,
    /// Public username.
    pub username: Option<String>,
}

/// User an update came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// User id.
    pub user_id: u64,
    /// Public username.
    pub username: Option<String>,
    /// Display name.
    pub full_name: String,
}

/// A transport-neutral inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `/name args`.
    Command {
        /// Sender.
        caller: Caller,
        /// Conversation.
        chat: ChatInfo,
        /// Command name without slash or bot mention.
        name: String,
        /// Trimmed argument text.
        args: String,
    },
    /// Plain text.
    Text {
        /// Sender.
        caller: Caller,
        /// Conversation.
        chat: ChatInfo,
        /// Message text.
        text: String,
    },
    /// A photo.
    Photo {
        /// Sender.
        caller: Caller,
        /// Conversation.
        chat: ChatInfo,
        /// File id of the largest size.
        file_id: String,
        /// Caption.
        caption: Option<String>,
    },
    /// Any other message.
    Other {
        /// Sender.
        caller: Caller,
        /// Conversation.
        chat: ChatInfo,
    },
    /// A message was edited.
    Edited {
        /// Conversation.
        chat_id: i64,
    },
    /// An inline button was pressed.
    Callback {
        /// Callback query id.
        id: String,
        /// Presser.
        user_id: u64,
        /// Message carrying the button.
        message: Option<MessageRef>,
        /// Text of that message.
        message_text: Option<String>,
        /// Callback payload.
        data: String,
    },
    /// The bot was added to a chat.
    Joined {
        /// Conversation.
        chat: ChatInfo,
    },
    /// The bot was removed from a chat.
    Left {
        /// Conversation.
        chat_id: i64,
    },
}

/// Dependencies of the command surface.
pub struct BotDeps {
    /// Outbound transport.
    pub transport: Arc<dyn Transport>,
    /// Persistent state.
    pub store: WatermarkStore,
    /// Roles and invitations.
    pub admin: Arc<AdminRegistry>,
    /// User-facing texts.
    pub strings: Arc<Strings>,
    /// Feed access for on-demand sends.
    pub poller: Arc<Poller>,
    /// Composer sessions.
    pub sessions: Arc<SessionStore>,
    /// Composer effect executor.
    pub composer: Arc<ComposerDriver>,
    /// The bot token; presenting it claims ownership.
    pub bot_token: String,
    /// `/last_feed` cooldown for non-admins.
    pub last_feed_cooldown: Duration,
}

/// Applies inbound events.
pub struct BotContext {
    deps: BotDeps,
    cooldowns: Mutex<HashMap<u64, Instant>>,
}

impl BotContext {
    /// Create the command surface.
    pub fn new(deps: BotDeps) -> Self {
        Self {
            deps,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Only storage failures propagate; transport failures are logged.
    pub async fn handle(&self, event: Inbound) -> Result<(), StoreError> {
        match event {
            Inbound::Command {
                caller,
                chat,
                name,
                args,
            } => self.command(&caller, &chat, &name, &args).await,
            Inbound::Text { caller, chat, text } => {
                self.composer_input(&caller, &chat, compose::ui::parse_text(&text))
                    .await
            }
            Inbound::Photo {
                caller,
                chat,
                file_id,
                caption,
            } => {
                self.composer_input(&caller, &chat, Input::Photo { file_id, caption })
                    .await
            }
            Inbound::Other { caller, chat } => {
                self.composer_input(&caller, &chat, Input::Unsupported)
                    .await
            }
            Inbound::Edited { chat_id } => {
                self.reply(chat_id, self.text(keys::EDITED_MESSAGE)).await;
                Ok(())
            }
            Inbound::Callback {
                id,
                user_id,
                message,
                message_text,
                data,
            } => {
                self.callback(&id, user_id, message, message_text.as_deref(), &data)
                    .await
            }
            Inbound::Joined { chat } => self.joined(&chat).await,
            Inbound::Left { chat_id } => self.left(chat_id).await,
        }
    }

    async fn command(
        &self,
        caller: &Caller,
        chat: &ChatInfo,
        name: &str,
        args: &str,
    ) -> Result<(), StoreError> {
        let role = self.deps.admin.role_of(caller.user_id).await?;
        debug!(user_id = caller.user_id, chat_id = chat.id, command = name, role = role.as_str(), "command");

        match name {
            "start" => self.start(caller, chat, args).await,
            "help" => self.help(chat.id, role).await,
            "stop" => self.stop(chat.id).await,
            "last_feed" => self.last_feed(caller, chat, role).await,
            "gentoken" if role == Role::Owner => {
                let token = self.deps.admin.issue_token();
                self.reply(
                    chat.id,
                    &format!("<code>{token}</code>\nThe invited user sends: <code>/start {token}</code>"),
                )
                .await;
                Ok(())
            }
            "my_level" if role.is_admin() => {
                let text = if role == Role::Owner {
                    "Oh, my lord. I respect you."
                } else {
                    "Oh, my admin. Hi, How are you?"
                };
                self.reply(chat.id, text).await;
                Ok(())
            }
            "state" if role.is_admin() => self.state(chat.id).await,
            "listchats" if role.is_admin() => self.list_chats(chat.id).await,
            "sendall" if role.is_admin() => self.send_all(caller, chat).await,
            "send_feed_toall" if role.is_admin() => self.send_feed_to_all(chat.id).await,
            "set_interval" if role.is_admin() => self.set_interval(chat.id, args).await,
            _ => {
                self.reply(chat.id, self.text(keys::UNKNOWN)).await;
                Ok(())
            }
        }
    }

    async fn start(&self, caller: &Caller, chat: &ChatInfo, args: &str) -> Result<(), StoreError> {
        self.register(chat).await?;
        if chat.kind != ChatKind::Direct {
            self.reply(chat.id, self.text(keys::GROUP_INTRO)).await;
            return Ok(());
        }
        self.reply(chat.id, self.text(keys::WELCOME)).await;
        if args.is_empty() {
            return Ok(());
        }

        let name = escape_html(&caller.full_name);
        if args == self.deps.bot_token {
            match self.deps.admin.claim_owner(caller.user_id).await? {
                ClaimResult::Claimed => {
                    self.reply(
                        chat.id,
                        &format!(
                            "Hi my dear {name}\nFrom now on, I know you as my lord\nyour id is: \"{}\"",
                            caller.user_id
                        ),
                    )
                    .await;
                }
                ClaimResult::AlreadyOwner => {
                    self.reply(chat.id, &format!("My dear {name}, I already know you as my lord!"))
                        .await;
                }
                ClaimResult::Taken => {
                    warn!(user_id = caller.user_id, "ownership claim refused, owner already set");
                }
            }
            return Ok(());
        }

        match self.deps.admin.request_admin(args, caller.user_id).await? {
            RequestResult::Pending => {
                self.reply(chat.id, "Owner must accept your request.\n⏳ please wait...")
                    .await;
                let text = ui::format_admin_request(
                    caller.user_id,
                    caller.username.as_deref(),
                    &caller.full_name,
                );
                if let Some(owner) = self.deps.admin.owner().await? {
                    let keyboard = ui::admin_request_keyboard(args);
                    self.send(owner_chat(owner), &text, Some(&keyboard)).await;
                }
            }
            RequestResult::AlreadyAdmin => {
                self.reply(chat.id, &format!("My dear {name}, I already know you as my admin!"))
                    .await;
            }
            RequestResult::UnknownToken => {
                debug!(user_id = caller.user_id, "start argument is not a known token");
            }
        }
        Ok(())
    }

    async fn help(&self, chat_id: i64, role: Role) -> Result<(), StoreError> {
        if role == Role::Owner {
            self.reply(chat_id, self.text(keys::OWNER_HELP)).await;
        }
        if role.is_admin() {
            self.reply(chat_id, self.text(keys::ADMIN_HELP)).await;
        }
        self.reply(chat_id, self.text(keys::HELP)).await;
        Ok(())
    }

    async fn stop(&self, chat_id: i64) -> Result<(), StoreError> {
        if self.deps.store.remove_destination(chat_id).await? {
            info!(chat_id, "chat unsubscribed");
        }
        Ok(())
    }

    async fn last_feed(&self, caller: &Caller, chat: &ChatInfo, role: Role) -> Result<(), StoreError> {
        if !role.is_admin() && !self.take_cooldown(caller.user_id) {
            self.reply(chat.id, self.text(keys::TIME_LIMIT_ERROR)).await;
            return Ok(());
        }
        self.deps.poller.send_latest(&[chat.id]).await?;
        Ok(())
    }

    /// Whether `user_id` may request now; starts a new window if so.
    fn take_cooldown(&self, user_id: u64) -> bool {
        let now = Instant::now();
        let mut cooldowns = self
            .cooldowns
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match cooldowns.get(&user_id) {
            Some(until) if *until > now => false,
            _ => {
                let until = now
                    .checked_add(self.deps.last_feed_cooldown)
                    .unwrap_or(now);
                cooldowns.insert(user_id, until);
                true
            }
        }
    }

    async fn state(&self, chat_id: i64) -> Result<(), StoreError> {
        let pending = self
            .deps
            .transport
            .send_text(chat_id, "⏳ Please wait, counting members...", true, None)
            .await;

        let destinations = self.deps.store.destinations().await?;
        let members: u64 = destinations
            .iter()
            .filter_map(|d| d.meta.members)
            .map(u64::from)
            .sum();
        let mut privileged = self.deps.admin.admins().await?;
        if let Some(owner) = self.deps.admin.owner().await? {
            if !privileged.contains(&owner) {
                privileged.push(owner);
            }
        }
        let text = ui::format_state(destinations.len(), members, privileged.len());

        match pending {
            Ok(msg) => {
                if let Err(e) = self.deps.transport.edit_text(msg, &text, true, None).await {
                    warn!(error = %e, "failed to update state message");
                }
            }
            Err(_) => self.reply(chat_id, &text).await,
        }
        Ok(())
    }

    async fn list_chats(&self, chat_id: i64) -> Result<(), StoreError> {
        let destinations = self.deps.store.destinations().await?;
        let mut dump = format!("total: {}\n", destinations.len());
        for dest in &destinations {
            dump.push_str(&ui::format_destination(dest));
            dump.push('\n');
        }
        for chunk in ui::split_message(&dump, ui::MAX_MESSAGE_CHARS) {
            self.reply(chat_id, &chunk).await;
        }
        Ok(())
    }

    async fn send_all(&self, caller: &Caller, chat: &ChatInfo) -> Result<(), StoreError> {
        if chat.kind != ChatKind::Direct {
            self.reply(chat.id, "❌ ERROR\nthis command only is available in private")
                .await;
            return Ok(());
        }
        self.deps
            .composer
            .begin(&self.deps.sessions, caller.user_id, chat.id)
            .await?;
        Ok(())
    }

    async fn send_feed_to_all(&self, chat_id: i64) -> Result<(), StoreError> {
        let destinations = self.deps.store.destination_ids().await?;
        let text = match self.deps.poller.send_latest(&destinations).await? {
            Some(report) => format!(
                "✅ Sent to {} of {} chats.",
                report.delivered, report.attempted
            ),
            None => "❌ The latest post is not available.".to_owned(),
        };
        self.reply(chat_id, &text).await;
        Ok(())
    }

    async fn set_interval(&self, chat_id: i64, args: &str) -> Result<(), StoreError> {
        match args.parse::<u64>() {
            Ok(secs) if secs > 0 => {
                self.deps.store.set_interval(secs).await?;
                self.reply(chat_id, &format!("✅ Interval changed to {secs}"))
                    .await;
            }
            _ => {
                self.reply(
                    chat_id,
                    "❌ Bad command, use <code>/set_interval {new interval in seconds}</code>",
                )
                .await;
            }
        }
        Ok(())
    }

    async fn composer_input(&self, caller: &Caller, chat: &ChatInfo, input: Input) -> Result<(), StoreError> {
        let in_session = match self.deps.sessions.get(caller.user_id).await {
            Some(session) => session.lock().await.chat_id == chat.id,
            None => false,
        };
        if !in_session {
            if chat.kind == ChatKind::Direct {
                self.reply(chat.id, self.text(keys::UNKNOWN_MSG)).await;
            }
            return Ok(());
        }

        let outcome = self
            .deps
            .composer
            .dispatch(&self.deps.sessions, caller.user_id, input)
            .await?;
        if outcome.is_some_and(|o| o.unknown) {
            self.reply(chat.id, self.text(keys::UNKNOWN)).await;
        }
        Ok(())
    }

    async fn callback(
        &self,
        id: &str,
        user_id: u64,
        message: Option<MessageRef>,
        message_text: Option<&str>,
        data: &str,
    ) -> Result<(), StoreError> {
        if let Some((approve, token)) = ui::parse_admin_callback(data) {
            return self
                .resolve_admin(id, user_id, message, message_text, approve, token)
                .await;
        }

        if data == compose::ui::NOOP_DATA {
            self.answer(id, None, false).await;
            return Ok(());
        }

        if compose::ui::is_composer_callback(data) {
            if let Some(msg) = message {
                let input = compose::ui::parse_callback(data, msg.message_id);
                if let Some(outcome) = self
                    .deps
                    .composer
                    .dispatch(&self.deps.sessions, user_id, input)
                    .await?
                {
                    match outcome.notice {
                        Some((text, alert)) => self.answer(id, Some(&text), alert).await,
                        None if outcome.unknown => {
                            self.answer(id, Some(compose::ui::UNKNOWN_ANSWER), true).await;
                        }
                        None => self.answer(id, None, false).await,
                    }
                    return Ok(());
                }
            }
        }

        warn!(user_id, data, "unknown callback");
        self.answer(id, Some(compose::ui::UNKNOWN_ANSWER), true).await;
        Ok(())
    }

    async fn resolve_admin(
        &self,
        id: &str,
        user_id: u64,
        message: Option<MessageRef>,
        message_text: Option<&str>,
        approve: bool,
        token: &str,
    ) -> Result<(), StoreError> {
        let (requester, requester_text, mark) = match self
            .deps
            .admin
            .resolve(token, approve, user_id)
            .await?
        {
            Resolution::Granted { requester } => (
                requester,
                "✅ Accepted, From now on, I know you as my admin",
                "✅ Accepted",
            ),
            Resolution::Denied { requester } => (
                requester,
                "❌ Declined, Owner didn't accepted your request",
                "❌ Declined",
            ),
            Resolution::NotOwner => {
                self.answer(id, None, false).await;
                return Ok(());
            }
            Resolution::NotFound => {
                self.answer(id, Some(compose::ui::UNKNOWN_ANSWER), true).await;
                return Ok(());
            }
        };

        self.reply(owner_chat(requester), requester_text).await;
        self.answer(id, Some(mark), false).await;
        if let Some(msg) = message {
            let text = format!("{}\n\n{mark}", message_text.unwrap_or_default());
            if let Err(e) = self.deps.transport.edit_text(msg, &text, false, None).await {
                warn!(error = %e, "failed to mark admin request");
            }
        }
        Ok(())
    }

    async fn joined(&self, chat: &ChatInfo) -> Result<(), StoreError> {
        let dest = self.register(chat).await?;
        info!(chat_id = chat.id, kind = ?chat.kind, "joined chat");
        self.notify_owner(&ui::format_membership(true, &dest)).await?;
        if chat.kind != ChatKind::Channel {
            self.reply(chat.id, self.text(keys::GROUP_INTRO)).await;
        }
        Ok(())
    }

    async fn left(&self, chat_id: i64) -> Result<(), StoreError> {
        let Some(dest) = self.deps.store.destination(chat_id).await? else {
            return Ok(());
        };
        self.deps.store.remove_destination(chat_id).await?;
        info!(chat_id, "removed from chat");
        self.notify_owner(&ui::format_membership(false, &dest)).await
    }

    /// Store a metadata snapshot of `chat`.
    async fn register(&self, chat: &ChatInfo) -> Result<Destination, StoreError> {
        let members = if chat.kind == ChatKind::Direct {
            None
        } else {
            match self.deps.transport.member_count(chat.id).await {
                Ok(count) => Some(count.saturating_sub(1)),
                Err(e) => {
                    debug!(chat_id = chat.id, error = %e, "member count unavailable");
                    None
                }
            }
        };
        let dest = Destination {
            id: chat.id,
            meta: DestinationMeta {
                title: chat.title.clone(),
                username: chat.username.clone(),
                kind: chat.kind,
                members,
            },
        };
        if self.deps.store.upsert_destination(&dest).await? {
            info!(chat_id = chat.id, "destination registered");
        }
        Ok(dest)
    }

    async fn notify_owner(&self, html: &str) -> Result<(), StoreError> {
        if let Some(owner) = self.deps.admin.owner().await? {
            self.reply(owner_chat(owner), html).await;
        }
        Ok(())
    }

    fn text(&self, key: &'static str) -> &str {
        self.deps.strings.get(key)
    }

    async fn reply(&self, chat_id: i64, html: &str) {
        self.send(chat_id, html, None).await;
    }

    async fn send(&self, chat_id: i64, html: &str, markup: Option<&Markup>) {
        if let Err(e) = self.deps.transport.send_text(chat_id, html, true, markup).await {
            warn!(chat_id, error = %e, "failed to send reply");
        }
    }

    async fn answer(&self, id: &str, text: Option<&str>, alert: bool) {
        if let Err(e) = self.deps.transport.answer_callback(id, text, alert).await {
            debug!(error = %e, "failed to answer callback");
        }
    }
}

/// Private chat id of a user.
fn owner_chat(user_id: u64) -> i64 {
    i64::try_from(user_id).unwrap_or_default()
}

/// Split `/name@bot args` into `(name, args)`.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let without_slash = text.strip_prefix('/')?;
    let (full, args) = match without_slash.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (without_slash, ""),
    };
    let name = full.split('@').next().unwrap_or(full);
    if name.is_empty() {
        return None;
    }
    Some((name.to_owned(), args.to_owned()))
}
