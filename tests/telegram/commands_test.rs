//! Command surface driven through `BotContext::handle`.

use std::sync::Arc;
use std::time::Duration;

use feedcast::admin::{AdminRegistry, Role};
use feedcast::compose::{ui as compose_ui, ComposerDriver, SessionStore};
use feedcast::fanout::FanoutEngine;
use feedcast::feed::{FeedError, Poller, RetryPolicy};
use feedcast::store::{ChatKind, WatermarkStore};
use feedcast::strings::{keys, Strings};
use feedcast::telegram::ui::admin_request_keyboard;
use feedcast::telegram::{BotContext, BotDeps, Caller, ChatInfo, Inbound};
use feedcast::transport::{Markup, MessageRef};

use crate::common::{memory_store, rss, Call, CollectingSink, Item, RecordingTransport, ScriptedFeed};

const BOT_TOKEN: &str = "123456:SECRET";
const OWNER: u64 = 1;
const ALICE: u64 = 2;
const GROUP: i64 = -100;

struct Harness {
    ctx: BotContext,
    transport: Arc<RecordingTransport>,
    store: WatermarkStore,
    admin: Arc<AdminRegistry>,
    sessions: Arc<SessionStore>,
    strings: Strings,
}

fn harness() -> Harness {
    let transport = RecordingTransport::new();
    let sink = CollectingSink::new();
    let store = memory_store();
    let strings = Arc::new(Strings::builtin());
    let fanout = Arc::new(FanoutEngine::new(transport.clone(), sink.clone(), 4));
    let feed = ScriptedFeed::serving(&rss(&[Item {
        title: "Hello world",
        link: "https://blog.example/hello",
        pub_date: Some("Tue, 10 Jun 2025 08:00:00 +0000"),
        body: "<p>First post</p>",
    }]));
    let poller = Arc::new(Poller::new(
        feed,
        RetryPolicy::new(1, Duration::ZERO, 2, FeedError::is_transient),
        store.clone(),
        Arc::clone(&fanout),
        sink.clone(),
        Arc::clone(&strings),
        Duration::from_secs(300),
    ));
    let admin = Arc::new(AdminRegistry::new(store.clone()));
    let sessions = Arc::new(SessionStore::new());
    let composer = Arc::new(ComposerDriver::new(
        transport.clone(),
        fanout,
        store.clone(),
        sink,
    ));
    let ctx = BotContext::new(BotDeps {
        transport: transport.clone(),
        store: store.clone(),
        admin: Arc::clone(&admin),
        strings,
        poller,
        sessions: Arc::clone(&sessions),
        composer,
        bot_token: BOT_TOKEN.to_owned(),
        last_feed_cooldown: Duration::from_secs(120),
    });
    Harness {
        ctx,
        transport,
        store,
        admin,
        sessions,
        strings: Strings::builtin(),
    }
}

fn caller(user_id: u64) -> Caller {
    Caller {
        user_id,
        username: Some(format!("user{user_id}")),
        full_name: format!("User {user_id}"),
    }
}

fn private(user_id: u64) -> ChatInfo {
    ChatInfo {
        id: i64::try_from(user_id).expect("small id"),
        kind: ChatKind::Direct,
        title: format!("User {user_id}"),
        username: None,
    }
}

fn group(id: i64) -> ChatInfo {
    ChatInfo {
        id,
        kind: ChatKind::Group,
        title: "Readers".to_owned(),
        username: Some("readers".to_owned()),
    }
}

fn chat_of(user_id: u64) -> i64 {
    i64::try_from(user_id).expect("small id")
}

impl Harness {
    async fn handle(&self, event: Inbound) {
        self.ctx.handle(event).await.expect("handler should succeed");
    }

    async fn command(&self, user_id: u64, chat: ChatInfo, name: &str, args: &str) {
        self.handle(Inbound::Command {
            caller: caller(user_id),
            chat,
            name: name.to_owned(),
            args: args.to_owned(),
        })
        .await;
    }

    async fn private_command(&self, user_id: u64, name: &str, args: &str) {
        self.command(user_id, private(user_id), name, args).await;
    }

    async fn make_owner(&self) {
        self.private_command(OWNER, "start", BOT_TOKEN).await;
        assert_eq!(self.admin.role_of(OWNER).await.expect("role"), Role::Owner);
        self.transport.clear();
    }

    async fn make_admin(&self, user_id: u64) {
        self.private_command(OWNER, "gentoken", "").await;
        let token = self.last_token();
        self.private_command(user_id, "start", &token).await;
        self.handle(Inbound::Callback {
            id: "cb-grant".to_owned(),
            user_id: OWNER,
            message: None,
            message_text: None,
            data: format!("accept-{token}"),
        })
        .await;
        assert_eq!(self.admin.role_of(user_id).await.expect("role"), Role::Admin);
        self.transport.clear();
    }

    fn last_token(&self) -> String {
        let reply = self
            .transport
            .texts_to(chat_of(OWNER))
            .pop()
            .expect("token reply");
        reply
            .split("<code>")
            .nth(1)
            .and_then(|rest| rest.split("</code>").next())
            .expect("reply should carry the token")
            .to_owned()
    }

    fn texts(&self, chat_id: i64) -> Vec<String> {
        self.transport.texts_to(chat_id)
    }

    fn answers(&self) -> Vec<(Option<String>, bool)> {
        self.transport
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Answer { text, alert, .. } => Some((text, alert)),
                _ => None,
            })
            .collect()
    }
}

#[tokio::test]
async fn start_in_private_registers_and_welcomes() {
    let h = harness();
    h.private_command(ALICE, "start", "").await;

    assert_eq!(h.texts(chat_of(ALICE)), vec![h.strings.get(keys::WELCOME).to_owned()]);
    let dest = h
        .store
        .destination(chat_of(ALICE))
        .await
        .expect("read")
        .expect("should be registered");
    assert_eq!(dest.meta.kind, ChatKind::Direct);
    assert_eq!(dest.meta.members, None);
    assert_eq!(h.admin.role_of(ALICE).await.expect("role"), Role::User);
}

#[tokio::test]
async fn start_in_group_records_members_and_introduces() {
    let h = harness();
    h.transport.set_members(GROUP, 11);

    h.command(ALICE, group(GROUP), "start", "").await;

    assert_eq!(h.texts(GROUP), vec![h.strings.get(keys::GROUP_INTRO).to_owned()]);
    let dest = h
        .store
        .destination(GROUP)
        .await
        .expect("read")
        .expect("should be registered");
    assert_eq!(dest.meta.members, Some(10));
    assert_eq!(dest.meta.username.as_deref(), Some("readers"));
}

#[tokio::test]
async fn bot_token_claims_ownership_once() {
    let h = harness();
    h.private_command(OWNER, "start", BOT_TOKEN).await;
    assert!(h.texts(chat_of(OWNER))[1].contains("I know you as my lord"));

    h.private_command(OWNER, "start", BOT_TOKEN).await;
    assert!(h.texts(chat_of(OWNER))[3].contains("already know you as my lord"));

    h.private_command(ALICE, "start", BOT_TOKEN).await;
    assert_eq!(h.texts(chat_of(ALICE)).len(), 1);
    assert_eq!(h.admin.role_of(ALICE).await.expect("role"), Role::User);
    assert_eq!(h.admin.owner().await.expect("owner"), Some(OWNER));
}

#[tokio::test]
async fn help_depends_on_role() {
    let h = harness();
    h.make_owner().await;
    h.make_admin(ALICE).await;

    h.private_command(3, "help", "").await;
    h.private_command(ALICE, "help", "").await;
    h.private_command(OWNER, "help", "").await;

    assert_eq!(h.texts(3), vec![h.strings.get(keys::HELP).to_owned()]);
    assert_eq!(
        h.texts(chat_of(ALICE)),
        vec![
            h.strings.get(keys::ADMIN_HELP).to_owned(),
            h.strings.get(keys::HELP).to_owned()
        ]
    );
    assert_eq!(h.texts(chat_of(OWNER)).len(), 3);
    assert_eq!(h.texts(chat_of(OWNER))[0], h.strings.get(keys::OWNER_HELP));
}

#[tokio::test]
async fn privileged_commands_look_unknown_to_users() {
    let h = harness();
    h.make_owner().await;
    for name in ["state", "listchats", "sendall", "send_feed_toall", "set_interval", "gentoken", "my_level"] {
        h.private_command(ALICE, name, "").await;
    }
    h.private_command(ALICE, "frobnicate", "").await;

    let texts = h.texts(chat_of(ALICE));
    assert_eq!(texts.len(), 8);
    assert!(texts.iter().all(|t| t == h.strings.get(keys::UNKNOWN)));
    assert!(h.sessions.is_empty().await);
}

#[tokio::test]
async fn accepted_admin_request_notifies_both_sides() {
    let h = harness();
    h.make_owner().await;

    h.private_command(OWNER, "gentoken", "").await;
    let token = h.last_token();
    assert_eq!(token.len(), feedcast::admin::TOKEN_LEN);

    h.private_command(ALICE, "start", &token).await;
    assert!(h.texts(chat_of(ALICE))[1].contains("Owner must accept your request"));
    let request = h
        .transport
        .sent_to(chat_of(OWNER))
        .into_iter()
        .find_map(|c| match c {
            Call::SendText {
                body,
                markup: Some(markup),
                ..
            } => Some((body, markup)),
            _ => None,
        })
        .expect("owner should get the request");
    assert!(request.0.contains("A user wants to be admin"));
    assert!(request.0.contains("user2"));
    assert_eq!(request.1, admin_request_keyboard(&token));

    let owner_msg = MessageRef {
        chat_id: chat_of(OWNER),
        message_id: 55,
    };
    h.handle(Inbound::Callback {
        id: "cb-1".to_owned(),
        user_id: OWNER,
        message: Some(owner_msg),
        message_text: Some("Hi, A user wants to be admin".to_owned()),
        data: format!("accept-{token}"),
    })
    .await;

    assert_eq!(h.admin.role_of(ALICE).await.expect("role"), Role::Admin);
    assert!(h
        .texts(chat_of(ALICE))
        .last()
        .expect("requester notice")
        .starts_with("✅ Accepted"));
    assert_eq!(h.answers(), vec![(Some("✅ Accepted".to_owned()), false)]);
    assert!(h.transport.calls().contains(&Call::EditText {
        msg: owner_msg,
        body: "Hi, A user wants to be admin\n\n✅ Accepted".to_owned(),
        formatted: false,
        markup: None,
    }));

    h.private_command(ALICE, "my_level", "").await;
    assert_eq!(
        h.texts(chat_of(ALICE)).last().map(String::as_str),
        Some("Oh, my admin. Hi, How are you?")
    );
}

#[tokio::test]
async fn declined_admin_request_keeps_user_role() {
    let h = harness();
    h.make_owner().await;
    h.private_command(OWNER, "gentoken", "").await;
    let token = h.last_token();
    h.private_command(ALICE, "start", &token).await;

    h.handle(Inbound::Callback {
        id: "cb-1".to_owned(),
        user_id: OWNER,
        message: None,
        message_text: None,
        data: format!("decline-{token}"),
    })
    .await;

    assert_eq!(h.admin.role_of(ALICE).await.expect("role"), Role::User);
    assert!(h
        .texts(chat_of(ALICE))
        .last()
        .expect("requester notice")
        .starts_with("❌ Declined"));

    // The token is spent.
    h.handle(Inbound::Callback {
        id: "cb-2".to_owned(),
        user_id: OWNER,
        message: None,
        message_text: None,
        data: format!("accept-{token}"),
    })
    .await;
    assert_eq!(
        h.answers().last(),
        Some(&(Some(compose_ui::UNKNOWN_ANSWER.to_owned()), true))
    );
}

#[tokio::test]
async fn stop_unsubscribes_silently() {
    let h = harness();
    h.private_command(ALICE, "start", "").await;
    h.transport.clear();

    h.private_command(ALICE, "stop", "").await;

    assert!(h.store.destination(chat_of(ALICE)).await.expect("read").is_none());
    assert!(h.transport.calls().is_empty());
}

#[tokio::test]
async fn set_interval_validates_and_persists() {
    let h = harness();
    h.make_owner().await;

    h.private_command(OWNER, "set_interval", "abc").await;
    h.private_command(OWNER, "set_interval", "0").await;
    h.private_command(OWNER, "set_interval", "90").await;

    let texts = h.texts(chat_of(OWNER));
    assert!(texts[0].starts_with("❌ Bad command"));
    assert!(texts[1].starts_with("❌ Bad command"));
    assert_eq!(texts[2], "✅ Interval changed to 90");
    assert_eq!(
        h.store
            .interval(Duration::from_secs(300))
            .await
            .expect("interval"),
        Duration::from_secs(90)
    );
}

#[tokio::test]
async fn state_reports_registry_counts() {
    let h = harness();
    h.make_owner().await;
    h.make_admin(ALICE).await;
    h.transport.set_members(GROUP, 5);
    h.transport.set_members(-200, 3);
    h.command(ALICE, group(GROUP), "start", "").await;
    h.command(ALICE, group(-200), "start", "").await;
    h.transport.clear();

    h.private_command(ALICE, "state", "").await;

    let calls = h.transport.calls();
    assert!(matches!(&calls[0], Call::SendText { body, .. } if body.starts_with("⏳")));
    // Two groups and two private chats; the owner counts as an admin.
    assert!(calls.iter().any(|c| matches!(
        c,
        Call::EditText { body, .. } if body == "👥chats:\t4\n👤members:\t6\n🤵admins:\t2"
    )));
}

#[tokio::test]
async fn listchats_dumps_every_destination() {
    let h = harness();
    h.make_owner().await;
    h.command(OWNER, group(GROUP), "start", "").await;
    h.transport.clear();

    h.private_command(OWNER, "listchats", "").await;

    let dump = h.texts(chat_of(OWNER)).concat();
    assert!(dump.starts_with("total: 2\n"));
    assert!(dump.contains("@readers"));
    assert!(dump.contains(&GROUP.to_string()));
}

#[tokio::test]
async fn sendall_only_starts_in_private() {
    let h = harness();
    h.make_owner().await;

    h.command(OWNER, group(GROUP), "sendall", "").await;
    assert!(h.texts(GROUP)[0].contains("only is available in private"));
    assert!(h.sessions.is_empty().await);

    h.private_command(OWNER, "sendall", "").await;
    assert_eq!(h.sessions.len().await, 1);
    assert!(h.texts(chat_of(OWNER))[0].starts_with("OK, Send a message"));
}

#[tokio::test]
async fn messages_route_to_composer_only_inside_a_session() {
    let h = harness();
    h.make_owner().await;

    h.handle(Inbound::Text {
        caller: caller(ALICE),
        chat: private(ALICE),
        text: "hi bot".to_owned(),
    })
    .await;
    h.handle(Inbound::Text {
        caller: caller(ALICE),
        chat: group(GROUP),
        text: "chatter".to_owned(),
    })
    .await;
    assert_eq!(
        h.texts(chat_of(ALICE)),
        vec![h.strings.get(keys::UNKNOWN_MSG).to_owned()]
    );
    assert!(h.texts(GROUP).is_empty());

    h.private_command(OWNER, "sendall", "").await;
    h.handle(Inbound::Text {
        caller: caller(OWNER),
        chat: private(OWNER),
        text: "breaking news".to_owned(),
    })
    .await;
    let session = h.sessions.get(OWNER).await.expect("session should exist");
    let drafted = session.lock().await.composer.draft().len();
    assert_eq!(drafted, 1);

    // A sticker is not valid composer input.
    h.handle(Inbound::Other {
        caller: caller(OWNER),
        chat: private(OWNER),
    })
    .await;
    assert_eq!(
        h.texts(chat_of(OWNER)).last().map(String::as_str),
        Some(h.strings.get(keys::UNKNOWN))
    );
}

#[tokio::test]
async fn composer_buttons_are_answered_through_callbacks() {
    let h = harness();
    h.make_owner().await;
    h.private_command(OWNER, "sendall", "").await;
    h.handle(Inbound::Text {
        caller: caller(OWNER),
        chat: private(OWNER),
        text: "one".to_owned(),
    })
    .await;
    h.handle(Inbound::Text {
        caller: caller(OWNER),
        chat: private(OWNER),
        text: compose_ui::PREVIEW.to_owned(),
    })
    .await;
    let session = h.sessions.get(OWNER).await.expect("session should exist");
    let preview = session.lock().await.composer.preview_ids()[0];
    let preview_msg = MessageRef {
        chat_id: chat_of(OWNER),
        message_id: preview,
    };

    for (id, data) in [("cb-1", compose_ui::DELETE_DATA), ("cb-2", compose_ui::NO_DATA)] {
        h.handle(Inbound::Callback {
            id: id.to_owned(),
            user_id: OWNER,
            message: Some(preview_msg),
            message_text: None,
            data: data.to_owned(),
        })
        .await;
    }
    h.handle(Inbound::Callback {
        id: "cb-3".to_owned(),
        user_id: OWNER,
        message: Some(preview_msg),
        message_text: None,
        data: compose_ui::NOOP_DATA.to_owned(),
    })
    .await;
    h.handle(Inbound::Callback {
        id: "cb-4".to_owned(),
        user_id: OWNER,
        message: Some(preview_msg),
        message_text: None,
        data: compose_ui::YES_DATA.to_owned(),
    })
    .await;

    assert_eq!(
        h.answers(),
        vec![
            (None, false),
            (Some(compose_ui::CANCELED_NOTICE.to_owned()), false),
            (None, false),
            (Some(compose_ui::UNKNOWN_ANSWER.to_owned()), true),
        ]
    );
}

#[tokio::test]
async fn unknown_callbacks_get_an_alert() {
    let h = harness();
    h.handle(Inbound::Callback {
        id: "cb".to_owned(),
        user_id: ALICE,
        message: None,
        message_text: None,
        data: "mystery".to_owned(),
    })
    .await;
    // Composer buttons without a session are stale.
    h.handle(Inbound::Callback {
        id: "cb2".to_owned(),
        user_id: ALICE,
        message: Some(MessageRef {
            chat_id: chat_of(ALICE),
            message_id: 3,
        }),
        message_text: None,
        data: compose_ui::EDIT_DATA.to_owned(),
    })
    .await;

    let alert = (Some(compose_ui::UNKNOWN_ANSWER.to_owned()), true);
    assert_eq!(h.answers(), vec![alert.clone(), alert]);
}

#[tokio::test(start_paused = true)]
async fn last_feed_is_rate_limited_for_users() {
    let h = harness();
    h.make_owner().await;

    h.private_command(ALICE, "last_feed", "").await;
    h.private_command(ALICE, "last_feed", "").await;
    tokio::time::advance(Duration::from_secs(121)).await;
    h.private_command(ALICE, "last_feed", "").await;

    let texts = h.texts(chat_of(ALICE));
    assert_eq!(texts.len(), 3);
    assert!(texts[0].starts_with("<i>Latest post</i>"));
    assert_eq!(texts[1], h.strings.get(keys::TIME_LIMIT_ERROR));
    assert!(texts[2].starts_with("<i>Latest post</i>"));

    // Admins are not limited.
    h.private_command(OWNER, "last_feed", "").await;
    h.private_command(OWNER, "last_feed", "").await;
    assert_eq!(h.texts(chat_of(OWNER)).len(), 2);
}

#[tokio::test]
async fn send_feed_toall_reports_delivery() {
    let h = harness();
    h.make_owner().await;
    h.command(OWNER, group(GROUP), "start", "").await;
    h.transport.clear();

    h.private_command(OWNER, "send_feed_toall", "").await;

    assert!(h.texts(GROUP)[0].contains("Hello world"));
    assert_eq!(
        h.texts(chat_of(OWNER)).last().map(String::as_str),
        Some("✅ Sent to 2 of 2 chats.")
    );
    assert_eq!(h.store.watermark().await.expect("read"), None);
}

#[tokio::test]
async fn joining_and_leaving_chats_updates_registry() {
    let h = harness();
    h.make_owner().await;
    h.transport.set_members(GROUP, 4);

    h.handle(Inbound::Joined { chat: group(GROUP) }).await;
    h.handle(Inbound::Joined {
        chat: ChatInfo {
            id: -300,
            kind: ChatKind::Channel,
            title: "News".to_owned(),
            username: None,
        },
    })
    .await;

    assert!(h.store.destination(GROUP).await.expect("read").is_some());
    assert!(h.store.destination(-300).await.expect("read").is_some());
    assert_eq!(h.texts(GROUP), vec![h.strings.get(keys::GROUP_INTRO).to_owned()]);
    assert!(h.texts(-300).is_empty());
    let owner_texts = h.texts(chat_of(OWNER));
    assert_eq!(owner_texts.len(), 2);
    assert!(owner_texts[0].starts_with("<i>Joined to a chat:</i>"));

    h.handle(Inbound::Left { chat_id: GROUP }).await;
    assert!(h.store.destination(GROUP).await.expect("read").is_none());
    assert!(h
        .texts(chat_of(OWNER))
        .last()
        .expect("owner notice")
        .starts_with("<i>Kicked from a chat:</i>"));

    // Leaving an unknown chat is a no-op.
    h.transport.clear();
    h.handle(Inbound::Left { chat_id: -999 }).await;
    assert!(h.transport.calls().is_empty());
}

#[tokio::test]
async fn edited_messages_get_a_notice() {
    let h = harness();
    h.handle(Inbound::Edited { chat_id: GROUP }).await;
    assert_eq!(
        h.texts(GROUP),
        vec![h.strings.get(keys::EDITED_MESSAGE).to_owned()]
    );
}

#[tokio::test]
async fn reply_keyboards_follow_the_composer() {
    let h = harness();
    h.make_owner().await;
    h.private_command(OWNER, "sendall", "").await;

    let first = h.transport.sent_to(chat_of(OWNER));
    assert!(matches!(
        &first[0],
        Call::SendText { markup: Some(Markup::Reply(_)), formatted: false, .. }
    ));
}
