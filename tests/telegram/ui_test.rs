//! Reply formatting helpers.

use feedcast::store::{ChatKind, Destination, DestinationMeta};
use feedcast::telegram::ui::{
    admin_request_keyboard, format_admin_request, format_destination, format_membership,
    format_state, parse_admin_callback, split_message, MAX_MESSAGE_CHARS,
};
use feedcast::transport::{Button, Markup};

fn destination(username: Option<&str>, title: &str) -> Destination {
    Destination {
        id: -1001,
        meta: DestinationMeta {
            title: title.to_owned(),
            username: username.map(str::to_owned),
            kind: ChatKind::Group,
            members: Some(42),
        },
    }
}

#[test]
fn destination_dump_is_escaped_json_with_handle() {
    let dump = format_destination(&destination(Some("readers"), "Cats & <Dogs>"));

    assert!(dump.contains("&quot;@readers&quot;"));
    assert!(dump.contains("Cats &amp; &lt;Dogs&gt;"));
    assert!(dump.contains("-1001"));
    assert!(dump.contains("&quot;group&quot;"));
    assert!(dump.contains("42"));
    assert!(!dump.contains('<'));
}

#[test]
fn destination_without_username_stays_null() {
    let dump = format_destination(&destination(None, "Readers"));
    assert!(dump.contains("&quot;username&quot;: null"));
    assert!(!dump.contains('@'));
}

#[test]
fn membership_notices_have_headings() {
    let dest = destination(None, "Readers");
    assert!(format_membership(true, &dest).starts_with("<i>Joined to a chat:</i>\n"));
    assert!(format_membership(false, &dest).starts_with("<i>Kicked from a chat:</i>\n"));
}

#[test]
fn admin_request_escapes_user_fields() {
    let text = format_admin_request(77, None, "<b>Mallory</b>");
    assert_eq!(
        text,
        "Hi, A user wants to be admin:\ntel-id:\t77\nuser-id:\t-\nname:\t&lt;b&gt;Mallory&lt;/b&gt;"
    );
    assert!(format_admin_request(77, Some("mal"), "M").contains("user-id:\tmal"));
}

#[test]
fn admin_keyboard_carries_token() {
    assert_eq!(
        admin_request_keyboard("tok"),
        Markup::Inline(vec![vec![
            Button::callback("✅ Accept", "accept-tok"),
            Button::callback("❌ Decline", "decline-tok"),
        ]])
    );
    assert_eq!(parse_admin_callback("accept-tok"), Some((true, "tok")));
    assert_eq!(parse_admin_callback("decline-tok"), Some((false, "tok")));
    assert_eq!(parse_admin_callback("yes"), None);
}

#[test]
fn state_lists_counts() {
    assert_eq!(
        format_state(3, 120, 2),
        "👥chats:\t3\n👤members:\t120\n🤵admins:\t2"
    );
}

#[test]
fn long_listings_are_split_within_limit() {
    let line = format!("{}\n", "x".repeat(100));
    let text = line.repeat(100);

    let chunks = split_message(&text, MAX_MESSAGE_CHARS);

    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c.chars().count() <= MAX_MESSAGE_CHARS));
    assert!(chunks.iter().all(|c| c.ends_with('\n')));
    assert_eq!(chunks.concat(), text);
}

#[test]
fn short_text_is_one_chunk() {
    assert_eq!(split_message("hello", MAX_MESSAGE_CHARS), vec!["hello".to_owned()]);
    assert!(split_message("", MAX_MESSAGE_CHARS).is_empty());
}
