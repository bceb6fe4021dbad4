//! User-facing texts with optional localization from a JSON file.
//!
//! The file maps language codes to tables. Each value is either a string or a
//! list of strings that are concatenated as-is (entries carry their own line
//! breaks). Texts are HTML.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

/// Language used when the configured one is missing.
pub const FALLBACK_LANGUAGE: &str = "en-us";

/// Keys of all known texts.
pub mod keys {
    /// Private-chat greeting.
    pub const WELCOME: &str = "welcome";
    /// Greeting posted in groups the bot joins.
    pub const GROUP_INTRO: &str = "group-intro";
    /// Help for everybody.
    pub const HELP: &str = "help";
    /// Extra help for admins.
    pub const ADMIN_HELP: &str = "admin-help";
    /// Extra help for the owner.
    pub const OWNER_HELP: &str = "owner-help";
    /// Reply to unknown (or unauthorized) commands.
    pub const UNKNOWN: &str = "unknown";
    /// Reply to messages that are not commands.
    pub const UNKNOWN_MSG: &str = "unknown-msg";
    /// Reply to edited messages.
    pub const EDITED_MESSAGE: &str = "edited-message";
    /// Label of on-demand feed broadcasts.
    pub const LAST_FEED: &str = "last-feed";
    /// Label of new-item broadcasts.
    pub const NEW_FEED: &str = "new-feed";
    /// Reply when `/last_feed` is rate-limited.
    pub const TIME_LIMIT_ERROR: &str = "time-limit-error";
}

const DEFAULTS: &[(&str, &str)] = &[
    (
        keys::WELCOME,
        "Hi! I will send you every new post from the feed.\nSend /help to see what I can do.",
    ),
    (
        keys::GROUP_INTRO,
        "Hi everyone! New posts from the feed will be shared here.",
    ),
    (
        keys::HELP,
        "/last_feed - get the latest post\n/help - show this message\n/stop - stop receiving posts\n",
    ),
    (
        keys::ADMIN_HELP,
        "/my_level - show your access level\n/state - registry statistics\n/listchats - dump registered chats\n/sendall - compose a broadcast\n/send_feed_toall - resend the latest post to everyone\n/set_interval &lt;seconds&gt; - change the poll interval\n",
    ),
    (
        keys::OWNER_HELP,
        "/gentoken - create an admin invitation token\n",
    ),
    (keys::UNKNOWN, "Unknown command."),
    (keys::UNKNOWN_MSG, "I don't understand that. Send /help."),
    (keys::EDITED_MESSAGE, "Edited messages are ignored."),
    (keys::LAST_FEED, "Latest post"),
    (keys::NEW_FEED, "New post"),
    (
        keys::TIME_LIMIT_ERROR,
        "Please wait a little before asking again.",
    ),
];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawText {
    One(String),
    Lines(Vec<String>),
}

impl RawText {
    fn into_text(self) -> String {
        match self {
            Self::One(text) => text,
            Self::Lines(lines) => lines.concat(),
        }
    }
}

/// Resolved text table.
#[derive(Debug, Clone)]
pub struct Strings {
    texts: HashMap<String, String>,
}

impl Default for Strings {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Strings {
    /// Built-in English texts.
    pub fn builtin() -> Self {
        Self {
            texts: DEFAULTS
                .iter()
                .map(|(key, text)| ((*key).to_owned(), (*text).to_owned()))
                .collect(),
        }
    }

    /// Load texts for `language` from `path`, falling back to
    /// [`FALLBACK_LANGUAGE`] in the same file and then to the built-ins.
    /// Keys missing from the file keep their built-in text.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path, language: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read strings file {}", path.display()))?;
        Self::from_json(&raw, language)
            .with_context(|| format!("failed to parse strings file {}", path.display()))
    }

    /// Parse a strings document (see [`Strings::load`]).
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not a map of language tables.
    pub fn from_json(raw: &str, language: &str) -> anyhow::Result<Self> {
        let mut tables: HashMap<String, HashMap<String, RawText>> = serde_json::from_str(raw)?;
        let mut strings = Self::builtin();

        let table = match tables.remove(language) {
            Some(table) => {
                info!(language, "using strings table");
                Some(table)
            }
            None => {
                warn!(language, fallback = FALLBACK_LANGUAGE, "language not found in strings file");
                tables.remove(FALLBACK_LANGUAGE)
            }
        };
        if let Some(table) = table {
            for (key, text) in table {
                strings.texts.insert(key, text.into_text());
            }
        }
        Ok(strings)
    }

    /// Text for `key`; the key itself if unknown.
    pub fn get<'a>(&'a self, key: &'a str) -> &'a str {
        self.texts.get(key).map_or(key, String::as_str)
    }
}
