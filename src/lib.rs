//! Feedcast: rebroadcasts a web feed to every chat a Telegram bot is in.
//!
//! A poller watches an RSS feed and fans each new post out to all registered
//! chats, users and channels. Admins can compose one-off broadcasts with a
//! preview/edit/confirm workflow.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod markup;
pub mod message;

pub mod feed;
pub mod store;
pub mod transport;

pub mod admin;
pub mod compose;
pub mod fanout;
pub mod reporter;
pub mod strings;

pub mod telegram;
