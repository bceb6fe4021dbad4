//! Composer sessions, one per operator.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::Composer;
use crate::transport::MessageRef;

/// A running `/sendall` conversation.
#[derive(Debug)]
pub struct Session {
    /// Private chat the session runs in; also the canary destination.
    pub chat_id: i64,
    /// State machine.
    pub composer: Composer,
    /// Last informational prompt, deleted when the next one is shown.
    pub prompt: Option<MessageRef>,
}

impl Session {
    /// Fresh session in `chat_id`.
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            composer: Composer::new(),
            prompt: None,
        }
    }
}

/// Active sessions keyed by operator user id. Each session has its own lock,
/// so inputs of one operator are applied strictly in order while different
/// operators proceed independently.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<u64, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the session of `user_id` in `chat_id`.
    pub async fn start(&self, user_id: u64, chat_id: i64) -> Arc<Mutex<Session>> {
        let session = Arc::new(Mutex::new(Session::new(chat_id)));
        self.sessions
            .lock()
            .await
            .insert(user_id, Arc::clone(&session));
        session
    }

    /// Session of `user_id`, if any.
    pub async fn get(&self, user_id: u64) -> Option<Arc<Mutex<Session>>> {
        self.sessions.lock().await.get(&user_id).cloned()
    }

    /// End the session of `user_id`.
    pub async fn remove(&self, user_id: u64) -> bool {
        self.sessions.lock().await.remove(&user_id).is_some()
    }

    /// Number of active sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no session is active.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
