//! Roles and the admin-approval handshake.
//!
//! The owner is the first user to present the bot token. The owner issues
//! single-use invitation tokens; a user presenting one becomes a pending
//! requester until the owner accepts or declines. Tokens live in memory only,
//! the owner and admin set are persisted.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;
use tracing::info;

use crate::store::{StoreError, WatermarkStore};

/// Length of generated invitation tokens.
pub const TOKEN_LEN: usize = 32;

/// Alphabet used for invitation tokens.
const TOKEN_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Access level of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    /// Anyone.
    User,
    /// Approved operator.
    Admin,
    /// The bot owner; implies admin.
    Owner,
}

impl Role {
    /// Whether admin commands are available.
    pub fn is_admin(self) -> bool {
        self >= Self::Admin
    }

    /// Display name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    Issued,
    Pending { requester: u64 },
}

/// Outcome of an ownership claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// The caller is now the owner.
    Claimed,
    /// The caller already was the owner.
    AlreadyOwner,
    /// Someone else owns the bot.
    Taken,
}

/// Outcome of presenting an invitation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestResult {
    /// The request awaits the owner's decision.
    Pending,
    /// The caller is already an admin; the token was left untouched.
    AlreadyAdmin,
    /// The token is unknown or already used.
    UnknownToken,
}

/// Outcome of the owner's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The requester is now an admin.
    Granted {
        /// Promoted user.
        requester: u64,
    },
    /// The request was declined.
    Denied {
        /// Declined user.
        requester: u64,
    },
    /// No pending request for that token.
    NotFound,
    /// Only the owner may decide.
    NotOwner,
}

/// Owner, admins, and outstanding invitations.
pub struct AdminRegistry {
    store: WatermarkStore,
    tokens: Mutex<HashMap<String, TokenState>>,
    /// Serializes read-modify-write sequences on the persisted sets.
    write_lock: tokio::sync::Mutex<()>,
}

impl AdminRegistry {
    /// Create a registry over persisted state.
    pub fn new(store: WatermarkStore) -> Self {
        Self {
            store,
            tokens: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Role of `user_id`.
    pub async fn role_of(&self, user_id: u64) -> Result<Role, StoreError> {
        if self.store.owner().await? == Some(user_id) {
            return Ok(Role::Owner);
        }
        if self.store.admins().await?.contains(&user_id) {
            return Ok(Role::Admin);
        }
        Ok(Role::User)
    }

    /// The owner's user id.
    pub async fn owner(&self) -> Result<Option<u64>, StoreError> {
        self.store.owner().await
    }

    /// Admin user ids (the owner is not listed unless promoted explicitly).
    pub async fn admins(&self) -> Result<Vec<u64>, StoreError> {
        self.store.admins().await
    }

    /// Make `user_id` the owner if nobody is.
    pub async fn claim_owner(&self, user_id: u64) -> Result<ClaimResult, StoreError> {
        let _guard = self.write_lock.lock().await;
        match self.store.owner().await? {
            Some(owner) if owner == user_id => Ok(ClaimResult::AlreadyOwner),
            Some(_) => Ok(ClaimResult::Taken),
            None => {
                self.store.set_owner(user_id).await?;
                info!(user_id, "owner claimed");
                Ok(ClaimResult::Claimed)
            }
        }
    }

    /// Create a fresh invitation token.
    pub fn issue_token(&self) -> String {
        let token = generate_token();
        self.with_tokens(|tokens| tokens.insert(token.clone(), TokenState::Issued));
        info!("admin invitation token issued");
        token
    }

    /// Present `token` on behalf of `requester`. The first presentation
    /// consumes it.
    pub async fn request_admin(&self, token: &str, requester: u64) -> Result<RequestResult, StoreError> {
        if self.role_of(requester).await?.is_admin() {
            return Ok(RequestResult::AlreadyAdmin);
        }
        let claimed = self.with_tokens(|tokens| match tokens.get_mut(token) {
            Some(state) if *state == TokenState::Issued => {
                *state = TokenState::Pending { requester };
                true
            }
            _ => false,
        });
        if claimed {
            info!(requester, "admin request pending");
            Ok(RequestResult::Pending)
        } else {
            Ok(RequestResult::UnknownToken)
        }
    }

    /// Accept or decline the request pending on `token`. Single use; only the
    /// owner may resolve, and a non-owner attempt leaves the request pending.
    pub async fn resolve(&self, token: &str, approve: bool, resolver: u64) -> Result<Resolution, StoreError> {
        if self.store.owner().await? != Some(resolver) {
            return Ok(Resolution::NotOwner);
        }
        let taken = self.with_tokens(|tokens| match tokens.get(token) {
            Some(TokenState::Pending { requester }) => {
                let requester = *requester;
                tokens.remove(token);
                Some(requester)
            }
            _ => None,
        });
        let Some(requester) = taken else {
            return Ok(Resolution::NotFound);
        };

        if !approve {
            info!(requester, "admin request declined");
            return Ok(Resolution::Denied { requester });
        }

        let _guard = self.write_lock.lock().await;
        let mut admins = self.store.admins().await?;
        if !admins.contains(&requester) {
            admins.push(requester);
            self.store.set_admins(&admins).await?;
        }
        info!(requester, "admin request granted");
        Ok(Resolution::Granted { requester })
    }

    fn with_tokens<T>(&self, f: impl FnOnce(&mut HashMap<String, TokenState>) -> T) -> T {
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut tokens)
    }
}

/// Generate a random alphanumeric token of [`TOKEN_LEN`] characters.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_CHARS.len());
            char::from(TOKEN_CHARS[idx])
        })
        .collect()
}
