use core::fmt;

use serde::{Deserialize, Serialize};

/// Opaque chat-platform identifier of a user
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct ChatUserId(pub String);

impl fmt::Display for ChatUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ChatUserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ChatUserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Link between a chat user and the CryptoHack account they redeemed a token for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountMapping {
    pub chat_user_id: ChatUserId,
    pub remote_username: String,
}

impl AccountMapping {
    pub fn new(chat_user_id: ChatUserId, remote_username: impl Into<String>) -> Self {
        Self {
            chat_user_id,
            remote_username: remote_username.into(),
        }
    }
}
