use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::cryptohack::{CryptoHackErr, ScoreApi, sanitize_token};
use crate::db::prelude::*;

/// Result of a `connect` invocation that didn't fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// No token was given; nothing changed.
    TokenRequired,
    Linked(AccountMapping),
}

/// Token redemption and unlinking.
#[derive(Clone)]
pub struct LinkService {
    store: Arc<dyn MappingStore>,
    api: Arc<dyn ScoreApi>,
}

impl LinkService {
    pub fn new(store: Arc<dyn MappingStore>, api: Arc<dyn ScoreApi>) -> Self {
        Self { store, api }
    }

    /// Redeems `token` and links the resulting CryptoHack account to `user`, replacing any
    /// account the user had linked before. A token with nothing left after sanitizing counts
    /// as no token.
    #[instrument(skip(self, token), fields(has_token = token.is_some()))]
    pub async fn link(&self, user: &ChatUserId, token: Option<&str>) -> LinkResult<LinkOutcome> {
        let Some(token) = token.filter(|t| !sanitize_token(t).is_empty()) else {
            return Ok(LinkOutcome::TokenRequired);
        };

        let remote_username = self.api.resolve_identity(token).await?;
        let mapping = AccountMapping::new(user.clone(), remote_username);
        self.store.upsert(&mapping).await?;

        tracing::info!(
            chat_user = %user,
            cryptohack_user = %mapping.remote_username,
            "linked account"
        );

        Ok(LinkOutcome::Linked(mapping))
    }

    #[instrument(skip(self))]
    pub async fn unlink(&self, user: &ChatUserId) -> LinkResult<AccountMapping> {
        match self.store.delete(user).await {
            Ok(removed) => {
                tracing::info!(cryptohack_user = %removed.remote_username, "unlinked account");
                Ok(removed)
            }
            Err(StoreErr::NotFound(id)) => Err(LinkErr::NoMappingFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}

pub type LinkResult<T> = core::result::Result<T, LinkErr>;

#[derive(Debug, Error)]
pub enum LinkErr {
    #[error("chat user '{0}' has no linked account")]
    NoMappingFound(ChatUserId),

    #[error(transparent)]
    Remote(#[from] CryptoHackErr),

    #[error(transparent)]
    Store(#[from] StoreErr),
}
