use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

pub mod memory;
pub mod models;
pub mod pg;
pub mod redis;

pub mod prelude {
    pub use crate::db::models::{AccountMapping, ChatUserId};
    pub use crate::db::{MappingStore, StoreErr, StoreResult};
}

use crate::db::models::{AccountMapping, ChatUserId};

/// Persistence contract for chat user -> CryptoHack account links.
///
/// Implementations own the mapping collection; callers never hold on to mappings past a
/// single operation.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get(&self, id: &ChatUserId) -> StoreResult<Option<AccountMapping>>;

    /// All mappings in the order they were first linked.
    async fn all(&self) -> StoreResult<Vec<AccountMapping>>;

    /// Creates the mapping or replaces the one already held for `mapping.chat_user_id`.
    /// A replaced mapping keeps its original position in [`MappingStore::all`].
    async fn upsert(&self, mapping: &AccountMapping) -> StoreResult<()>;

    /// Removes and returns the mapping, failing with [`StoreErr::NotFound`] if none exists.
    async fn delete(&self, id: &ChatUserId) -> StoreResult<AccountMapping>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Postgres,
    Memory,
}

#[instrument(skip(redis_url, database_url))]
pub async fn connect(
    backend: StoreBackend,
    redis_url: Option<&str>,
    database_url: Option<&str>,
) -> StoreResult<Arc<dyn MappingStore>> {
    tracing::info!(?backend, "connecting mapping store");

    Ok(match backend {
        StoreBackend::Redis => {
            let url = redis_url.ok_or(StoreErr::MissingUrl("REDIS_URL"))?;
            Arc::new(redis::RedisMappingStore::new(url).await?)
        }
        StoreBackend::Postgres => {
            let url = database_url.ok_or(StoreErr::MissingUrl("DATABASE_URL"))?;
            Arc::new(pg::PgMappingStore::new(url).await?)
        }
        StoreBackend::Memory => {
            tracing::warn!("memory store selected, links will not survive a restart");
            Arc::new(memory::MemoryMappingStore::default())
        }
    })
}

pub type StoreResult<T> = core::result::Result<T, StoreErr>;

#[derive(Debug, Error)]
pub enum StoreErr {
    #[error("no mapping stored for chat user '{0}'")]
    NotFound(ChatUserId),

    #[error("{0} must be set for the selected store backend")]
    MissingUrl(&'static str),

    #[error(transparent)]
    RedisClientError(#[from] ::redis::RedisError),

    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),
}
