use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::instrument;

use crate::db::prelude::*;

/// Redis layout:
///
/// - `cryptohack:mapping` hash, `<chat_user_id> -> <cryptohack username>`
/// - `cryptohack:linked` sorted set of chat user ids, scored by link sequence number so
///   [`MappingStore::all`] comes back in insertion order
/// - `cryptohack:link_seq` counter handing out those sequence numbers
#[derive(Debug, Clone, Copy)]
pub enum RedisKey {
    Mapping,
    Linked,
    LinkSeq,
}

impl RedisKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedisKey::Mapping => "cryptohack:mapping",
            RedisKey::Linked => "cryptohack:linked",
            RedisKey::LinkSeq => "cryptohack:link_seq",
        }
    }
}

#[derive(Clone)]
pub struct RedisMappingStore {
    manager: ConnectionManager,
}

impl RedisMappingStore {
    #[instrument(skip(redis_url))]
    pub async fn new(redis_url: &str) -> StoreResult<Self> {
        tracing::debug!("connecting to redis server");

        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        Ok(Self { manager })
    }
}

#[async_trait]
impl MappingStore for RedisMappingStore {
    #[instrument(skip(self))]
    async fn get(&self, id: &ChatUserId) -> StoreResult<Option<AccountMapping>> {
        let mut conn = self.manager.clone();
        let username: Option<String> = conn.hget(RedisKey::Mapping.as_str(), &id.0).await?;

        Ok(username.map(|u| AccountMapping::new(id.clone(), u)))
    }

    #[instrument(skip(self))]
    async fn all(&self) -> StoreResult<Vec<AccountMapping>> {
        let mut conn = self.manager.clone();
        let ids: Vec<String> = conn.zrange(RedisKey::Linked.as_str(), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let usernames: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(RedisKey::Mapping.as_str())
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        let mappings: Vec<AccountMapping> = ids
            .into_iter()
            .zip(usernames)
            .filter_map(|(id, username)| {
                // an id in the ordering set without a hash entry is a leftover from a
                // delete racing this read
                username.map(|u| AccountMapping::new(id.into(), u))
            })
            .collect();

        tracing::debug!(count = mappings.len(), "loaded mappings");
        Ok(mappings)
    }

    #[instrument(skip(self))]
    async fn upsert(&self, mapping: &AccountMapping) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        // drawn outside the transaction; a failed upsert only leaves a gap in the sequence
        let seq: i64 = conn.incr(RedisKey::LinkSeq.as_str(), 1).await?;

        let _: () = upsert_pipeline(mapping, seq).query_async(&mut conn).await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &ChatUserId) -> StoreResult<AccountMapping> {
        let mut conn = self.manager.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hget(RedisKey::Mapping.as_str(), &id.0)
            .hdel(RedisKey::Mapping.as_str(), &id.0)
            .ignore()
            .zrem(RedisKey::Linked.as_str(), &id.0)
            .ignore();

        let (removed,): (Option<String>,) = pipe.query_async(&mut conn).await?;
        match removed {
            Some(username) => Ok(AccountMapping::new(id.clone(), username)),
            None => Err(StoreErr::NotFound(id.clone())),
        }
    }
}

/// Sets the username and, for a first link only, records `seq` as the user's position.
fn upsert_pipeline(mapping: &AccountMapping, seq: i64) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .hset(
            RedisKey::Mapping.as_str(),
            &mapping.chat_user_id.0,
            &mapping.remote_username,
        )
        .ignore()
        .cmd("ZADD")
        .arg(RedisKey::Linked.as_str())
        .arg("NX")
        .arg(seq)
        .arg(&mapping.chat_user_id.0)
        .ignore();

    pipe
}
