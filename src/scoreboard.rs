use std::sync::Arc;

use futures::{StreamExt, stream};
use thiserror::Error;
use tracing::{Instrument, instrument};

use crate::chat::ChatDirectory;
use crate::cryptohack::{CryptoHackErr, ScoreApi, ScoreRecord};
use crate::db::prelude::*;

pub const DEFAULT_SCOREBOARD_LIMIT: usize = 10;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreboardEntry {
    /// 1-based position after ranking
    pub position: usize,
    pub display_name: String,
    pub record: ScoreRecord,
}

/// A linked user whose score couldn't be fetched and so is missing from the ranking.
#[derive(Debug)]
pub struct OmittedEntry {
    pub display_name: String,
    pub remote_username: String,
    pub error: CryptoHackErr,
}

#[derive(Debug, Default)]
pub struct Scoreboard {
    pub entries: Vec<ScoreboardEntry>,
    pub omitted: Vec<OmittedEntry>,
}

/// Score lookups for single users and for the linked group.
#[derive(Clone)]
pub struct ScoreService {
    store: Arc<dyn MappingStore>,
    api: Arc<dyn ScoreApi>,
    concurrency: usize,
}

impl ScoreService {
    pub fn new(store: Arc<dyn MappingStore>, api: Arc<dyn ScoreApi>, concurrency: usize) -> Self {
        Self {
            store,
            api,
            concurrency: concurrency.max(1),
        }
    }

    pub fn profile_url(&self, username: &str) -> String {
        self.api.profile_url(username)
    }

    /// Current score of the CryptoHack account linked to `target`.
    #[instrument(skip(self))]
    pub async fn stats(&self, target: &ChatUserId) -> ScoreboardResult<ScoreRecord> {
        let mapping = self
            .store
            .get(target)
            .await?
            .ok_or_else(|| ScoreboardErr::NoMappingFound(target.clone()))?;

        Ok(self.api.fetch_score(&mapping.remote_username).await?)
    }

    /// Ranks the first `limit` linked users by points.
    ///
    /// The limit is applied to the stored mappings *before* any score is fetched, so with more
    /// than `limit` linked users this is the ranking of the earliest-linked `limit` users,
    /// not necessarily the group's true top `limit`.
    #[instrument(skip(self, directory))]
    pub async fn scoreboard(
        &self,
        limit: usize,
        directory: &dyn ChatDirectory,
    ) -> ScoreboardResult<Scoreboard> {
        let mappings: Vec<AccountMapping> =
            self.store.all().await?.into_iter().take(limit).collect();

        tracing::debug!(count = mappings.len(), "fetching scoreboard scores");

        // `buffered` keeps stored order in the results, which the stable sort relies on to
        // break ties
        let outcomes: Vec<_> = stream::iter(mappings)
            .map(|mapping| async move {
                let display_name = directory
                    .display_name(&mapping.chat_user_id)
                    .await
                    .unwrap_or_else(|| mapping.chat_user_id.to_string());
                let score = self.api.fetch_score(&mapping.remote_username).await;

                (display_name, mapping.remote_username, score)
            })
            .buffered(self.concurrency)
            .collect()
            .instrument(tracing::debug_span!("fetch_scores"))
            .await;

        let mut scores = Vec::new();
        let mut omitted = Vec::new();
        for (display_name, remote_username, outcome) in outcomes {
            match outcome {
                Ok(record) => scores.push((display_name, record)),
                Err(error) => {
                    tracing::warn!(
                        cryptohack_user = %remote_username,
                        error = %error,
                        "omitting user from scoreboard"
                    );
                    omitted.push(OmittedEntry {
                        display_name,
                        remote_username,
                        error,
                    });
                }
            }
        }

        Ok(Scoreboard {
            entries: rank(scores),
            omitted,
        })
    }
}

/// Orders by points, highest first; equal points keep their incoming order.
pub fn rank(mut scores: Vec<(String, ScoreRecord)>) -> Vec<ScoreboardEntry> {
    scores.sort_by(|(_, a), (_, b)| b.points.cmp(&a.points));

    scores
        .into_iter()
        .enumerate()
        .map(|(idx, (display_name, record))| ScoreboardEntry {
            position: idx + 1,
            display_name,
            record,
        })
        .collect()
}

pub type ScoreboardResult<T> = core::result::Result<T, ScoreboardErr>;

#[derive(Debug, Error)]
pub enum ScoreboardErr {
    #[error("chat user '{0}' has no linked account")]
    NoMappingFound(ChatUserId),

    #[error(transparent)]
    Remote(#[from] CryptoHackErr),

    #[error(transparent)]
    Store(#[from] StoreErr),
}
