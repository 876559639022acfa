use async_trait::async_trait;
use sqlx::{PgPool, Pool, Postgres};
use tracing::instrument;

use crate::db::prelude::*;

pub struct PgMappingStore {
    pool: Pool<Postgres>,
}

impl PgMappingStore {
    /// Connects and brings the schema up to date with the embedded migrations.
    #[instrument(skip(db_url))]
    pub async fn new(db_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(db_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::debug!("postgres mapping store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl MappingStore for PgMappingStore {
    #[instrument(skip(self))]
    async fn get(&self, id: &ChatUserId) -> StoreResult<Option<AccountMapping>> {
        Ok(sqlx::query_as::<_, AccountMapping>(
            r#"
            SELECT chat_user_id, remote_username
            FROM account_mapping
            WHERE chat_user_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn all(&self) -> StoreResult<Vec<AccountMapping>> {
        Ok(sqlx::query_as::<_, AccountMapping>(
            r#"
            SELECT chat_user_id, remote_username
            FROM account_mapping
            ORDER BY linked_at ASC, chat_user_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn upsert(&self, mapping: &AccountMapping) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO account_mapping (
                chat_user_id,
                remote_username,
                linked_at,
                updated_at
            )
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (chat_user_id)
            DO UPDATE SET
                remote_username = $2,
                updated_at = NOW()
            "#,
        )
        .bind(&mapping.chat_user_id)
        .bind(&mapping.remote_username)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &ChatUserId) -> StoreResult<AccountMapping> {
        sqlx::query_as::<_, AccountMapping>(
            r#"
            DELETE FROM account_mapping
            WHERE chat_user_id = $1
            RETURNING chat_user_id, remote_username
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreErr::NotFound(id.clone()))
    }
}
