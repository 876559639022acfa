use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::db::prelude::*;

/// Process-local store; used for development runs and throughout the tests.
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    mappings: RwLock<Vec<AccountMapping>>,
}

#[cfg(test)]
impl MemoryMappingStore {
    pub async fn len(&self) -> usize {
        self.mappings.read().await.len()
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn get(&self, id: &ChatUserId) -> StoreResult<Option<AccountMapping>> {
        Ok(self
            .mappings
            .read()
            .await
            .iter()
            .find(|m| &m.chat_user_id == id)
            .cloned())
    }

    async fn all(&self) -> StoreResult<Vec<AccountMapping>> {
        Ok(self.mappings.read().await.clone())
    }

    #[instrument(skip(self))]
    async fn upsert(&self, mapping: &AccountMapping) -> StoreResult<()> {
        let mut mappings = self.mappings.write().await;
        match mappings
            .iter_mut()
            .find(|m| m.chat_user_id == mapping.chat_user_id)
        {
            Some(existing) => *existing = mapping.clone(),
            None => mappings.push(mapping.clone()),
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &ChatUserId) -> StoreResult<AccountMapping> {
        let mut mappings = self.mappings.write().await;
        let idx = mappings
            .iter()
            .position(|m| &m.chat_user_id == id)
            .ok_or_else(|| StoreErr::NotFound(id.clone()))?;

        Ok(mappings.remove(idx))
    }
}
