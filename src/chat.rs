use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::db::models::ChatUserId;

/// What the chat platform knows about its users.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    /// Name to show for a chat user, if the platform knows one.
    async fn display_name(&self, id: &ChatUserId) -> Option<String>;

    /// Resolves a user named in a command argument (`@name` or `name`).
    async fn lookup(&self, name: &str) -> Option<ChatUserId>;
}

/// Directory built from the users seen talking in joined channels.
#[derive(Debug, Default)]
pub struct SeenChatters {
    inner: RwLock<SeenInner>,
}

#[derive(Debug, Default)]
struct SeenInner {
    names: HashMap<ChatUserId, String>,
    ids: HashMap<String, ChatUserId>,
}

impl SeenChatters {
    pub async fn record(&self, id: &ChatUserId, display_name: &str) {
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.names.insert(id.clone(), display_name.to_string()) {
            let previous = normalize(&previous);
            // the old name may since have been taken by someone else
            if inner.ids.get(&previous) == Some(id) {
                inner.ids.remove(&previous);
            }
        }

        inner.ids.insert(normalize(display_name), id.clone());
    }
}

#[async_trait]
impl ChatDirectory for SeenChatters {
    async fn display_name(&self, id: &ChatUserId) -> Option<String> {
        self.inner.read().await.names.get(id).cloned()
    }

    async fn lookup(&self, name: &str) -> Option<ChatUserId> {
        self.inner.read().await.ids.get(&normalize(name)).cloned()
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_start_matches('@').to_lowercase()
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_lookup_by_mention() {
        let seen = SeenChatters::default();
        seen.record(&"42".into(), "Alice").await;

        assert_eq!(seen.lookup("@alice").await, Some("42".into()));
        assert_eq!(seen.lookup("ALICE").await, Some("42".into()));
        assert_eq!(seen.lookup("bob").await, None);
        assert_eq!(seen.display_name(&"42".into()).await.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_rename_drops_old_name() {
        let seen = SeenChatters::default();
        seen.record(&"42".into(), "Alice").await;
        seen.record(&"42".into(), "Alicia").await;

        assert_eq!(seen.lookup("alice").await, None);
        assert_eq!(seen.lookup("alicia").await, Some("42".into()));
    }

    #[tokio::test]
    async fn test_rename_keeps_name_taken_by_other_user() {
        let seen = SeenChatters::default();
        seen.record(&"42".into(), "Alice").await;
        seen.record(&"7".into(), "alice").await;
        seen.record(&"42".into(), "Alicia").await;

        assert_eq!(seen.lookup("alice").await, Some("7".into()));
        assert_eq!(seen.lookup("alicia").await, Some("42".into()));
    }
}
