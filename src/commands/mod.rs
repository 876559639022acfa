use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use crate::chat::ChatDirectory;
use crate::cryptohack::CryptoHackErr;
use crate::db::prelude::*;
use crate::link::{LinkErr, LinkOutcome, LinkService};
use crate::scoreboard::{ScoreService, ScoreboardErr};

pub mod reply;

pub use reply::{Reply, ScoreboardCard, StatsCard};

pub const DEFAULT_COMMAND_PREFIX: &str = "!cryptohack";
pub const TOKEN_PAGE_URL: &str = "https://cryptohack.org/user/";

#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    Connect { token: Option<String> },
    Disconnect,
    Stats { user: Option<String> },
    Scoreboard,
    /// Group invoked without a known subcommand
    Usage,
}

impl Command {
    /// Parses a chat line addressed to the `prefix` command group; `None` for anything else.
    pub fn parse(prefix: &str, message: &str) -> Option<Self> {
        let mut parts = message.split_whitespace();
        if parts.next()? != prefix {
            return None;
        }

        Some(match parts.next() {
            Some("connect") => Command::Connect {
                token: parts.next().map(str::to_string),
            },
            Some("disconnect") => Command::Disconnect,
            Some("stats") => Command::Stats {
                user: parts.next().map(str::to_string),
            },
            Some("scoreboard") => Command::Scoreboard,
            _ => Command::Usage,
        })
    }
}

// Commands end up in spans and logs; account tokens must not.
impl core::fmt::Debug for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Command::Connect { token } => f
                .debug_struct("Connect")
                .field("token", &token.as_ref().map(|_| "<redacted>"))
                .finish(),
            Command::Disconnect => f.write_str("Disconnect"),
            Command::Stats { user } => f.debug_struct("Stats").field("user", user).finish(),
            Command::Scoreboard => f.write_str("Scoreboard"),
            Command::Usage => f.write_str("Usage"),
        }
    }
}

/// The `!cryptohack` command group.
pub struct Commands {
    links: LinkService,
    scores: ScoreService,
    directory: Arc<dyn ChatDirectory>,
    prefix: String,
    scoreboard_limit: usize,
}

impl Commands {
    pub fn new(
        links: LinkService,
        scores: ScoreService,
        directory: Arc<dyn ChatDirectory>,
        prefix: &str,
        scoreboard_limit: usize,
    ) -> Self {
        Self {
            links,
            scores,
            directory,
            prefix: prefix.to_string(),
            scoreboard_limit,
        }
    }

    pub fn parse(&self, message: &str) -> Option<Command> {
        Command::parse(&self.prefix, message)
    }

    /// Runs `command` on behalf of `author`. Never fails: every error becomes a reply.
    #[instrument(skip(self))]
    pub async fn handle(&self, author: &ChatUserId, command: Command) -> Reply {
        let result = match command {
            Command::Connect { token } => self.connect(author, token.as_deref()).await,
            Command::Disconnect => self.disconnect(author).await,
            Command::Stats { user } => self.stats(author, user.as_deref()).await,
            Command::Scoreboard => self.scoreboard().await,
            Command::Usage => Ok(self.usage()),
        };

        result.unwrap_or_else(|e| self.error_reply(&e))
    }

    async fn connect(&self, author: &ChatUserId, token: Option<&str>) -> CommandResult<Reply> {
        Ok(match self.links.link(author, token).await? {
            LinkOutcome::TokenRequired => Reply::Text(format!(
                "You didn't give me a token! Grab yours from the bottom of {TOKEN_PAGE_URL} \
                 and run `{} connect <token>`.",
                self.prefix
            )),
            LinkOutcome::Linked(mapping) => {
                Reply::Text(format!("Linked CryptoHack as {}!", mapping.remote_username))
            }
        })
    }

    async fn disconnect(&self, author: &ChatUserId) -> CommandResult<Reply> {
        let removed = self.links.unlink(author).await?;
        Ok(Reply::Text(format!(
            "Unlinked CryptoHack account {}.",
            removed.remote_username
        )))
    }

    async fn stats(&self, author: &ChatUserId, user: Option<&str>) -> CommandResult<Reply> {
        let target = match user {
            None => author.clone(),
            Some(name) => match self.directory.lookup(name).await {
                Some(id) => id,
                None => return Ok(Reply::Text(format!("I don't know who {name} is."))),
            },
        };

        let record = self.scores.stats(&target).await?;
        let url = self.scores.profile_url(&record.username);

        Ok(Reply::Stats(StatsCard::new(&record, url)))
    }

    async fn scoreboard(&self) -> CommandResult<Reply> {
        let board = self
            .scores
            .scoreboard(self.scoreboard_limit, self.directory.as_ref())
            .await?;

        Ok(Reply::Scoreboard(ScoreboardCard::new(&board, Utc::now())))
    }

    fn usage(&self) -> Reply {
        Reply::Text(format!(
            "Invalid command passed. Use `{0} connect <token>`, `{0} disconnect`, \
             `{0} stats [user]` or `{0} scoreboard`.",
            self.prefix
        ))
    }

    /// The single place failures are turned into something a chat user gets to read.
    fn error_reply(&self, err: &CommandErr) -> Reply {
        let message = match err {
            CommandErr::NoMappingFound(id) => {
                tracing::debug!(chat_user = %id, "no linked account");
                format!(
                    "Couldn't find a linked CryptoHack account! (`{} connect <token>`)",
                    self.prefix
                )
            }
            CommandErr::Remote(CryptoHackErr::TokenRejected(reason)) => {
                format!("CryptoHack didn't accept that token: {reason}")
            }
            CommandErr::Remote(e) if !e.is_remote() => {
                tracing::error!(error = %e, "unexpected cryptohack response");
                "Oops... something went wrong.".to_string()
            }
            CommandErr::Remote(e) => {
                tracing::warn!(error = %e, "cryptohack request failed");
                "Oops... couldn't get an answer out of CryptoHack, try again later.".to_string()
            }
            CommandErr::Store(e) => {
                tracing::error!(error = %e, "mapping store failure");
                "Oops... something went wrong on my end.".to_string()
            }
        };

        Reply::Text(message)
    }
}

pub type CommandResult<T> = core::result::Result<T, CommandErr>;

#[derive(Debug, Error)]
pub enum CommandErr {
    #[error("chat user '{0}' has no linked account")]
    NoMappingFound(ChatUserId),

    #[error(transparent)]
    Remote(CryptoHackErr),

    #[error(transparent)]
    Store(StoreErr),
}

impl From<LinkErr> for CommandErr {
    fn from(value: LinkErr) -> Self {
        match value {
            LinkErr::NoMappingFound(id) => CommandErr::NoMappingFound(id),
            LinkErr::Remote(e) => CommandErr::Remote(e),
            LinkErr::Store(e) => CommandErr::Store(e),
        }
    }
}

impl From<ScoreboardErr> for CommandErr {
    fn from(value: ScoreboardErr) -> Self {
        match value {
            ScoreboardErr::NoMappingFound(id) => CommandErr::NoMappingFound(id),
            ScoreboardErr::Remote(e) => CommandErr::Remote(e),
            ScoreboardErr::Store(e) => CommandErr::Store(e),
        }
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;

    use super::*;
    use crate::db::memory::MemoryMappingStore;
    use crate::link::test::MockApi;
    use crate::scoreboard::test::MockDirectory;

    /// A store whose backend is unreachable.
    struct DownStore;

    #[async_trait]
    impl MappingStore for DownStore {
        async fn get(&self, _: &ChatUserId) -> StoreResult<Option<AccountMapping>> {
            Err(StoreErr::SqlxError(sqlx::Error::PoolTimedOut))
        }

        async fn all(&self) -> StoreResult<Vec<AccountMapping>> {
            Err(StoreErr::SqlxError(sqlx::Error::PoolTimedOut))
        }

        async fn upsert(&self, _: &AccountMapping) -> StoreResult<()> {
            Err(StoreErr::SqlxError(sqlx::Error::PoolTimedOut))
        }

        async fn delete(&self, _: &ChatUserId) -> StoreResult<AccountMapping> {
            Err(StoreErr::SqlxError(sqlx::Error::PoolTimedOut))
        }
    }

    fn commands(api: MockApi, directory: MockDirectory) -> (Commands, Arc<MemoryMappingStore>) {
        let store = Arc::new(MemoryMappingStore::default());
        let api = Arc::new(api);
        let commands = Commands::new(
            LinkService::new(store.clone(), api.clone()),
            ScoreService::new(store.clone(), api, 2),
            Arc::new(directory),
            DEFAULT_COMMAND_PREFIX,
            10,
        );

        (commands, store)
    }

    fn text(reply: Reply) -> String {
        match reply {
            Reply::Text(t) => t,
            other => panic!("expected a text reply, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_commands() {
        let parse = |m| Command::parse(DEFAULT_COMMAND_PREFIX, m);

        assert_eq!(
            parse("!cryptohack connect abc123"),
            Some(Command::Connect {
                token: Some("abc123".to_string())
            })
        );
        assert_eq!(
            parse("!cryptohack connect"),
            Some(Command::Connect { token: None })
        );
        assert_eq!(parse("!cryptohack   disconnect"), Some(Command::Disconnect));
        assert_eq!(
            parse("!cryptohack stats @bob"),
            Some(Command::Stats {
                user: Some("@bob".to_string())
            })
        );
        assert_eq!(parse("!cryptohack stats"), Some(Command::Stats { user: None }));
        assert_eq!(parse("!cryptohack scoreboard"), Some(Command::Scoreboard));
        assert_eq!(parse("!cryptohack"), Some(Command::Usage));
        assert_eq!(parse("!cryptohack dance"), Some(Command::Usage));
        assert_eq!(parse("!cryptohackers scoreboard"), None);
        assert_eq!(parse("hello !cryptohack scoreboard"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn test_debug_redacts_token() {
        let command = Command::parse(DEFAULT_COMMAND_PREFIX, "!cryptohack connect s3cr3t-token");
        let rendered = format!("{command:?}");

        assert!(rendered.contains("Connect"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("s3cr3t-token"));

        assert_eq!(
            format!("{:?}", Command::Connect { token: None }),
            "Connect { token: None }"
        );
        assert_eq!(
            format!("{:?}", Command::Stats { user: Some("@bob".to_string()) }),
            "Stats { user: Some(\"@bob\") }"
        );
    }

    #[tokio::test]
    async fn test_connect_flow() {
        let (commands, store) = commands(
            MockApi::default().with_token("tok", "alice"),
            MockDirectory::default(),
        );
        let author: ChatUserId = "1".into();

        let hint = text(
            commands
                .handle(&author, Command::Connect { token: None })
                .await,
        );
        assert!(hint.contains(TOKEN_PAGE_URL));

        let linked = text(
            commands
                .handle(
                    &author,
                    Command::Connect {
                        token: Some("tok".to_string()),
                    },
                )
                .await,
        );
        assert_eq!(linked, "Linked CryptoHack as alice!");
        assert!(store.get(&author).await.unwrap().is_some());

        let rejected = text(
            commands
                .handle(
                    &author,
                    Command::Connect {
                        token: Some("nope".to_string()),
                    },
                )
                .await,
        );
        assert_eq!(rejected, "CryptoHack didn't accept that token: Invalid token");
    }

    #[tokio::test]
    async fn test_disconnect_not_linked() {
        let (commands, _) = commands(MockApi::default(), MockDirectory::default());

        let reply = text(commands.handle(&"1".into(), Command::Disconnect).await);
        assert!(reply.starts_with("Couldn't find a linked CryptoHack account!"));
        assert!(reply.contains("!cryptohack connect <token>"));
    }

    #[tokio::test]
    async fn test_stats_for_other_user() {
        let (commands, store) = commands(
            MockApi::default().with_score("bob_ch", 1200),
            MockDirectory::default().with("2", "Bob"),
        );
        store
            .upsert(&AccountMapping::new("2".into(), "bob_ch"))
            .await
            .unwrap();

        let reply = commands
            .handle(
                &"1".into(),
                Command::Stats {
                    user: Some("@bob".to_string()),
                },
            )
            .await;

        match reply {
            Reply::Stats(card) => {
                assert_eq!(card.title, "bob_ch");
                assert_eq!(card.score.0, 1200);
                assert_eq!(card.url, "https://cryptohack.test/user/bob_ch/");
            }
            other => panic!("expected a stats card, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stats_unknown_user() {
        let (commands, _) = commands(MockApi::default(), MockDirectory::default());

        let reply = text(
            commands
                .handle(
                    &"1".into(),
                    Command::Stats {
                        user: Some("nobody".to_string()),
                    },
                )
                .await,
        );
        assert_eq!(reply, "I don't know who nobody is.");
    }

    #[tokio::test]
    async fn test_stats_remote_failure_is_generic() {
        let (commands, store) = commands(MockApi::default(), MockDirectory::default());
        store
            .upsert(&AccountMapping::new("1".into(), "ghost"))
            .await
            .unwrap();

        let reply = text(commands.handle(&"1".into(), Command::Stats { user: None }).await);
        assert!(reply.starts_with("Oops... couldn't get an answer out of CryptoHack"));
    }

    #[tokio::test]
    async fn test_scoreboard_reply() {
        let (commands, store) = commands(
            MockApi::default()
                .with_score("alice", 100)
                .with_score("bob", 300),
            MockDirectory::default()
                .with("1", "Alice")
                .with("2", "Bob"),
        );
        store
            .upsert(&AccountMapping::new("1".into(), "alice"))
            .await
            .unwrap();
        store
            .upsert(&AccountMapping::new("2".into(), "bob"))
            .await
            .unwrap();

        let lines = commands
            .handle(&"1".into(), Command::Scoreboard)
            .await
            .lines();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("CryptoHack Scoreboard"));
        assert_eq!(lines[1], "1. Bob\t300");
        assert_eq!(lines[2], "2. Alice\t100");
    }

    #[tokio::test]
    async fn test_stats_malformed_score_is_generic() {
        let (commands, store) = commands(
            MockApi::default().with_malformed_score("garbled"),
            MockDirectory::default(),
        );
        store
            .upsert(&AccountMapping::new("1".into(), "garbled"))
            .await
            .unwrap();

        let reply = text(commands.handle(&"1".into(), Command::Stats { user: None }).await);

        assert_eq!(reply, "Oops... something went wrong.");
        assert!(!reply.contains("couldn't get an answer"));
    }

    #[tokio::test]
    async fn test_store_failure_is_generic() {
        let store: Arc<dyn MappingStore> = Arc::new(DownStore);
        let api = Arc::new(MockApi::default().with_token("tok", "alice"));
        let commands = Commands::new(
            LinkService::new(store.clone(), api.clone()),
            ScoreService::new(store, api.clone(), 2),
            Arc::new(MockDirectory::default()),
            DEFAULT_COMMAND_PREFIX,
            10,
        );
        let author: ChatUserId = "1".into();

        for command in [
            Command::Connect {
                token: Some("tok".to_string()),
            },
            Command::Disconnect,
            Command::Stats { user: None },
            Command::Scoreboard,
        ] {
            let reply = text(commands.handle(&author, command).await);
            assert_eq!(reply, "Oops... something went wrong on my end.");
        }

        // only the token redemption reached the remote side
        assert_eq!(api.calls(), vec!["token:tok".to_string()]);
    }

    #[tokio::test]
    async fn test_usage() {
        let (commands, _) = commands(MockApi::default(), MockDirectory::default());

        let reply = text(commands.handle(&"1".into(), Command::Usage).await);
        assert!(reply.starts_with("Invalid command passed."));
    }
}
