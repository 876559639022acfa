use std::sync::Arc;

use thiserror::Error;

use crate::chat::{ChatDirectory, SeenChatters};
use crate::commands::Commands;
use crate::cryptohack::{CryptoHack, CryptoHackErr};
use crate::db::StoreErr;
use crate::irc::client::{IrcClientErr, IrcSettings, irc_runner};
use crate::link::LinkService;
use crate::scoreboard::ScoreService;
use crate::util::env::{Env, EnvErr};
use crate::util::telemetry::Telemetry;

mod chat;
mod commands;
mod cryptohack;
mod db;
mod irc;
mod link;
mod scoreboard;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Store(#[from] StoreErr),

    #[error(transparent)]
    CryptoHack(#[from] CryptoHackErr),

    #[error(transparent)]
    Irc(#[from] IrcClientErr),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Telemetry(String),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let env = Env::new()?;
    let telemetry = Telemetry::new(
        &env.log_filter,
        &env.service_name,
        env.otel_exporter_otlp_endpoint.as_deref(),
    )
    .map_err(|e| RunnerErr::Telemetry(e.to_string()))?
    .register();

    tracing::info!(backend = ?env.store_backend, "starting cryptohack link bot");

    let store = db::connect(
        env.store_backend,
        env.redis_url.as_deref(),
        env.database_url.as_deref(),
    )
    .await?;
    let api = Arc::new(CryptoHack::new(&env.cryptohack_base_url)?);
    let directory = Arc::new(SeenChatters::default());

    let commands = Arc::new(Commands::new(
        LinkService::new(store.clone(), api.clone()),
        ScoreService::new(store, api, env.scoreboard_concurrency),
        directory.clone() as Arc<dyn ChatDirectory>,
        &env.command_prefix,
        env.scoreboard_limit,
    ));

    let irc_handle = irc_runner(IrcSettings::from(&env), commands, directory).await?;
    let result = irc_handle.await;

    tracing::info!("IRC connection ended, shutting down");
    telemetry.shutdown();

    Ok(result?)
}
