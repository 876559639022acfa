use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use irc::client::prelude::*;
use irc::proto::CapSubCommand;
use irc::proto::message::Tag;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::chat::SeenChatters;
use crate::commands::Commands;
use crate::db::models::ChatUserId;
use crate::util::env::Env;

const REJOIN_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct IrcSettings {
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub nickname: String,
    pub password: Option<String>,
    pub channels: Vec<String>,
}

impl From<&Env> for IrcSettings {
    fn from(env: &Env) -> Self {
        Self {
            server: env.irc_server.clone(),
            port: env.irc_port,
            use_tls: env.irc_use_tls,
            nickname: env.irc_nickname.clone(),
            password: env.irc_password.clone(),
            channels: env.irc_channels.clone(),
        }
    }
}

/// Who sent a PRIVMSG, from IRCv3 tags where the server provides them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IrcTags {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
}

pub struct IrcConnection {
    pub client: Client,
    pub channels: Vec<String>,
    pub id: Uuid,
}

/// Connects, then reads the message stream until the server goes away, dispatching
/// command-group messages to `commands`.
#[instrument(skip_all, fields(server = %settings.server))]
pub async fn irc_runner(
    settings: IrcSettings,
    commands: Arc<Commands>,
    directory: Arc<SeenChatters>,
) -> IrcResult<tokio::task::JoinHandle<()>> {
    let mut irc_client = IrcConnection::init(&settings).await?;
    irc_client.connect()?;
    let mut stream = irc_client.client.stream()?;

    let handle = tokio::spawn(async move {
        let mut check_interval = tokio::time::interval(REJOIN_INTERVAL);
        check_interval.tick().await;

        loop {
            tokio::select! {
                msg_res = stream.next() => match msg_res {
                    Some(Ok(msg)) => {
                        if let Err(e) = command_parser(&msg, &mut irc_client, &commands, &directory).await {
                            tracing::error!(error = ?e, "failed to handle IRC message");
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = ?e, "IRC stream error");
                        break;
                    }
                    None => {
                        tracing::warn!("IRC stream closed");
                        break;
                    }
                },

                _ = check_interval.tick() => {
                    if let Err(e) = rejoin_channels(&mut irc_client) {
                        tracing::error!(error = ?e, "channel rejoin failure");
                    }
                }
            }
        }
    });

    Ok(handle)
}

impl IrcConnection {
    #[instrument(skip(settings))]
    pub async fn init(settings: &IrcSettings) -> IrcResult<Self> {
        let channels: Vec<String> = settings
            .channels
            .iter()
            .map(|chan| format!("#{}", chan.trim_start_matches('#')))
            .collect();

        tracing::info!(channels = ?channels, "channel list");

        let config = Config {
            use_tls: Some(settings.use_tls),
            nickname: Some(settings.nickname.clone()),
            password: settings.password.clone(),
            server: Some(settings.server.clone()),
            port: Some(settings.port),
            ping_time: Some(300),
            ..Config::default()
        };

        let client = Client::from_config(config).await?;

        Ok(Self {
            client,
            channels,
            id: Uuid::new_v4(),
        })
    }

    #[instrument(skip(self), fields(id = %self.id))]
    pub fn connect(&mut self) -> IrcResult<()> {
        self.client.identify()?;
        self.client.send_cap_req(&[
            TtvCap::Commands.into(),
            TtvCap::Membership.into(),
            TtvCap::Tags.into(),
        ])?;

        Ok(())
    }

    #[instrument(skip(self), fields(id = %self.id))]
    pub fn join_channels(&mut self, channels: Vec<String>) -> IrcResult<()> {
        tracing::info!("sending join");
        self.client.send_join(channels.join(","))?;

        Ok(())
    }

    pub fn get_joined(&self) -> Vec<String> {
        self.client.list_channels().unwrap_or_default()
    }
}

#[instrument(skip(client))]
fn rejoin_channels(client: &mut IrcConnection) -> IrcResult<()> {
    let joined: HashSet<String> = client.get_joined().into_iter().collect();
    let missing: Vec<String> = client
        .channels
        .iter()
        .filter(|c| !joined.contains(*c))
        .cloned()
        .collect();

    if !missing.is_empty() {
        tracing::warn!(missing_count = missing.len(), missing = ?missing, "trying channel rejoin");
        client.join_channels(missing)?;
    }

    Ok(())
}

#[instrument(skip_all)]
pub async fn command_parser(
    msg: &Message,
    client: &mut IrcConnection,
    commands: &Arc<Commands>,
    directory: &SeenChatters,
) -> IrcResult<()> {
    match &msg.command {
        Command::PRIVMSG(_, content) => {
            let tags = parse_tags(msg);
            let Some(nickname) = msg.source_nickname() else {
                tracing::debug!(message = ?msg, "PRIVMSG without a source");
                return Ok(());
            };

            let author = ChatUserId(tags.user_id.unwrap_or_else(|| nickname.to_lowercase()));
            let display_name = tags.display_name.unwrap_or_else(|| nickname.to_string());
            directory.record(&author, &display_name).await;

            let Some(command) = commands.parse(content) else {
                return Ok(());
            };
            let Some(target) = msg.response_target().map(str::to_string) else {
                return Ok(());
            };

            tracing::info!(author = %author, command = ?command, "RX command");

            let commands = Arc::clone(commands);
            let sender = client.client.sender();
            tokio::spawn(async move {
                let reply = commands.handle(&author, command).await;
                for line in reply.lines() {
                    if let Err(e) = sender.send_privmsg(&target, line) {
                        tracing::error!(error = ?e, reply_target = %target, "failed to send reply");
                    }
                }
            });
        }

        Command::CAP(_, result, caps, _) => {
            match result {
                CapSubCommand::ACK => tracing::info!("CAP REQ {:?} ok", caps),
                CapSubCommand::NAK => tracing::warn!("CAP REQ {:?} refused", caps),
                _ => tracing::debug!("unhandled CAP response {:?}", result),
            }

            // servers without twitch capabilities NAK the request; join either way
            if client.get_joined().is_empty() {
                let channels = client.channels.clone();
                client.join_channels(channels)?;
            }
        }

        Command::NOTICE(target, notice) => {
            tracing::warn!("{}: RECV NOTICE: {}", target, notice);
        }

        Command::JOIN(channel, _, _) => {
            if let Some(nick) = msg.source_nickname() {
                tracing::debug!("{}: JOIN {}", nick, channel);
            }
        }

        _ => {
            tracing::trace!(command = ?msg.command, "IRC received generic cmd");
        }
    }

    Ok(())
}

pub fn parse_tags(msg: &Message) -> IrcTags {
    let mut result = IrcTags::default();

    for Tag(key, value) in msg.tags.iter().flatten() {
        match (key.as_str(), value) {
            ("user-id", Some(id)) if !id.is_empty() => result.user_id = Some(id.clone()),
            ("display-name", Some(name)) if !name.is_empty() => {
                result.display_name = Some(name.clone())
            }
            _ => (),
        }
    }

    result
}

pub type IrcResult<T> = core::result::Result<T, IrcClientErr>;

#[derive(Debug, Error)]
pub enum IrcClientErr {
    #[error(transparent)]
    ClientError(#[from] irc::error::Error),
}

#[derive(Debug)]
pub enum TtvCap {
    Tags,
    Commands,
    Membership,
}

impl From<TtvCap> for Capability {
    fn from(value: TtvCap) -> Self {
        match value {
            TtvCap::Tags => Capability::Custom("twitch.tv/tags"),
            TtvCap::Commands => Capability::Custom("twitch.tv/commands"),
            TtvCap::Membership => Capability::Custom("twitch.tv/membership"),
        }
    }
}
