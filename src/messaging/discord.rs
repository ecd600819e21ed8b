//! Discord messaging adapter using serenity.

use crate::commands::{self, CommandHandler, CommandOutcome, Invoker, Surface};
use crate::error::{CommandError, MessagingError};
use crate::messaging::traits::{InboundStream, Messaging};
use crate::{Attachment, Embed, InboundMessage, MessageContent, OutboundResponse};

use anyhow::Context as _;
use serenity::all::{
    ChannelId, ChannelType, Client, Colour, Command as SlashCommand, CommandDataOptionValue,
    CommandInteraction, CommandOptionType, Context, CreateCommand, CreateCommandOption,
    CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage,
    EventHandler, GatewayIntents, Http, Interaction, Message, MessageId, Ready, ShardManager,
    Timestamp,
};
use serenity::async_trait;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};

/// Discord messages are limited to 2000 characters.
const MAX_MESSAGE_LENGTH: usize = 2000;

/// Discord adapter state.
pub struct DiscordAdapter {
    token: String,
    commands: Arc<CommandHandler>,
    http: Arc<RwLock<Option<Arc<Http>>>>,
    shard_manager: Arc<RwLock<Option<Arc<ShardManager>>>>,
}

impl DiscordAdapter {
    pub fn new(token: impl Into<String>, commands: Arc<CommandHandler>) -> Self {
        Self {
            token: token.into(),
            commands,
            http: Arc::new(RwLock::new(None)),
            shard_manager: Arc::new(RwLock::new(None)),
        }
    }
}

impl Messaging for DiscordAdapter {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&self) -> crate::Result<InboundStream> {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let handler = Handler {
            inbound_tx,
            commands: self.commands.clone(),
        };

        let mut client = Client::builder(&self.token, intents)
            .event_handler(handler)
            .await
            .context("failed to build discord client")?;

        *self.http.write().await = Some(client.http.clone());
        *self.shard_manager.write().await = Some(client.shard_manager.clone());

        tokio::spawn(async move {
            if let Err(error) = client.start().await {
                tracing::error!(%error, "discord gateway stopped");
            }
        });

        let stream = tokio_stream::wrappers::ReceiverStream::new(inbound_rx);
        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        message: &InboundMessage,
        response: OutboundResponse,
    ) -> crate::Result<()> {
        let http = self
            .http
            .read()
            .await
            .clone()
            .ok_or_else(|| MessagingError::NotConnected {
                adapter: "discord".into(),
            })?;

        let channel_id = metadata_id(message, "discord_channel_id")?;
        let message_id = metadata_id(message, "discord_message_id").ok();

        send_response(
            &http,
            ChannelId::new(channel_id),
            message_id.map(MessageId::new),
            response,
        )
        .await
    }

    async fn health_check(&self) -> crate::Result<()> {
        if self.http.read().await.is_none() {
            return Err(MessagingError::NotConnected {
                adapter: "discord".into(),
            }
            .into());
        }
        Ok(())
    }

    async fn shutdown(&self) -> crate::Result<()> {
        if let Some(shard_manager) = self.shard_manager.write().await.take() {
            shard_manager.shutdown_all().await;
        }
        *self.http.write().await = None;

        tracing::info!("discord adapter shut down");
        Ok(())
    }
}

/// Gateway event handler. Commands are answered inline; everything else is
/// forwarded to the inbound stream.
struct Handler {
    inbound_tx: mpsc::Sender<InboundMessage>,
    commands: Arc<CommandHandler>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, user_id = %ready.user.id, "discord connected");

        match SlashCommand::set_global_commands(&ctx.http, slash_commands()).await {
            Ok(registered) => tracing::info!(count = registered.len(), "slash commands synced"),
            Err(error) => tracing::error!(%error, "failed to sync slash commands"),
        }
    }

    async fn message(&self, ctx: Context, message: Message) {
        if message.author.bot {
            return;
        }

        if let Some(parsed) = commands::parse(self.commands.prefix(), &message.content) {
            self.handle_text_command(&ctx, &message, parsed).await;
            return;
        }

        let inbound = to_inbound(&message);
        if let Err(error) = self.inbound_tx.send(inbound).await {
            tracing::warn!(
                %error,
                "failed to send inbound message from Discord (receiver dropped)"
            );
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        let Some(parsed) = parse_slash_command(&command) else {
            tracing::debug!(name = %command.data.name, "unknown slash command");
            return;
        };

        let invoker = Invoker {
            user_id: command.user.id.to_string(),
            channel_id: command.channel_id.to_string(),
            can_manage_channels: command
                .member
                .as_ref()
                .and_then(|member| member.permissions)
                .is_some_and(|permissions| permissions.manage_channels()),
            sent_at: to_utc(command.id.created_at()),
            surface: Surface::Slash,
        };

        let outcome = match parsed {
            Ok(parsed) => self.commands.execute(parsed, &invoker).await,
            Err(error) => CommandOutcome {
                response: Some(OutboundResponse::Ephemeral(format!("⚠️ {error}"))),
                control: None,
            },
        };

        if let Some(response) = outcome.response {
            let reply = CreateInteractionResponse::Message(interaction_message(response));
            if let Err(error) = command.create_response(&ctx.http, reply).await {
                tracing::error!(%error, "failed to answer slash command");
            }
        }
        if let Some(signal) = outcome.control {
            self.commands.signal(signal).await;
        }
    }
}

impl Handler {
    async fn handle_text_command(
        &self,
        ctx: &Context,
        message: &Message,
        parsed: Result<commands::Command, CommandError>,
    ) {
        let invoker = Invoker {
            user_id: message.author.id.to_string(),
            channel_id: message.channel_id.to_string(),
            can_manage_channels: message
                .author_permissions(ctx)
                .is_some_and(|permissions| permissions.manage_channels()),
            sent_at: to_utc(message.timestamp),
            surface: Surface::Text,
        };

        let outcome = match parsed {
            Ok(parsed) => self.commands.execute(parsed, &invoker).await,
            Err(error) => CommandOutcome {
                response: Some(OutboundResponse::Text(format!("⚠️ {error}"))),
                control: None,
            },
        };

        if let Some(response) = outcome.response
            && let Err(error) =
                send_response(&ctx.http, message.channel_id, Some(message.id), response).await
        {
            tracing::error!(%error, channel_id = %message.channel_id, "failed to answer command");
        }
        if let Some(signal) = outcome.control {
            self.commands.signal(signal).await;
        }
    }
}

fn slash_commands() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("aichat")
            .description("Configure AI chat.")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "enable",
                    "Enable AI chat in a channel.",
                )
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::Channel,
                        "channel",
                        "The channel to enable",
                    )
                    .channel_types(vec![ChannelType::Text])
                    .required(true),
                ),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "disable",
                "Disable AI chat in this channel.",
            )),
        CreateCommand::new("help").description("Show the command list."),
        CreateCommand::new("ping").description("Show the bot's response latency."),
    ]
}

fn parse_slash_command(
    command: &CommandInteraction,
) -> Option<Result<commands::Command, CommandError>> {
    let parsed = match command.data.name.as_str() {
        "help" => Ok(commands::Command::Help),
        "ping" => Ok(commands::Command::Ping),
        "aichat" => {
            let Some(subcommand) = command.data.options.first() else {
                return Some(Ok(commands::Command::AiChatUsage));
            };
            match (subcommand.name.as_str(), &subcommand.value) {
                ("enable", CommandDataOptionValue::SubCommand(options)) => options
                    .iter()
                    .find_map(|option| match option.value {
                        CommandDataOptionValue::Channel(channel_id) => {
                            Some(commands::Command::AiChatEnable {
                                channel_id: channel_id.to_string(),
                            })
                        }
                        _ => None,
                    })
                    .ok_or_else(|| CommandError::MissingArgument("channel".into())),
                ("disable", _) => Ok(commands::Command::AiChatDisable),
                _ => Ok(commands::Command::AiChatUsage),
            }
        }
        _ => return None,
    };
    Some(parsed)
}

fn to_inbound(message: &Message) -> InboundMessage {
    let attachments: Vec<Attachment> = message
        .attachments
        .iter()
        .map(|attachment| Attachment {
            filename: attachment.filename.clone(),
            mime_type: attachment.content_type.clone().unwrap_or_default(),
            url: attachment.url.clone(),
        })
        .collect();

    let content = if attachments.is_empty() {
        MessageContent::Text(message.content.clone())
    } else {
        MessageContent::Media {
            text: (!message.content.is_empty()).then(|| message.content.clone()),
            attachments,
        }
    };

    let mut metadata = HashMap::new();
    metadata.insert(
        "discord_channel_id".into(),
        serde_json::Value::from(message.channel_id.get()),
    );
    metadata.insert(
        "discord_message_id".into(),
        serde_json::Value::from(message.id.get()),
    );
    if let Some(guild_id) = message.guild_id {
        metadata.insert(
            "discord_guild_id".into(),
            serde_json::Value::from(guild_id.get()),
        );
    }
    metadata.insert(
        "sender_display_name".into(),
        serde_json::Value::String(message.author.display_name().to_string()),
    );

    InboundMessage {
        id: message.id.to_string(),
        source: "discord".into(),
        channel_id: message.channel_id.to_string(),
        sender_id: message.author.id.to_string(),
        sender_is_bot: message.author.bot,
        content,
        timestamp: to_utc(message.timestamp),
        metadata,
    }
}

fn metadata_id(message: &InboundMessage, key: &str) -> crate::Result<u64> {
    message
        .metadata
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .filter(|id| *id != 0)
        .ok_or_else(|| MessagingError::MissingMetadata { key: key.into() }.into())
}

async fn send_response(
    http: &Arc<Http>,
    channel_id: ChannelId,
    reply_to: Option<MessageId>,
    response: OutboundResponse,
) -> crate::Result<()> {
    let send_error = |error: serenity::Error| MessagingError::SendFailed(error.to_string());

    match response {
        // No ephemeral messages outside interactions, so send in the channel.
        OutboundResponse::Text(text) | OutboundResponse::Ephemeral(text) => {
            for chunk in split_message(&text, MAX_MESSAGE_LENGTH) {
                channel_id.say(http, chunk).await.map_err(send_error)?;
            }
        }
        OutboundResponse::Reply(text) => {
            for (index, chunk) in split_message(&text, MAX_MESSAGE_LENGTH)
                .into_iter()
                .enumerate()
            {
                let mut builder = CreateMessage::new().content(chunk);
                if index == 0
                    && let Some(message_id) = reply_to
                {
                    builder = builder.reference_message((channel_id, message_id));
                }
                channel_id
                    .send_message(http, builder)
                    .await
                    .map_err(send_error)?;
            }
        }
        OutboundResponse::Embed(embed) => {
            channel_id
                .send_message(http, CreateMessage::new().embed(build_embed(embed)))
                .await
                .map_err(send_error)?;
        }
    }

    Ok(())
}

fn interaction_message(response: OutboundResponse) -> CreateInteractionResponseMessage {
    let builder = CreateInteractionResponseMessage::new();
    match response {
        OutboundResponse::Text(text) | OutboundResponse::Reply(text) => {
            builder.content(truncate(&text, MAX_MESSAGE_LENGTH))
        }
        OutboundResponse::Ephemeral(text) => builder
            .content(truncate(&text, MAX_MESSAGE_LENGTH))
            .ephemeral(true),
        OutboundResponse::Embed(embed) => builder.embed(build_embed(embed)).ephemeral(true),
    }
}

fn build_embed(embed: Embed) -> CreateEmbed {
    CreateEmbed::new()
        .title(embed.title)
        .description(embed.description)
        .colour(Colour::BLURPLE)
        .fields(
            embed
                .fields
                .into_iter()
                .map(|field| (field.name, field.value, false)),
        )
}

fn to_utc(timestamp: Timestamp) -> chrono::DateTime<chrono::Utc> {
    *timestamp
}

/// Largest prefix of `text` no longer than `max_len` bytes that ends on a
/// char boundary.
fn truncate(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Split a message into chunks that fit within Discord's length limit.
/// Tries to split at newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let window = truncate(remaining, max_len);
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|index| *index > 0)
            .unwrap_or(window.len());

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}
