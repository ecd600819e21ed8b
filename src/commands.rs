//! Administrative commands: channel activation, help, module management and
//! process control.

use crate::conversation::DisableOutcome;
use crate::error::CommandError;
use crate::modules::{Module, ModuleRegistry};
use crate::relay::Relay;
use crate::{Embed, EmbedField, OutboundResponse};

use std::sync::Arc;
use tokio::sync::mpsc;

const PERMISSION_DENIED: &str = "⚠️ You don't have permission to execute this command!";
const MANAGE_CHANNELS_REQUIRED: &str =
    "❌ You need the Manage Channels permission to run this command.";

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AiChatUsage,
    AiChatEnable { channel_id: String },
    AiChatDisable,
    Help,
    Ping,
    Load(String),
    Unload(String),
    Reload(String),
    ListModules,
    Shutdown,
    Restart,
}

impl Command {
    /// The module that provides this command, or `None` for built-ins that
    /// are always available.
    pub fn module(&self) -> Option<Module> {
        match self {
            Command::AiChatUsage | Command::AiChatEnable { .. } | Command::AiChatDisable => {
                Some(Module::AiChat)
            }
            Command::Help | Command::Ping => Some(Module::Help),
            Command::Load(_)
            | Command::Unload(_)
            | Command::Reload(_)
            | Command::ListModules
            | Command::Shutdown
            | Command::Restart => None,
        }
    }

    fn owner_only(&self) -> bool {
        self.module().is_none()
    }
}

/// Parse a prefixed text command.
///
/// Returns `None` when the text is not a known command, so it can be relayed
/// as an ordinary message.
pub fn parse(prefix: &str, text: &str) -> Option<Result<Command, CommandError>> {
    let rest = text.trim_start().strip_prefix(prefix)?;
    let mut words = rest.split_whitespace();
    let name = words.next()?.to_ascii_lowercase();

    let required = |argument: Option<&str>, what: &str| {
        argument
            .map(str::to_string)
            .ok_or_else(|| CommandError::MissingArgument(what.into()))
    };

    let command = match name.as_str() {
        "aichat" => match words.next().map(str::to_ascii_lowercase).as_deref() {
            Some("enable") => {
                required(words.next(), "channel").and_then(|channel| {
                    parse_channel_ref(&channel).map(|channel_id| Command::AiChatEnable { channel_id })
                })
            }
            Some("disable") => Ok(Command::AiChatDisable),
            _ => Ok(Command::AiChatUsage),
        },
        "help" => Ok(Command::Help),
        "ping" => Ok(Command::Ping),
        "load" => required(words.next(), "module").map(Command::Load),
        "unload" => required(words.next(), "module").map(Command::Unload),
        "reload" => required(words.next(), "module").map(Command::Reload),
        "listcogs" => Ok(Command::ListModules),
        "shutdown" => Ok(Command::Shutdown),
        "restart" => Ok(Command::Restart),
        _ => return None,
    };

    Some(command)
}

/// Accepts a channel mention (`<#123>`) or a bare numeric id.
pub fn parse_channel_ref(reference: &str) -> Result<String, CommandError> {
    let id = reference
        .strip_prefix("<#")
        .and_then(|inner| inner.strip_suffix('>'))
        .unwrap_or(reference);

    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(id.to_string())
    } else {
        Err(CommandError::InvalidChannel(reference.into()))
    }
}

/// Where a command was invoked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Prefixed text message; replies are posted in the channel.
    Text,
    /// Slash command; replies are ephemeral.
    Slash,
}

/// Who invoked a command and where.
#[derive(Debug, Clone)]
pub struct Invoker {
    pub user_id: String,
    pub channel_id: String,
    pub can_manage_channels: bool,
    /// When the triggering message or interaction was created.
    pub sent_at: chrono::DateTime<chrono::Utc>,
    pub surface: Surface,
}

/// Process-level request raised by a command, acted on by the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Shutdown,
    Restart,
}

/// Result of executing a command. The response is sent before the control
/// signal is raised.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub response: Option<OutboundResponse>,
    pub control: Option<ControlSignal>,
}

impl CommandOutcome {
    fn respond(response: OutboundResponse) -> Self {
        Self {
            response: Some(response),
            control: None,
        }
    }
}

/// Executes commands against the relay and module registry.
pub struct CommandHandler {
    relay: Arc<Relay>,
    modules: Arc<ModuleRegistry>,
    owners: Vec<String>,
    prefix: String,
    control_tx: mpsc::Sender<ControlSignal>,
}

impl CommandHandler {
    pub fn new(
        relay: Arc<Relay>,
        modules: Arc<ModuleRegistry>,
        owners: Vec<String>,
        prefix: impl Into<String>,
        control_tx: mpsc::Sender<ControlSignal>,
    ) -> Self {
        Self {
            relay,
            modules,
            owners,
            prefix: prefix.into(),
            control_tx,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Execute a command for `invoker`.
    pub async fn execute(&self, command: Command, invoker: &Invoker) -> CommandOutcome {
        if let Some(module) = command.module()
            && !self.modules.is_loaded(module).await
        {
            tracing::debug!(?command, %module, "command from unloaded module ignored");
            return match invoker.surface {
                Surface::Text => CommandOutcome::default(),
                Surface::Slash => CommandOutcome::respond(OutboundResponse::Ephemeral(format!(
                    "⚠️ The `{module}` module is not loaded."
                ))),
            };
        }

        if command.owner_only() && !self.owners.contains(&invoker.user_id) {
            tracing::warn!(user_id = %invoker.user_id, ?command, "owner command denied");
            return CommandOutcome::respond(reply(invoker, PERMISSION_DENIED));
        }

        tracing::info!(user_id = %invoker.user_id, ?command, "executing command");

        match command {
            Command::AiChatUsage => CommandOutcome::respond(reply(
                invoker,
                format!(
                    "Usage: `{0}aichat enable #channel` or `{0}aichat disable`",
                    self.prefix
                ),
            )),
            Command::AiChatEnable { channel_id } => self.enable(&channel_id, invoker).await,
            Command::AiChatDisable => self.disable(invoker).await,
            Command::Help => CommandOutcome::respond(OutboundResponse::Embed(help_embed(
                &self.prefix,
            ))),
            Command::Ping => {
                let latency = chrono::Utc::now() - invoker.sent_at;
                CommandOutcome::respond(reply(
                    invoker,
                    format!("🏓 Pong! `{}ms`", latency.num_milliseconds().max(0)),
                ))
            }
            Command::Load(name) => {
                let text = match self.modules.load(&name).await {
                    Ok(module) => format!("Successfully loaded {module}!"),
                    Err(error) => format!("Error while loading `{name}`: `{error}`"),
                };
                CommandOutcome::respond(reply(invoker, text))
            }
            Command::Unload(name) => {
                let text = match self.modules.unload(&name).await {
                    Ok(module) => format!("Successfully unloaded {module}!"),
                    Err(error) => format!("Error while unloading `{name}`: `{error}`"),
                };
                CommandOutcome::respond(reply(invoker, text))
            }
            Command::Reload(name) => {
                let text = match self.reload(&name).await {
                    Ok(module) => format!("Successfully reloaded {module}!"),
                    Err(error) => format!("Error while reloading `{name}`: `{error}`"),
                };
                CommandOutcome::respond(reply(invoker, text))
            }
            Command::ListModules => {
                let loaded = self.modules.loaded().await;
                let text = if loaded.is_empty() {
                    "No modules are currently loaded.".to_string()
                } else {
                    let list = loaded
                        .iter()
                        .map(|module| format!("- {module}"))
                        .collect::<Vec<_>>()
                        .join("\n");
                    format!("Modules currently loaded:\n```\n{list}\n```")
                };
                CommandOutcome::respond(reply(invoker, text))
            }
            Command::Shutdown => CommandOutcome {
                response: Some(reply(invoker, "Shutting down...")),
                control: Some(ControlSignal::Shutdown),
            },
            Command::Restart => CommandOutcome {
                response: Some(reply(invoker, "Restarting bot...")),
                control: Some(ControlSignal::Restart),
            },
        }
    }

    /// Forward a control signal to the main loop.
    pub async fn signal(&self, signal: ControlSignal) {
        tracing::info!(?signal, "control signal raised");
        if self.control_tx.send(signal).await.is_err() {
            tracing::warn!(?signal, "control channel closed, signal dropped");
        }
    }

    async fn enable(&self, channel_id: &str, invoker: &Invoker) -> CommandOutcome {
        if !invoker.can_manage_channels {
            return CommandOutcome::respond(reply(invoker, MANAGE_CHANNELS_REQUIRED));
        }

        let text = match self.relay.enable(channel_id).await {
            Ok(_) => format!("✅ AI chat enabled in <#{channel_id}>."),
            Err(error) => {
                tracing::error!(%error, channel_id, "failed to persist activation registry");
                format!("⚠️ Failed to enable AI chat: {error}")
            }
        };
        CommandOutcome::respond(reply(invoker, text))
    }

    async fn disable(&self, invoker: &Invoker) -> CommandOutcome {
        if !invoker.can_manage_channels {
            return CommandOutcome::respond(reply(invoker, MANAGE_CHANNELS_REQUIRED));
        }

        let text = match self.relay.disable(&invoker.channel_id).await {
            Ok(DisableOutcome::Disabled) => "✅ AI chat disabled in this channel.".to_string(),
            Ok(DisableOutcome::NotActive) => {
                "⚠️ AI chat is not enabled in this channel.".to_string()
            }
            Err(error) => {
                tracing::error!(
                    %error,
                    channel_id = %invoker.channel_id,
                    "failed to persist activation registry"
                );
                format!("⚠️ Failed to disable AI chat: {error}")
            }
        };
        CommandOutcome::respond(reply(invoker, text))
    }

    async fn reload(&self, name: &str) -> crate::Result<Module> {
        let module = self.modules.reloadable(name).await?;
        if module == Module::AiChat {
            self.relay.reload().await?;
        }
        tracing::info!(%module, "module reloaded");
        Ok(module)
    }
}

fn reply(invoker: &Invoker, text: impl Into<String>) -> OutboundResponse {
    match invoker.surface {
        Surface::Text => OutboundResponse::Text(text.into()),
        Surface::Slash => OutboundResponse::Ephemeral(text.into()),
    }
}

/// The command list shown by `help`.
pub fn help_embed(prefix: &str) -> Embed {
    let entries = [
        (format!("{prefix}ping /ping"), "Show the bot's response latency"),
        (format!("{prefix}help /help"), "Show this help"),
        (
            format!("{prefix}aichat enable #channel /aichat enable"),
            "Enable AI chat in a channel (Manage Channels)",
        ),
        (
            format!("{prefix}aichat disable /aichat disable"),
            "Disable AI chat in this channel (Manage Channels)",
        ),
        (format!("{prefix}load [module]"), "Load a module (owners only)"),
        (format!("{prefix}reload [module]"), "Reload a module (owners only)"),
        (format!("{prefix}unload [module]"), "Unload a module (owners only)"),
        (format!("{prefix}listcogs"), "List loaded modules (owners only)"),
        (format!("{prefix}shutdown"), "Stop the bot (owners only)"),
        (format!("{prefix}restart"), "Restart the bot (owners only)"),
    ];

    Embed {
        title: "📖 Help - Commands".into(),
        description: "Available commands.".into(),
        fields: entries
            .into_iter()
            .map(|(name, value)| EmbedField {
                name,
                value: value.into(),
            })
            .collect(),
    }
}
