//! chatrelay CLI entry point.

use chatrelay::commands::{CommandHandler, ControlSignal};
use chatrelay::config::Config;
use chatrelay::llm::{ChatModelDyn, GeminiModel};
use chatrelay::messaging::{DiscordAdapter, MessagingDyn};
use chatrelay::modules::ModuleRegistry;
use chatrelay::relay::Relay;

use anyhow::Context as _;
use clap::Parser;
use futures::StreamExt as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "Discord bot that relays channel messages to a Gemini chat model")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    init_tracing(cli.debug, &config);

    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    match run(&config).await? {
        ControlSignal::Shutdown => {
            tracing::info!("chatrelay stopped");
        }
        ControlSignal::Restart => {
            tracing::info!("restarting chatrelay");
            restart()?;
        }
    }

    Ok(())
}

/// Run the bot until a shutdown or restart is requested.
async fn run(config: &Config) -> anyhow::Result<ControlSignal> {
    let http_client = reqwest::Client::new();
    let model: Arc<dyn ChatModelDyn> =
        Arc::new(GeminiModel::new(&config.llm).context("failed to initialize Gemini client")?);
    let modules = Arc::new(ModuleRegistry::with_all_loaded());
    let relay = Arc::new(
        Relay::load(config, model.clone(), modules.clone(), http_client)
            .context("failed to load conversation state")?,
    );

    tracing::info!(model = model.name(), "relay initialized");

    let (control_tx, mut control_rx) = tokio::sync::mpsc::channel(4);
    let commands = Arc::new(CommandHandler::new(
        relay.clone(),
        modules.clone(),
        config.discord.owners.clone(),
        config.discord.prefix.clone(),
        control_tx,
    ));

    let adapter: Arc<dyn MessagingDyn> =
        Arc::new(DiscordAdapter::new(config.discord.token.clone(), commands));
    let mut inbound = adapter
        .start()
        .await
        .context("failed to start discord adapter")?;

    if let Err(error) = adapter.health_check().await {
        tracing::warn!(%error, adapter = adapter.name(), "adapter health check failed");
    }

    tracing::info!(adapter = adapter.name(), "chatrelay started");

    let signal = loop {
        tokio::select! {
            message = inbound.next() => {
                let Some(message) = message else {
                    tracing::warn!("inbound stream closed");
                    break ControlSignal::Shutdown;
                };
                if let Some(response) = relay.handle(&message).await
                    && let Err(error) = adapter.respond(&message, response).await
                {
                    tracing::error!(%error, channel_id = %message.channel_id, "failed to deliver reply");
                }
            }
            Some(signal) = control_rx.recv() => {
                tracing::info!(?signal, "control signal received");
                break signal;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break ControlSignal::Shutdown;
            }
        }
    };

    if let Err(error) = adapter.shutdown().await {
        tracing::warn!(%error, "adapter shutdown failed");
    }

    Ok(signal)
}

/// Console logging, plus a daily rolling file when `log_dir` is set.
fn init_tracing(debug: bool, config: &Config) {
    let filter = build_env_filter(debug);
    let console_layer = tracing_subscriber::fmt::layer();

    let file_layer = config.log_dir.as_ref().map(|log_dir| {
        let file_appender = tracing_appender::rolling::daily(log_dir, "chatrelay.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // The writer has to outlive every span, so the guard lives until exit.
        std::mem::forget(guard);
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

/// `RUST_LOG` wins over the `--debug` flag when set.
fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            tracing_subscriber::EnvFilter::new("debug")
        } else {
            tracing_subscriber::EnvFilter::new("info")
        }
    })
}

/// Start a fresh copy of the binary with the same arguments; this process
/// then exits.
fn restart() -> anyhow::Result<()> {
    let executable = std::env::current_exe().context("failed to resolve current executable")?;
    let arguments: Vec<String> = std::env::args().skip(1).collect();

    std::process::Command::new(&executable)
        .args(&arguments)
        .spawn()
        .with_context(|| format!("failed to restart {}", executable.display()))?;

    Ok(())
}
