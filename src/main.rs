// ABOUTME: Main entry point for the sechat bot
// ABOUTME: Initializes logging and config, logs in to every site, polls until Ctrl+C

use anyhow::{Context, Result};
use clap::Parser;
use sechat::config::Config;
use sechat::store::FileStore;
use sechat::{BotSettings, ChatBot, Credentials, HttpTransport};
use sechat_core::builtins::load_basic_commands;
use sechat_core::Site;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sechat")]
#[command(about = "Chat bot for the Stack Exchange chat network", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.toml (overrides the standard search locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Command trigger prefix
    #[arg(short, long)]
    trigger: Option<String>,

    /// Sites to connect to (repeatable)
    #[arg(short, long = "site")]
    sites: Vec<Site>,

    /// Extra room to join on the first site, or `<site>:<room id>` (repeatable)
    #[arg(short, long = "room")]
    rooms: Vec<String>,
}

fn parse_room_arg(arg: &str, default_site: Site) -> Result<(Site, u64)> {
    match arg.split_once(':') {
        Some((site, room)) => {
            let site: Site = site.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let room = room
                .trim()
                .parse()
                .with_context(|| format!("Invalid room id: {}", room))?;
            Ok((site, room))
        }
        None => {
            let room = arg
                .trim()
                .parse()
                .with_context(|| format!("Invalid room id: {}", arg))?;
            Ok((default_site, room))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting sechat");

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = Config::load_with(cli.config.as_deref(), |config| {
        if let Some(trigger) = cli.trigger.clone() {
            config.bot.trigger = trigger;
        }
        if !cli.sites.is_empty() {
            let list = cli
                .sites
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(",");
            config.set_sites(&list)?;
        }
        let default_site = config
            .sites
            .first()
            .map(|s| s.site)
            .unwrap_or(Site::StackOverflow);
        for arg in &cli.rooms {
            let (site, room) = parse_room_arg(arg, default_site)?;
            config.add_room(site, room);
        }
        Ok(())
    })?;

    tracing::info!(
        email = %config.account.email,
        sites = ?config.sites.iter().map(|s| s.site).collect::<Vec<_>>(),
        trigger = %config.bot.trigger,
        data_dir = %config.storage.data_dir,
        "Configuration loaded"
    );

    let password = config
        .take_password()
        .context("account.password is required")?;
    let credentials = Credentials::new(config.account.email.clone(), password);

    let store = Arc::new(
        FileStore::new(config.data_dir())
            .with_context(|| format!("Failed to open data dir {}", config.storage.data_dir))?,
    );
    let transport = Arc::new(HttpTransport::new(&config.http)?);

    let basic_commands = load_basic_commands(&config.basic_commands_path())
        .context("Failed to read basic commands")?;
    let settings = BotSettings {
        sites: config.sites.iter().map(|s| s.site).collect(),
        dispatcher: config.dispatcher_config(),
        poll_interval: config.poll_interval(),
        basic_commands,
        wotd_feed_url: config.wotd_feed_url().map(str::to_string),
    };
    let bot = ChatBot::new(settings, transport, store, None).context("Failed to build bot")?;

    bot.login(credentials).await.context("Login failed")?;

    let configured: BTreeMap<Site, Vec<u64>> = config
        .sites
        .iter()
        .map(|s| (s.site, s.rooms.clone()))
        .collect();
    bot.join_startup_rooms(&configured)
        .await
        .context("Failed to join startup rooms")?;

    bot.start();
    tracing::info!("Bot ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    bot.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
