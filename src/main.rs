use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use feedrelay::commands::{Command, CommandRequest};
use feedrelay::config::{Config, StoreBackend};
use feedrelay::pipeline::{Daemon, Services};
use feedrelay::remote::chat::HttpPublisher;
use feedrelay::remote::content::HttpContentApi;
use feedrelay::remote::stream::HttpStreamSource;
use feedrelay::store::json::JsonDirStore;
use feedrelay::store::StateStore;

/// feedrelay: republish a live social feed into chat channels.
///
/// Follows a set of upstream accounts over a streaming connection and posts
/// each new post to the chat channels watching that account, folding later
/// reshares into the original preview.
#[derive(Parser)]
#[command(name = "feedrelay", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the state store
    Init,

    /// Run the relay (operator commands are read from stdin)
    Run,

    /// Show what the state store holds
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedrelay=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing feedrelay state store...");
            let config = Config::load()?;
            config.require_store()?;
            init_store(&config).await?;
            println!("State store initialized at: {}", config.store_location());
            println!("\nfeedrelay is ready. Next step: set up your .env file");
            println!("  (see .env.example for required variables)");
            println!("\nThen run: cargo run -- run");
        }

        Commands::Run => {
            let config = Config::load()?;
            config.require_upstream()?;
            config.require_chat()?;
            config.require_store()?;

            let store = open_store(&config).await?;
            let services = Services {
                content: Arc::new(HttpContentApi::new(
                    &config.api_url,
                    token(&config.api_token),
                    config.post_url_base.clone(),
                )?),
                publisher: Arc::new(HttpPublisher::new(
                    &config.chat_api_url,
                    token(&config.chat_token),
                )?),
                stream: Arc::new(HttpStreamSource::new(
                    &config.stream_url,
                    token(&config.api_token),
                )?),
                store,
            };

            let daemon = Daemon::load(services).await?;
            tokio::spawn(read_operator_commands(
                daemon.command_sender(),
                config.operator_channel.clone(),
            ));

            println!(
                "{}",
                format!(
                    "Relay running. Type commands (watch, unwatch, list, color, backfill, requeue, restart); replies go to channel '{}'.",
                    config.operator_channel
                )
                .dimmed()
            );
            daemon
                .run(config.daemon_settings(), shutdown_signal())
                .await?;
        }

        Commands::Status => {
            let config = Config::load()?;
            config.require_store()?;
            let store = open_store(&config).await?;
            feedrelay::status::show(store.as_ref(), &config.store_location()).await?;
        }
    }

    Ok(())
}

fn token(raw: &str) -> Option<String> {
    (!raw.is_empty()).then(|| raw.to_string())
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C, stopping now");
    }
}

/// Forward stdin lines to the daemon as commands issued in `channel`.
async fn read_operator_commands(commands: mpsc::Sender<CommandRequest>, channel: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read operator input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match Command::parse(&line) {
            Ok(command) => {
                let request = CommandRequest {
                    channel: channel.clone(),
                    command,
                };
                if commands.send(request).await.is_err() {
                    break;
                }
            }
            Err(e) => println!("{} {e}", "Error:".red()),
        }
    }
}

/// Create the state store for the configured backend.
async fn init_store(config: &Config) -> Result<Arc<dyn StateStore>> {
    match config.store_backend {
        StoreBackend::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let conn = feedrelay::store::sqlite::initialize(&config.db_path)?;
                let store = feedrelay::store::sqlite::SqliteStore::new(conn);
                println!("Tables created: {}", store.table_count().await?);
                return Ok(Arc::new(store));
            }
            #[cfg(not(feature = "sqlite"))]
            anyhow::bail!("The 'sqlite' feature is not compiled in");
        }
        StoreBackend::Json => Ok(Arc::new(JsonDirStore::open(&config.data_dir)?)),
    }
}

/// Open the existing state store for the configured backend.
async fn open_store(config: &Config) -> Result<Arc<dyn StateStore>> {
    match config.store_backend {
        StoreBackend::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let conn = feedrelay::store::sqlite::open(&config.db_path)?;
                return Ok(Arc::new(feedrelay::store::sqlite::SqliteStore::new(conn)));
            }
            #[cfg(not(feature = "sqlite"))]
            anyhow::bail!("The 'sqlite' feature is not compiled in");
        }
        StoreBackend::Json => Ok(Arc::new(JsonDirStore::open(&config.data_dir)?)),
    }
}
