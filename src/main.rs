mod bot;
mod config;
mod platform;
mod profiles;
mod relay;
mod server;
mod trigger;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::Bot;
use crate::config::{Config, StorageBackend};
use crate::platform::line::LineClient;
use crate::platform::MessagingApi;
use crate::profiles::table::ProfileTable;
use crate::profiles::ProfileCache;
use crate::relay::BroadcastRelay;
use crate::server::AppState;
use crate::trigger::TriggerListener;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,linerelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Local runs keep the channel credentials in .env
    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {}", path.display());
    }

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Webhook: {}", config.server.bind_addr);
    info!("  API base: {}", config.line.api_base_url);
    info!("  Storage: {}", config.storage.backend);
    if config.trigger.enabled {
        info!("  Trigger: {}", config.trigger.bind_addr);
    } else {
        info!("  Trigger: disabled");
    }

    let profiles = Arc::new(match config.storage.backend {
        StorageBackend::Memory => ProfileCache::in_memory(),
        StorageBackend::Sqlite => {
            ProfileCache::with_table(ProfileTable::open(&config.storage.database_path)?)
        }
    });
    if config.storage.restore_on_startup {
        profiles
            .restore()
            .await
            .context("Failed to restore profiles")?;
    }

    let api: Arc<dyn MessagingApi> = Arc::new(LineClient::new(config.line.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let trigger_task = if config.trigger.enabled {
        let relay = Arc::new(BroadcastRelay::new(profiles.clone(), api.clone()));
        let listener = TriggerListener::bind(config.trigger.clone(), relay).await?;
        Some(listener.spawn(shutdown_rx.clone()))
    } else {
        None
    };

    let bot = Bot::new(api, profiles.clone(), config.replies.clone(), &config.bot);
    let state = AppState {
        bot: Arc::new(bot),
        channel_secret: Arc::from(config.line.channel_secret.as_str()),
    };

    let listener = TcpListener::bind(config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind webhook address {}", config.server.bind_addr))?;

    let mut server_shutdown = shutdown_rx;
    let server = server::serve(listener, state, async move {
        let _ = server_shutdown.changed().await;
    });

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            // Hold the sender so the services keep running
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    if let Some(task) = trigger_task {
        task.await.ok();
    }
    info!("Stopped with {} known users", profiles.count().await);

    Ok(())
}
