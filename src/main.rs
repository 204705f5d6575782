mod config;
mod error;
mod fetcher;
mod ingest;
mod notification;
mod platform;
mod vault;
mod web;

#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::fetcher::MediaFetcher;
use crate::ingest::Ingestor;
use crate::platform::green_api::{self, GreenApiClient};
use crate::web::{AppState, ContactsCache};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chatvault=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration, writing the bundled defaults on first run
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/config.toml"));

    config::bootstrap(&config_path, config::DEFAULT_CONFIG)
        .with_context(|| format!("Failed to set up config file {}", config_path.display()))?;

    info!("Loading configuration from: {}", config_path.display());
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    let vault_root = std::env::current_dir()
        .context("Failed to resolve working directory")?
        .join(&config.vault.root);
    std::fs::create_dir_all(&vault_root)
        .with_context(|| format!("Failed to create vault: {}", vault_root.display()))?;

    info!("Configuration loaded successfully");
    info!("  Vault: {}", vault_root.display());
    info!("  Recipients: {}", config.recipients.len());
    info!("  Web: {}", config.web.bind);

    let config = Arc::new(config);
    let client = reqwest::Client::new();

    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&config),
        MediaFetcher::new(client.clone(), vault_root),
    ));
    let api = Arc::new(GreenApiClient::new(client, config.green_api.clone()));

    let state = AppState {
        ingestor: Arc::clone(&ingestor),
        api: Arc::clone(&api),
        contacts: Arc::new(ContactsCache::new(Duration::from_secs(
            config.web.contacts_cache_secs,
        ))),
    };

    let receiver = async {
        if config.green_api.is_configured() {
            green_api::run(api, Arc::clone(&ingestor)).await
        } else {
            warn!("Green API credentials not set; only POST /webhook will receive notifications");
            std::future::pending().await
        }
    };

    let result = tokio::select! {
        result = web::serve(&config.web.bind, state) => result,
        result = receiver => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };

    // Notifications are acknowledged on dispatch, so finish what was started.
    if ingestor.in_flight() > 0 {
        info!("Waiting for {} in-flight ingestions", ingestor.in_flight());
    }
    ingestor.shutdown().await;

    result
}
