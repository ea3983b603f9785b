#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use statdrill_sync::{Config, HydrationCoordinator, LogNotifier};

/// One-shot hydration pass for a single user, for operating and debugging
/// the sync path outside the application.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statdrill_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let username = match std::env::args().nth(1) {
        Some(name) => name,
        None => anyhow::bail!("usage: statdrill-sync <username>"),
    };

    let config = Config::load().context("Failed to load configuration")?;
    tracing::info!(
        "Configuration loaded for environment: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );
    if !config.hydration_enabled() {
        tracing::warn!("answer sync is disabled, the pass will be a no-op");
    }

    let coordinator = HydrationCoordinator::from_config(&config, None, Arc::new(LogNotifier))
        .await
        .context("Failed to open local answer stores")?;

    if config.hydration_enabled() && !coordinator.probe_health().await {
        tracing::warn!("remote authority health probe failed, trying anyway");
    }

    coordinator.begin_session(&username).await;
    let mut events = coordinator.subscribe();

    let merged = coordinator.hydrate(&username).await;
    if merged {
        if let Ok(event) = events.try_recv() {
            tracing::info!("{}: {}", event.event_name(), event.to_json());
        }
    } else {
        tracing::info!("no answers merged for {}", username);
    }

    if let Some(snapshot) = coordinator
        .export_user(&username)
        .await
        .context("Failed to export local state")?
    {
        println!("{}", snapshot);
    }

    tracing::debug!(
        "{}",
        statdrill_sync::metrics::render_metrics().context("Failed to render metrics")?
    );
    Ok(())
}
